use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::time::{Instant, Sleep};

/// Deadline that fires after a window with no activity.
///
/// Completes once `window` has passed since the last [`reset`](Self::reset).
/// Dropping the timer cancels it.
#[derive(Debug)]
pub struct InactivityTimer {
    window: Duration,
    last_activity: Instant,
    deadline: Pin<Box<Sleep>>,
}

impl InactivityTimer {
    /// Arms the timer. Must be called from within a tokio runtime.
    pub fn new(window: Duration) -> Self {
        let now = Instant::now();
        Self {
            window,
            last_activity: now,
            deadline: Box::pin(tokio::time::sleep_until(now + window)),
        }
    }

    /// Records activity and pushes the deadline a full window forward.
    pub fn reset(&mut self) {
        self.last_activity = Instant::now();
        self.deadline.as_mut().reset(self.last_activity + self.window);
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn last_activity(&self) -> Instant {
        self.last_activity
    }

    pub fn is_elapsed(&self) -> bool {
        self.deadline.is_elapsed()
    }
}

impl Future for InactivityTimer {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.deadline.as_mut().poll(cx)
    }
}
