use std::io::Write;
use std::path::{Path, PathBuf};

use serde_json::Value;
use snafu::ResultExt;
use tabletalk_protocol::{ImagePreview, ImageResource, MessageAssembler, StructuredMessage};
use tabletalk_storage::{
    ChatMessage, ChatSession, DatasetId, DatasetProfile, IdentityPolicy, KeyValueStore,
    SessionRepository, derive_dataset_id, parse_rows,
};
use tabletalk_transport::{
    CancellationToken, ChatRequest, StreamOutcome, StreamTransport, TransportError,
    TransportResult,
};

use crate::error::{
    CliError, CliResult, ReadDatasetSnafu, StdoutSnafu, StorageSnafu, TransportSnafu,
    WriteOutputSnafu,
};
use crate::render::render_message;
use crate::settings::AppSettings;

#[derive(Debug, Clone, Default)]
pub struct AskOptions {
    pub question: String,
    pub dataset: Option<PathBuf>,
    pub filename: Option<String>,
    pub echo_stream: bool,
    pub save_images: Option<PathBuf>,
}

/// Session the question belongs to, if any dataset is loaded.
#[derive(Debug, Clone)]
pub struct ActiveSession {
    pub dataset_id: DatasetId,
    pub session: ChatSession,
    pub created: bool,
}

pub async fn run<S>(
    settings: &AppSettings,
    repository: &SessionRepository<S>,
    options: AskOptions,
) -> CliResult<()>
where
    S: KeyValueStore,
{
    let mut stdout = std::io::stdout();
    let active = resolve_session(
        repository,
        options.dataset.as_deref(),
        options.filename.clone(),
        settings.identity_policy,
    )?;

    if let Some(active) = &active
        && active.created
        && let Some(welcome) = active.session.messages.first()
    {
        writeln!(stdout, "{}\n", welcome.message.text).context(StdoutSnafu {
            stage: "ask-print-welcome",
        })?;
    }

    let rows = match &active {
        Some(active) => {
            repository
                .append_message(&active.dataset_id, ChatMessage::user(options.question.clone()))
                .context(StorageSnafu {
                    stage: "ask-append-question",
                })?;
            active.session.dataset.clone()
        }
        None => {
            tracing::info!("no dataset loaded, asking without one");
            Vec::new()
        }
    };

    let transport = StreamTransport::new(settings.transport_config()).context(TransportSnafu {
        stage: "ask-build-transport",
    })?;
    let request = ChatRequest::new(options.question.clone()).with_dataset(rows);
    let protocol = settings.protocol_config();

    let cancel = CancellationToken::new();
    spawn_interrupt_watcher(cancel.clone());
    let streamed = stream_answer(&transport, &request, cancel.clone(), options.echo_stream).await;
    // The stream is over; from here an interrupt exits instead of cancelling.
    cancel.cancel();

    let dataset_id = active.as_ref().map(|active| &active.dataset_id);
    match streamed {
        Ok(StreamOutcome::Completed(text)) => {
            let assembly = MessageAssembler::new(protocol.clone()).assemble(&text);
            if !assembly.unpaired.is_empty() {
                tracing::info!(
                    unpaired = assembly.unpaired.len(),
                    "executing markers without a matching code block"
                );
            }

            let message = ChatMessage::assistant(assembly.message);
            writeln!(
                stdout,
                "\n{}",
                render_message(&message.message, protocol.min_narrative_chars)
            )
            .context(StdoutSnafu {
                stage: "ask-print-answer",
            })?;

            if let Some(directory) = &options.save_images {
                for path in save_images(directory, &message.id.to_string(), &message.message.images)? {
                    tracing::info!(path = %path.display(), "plot saved");
                }
            }
            record_reply(repository, dataset_id, message)
        }
        Ok(StreamOutcome::Cancelled(partial)) => {
            writeln!(stdout, "\n[cancelled]").context(StdoutSnafu {
                stage: "ask-print-cancelled",
            })?;
            if partial.trim().is_empty() {
                return Ok(());
            }
            record_reply(
                repository,
                dataset_id,
                ChatMessage::assistant(StructuredMessage::narrative(partial)),
            )
        }
        Err(error) => Err(record_failure(repository, dataset_id, error)),
    }
}

/// Stores the failure notice in the session and returns the transport error.
///
/// A storage failure here is only logged so the caller still sees why the
/// request failed.
fn record_failure<S>(
    repository: &SessionRepository<S>,
    dataset_id: Option<&DatasetId>,
    error: TransportError,
) -> CliError
where
    S: KeyValueStore,
{
    let notice = format!("❌ {}", error.user_message());
    if let Err(storage_error) = record_reply(
        repository,
        dataset_id,
        ChatMessage::assistant(StructuredMessage::narrative(notice)),
    ) {
        tracing::warn!(error = %storage_error, "failed to store the error notice");
    }

    CliError::Transport {
        stage: "ask-stream-answer",
        source: error,
    }
}

/// Loads the dataset file into a new or resumed session, or falls back to
/// the session that was active last.
pub fn resolve_session<S>(
    repository: &SessionRepository<S>,
    dataset_path: Option<&Path>,
    filename: Option<String>,
    policy: IdentityPolicy,
) -> CliResult<Option<ActiveSession>>
where
    S: KeyValueStore,
{
    let Some(path) = dataset_path else {
        let current = repository.current_dataset_id().context(StorageSnafu {
            stage: "resolve-current-dataset",
        })?;
        let Some(dataset_id) = current else {
            return Ok(None);
        };
        let session = repository.get_session(&dataset_id).context(StorageSnafu {
            stage: "resolve-load-current-session",
        })?;
        return Ok(session.map(|session| ActiveSession {
            dataset_id,
            session,
            created: false,
        }));
    };

    let raw = std::fs::read_to_string(path).context(ReadDatasetSnafu {
        stage: "resolve-read-dataset",
        path: path.to_path_buf(),
    })?;
    let rows = parse_rows(&raw).context(StorageSnafu {
        stage: "resolve-parse-dataset",
    })?;
    let filename = filename.or_else(|| {
        path.file_name()
            .map(|name| name.to_string_lossy().into_owned())
    });
    let dataset_id = derive_dataset_id(&rows, filename.as_deref(), policy, repository.now_ms())
        .context(StorageSnafu {
            stage: "resolve-derive-dataset-id",
        })?;

    let existing = repository.get_session(&dataset_id).context(StorageSnafu {
        stage: "resolve-load-session",
    })?;
    let (session, created) = match existing {
        Some(session) => {
            tracing::info!(
                dataset_id = %dataset_id,
                messages = session.messages.len(),
                "resuming chat session"
            );
            (session, false)
        }
        None => {
            let profile =
                serde_json::to_value(DatasetProfile::from_rows(&rows)).unwrap_or(Value::Null);
            let session = repository
                .save_session(&dataset_id, ChatSession::for_dataset(rows, filename, profile))
                .context(StorageSnafu {
                    stage: "resolve-create-session",
                })?;
            (session, true)
        }
    };

    repository
        .set_current_dataset_id(Some(&dataset_id))
        .context(StorageSnafu {
            stage: "resolve-set-current",
        })?;

    Ok(Some(ActiveSession {
        dataset_id,
        session,
        created,
    }))
}

async fn stream_answer(
    transport: &StreamTransport,
    request: &ChatRequest,
    cancel: CancellationToken,
    echo_stream: bool,
) -> TransportResult<StreamOutcome> {
    let session = tokio::select! {
        opened = transport.open(request) => opened?,
        _ = cancel.cancelled() => return Ok(StreamOutcome::Cancelled(String::new())),
    };

    let mut stdout = std::io::stdout();
    let mut printed = 0;
    let mut preview = ImagePreview::new();
    session
        .with_cancel_token(cancel)
        .run(|text| {
            if echo_stream {
                // Echo failures are ignored; the assembled answer is printed below.
                let _ = stdout
                    .write_all(text[printed..].as_bytes())
                    .and_then(|()| stdout.flush());
            }
            printed = text.len();

            if preview.update(text) > 0 {
                tracing::info!(images = preview.seen(), "plot received");
            }
        })
        .await
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InterruptAction {
    CancelStream,
    Exit,
}

/// First interrupt cancels a running stream; any later one exits.
fn interrupt_action(cancel: &CancellationToken) -> InterruptAction {
    if cancel.is_cancelled() {
        InterruptAction::Exit
    } else {
        InterruptAction::CancelStream
    }
}

/// Listening for Ctrl-C disables the default SIGINT exit for the rest of the
/// process, so the watcher stays alive and exits itself once the stream is
/// no longer running.
fn spawn_interrupt_watcher(cancel: CancellationToken) {
    tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            match interrupt_action(&cancel) {
                InterruptAction::CancelStream => {
                    tracing::debug!("interrupt received, cancelling the stream");
                    cancel.cancel();
                }
                InterruptAction::Exit => {
                    tracing::debug!("interrupt received, exiting");
                    std::process::exit(130);
                }
            }
        }
    });
}

fn record_reply<S>(
    repository: &SessionRepository<S>,
    dataset_id: Option<&DatasetId>,
    message: ChatMessage,
) -> CliResult<()>
where
    S: KeyValueStore,
{
    let Some(dataset_id) = dataset_id else {
        return Ok(());
    };
    repository
        .append_message(dataset_id, message)
        .context(StorageSnafu {
            stage: "ask-append-reply",
        })?;
    Ok(())
}

fn save_images(
    directory: &Path,
    stem: &str,
    images: &[ImageResource],
) -> CliResult<Vec<PathBuf>> {
    if images.is_empty() {
        return Ok(Vec::new());
    }

    std::fs::create_dir_all(directory).context(WriteOutputSnafu {
        stage: "save-images-create-directory",
        path: directory.to_path_buf(),
    })?;

    let mut saved = Vec::with_capacity(images.len());
    for (index, image) in images.iter().enumerate() {
        let bytes = match image.decode() {
            Ok(bytes) => bytes,
            Err(error) => {
                tracing::warn!(index, %error, "skipping image with a malformed payload");
                continue;
            }
        };
        let extension = image
            .mime_type
            .rsplit('/')
            .next()
            .filter(|extension| !extension.is_empty())
            .unwrap_or("bin");
        let path = directory.join(format!("{stem}-{}.{extension}", index + 1));
        std::fs::write(&path, bytes).context(WriteOutputSnafu {
            stage: "save-images-write",
            path: path.clone(),
        })?;
        saved.push(path);
    }

    Ok(saved)
}
