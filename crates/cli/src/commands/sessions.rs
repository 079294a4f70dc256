use std::io::Write;
use std::path::Path;

use snafu::ResultExt;
use tabletalk_storage::{DatasetId, KeyValueStore, SessionRepository};

use crate::error::{CliResult, ForgetTargetSnafu, StdoutSnafu, StorageSnafu, WriteOutputSnafu};
use crate::render::relative_time;

/// Prints stored sessions, most recent first, optionally filtered by name.
pub fn list<S, W>(repository: &SessionRepository<S>, search: Option<&str>, out: &mut W) -> CliResult<()>
where
    S: KeyValueStore,
    W: Write,
{
    let sessions = match search {
        Some(query) => repository.search_sessions(query),
        None => repository.list_sessions(),
    }
    .context(StorageSnafu {
        stage: "list-sessions",
    })?;
    let current = repository.current_dataset_id().context(StorageSnafu {
        stage: "list-current-dataset",
    })?;

    if sessions.is_empty() {
        writeln!(out, "No chat sessions yet.").context(StdoutSnafu {
            stage: "list-print-empty",
        })?;
        return Ok(());
    }

    let now = repository.now_ms();
    for stored in sessions {
        let active = if current.as_ref() == Some(&stored.id) { '*' } else { ' ' };
        writeln!(
            out,
            "{active} {}  {}  {} messages  {}",
            stored.id,
            stored.session.display_name(),
            stored.session.messages.len(),
            relative_time(now, stored.session.last_updated_ms)
        )
        .context(StdoutSnafu {
            stage: "list-print-session",
        })?;
    }

    Ok(())
}

/// Writes the chat export to `out_path`, or to `out` when no path is given.
pub fn export<S, W>(
    repository: &SessionRepository<S>,
    dataset_id: &str,
    out_path: Option<&Path>,
    out: &mut W,
) -> CliResult<()>
where
    S: KeyValueStore,
    W: Write,
{
    let export = repository
        .export_session(&DatasetId::from(dataset_id))
        .context(StorageSnafu {
            stage: "export-session",
        })?;
    let json = export.to_json_pretty().context(StorageSnafu {
        stage: "export-serialize",
    })?;

    match out_path {
        Some(path) => {
            std::fs::write(path, json).context(WriteOutputSnafu {
                stage: "export-write-file",
                path: path.to_path_buf(),
            })?;
            tracing::info!(path = %path.display(), messages = export.messages.len(), "chat exported");
        }
        None => writeln!(out, "{json}").context(StdoutSnafu {
            stage: "export-print",
        })?,
    }

    Ok(())
}

/// Deletes one session, or every session with `all`.
pub fn forget<S, W>(
    repository: &SessionRepository<S>,
    dataset_id: Option<&str>,
    all: bool,
    out: &mut W,
) -> CliResult<()>
where
    S: KeyValueStore,
    W: Write,
{
    if all {
        repository.clear_all().context(StorageSnafu {
            stage: "forget-clear-all",
        })?;
        repository
            .set_current_dataset_id(None)
            .context(StorageSnafu {
                stage: "forget-clear-current",
            })?;
        writeln!(out, "Cleared all chat sessions.").context(StdoutSnafu {
            stage: "forget-print-all",
        })?;
        return Ok(());
    }

    let Some(dataset_id) = dataset_id else {
        return ForgetTargetSnafu {
            stage: "forget-target",
        }
        .fail();
    };
    let dataset_id = DatasetId::from(dataset_id);

    let removed = repository.delete_session(&dataset_id).context(StorageSnafu {
        stage: "forget-delete-session",
    })?;
    let current = repository.current_dataset_id().context(StorageSnafu {
        stage: "forget-current-dataset",
    })?;
    if current.as_ref() == Some(&dataset_id) {
        repository
            .set_current_dataset_id(None)
            .context(StorageSnafu {
                stage: "forget-clear-current",
            })?;
    }

    let line = if removed {
        format!("Deleted chat session {dataset_id}.")
    } else {
        format!("No chat session {dataset_id}.")
    };
    writeln!(out, "{line}").context(StdoutSnafu {
        stage: "forget-print",
    })?;
    Ok(())
}
