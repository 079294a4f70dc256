use std::io::Write;
use std::path::Path;

use snafu::ResultExt;

use crate::error::{CliResult, SettingsSnafu, StdoutSnafu};
use crate::settings::{self, AppSettings, SerializeConfigSnafu};

const MASKED_TOKEN: &str = "********";

/// Prints the effective settings with the API token masked.
pub fn show<W>(config_path: &Path, settings: &AppSettings, out: &mut W) -> CliResult<()>
where
    W: Write,
{
    let mut shown = settings.clone();
    if shown.api_token.is_some() {
        shown.api_token = Some(MASKED_TOKEN.to_string());
    }

    let json = serde_json::to_string_pretty(&shown)
        .context(SerializeConfigSnafu {
            stage: "show-serialize-settings",
        })
        .context(SettingsSnafu {
            stage: "config-show",
        })?;

    writeln!(out, "# {}\n{json}", config_path.display()).context(StdoutSnafu {
        stage: "config-show-print",
    })?;
    Ok(())
}

/// Writes the effective settings to `config_path` so they can be edited.
pub fn init<W>(config_path: &Path, settings: &AppSettings, out: &mut W) -> CliResult<()>
where
    W: Write,
{
    settings::persist(config_path, settings).context(SettingsSnafu {
        stage: "config-init",
    })?;
    writeln!(out, "Wrote settings to {}", config_path.display()).context(StdoutSnafu {
        stage: "config-init-print",
    })?;
    Ok(())
}
