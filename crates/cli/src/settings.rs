use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::{
    Figment,
    providers::{Env, Format, Json, Serialized},
};
use serde::{Deserialize, Serialize};
use snafu::{ResultExt, Snafu};
use tabletalk_protocol::{
    DEFAULT_EXECUTABLE_TOOL, DEFAULT_MAX_LOOKAHEAD_CHARS, DEFAULT_MIN_NARRATIVE_CHARS,
    ProtocolConfig,
};
use tabletalk_storage::IdentityPolicy;
use tabletalk_transport::{
    DEFAULT_CHAT_PATH, DEFAULT_CONNECT_TIMEOUT, DEFAULT_ENDPOINT, DEFAULT_IDLE_TIMEOUT,
    TransportConfig,
};

pub const SETTINGS_DIRECTORY_NAME: &str = "tabletalk";
pub const SETTINGS_FILE_NAME: &str = "settings.json";
pub const DATABASE_FILE_NAME: &str = "sessions.sqlite3";
pub const ENV_PREFIX: &str = "TABLETALK_";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppSettings {
    pub endpoint: String,
    pub chat_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_token: Option<String>,
    pub idle_timeout_secs: u64,
    pub connect_timeout_secs: u64,
    pub max_lookahead_chars: usize,
    pub executable_tool: String,
    pub min_narrative_chars: usize,
    pub identity_policy: IdentityPolicy,
    pub database_path: PathBuf,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            chat_path: DEFAULT_CHAT_PATH.to_string(),
            api_token: None,
            idle_timeout_secs: DEFAULT_IDLE_TIMEOUT.as_secs(),
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT.as_secs(),
            max_lookahead_chars: DEFAULT_MAX_LOOKAHEAD_CHARS,
            executable_tool: DEFAULT_EXECUTABLE_TOOL.to_string(),
            min_narrative_chars: DEFAULT_MIN_NARRATIVE_CHARS,
            identity_policy: IdentityPolicy::default(),
            database_path: default_database_path(),
        }
    }
}

impl AppSettings {
    pub fn normalized(mut self) -> Self {
        let defaults = Self::default();

        self.endpoint = non_blank_or(self.endpoint, defaults.endpoint);
        self.chat_path = non_blank_or(self.chat_path, defaults.chat_path);
        self.api_token = self
            .api_token
            .map(|token| token.trim().to_string())
            .filter(|token| !token.is_empty());
        self.executable_tool = non_blank_or(self.executable_tool, defaults.executable_tool);

        if self.idle_timeout_secs == 0 {
            self.idle_timeout_secs = defaults.idle_timeout_secs;
        }
        if self.connect_timeout_secs == 0 {
            self.connect_timeout_secs = defaults.connect_timeout_secs;
        }
        if self.max_lookahead_chars == 0 {
            self.max_lookahead_chars = defaults.max_lookahead_chars;
        }
        if self.database_path.as_os_str().is_empty() {
            self.database_path = defaults.database_path;
        }

        self
    }

    pub fn transport_config(&self) -> TransportConfig {
        let config = TransportConfig {
            chat_path: self.chat_path.clone(),
            ..TransportConfig::new(self.endpoint.clone())
        }
        .with_idle_timeout(Duration::from_secs(self.idle_timeout_secs))
        .with_connect_timeout(Duration::from_secs(self.connect_timeout_secs));

        match &self.api_token {
            Some(api_token) => config.with_api_token(api_token.clone()),
            None => config,
        }
    }

    pub fn protocol_config(&self) -> ProtocolConfig {
        ProtocolConfig {
            executable_tool: self.executable_tool.clone(),
            max_lookahead_chars: self.max_lookahead_chars,
            min_narrative_chars: self.min_narrative_chars,
            ..ProtocolConfig::default()
        }
    }
}

pub fn default_config_dir() -> PathBuf {
    dirs::config_dir()
        .map(|path| path.join(SETTINGS_DIRECTORY_NAME))
        .unwrap_or_else(|| PathBuf::from(".tabletalk"))
}

pub fn default_config_path() -> PathBuf {
    default_config_dir().join(SETTINGS_FILE_NAME)
}

pub fn default_database_path() -> PathBuf {
    dirs::data_dir()
        .map(|path| path.join(SETTINGS_DIRECTORY_NAME))
        .unwrap_or_else(|| PathBuf::from(".tabletalk"))
        .join(DATABASE_FILE_NAME)
}

/// Defaults, then the JSON file, then `TABLETALK_*` environment variables.
///
/// A missing file means defaults; a file that does not parse is reported and
/// skipped.
pub fn load(config_path: &Path) -> AppSettings {
    let defaults = Figment::from(Serialized::defaults(AppSettings::default()));

    if !config_path.exists() {
        tracing::info!(path = %config_path.display(), "settings file not found, using defaults");
        return extract_or_default(defaults.merge(Env::prefixed(ENV_PREFIX)));
    }

    let layered = defaults
        .clone()
        .merge(Json::file(config_path))
        .merge(Env::prefixed(ENV_PREFIX));
    match layered.extract::<AppSettings>() {
        Ok(settings) => settings.normalized(),
        Err(error) => {
            tracing::warn!(
                path = %config_path.display(),
                %error,
                "failed to parse settings file, using defaults"
            );
            extract_or_default(defaults.merge(Env::prefixed(ENV_PREFIX)))
        }
    }
}

/// Writes settings through a temporary file so readers never see a torn file.
pub fn persist(config_path: &Path, settings: &AppSettings) -> Result<(), SettingsError> {
    if let Some(parent) = config_path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent).context(CreateDirSnafu {
            stage: "create-settings-directory",
            path: parent.to_path_buf(),
        })?;
    }

    let content = serde_json::to_string_pretty(settings).context(SerializeConfigSnafu {
        stage: "serialize-settings-json",
    })?;

    let temp_path = config_path.with_extension("json.tmp");
    std::fs::write(&temp_path, content).context(WriteFileSnafu {
        stage: "write-temporary-settings-file",
        path: temp_path.clone(),
    })?;

    std::fs::rename(&temp_path, config_path).context(RenameTempFileSnafu {
        stage: "rename-temporary-settings-file",
        from: temp_path,
        to: config_path.to_path_buf(),
    })?;

    tracing::info!(path = %config_path.display(), "saved settings");
    Ok(())
}

fn extract_or_default(figment: Figment) -> AppSettings {
    match figment.extract::<AppSettings>() {
        Ok(settings) => settings.normalized(),
        Err(error) => {
            tracing::warn!(%error, "failed to read settings from the environment, using defaults");
            AppSettings::default()
        }
    }
}

fn non_blank_or(value: String, fallback: String) -> String {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        fallback
    } else {
        trimmed.to_string()
    }
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum SettingsError {
    #[snafu(display("failed to create settings directory at {path:?} on `{stage}`: {source}"))]
    CreateDir {
        stage: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("failed to serialize settings on `{stage}`: {source}"))]
    SerializeConfig {
        stage: &'static str,
        source: serde_json::Error,
    },
    #[snafu(display("failed to write settings file at {path:?} on `{stage}`: {source}"))]
    WriteFile {
        stage: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display(
        "failed to replace settings file from {from:?} to {to:?} on `{stage}`: {source}"
    ))]
    RenameTempFile {
        stage: &'static str,
        from: PathBuf,
        to: PathBuf,
        source: std::io::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let temp = tempfile::tempdir().expect("temp dir");
        let settings = load(&temp.path().join("absent.json"));

        assert_eq!(settings.endpoint, DEFAULT_ENDPOINT);
        assert_eq!(settings.idle_timeout_secs, 120);
        assert_eq!(settings.identity_policy, IdentityPolicy::Resume);
    }

    #[test]
    fn file_values_override_defaults_and_are_normalized() {
        let temp = tempfile::tempdir().expect("temp dir");
        let path = temp.path().join(SETTINGS_FILE_NAME);
        std::fs::write(
            &path,
            r#"{
                "endpoint": "  https://analysis.example.test  ",
                "api_token": "   ",
                "idle_timeout_secs": 0,
                "max_lookahead_chars": 500,
                "identity_policy": "fresh_per_upload"
            }"#,
        )
        .expect("write settings");

        let settings = load(&path);
        assert_eq!(settings.endpoint, "https://analysis.example.test");
        assert_eq!(settings.api_token, None);
        assert_eq!(settings.idle_timeout_secs, 120);
        assert_eq!(settings.max_lookahead_chars, 500);
        assert_eq!(settings.identity_policy, IdentityPolicy::FreshPerUpload);
        assert_eq!(settings.chat_path, DEFAULT_CHAT_PATH);
    }

    #[test]
    fn unparsable_file_falls_back_to_defaults() {
        let temp = tempfile::tempdir().expect("temp dir");
        let path = temp.path().join(SETTINGS_FILE_NAME);
        std::fs::write(&path, "{ endpoint: nope").expect("write settings");

        assert_eq!(load(&path).endpoint, DEFAULT_ENDPOINT);
    }

    #[test]
    fn persisted_settings_load_back() {
        let temp = tempfile::tempdir().expect("temp dir");
        let path = temp.path().join("nested").join(SETTINGS_FILE_NAME);
        let settings = AppSettings {
            endpoint: "http://10.0.0.5:9000".to_string(),
            api_token: Some("secret".to_string()),
            ..AppSettings::default()
        };

        persist(&path, &settings).expect("persisted");
        assert!(!path.with_extension("json.tmp").exists());
        assert_eq!(load(&path), settings);
    }

    #[test]
    fn derived_configs_carry_settings() {
        let settings = AppSettings {
            endpoint: "http://backend:8000/".to_string(),
            api_token: Some("t".to_string()),
            idle_timeout_secs: 5,
            executable_tool: "run_sql".to_string(),
            ..AppSettings::default()
        };

        let transport = settings.transport_config();
        assert_eq!(transport.chat_url(), "http://backend:8000/chat/");
        assert_eq!(transport.idle_timeout, Duration::from_secs(5));
        assert_eq!(transport.api_token.as_deref(), Some("t"));

        let protocol = settings.protocol_config();
        assert_eq!(protocol.executable_tool, "run_sql");
        assert_eq!(protocol.max_lookahead_chars, DEFAULT_MAX_LOOKAHEAD_CHARS);
    }
}
