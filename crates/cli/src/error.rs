use std::path::PathBuf;

use snafu::Snafu;
use tabletalk_storage::StorageError;
use tabletalk_transport::TransportError;

use super::settings::SettingsError;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum CliError {
    #[snafu(display("failed to read dataset file {path:?} on `{stage}`: {source}"))]
    ReadDataset {
        stage: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("failed to write {path:?} on `{stage}`: {source}"))]
    WriteOutput {
        stage: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("failed to write to stdout on `{stage}`: {source}"))]
    Stdout {
        stage: &'static str,
        source: std::io::Error,
    },
    #[snafu(display("storage failed on `{stage}`: {source}"))]
    Storage {
        stage: &'static str,
        source: StorageError,
    },
    #[snafu(display("{}", source.user_message()))]
    Transport {
        stage: &'static str,
        source: TransportError,
    },
    #[snafu(display("settings failed on `{stage}`: {source}"))]
    Settings {
        stage: &'static str,
        source: SettingsError,
    },
    #[snafu(display("nothing to forget: pass a dataset id or --all"))]
    ForgetTarget { stage: &'static str },
}

pub type CliResult<T> = Result<T, CliError>;
