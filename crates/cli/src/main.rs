use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use snafu::ResultExt;
use tabletalk_storage::{SessionRepository, SqliteKvStore};
use tracing_subscriber::EnvFilter;

mod commands;
mod error;
mod render;
mod settings;

use commands::ask::AskOptions;
use error::{CliResult, StorageSnafu};
use settings::AppSettings;

/// Ask questions about a tabular dataset and keep the conversation per dataset.
#[derive(Debug, Parser)]
#[command(name = "tabletalk", version, about, long_about = None)]
struct Cli {
    /// Settings file (defaults to the platform config directory)
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Ask the analysis backend a question
    Ask {
        /// JSON array of row objects to load before asking
        #[arg(long, value_name = "PATH")]
        dataset: Option<PathBuf>,

        /// Name recorded for the dataset (defaults to the file name)
        #[arg(long)]
        filename: Option<String>,

        /// Print only the assembled answer instead of echoing the stream
        #[arg(long)]
        no_stream: bool,

        /// Directory where decoded plots are written
        #[arg(long, value_name = "DIR")]
        save_images: Option<PathBuf>,

        question: String,
    },
    /// List stored chat sessions
    Sessions {
        /// Only sessions whose name contains this text
        #[arg(long)]
        search: Option<String>,
    },
    /// Export one chat session as JSON
    Export {
        dataset_id: String,

        /// Output file (defaults to stdout)
        #[arg(long, value_name = "PATH")]
        out: Option<PathBuf>,
    },
    /// Delete one chat session, or all of them
    Forget {
        #[arg(required_unless_present = "all")]
        dataset_id: Option<String>,

        #[arg(long, conflicts_with = "dataset_id")]
        all: bool,
    },
    /// Inspect or write the settings file
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Debug, Subcommand)]
enum ConfigAction {
    /// Print the effective settings
    Show,
    /// Write the effective settings to the settings file
    Init,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            tracing::debug!(?error, "command failed");
            eprintln!("error: {error}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> CliResult<()> {
    let config_path = cli.config.unwrap_or_else(settings::default_config_path);
    let settings = settings::load(&config_path);
    let mut stdout = std::io::stdout();

    match cli.command {
        Command::Config { action } => match action {
            ConfigAction::Show => commands::config::show(&config_path, &settings, &mut stdout),
            ConfigAction::Init => commands::config::init(&config_path, &settings, &mut stdout),
        },
        Command::Ask {
            dataset,
            filename,
            no_stream,
            save_images,
            question,
        } => {
            let repository = open_repository(&settings).await?;
            let options = AskOptions {
                question,
                dataset,
                filename,
                echo_stream: !no_stream,
                save_images,
            };
            commands::ask::run(&settings, &repository, options).await
        }
        Command::Sessions { search } => {
            let repository = open_repository(&settings).await?;
            commands::sessions::list(&repository, search.as_deref(), &mut stdout)
        }
        Command::Export { dataset_id, out } => {
            let repository = open_repository(&settings).await?;
            commands::sessions::export(&repository, &dataset_id, out.as_deref(), &mut stdout)
        }
        Command::Forget { dataset_id, all } => {
            let repository = open_repository(&settings).await?;
            commands::sessions::forget(&repository, dataset_id.as_deref(), all, &mut stdout)
        }
    }
}

async fn open_repository(settings: &AppSettings) -> CliResult<SessionRepository<SqliteKvStore>> {
    let location = settings.database_path.to_string_lossy();
    let store = SqliteKvStore::open(&location)
        .await
        .context(StorageSnafu {
            stage: "open-session-store",
        })?;
    tracing::debug!(database = store.database_url(), "session store ready");
    Ok(SessionRepository::new(store))
}
