use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use image_tagger::tagger::{self, ImageEvent, Outcome, PipelineError};
use image_tagger::Config;
use std::path::PathBuf;
use std::process::ExitCode;
use tokio::io::AsyncReadExt;
use tracing_subscriber::EnvFilter;

/// sysexits: the event may succeed if delivered again.
const EX_TEMPFAIL: u8 = 75;
/// sysexits: the event itself is unusable.
const EX_DATAERR: u8 = 65;

#[derive(Parser, Debug)]
#[command(
    name = "image-tagger",
    version,
    about = "Tag and thumbnail images as they land in a bucket"
)]
struct Cli {
    /// Config file (defaults to the platform config dir)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Handle an object-created notification
    OnCreate {
        /// Event JSON file, or `-` for stdin
        #[arg(long, default_value = "-")]
        event: String,
    },
    /// Handle an object-deleted notification
    OnDelete {
        #[arg(long, default_value = "-")]
        event: String,
    },
    /// Route a notification by its `bucketObjectEventKind`
    Dispatch {
        #[arg(long, default_value = "-")]
        event: String,
    },
    /// Inspect configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Print the JSON schema of the config file
    Schema,
    /// Print the effective configuration as TOML
    Show,
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
        Err(err) => {
            eprintln!("error: {err:#}");
            match err.downcast_ref::<PipelineError>() {
                Some(pipeline) if pipeline.is_retryable() => ExitCode::from(EX_TEMPFAIL),
                Some(_) => ExitCode::from(EX_DATAERR),
                None => ExitCode::FAILURE,
            }
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = Config::load(cli.config.as_deref())?;

    let (source, handler): (&str, Handler) = match &cli.command {
        Command::OnCreate { event } => (event.as_str(), Handler::Create),
        Command::OnDelete { event } => (event.as_str(), Handler::Delete),
        Command::Dispatch { event } => (event.as_str(), Handler::Dispatch),
        Command::Config { action } => {
            match action {
                ConfigAction::Schema => println!("{}", Config::schema_json()?),
                ConfigAction::Show => {
                    let rendered =
                        toml::to_string_pretty(&config).context("Failed to render config")?;
                    print!("{rendered}");
                }
            }
            return Ok(());
        }
    };

    let event = read_event(source).await?;
    let router = tagger::from_config(&config)?;
    let outcome = match handler {
        Handler::Create => router.on_create(&event).await?,
        Handler::Delete => router.on_delete(&event).await?,
        Handler::Dispatch => router.dispatch(&event).await?,
    };
    println!("{}", render_outcome(&outcome));
    Ok(())
}

enum Handler {
    Create,
    Delete,
    Dispatch,
}

async fn read_event(source: &str) -> Result<ImageEvent> {
    let raw = if source == "-" {
        let mut buf = String::new();
        tokio::io::stdin()
            .read_to_string(&mut buf)
            .await
            .context("Failed to read event from stdin")?;
        buf
    } else {
        tokio::fs::read_to_string(source)
            .await
            .with_context(|| format!("Failed to read event file {source}"))?
    };
    serde_json::from_str(&raw)
        .map_err(|e| PipelineError::InvalidInput(format!("malformed event: {e}")).into())
}

fn render_outcome(outcome: &Outcome) -> serde_json::Value {
    match outcome {
        Outcome::Saved { key, record } => serde_json::json!({
            "status": "saved",
            "key": key,
            "record": record,
        }),
        Outcome::Deleted { key } => serde_json::json!({ "status": "deleted", "key": key }),
        Outcome::NoRecord => serde_json::json!({ "status": "no_record" }),
        Outcome::Rejected(reason) => serde_json::json!({
            "status": "rejected",
            "reason": reason.to_string(),
        }),
    }
}
