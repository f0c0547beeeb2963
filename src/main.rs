use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use config::{load_user_config, resolve, Overrides};
use controller::Exit;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use url::Url;

mod config;
mod controller;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// JSON config file (default: ./audit-gate.json when present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Execute npm audit and fail on advisories that are not ignored
    Audit {
        /// Vulnerability IDs to ignore, comma separated (e.g. "534,118")
        #[arg(short, long, value_name = "IDS")]
        ignore: Option<String>,
        /// The registry to be used for the audit
        #[arg(short, long, value_name = "NPM_REGISTRY_URL")]
        registry: Option<Url>,
        /// Ask npm for its JSON report instead of scraping the text one
        #[arg(long)]
        json: bool,
        /// Give up after this many seconds
        #[arg(long, value_name = "SECS")]
        timeout: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    //logging
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    let Commands::Audit {
        ignore,
        registry,
        json,
        timeout,
    } = args.command;
    let overrides = Overrides {
        ignore,
        registry,
        json,
        timeout_secs: timeout,
    };

    let config = match load_user_config(args.config.as_deref())
        .and_then(|user| resolve(user, overrides))
    {
        Ok(config) => config,
        Err(e) => {
            error!("{:#}", e);
            return Exit::Error.into();
        }
    };

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupted, stopping audit");
            on_interrupt.cancel();
        }
    });

    controller::audit(config, cancel).await.into()
}
