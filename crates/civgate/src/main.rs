//! `civgate-server`: runs a civgate server with a command console on stdin.

use std::path::PathBuf;

use civgate::{CivgateError, CivgateServerBuilder, ConsoleHandle, ServerConfig};
use civgate_session::AllowAll;
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Debug, Parser)]
#[command(name = "civgate-server", version, about = "civgate connection and session server")]
struct Args {
    /// TOML config file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Address to listen on; overrides the config file.
    #[arg(short, long)]
    bind: Option<String>,
}

/// `RUST_LOG` wins over the configured level.
fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false))
        .init();
}

#[tokio::main]
async fn main() -> Result<(), CivgateError> {
    let args = Args::parse();
    let mut config = match &args.config {
        Some(path) => ServerConfig::load(path)?,
        None => ServerConfig::default(),
    };
    if let Some(bind) = args.bind {
        config.network.bind = bind;
    }
    init_logging(&config.logging.level);

    let server = CivgateServerBuilder::from_config(&config)?
        .build(AllowAll)
        .await?;
    match server.local_addr() {
        Ok(addr) => tracing::info!(%addr, "listening"),
        Err(e) => tracing::warn!(error = %e, "local address unknown"),
    }

    tokio::spawn(run_console(server.console()));
    server.run().await
}

/// Reads commands from stdin until it closes. A leading `/` is optional.
async fn run_console(console: ConsoleHandle) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                tracing::warn!(error = %e, "console read failed");
                break;
            }
        };
        let line = line.trim();
        let line = line.strip_prefix('/').unwrap_or(line);
        if line.is_empty() {
            continue;
        }
        match console.execute(line).await {
            Ok(outcome) => {
                for message in outcome.messages {
                    println!("{message}");
                }
            }
            Err(e) => {
                tracing::error!(error = %e, "console command failed");
                break;
            }
        }
    }
    tracing::debug!("console closed");
}
