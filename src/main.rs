//! chimed - replicated timer service node

#![deny(clippy::expect_used, clippy::unwrap_used)]

use chime::config::Config;
use chime::timer::NodeId;
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Replicated timer service node
#[derive(Parser, Debug)]
#[command(name = "chimed", version)]
struct Cli {
    /// TOML configuration file. Defaults apply when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Address the HTTP server binds to
    #[arg(short, long)]
    bind: Option<SocketAddr>,

    /// `host:port` peers use to reach this node
    #[arg(short, long)]
    advertise: Option<String>,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("chime=info")))
        .init();

    let cli = Cli::parse();
    let mut config = match cli.config {
        Some(path) => match Config::load(&path) {
            Ok(config) => config,
            Err(err) => {
                error!(path = %path.display(), error = %err, "Cannot load configuration");
                return ExitCode::FAILURE;
            }
        },
        None => Config::default(),
    };
    if let Some(bind) = cli.bind {
        config.node.bind_address = bind;
    }
    if let Some(advertise) = cli.advertise {
        config.node.advertise = NodeId::from(advertise);
    }

    let shutdown = async {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Ctrl-C received, shutting down");
        }
    };

    match chime::server::run(config, shutdown).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(error = %err, "Node stopped with an error");
            ExitCode::FAILURE
        }
    }
}
