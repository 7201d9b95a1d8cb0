//! objgraphd - shared object-graph daemon.

mod app;
mod config;
mod logging;
mod paths;

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::config::Config;
use crate::paths::Paths;

/// objgraphd command-line interface.
#[derive(Parser)]
#[command(name = "objgraphd")]
#[command(about = "Shared object-graph daemon")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info", global = true)]
    log_level: String,

    /// Base directory for runtime files (socket, config). Defaults to ~/.objgraph
    #[arg(long, global = true)]
    base_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the daemon
    Start {
        /// Also listen on this TCP address (host:port)
        #[arg(long)]
        tcp: Option<SocketAddr>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    logging::init_logging(&cli.log_level);

    let paths = match cli.base_dir {
        Some(base) => Paths::with_base_dir(base),
        None => Paths::new()?,
    };
    let mut config = Config::load(&paths)?;

    // Default to starting when no subcommand is given.
    let tcp_override = match cli.command {
        Some(Commands::Start { tcp }) => tcp,
        None => None,
    };
    if tcp_override.is_some() {
        config.tcp_listen = tcp_override;
    }

    app::run_daemon(config, paths).await
}
