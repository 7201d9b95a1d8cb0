//! Daemon runtime: backend construction, listeners, shutdown.

use std::sync::Arc;

use objgraph_backend::MemoryBackend;
use tokio::sync::broadcast;
use tracing::info;

use crate::config::Config;
use crate::paths::Paths;

/// Run the daemon until a shutdown signal arrives.
pub async fn run_daemon(config: Config, paths: Paths) -> anyhow::Result<()> {
    let backend = Arc::new(MemoryBackend::new());
    let (shutdown_tx, _) = broadcast::channel(1);

    #[cfg(unix)]
    let unix_task = {
        let backend = backend.clone();
        let shutdown = shutdown_tx.subscribe();
        let path = paths.socket_path();
        tokio::spawn(async move { objgraph_server::serve_unix(&path, backend, shutdown).await })
    };

    let tcp_task = config.tcp_listen.map(|addr| {
        let backend = backend.clone();
        let shutdown = shutdown_tx.subscribe();
        tokio::spawn(async move { objgraph_server::serve_tcp(addr, backend, shutdown).await })
    });

    info!("objgraphd started");
    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");
    let _ = shutdown_tx.send(());

    #[cfg(unix)]
    unix_task.await??;
    if let Some(task) = tcp_task {
        task.await??;
    }

    let stats = backend.stats();
    info!(
        nodes = stats.nodes,
        connections = stats.connections,
        "objgraphd stopped"
    );
    Ok(())
}
