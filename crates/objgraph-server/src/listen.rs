//! Transport listeners.
//!
//! Each listener accepts connections until the shutdown signal fires and
//! spawns one [`run_connection`] task per accept.

use std::io;
use std::net::SocketAddr;
#[cfg(unix)]
use std::path::Path;
use std::sync::Arc;

use objgraph_backend::Backend;
use tokio::net::TcpListener;
#[cfg(unix)]
use tokio::net::UnixListener;
use tokio::sync::broadcast;
use tracing::{error, info};

use crate::connection::run_connection;

/// Listen on a Unix domain socket.
///
/// A stale socket file at `path` is unlinked first; the file is removed
/// again on shutdown.
#[cfg(unix)]
pub async fn serve_unix(
    path: &Path,
    backend: Arc<dyn Backend>,
    mut shutdown: broadcast::Receiver<()>,
) -> io::Result<()> {
    if path.exists() {
        std::fs::remove_file(path)?;
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let listener = UnixListener::bind(path)?;
    info!(path = %path.display(), "listening on unix socket");

    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, _)) => {
                    tokio::spawn(run_connection(stream, backend.clone()));
                }
                Err(err) => error!(error = %err, "accept failed"),
            },
            _ = shutdown.recv() => {
                info!("unix listener shutting down");
                break;
            }
        }
    }

    let _ = std::fs::remove_file(path);
    Ok(())
}

/// Listen on a TCP socket.
pub async fn serve_tcp(
    addr: SocketAddr,
    backend: Arc<dyn Backend>,
    mut shutdown: broadcast::Receiver<()>,
) -> io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!(addr = %listener.local_addr()?, "listening on tcp");

    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    info!(peer = %peer, "tcp connection accepted");
                    tokio::spawn(run_connection(stream, backend.clone()));
                }
                Err(err) => error!(error = %err, "accept failed"),
            },
            _ = shutdown.recv() => {
                info!("tcp listener shutting down");
                break;
            }
        }
    }
    Ok(())
}
