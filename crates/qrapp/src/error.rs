use std::net::SocketAddr;

use qrapp_core::local_feed::LocalFeedError;
use thiserror::Error;

/// Failures that stop qrapp from starting or keep a mode from running.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("failed to bind UI server on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
    #[error("UI server stopped: {0}")]
    Serve(#[source] std::io::Error),
    #[error("failed to run cargo: {0}")]
    BuildSpawn(#[source] std::io::Error),
    #[error("cargo build failed with {0}")]
    BuildFailed(std::process::ExitStatus),
    #[error("failed to read built binary {path}: {source}")]
    BuildOutput {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    LocalFeed(#[from] LocalFeedError),
}
