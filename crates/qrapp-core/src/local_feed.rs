//! In-process release feed speaking the same JSON shape as the remote one.
//!
//! Serves `/latest.json` plus a single binary so the full update chain can
//! run against a build on the same machine.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use axum::Router;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use log::{debug, info};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use crate::update::{ReleaseAsset, ReleaseDescriptor};

#[derive(Debug, Error)]
pub enum LocalFeedError {
    #[error("failed to bind local feed on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
    #[error("local feed stopped: {0}")]
    Serve(#[source] std::io::Error),
}

/// The one release a [`LocalFeed`] advertises.
#[derive(Debug, Clone)]
pub struct LocalRelease {
    pub version: String,
    pub binary_name: String,
    pub binary: Bytes,
    pub digest: Option<String>,
}

impl LocalRelease {
    #[must_use]
    pub fn new(
        version: impl Into<String>,
        binary_name: impl Into<String>,
        binary: impl Into<Bytes>,
    ) -> Self {
        Self {
            version: version.into(),
            binary_name: binary_name.into(),
            binary: binary.into(),
            digest: None,
        }
    }

    /// Publish the SHA-256 of the served bytes alongside the asset.
    #[must_use]
    pub fn with_sha256_digest(mut self) -> Self {
        let hash = Sha256::digest(&self.binary);
        self.digest = Some(format!("sha256:{hash:x}"));
        self
    }

    /// Publish an arbitrary digest string, whether or not it matches.
    #[must_use]
    pub fn with_digest(mut self, digest: impl Into<String>) -> Self {
        self.digest = Some(digest.into());
        self
    }
}

/// Request counters, shared with the running server.
#[derive(Debug, Clone, Default)]
pub struct LocalFeedStats {
    release_requests: Arc<AtomicUsize>,
    downloads: Arc<AtomicUsize>,
}

impl LocalFeedStats {
    #[must_use]
    pub fn release_requests(&self) -> usize {
        self.release_requests.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn downloads(&self) -> usize {
        self.downloads.load(Ordering::SeqCst)
    }
}

struct FeedState {
    descriptor: ReleaseDescriptor,
    release: LocalRelease,
    stats: LocalFeedStats,
}

pub struct LocalFeed {
    listener: TcpListener,
    local_addr: SocketAddr,
    state: Arc<FeedState>,
}

impl LocalFeed {
    /// Bind `addr` and prepare to serve `release`. Port 0 picks a free port.
    ///
    /// # Errors
    /// Returns an error when the address cannot be bound.
    pub async fn bind(addr: SocketAddr, release: LocalRelease) -> Result<Self, LocalFeedError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| LocalFeedError::Bind { addr, source })?;
        let local_addr = listener
            .local_addr()
            .map_err(|source| LocalFeedError::Bind { addr, source })?;

        let base_url = base_url(local_addr);
        let descriptor = ReleaseDescriptor {
            tag_name: format!("v{}", release.version.trim_start_matches('v')),
            assets: vec![ReleaseAsset {
                name: release.binary_name.clone(),
                browser_download_url: format!("{base_url}/{}", release.binary_name),
                digest: release.digest.clone(),
            }],
        };

        Ok(Self {
            listener,
            local_addr,
            state: Arc::new(FeedState {
                descriptor,
                release,
                stats: LocalFeedStats::default(),
            }),
        })
    }

    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    #[must_use]
    pub fn feed_url(&self) -> String {
        format!("{}/latest.json", base_url(self.local_addr))
    }

    #[must_use]
    pub fn descriptor(&self) -> &ReleaseDescriptor {
        &self.state.descriptor
    }

    #[must_use]
    pub fn stats(&self) -> LocalFeedStats {
        self.state.stats.clone()
    }

    fn router(&self) -> Router {
        Router::new()
            .route("/latest.json", get(latest_release))
            .route("/{file}", get(release_file))
            .with_state(Arc::clone(&self.state))
    }

    /// Serve until the process exits.
    ///
    /// # Errors
    /// Returns an error when accepting connections fails.
    pub async fn serve(self) -> Result<(), LocalFeedError> {
        info!(
            "Serving local release {} at {}",
            self.state.descriptor.tag_name,
            self.feed_url()
        );
        let router = self.router();
        axum::serve(self.listener, router)
            .await
            .map_err(LocalFeedError::Serve)
    }

    /// Serve on a background task.
    #[must_use]
    pub fn spawn(self) -> JoinHandle<Result<(), LocalFeedError>> {
        tokio::spawn(self.serve())
    }
}

async fn latest_release(State(state): State<Arc<FeedState>>) -> Json<ReleaseDescriptor> {
    state.stats.release_requests.fetch_add(1, Ordering::SeqCst);
    debug!("Local feed: release descriptor requested");
    Json(state.descriptor.clone())
}

async fn release_file(State(state): State<Arc<FeedState>>, Path(file): Path<String>) -> Response {
    if file != state.release.binary_name {
        return StatusCode::NOT_FOUND.into_response();
    }

    state.stats.downloads.fetch_add(1, Ordering::SeqCst);
    debug!(
        "Local feed: serving {} ({} bytes)",
        file,
        state.release.binary.len()
    );
    (
        [(header::CONTENT_TYPE, "application/octet-stream")],
        state.release.binary.clone(),
    )
        .into_response()
}

/// Clients cannot connect to `0.0.0.0`, so advertise `localhost` for
/// wildcard binds.
fn base_url(addr: SocketAddr) -> String {
    if addr.ip().is_unspecified() {
        format!("http://localhost:{}", addr.port())
    } else {
        format!("http://{addr}")
    }
}
