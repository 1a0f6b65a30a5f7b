use std::path::Path;

use thiserror::Error;

use crate::auto_update::InstallError;

#[derive(Debug, Error)]
pub enum UpdateError {
    #[error("failed to build update HTTP client: {0}")]
    Client(#[source] reqwest::Error),
    #[error("release feed {url} is unreachable: {source}")]
    FeedUnreachable {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("release feed {url} answered HTTP {status}{body_snippet}")]
    FeedStatus {
        url: String,
        status: reqwest::StatusCode,
        body_snippet: String,
    },
    #[error("release feed {url} returned malformed release data: {source}")]
    FeedMalformed {
        url: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid version: {0}")]
    VersionMalformed(String),
    #[error("failed to create temporary download file: {0}")]
    TempFile(#[source] std::io::Error),
    #[error("download of {url} failed: {source}")]
    DownloadFailed {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("download of {url} failed with HTTP {status}")]
    DownloadStatus {
        url: String,
        status: reqwest::StatusCode,
    },
    #[error("failed to write download to {path}: {source}")]
    DownloadWrite {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("checksum mismatch for {asset}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        asset: String,
        expected: String,
        actual: String,
    },
    #[error("failed to mark {path} as executable: {source}")]
    PermissionSetFailed {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to locate the running executable: {0}")]
    CurrentExe(#[source] std::io::Error),
    #[error("failed to replace {target}: {source}")]
    ReplaceFailed {
        target: String,
        #[source]
        source: InstallError,
    },
    #[error("failed to relaunch {path}: {source}")]
    RestartFailed {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl UpdateError {
    pub(crate) fn download_write(path: &Path, source: std::io::Error) -> Self {
        Self::DownloadWrite {
            path: path.display().to_string(),
            source,
        }
    }

    /// Pipeline stage the error belongs to, used to tag log lines.
    #[must_use]
    pub fn stage(&self) -> &'static str {
        match self {
            Self::Client(_)
            | Self::FeedUnreachable { .. }
            | Self::FeedStatus { .. }
            | Self::FeedMalformed { .. } => "feed",
            Self::VersionMalformed(_) => "version",
            Self::TempFile(_)
            | Self::DownloadFailed { .. }
            | Self::DownloadStatus { .. }
            | Self::DownloadWrite { .. }
            | Self::ChecksumMismatch { .. } => "download",
            Self::PermissionSetFailed { .. } => "permissions",
            Self::CurrentExe(_) | Self::ReplaceFailed { .. } => "replace",
            Self::RestartFailed { .. } => "restart",
        }
    }

    /// Whether the failure came from the network rather than local state.
    #[must_use]
    pub fn is_network(&self) -> bool {
        matches!(
            self,
            Self::FeedUnreachable { .. }
                | Self::FeedStatus { .. }
                | Self::DownloadFailed { .. }
                | Self::DownloadStatus { .. }
        )
    }
}
