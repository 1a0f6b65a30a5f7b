use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use semver::Version;
use serde::{Deserialize, Serialize};

use crate::error::UpdateError;

/// Version reported by builds without `QRAPP_VERSION`.
pub const DEV_VERSION: &str = "dev";

pub const LOCAL_FEED_PORT: u16 = 9090;
pub const DEFAULT_FEED_OWNER: &str = "chrisblk";
pub const DEFAULT_FEED_REPO: &str = "qrcodeapp";

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseAsset {
    pub name: String,
    pub browser_download_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,
}

impl ReleaseAsset {
    /// Lowercase hex SHA-256 from a GitHub style `sha256:<hex>` digest.
    #[must_use]
    pub fn sha256(&self) -> Option<String> {
        parse_sha256_digest(self.digest.as_deref()?)
    }
}

/// GitHub-compatible release object, reduced to the fields the update flow
/// reads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseDescriptor {
    pub tag_name: String,
    #[serde(default)]
    pub assets: Vec<ReleaseAsset>,
}

impl ReleaseDescriptor {
    #[must_use]
    pub fn version(&self) -> &str {
        strip_v_prefix(&self.tag_name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedMode {
    Remote { owner: String, repo: String },
    Local { port: u16 },
}

impl FeedMode {
    #[must_use]
    pub fn feed_url(&self) -> String {
        match self {
            Self::Remote { owner, repo } => {
                format!("https://api.github.com/repos/{owner}/{repo}/releases/latest")
            }
            Self::Local { port } => format!("http://localhost:{port}/latest.json"),
        }
    }
}

impl Default for FeedMode {
    fn default() -> Self {
        Self::Remote {
            owner: DEFAULT_FEED_OWNER.to_string(),
            repo: DEFAULT_FEED_REPO.to_string(),
        }
    }
}

/// Everything one update check needs to know, fixed at call time.
#[derive(Debug, Clone)]
pub struct UpdateConfig {
    pub force_check_on_dev_build: bool,
    pub feed_url: String,
    pub request_timeout: Duration,
    pub connect_timeout: Duration,
}

impl UpdateConfig {
    #[must_use]
    pub fn new(mode: FeedMode) -> Self {
        Self {
            force_check_on_dev_build: false,
            feed_url: mode.feed_url(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    #[must_use]
    pub fn local(port: u16) -> Self {
        Self::new(FeedMode::Local { port })
    }

    #[must_use]
    pub fn force_check_on_dev_build(mut self, force: bool) -> Self {
        self.force_check_on_dev_build = force;
        self
    }

    #[must_use]
    pub fn with_feed_url(mut self, feed_url: impl Into<String>) -> Self {
        self.feed_url = feed_url.into();
        self
    }

    #[must_use]
    pub fn with_timeouts(mut self, request: Duration, connect: Duration) -> Self {
        self.request_timeout = request;
        self.connect_timeout = connect;
        self
    }

    /// Client for the release feed request. `request_timeout` caps the whole
    /// exchange since the descriptor is small.
    ///
    /// # Errors
    /// Returns an error when the TLS backend cannot be initialised.
    pub fn build_feed_client(
        &self,
        current_version: &str,
    ) -> Result<reqwest::Client, UpdateError> {
        reqwest::Client::builder()
            .timeout(self.request_timeout)
            .connect_timeout(self.connect_timeout)
            .user_agent(user_agent(current_version))
            .build()
            .map_err(UpdateError::Client)
    }

    /// Client for the binary download. `request_timeout` bounds each read
    /// rather than the transfer, so a slow link that keeps delivering data
    /// is not cut off.
    ///
    /// # Errors
    /// Returns an error when the TLS backend cannot be initialised.
    pub fn build_download_client(
        &self,
        current_version: &str,
    ) -> Result<reqwest::Client, UpdateError> {
        reqwest::Client::builder()
            .read_timeout(self.request_timeout)
            .connect_timeout(self.connect_timeout)
            .user_agent(user_agent(current_version))
            .build()
            .map_err(UpdateError::Client)
    }
}

fn user_agent(current_version: &str) -> String {
    format!("qrapp/{current_version}")
}

impl Default for UpdateConfig {
    fn default() -> Self {
        Self::new(FeedMode::default())
    }
}

#[async_trait]
pub trait ReleaseFeed: Send + Sync {
    fn url(&self) -> &str;

    async fn latest_release(&self) -> Result<ReleaseDescriptor, UpdateError>;
}

pub struct HttpReleaseFeed {
    client: reqwest::Client,
    url: String,
}

impl HttpReleaseFeed {
    #[must_use]
    pub fn new(client: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }
}

#[async_trait]
impl ReleaseFeed for HttpReleaseFeed {
    fn url(&self) -> &str {
        &self.url
    }

    async fn latest_release(&self) -> Result<ReleaseDescriptor, UpdateError> {
        let unreachable = |source| UpdateError::FeedUnreachable {
            url: self.url.clone(),
            source,
        };

        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(unreachable)?;

        if !response.status().is_success() {
            let status = response.status();
            let body_snippet = response
                .text()
                .await
                .ok()
                .map(|body| response_snippet(&body, 160))
                .unwrap_or_default();
            return Err(UpdateError::FeedStatus {
                url: self.url.clone(),
                status,
                body_snippet,
            });
        }

        let body = response.bytes().await.map_err(unreachable)?;
        debug!("Release feed returned {} bytes", body.len());

        serde_json::from_slice(&body).map_err(|source| UpdateError::FeedMalformed {
            url: self.url.clone(),
            source,
        })
    }
}

fn response_snippet(body: &str, max_chars: usize) -> String {
    let snippet: String = body.trim().chars().take(max_chars).collect();
    if snippet.is_empty() {
        String::new()
    } else {
        format!(": {snippet}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionOrdering {
    UpdateAvailable,
    UpToDate,
}

/// Decide whether `remote` is strictly newer than `local`.
///
/// # Errors
/// Returns [`UpdateError::VersionMalformed`] when either side is not a
/// semantic version.
pub fn compare_versions(remote: &str, local: &str) -> Result<VersionOrdering, UpdateError> {
    let local = parse_version(local)?;
    let remote = parse_version(remote)?;

    if precedence(&remote) > precedence(&local) {
        Ok(VersionOrdering::UpdateAvailable)
    } else {
        Ok(VersionOrdering::UpToDate)
    }
}

/// Parse a version tag, accepting a leading `v` and partial cores such as
/// `1.2`.
///
/// # Errors
/// Returns [`UpdateError::VersionMalformed`] when the string is not a
/// semantic version.
pub fn parse_version(raw: &str) -> Result<Version, UpdateError> {
    parse_semver(strip_v_prefix(raw.trim()))
        .ok_or_else(|| UpdateError::VersionMalformed(raw.to_string()))
}

// Build metadata does not take part in ordering.
fn precedence(version: &Version) -> (u64, u64, u64, &semver::Prerelease) {
    (version.major, version.minor, version.patch, &version.pre)
}

fn strip_v_prefix(version: &str) -> &str {
    version.strip_prefix('v').unwrap_or(version)
}

fn parse_semver(version: &str) -> Option<Version> {
    if let Ok(parsed) = Version::parse(version) {
        return Some(parsed);
    }

    let (core, suffix) = split_semver_core_and_suffix(version);
    let mut parts = core.split('.');
    let major = parts.next()?.parse::<u64>().ok()?;
    let minor = parts.next().map(str::parse::<u64>).transpose().ok()?;
    let patch = parts.next().map(str::parse::<u64>).transpose().ok()?;

    if parts.next().is_some() {
        return None;
    }

    let normalized = match (minor, patch) {
        (None, None) => format!("{major}.0.0{suffix}"),
        (Some(minor), None) => format!("{major}.{minor}.0{suffix}"),
        (Some(minor), Some(patch)) => format!("{major}.{minor}.{patch}{suffix}"),
        (None, Some(_)) => return None,
    };

    Version::parse(&normalized).ok()
}

fn split_semver_core_and_suffix(version: &str) -> (&str, &str) {
    let suffix_idx = version.find(['-', '+']).unwrap_or(version.len());
    (&version[..suffix_idx], &version[suffix_idx..])
}

/// Find the asset published for `target_name`. Names are matched exactly and
/// the first match wins.
#[must_use]
pub fn select_asset<'a>(assets: &'a [ReleaseAsset], target_name: &str) -> Option<&'a ReleaseAsset> {
    assets.iter().find(|asset| asset.name == target_name)
}

fn parse_sha256_digest(digest: &str) -> Option<String> {
    let (algorithm, hash) = digest.split_once(':')?;
    if !algorithm.eq_ignore_ascii_case("sha256") {
        return None;
    }
    if hash.len() != 64 || !hash.chars().all(|ch| ch.is_ascii_hexdigit()) {
        return None;
    }
    Some(hash.to_ascii_lowercase())
}
