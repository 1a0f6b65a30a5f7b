use std::fmt;
use std::path::PathBuf;

use log::{debug, info, warn};
use qrapp_platform::PlatformTarget;

use crate::auto_update::{
    BinaryInstaller, ProcessRelauncher, Relauncher, download_to_temp, make_executable,
    platform_installer, verify_sha256,
};
use crate::error::UpdateError;
use crate::update::{
    DEV_VERSION, HttpReleaseFeed, ReleaseFeed, UpdateConfig, VersionOrdering, compare_versions,
    parse_version, select_asset,
};

/// Result of an update check that did not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateOutcome {
    SkippedDevBuild,
    UpToDate {
        current: String,
        latest: String,
    },
    NoMatchingAsset {
        target: String,
        latest: String,
    },
    /// The new binary is installed and a new instance was spawned; the caller
    /// is expected to exit.
    Applied {
        from: String,
        to: String,
        executable: PathBuf,
    },
}

impl fmt::Display for UpdateOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SkippedDevBuild => write!(f, "update check skipped (dev build)"),
            Self::UpToDate { current, latest } => {
                write!(f, "version {current} is up to date (latest: {latest})")
            }
            Self::NoMatchingAsset { target, latest } => {
                write!(f, "release {latest} has no binary named {target}")
            }
            Self::Applied { from, to, .. } => write!(f, "updated {from} -> {to}"),
        }
    }
}

pub struct Updater {
    config: UpdateConfig,
    current_version: String,
    client: reqwest::Client,
    feed: Box<dyn ReleaseFeed>,
    target: PlatformTarget,
    executable: Option<PathBuf>,
    installer: Box<dyn BinaryInstaller>,
    relauncher: Box<dyn Relauncher>,
}

impl Updater {
    /// Build an updater for the running executable on the running platform.
    ///
    /// # Errors
    /// Returns an error when either HTTP client cannot be built.
    pub fn new(
        config: UpdateConfig,
        current_version: impl Into<String>,
    ) -> Result<Self, UpdateError> {
        let current_version = current_version.into();
        let feed_client = config.build_feed_client(&current_version)?;
        let client = config.build_download_client(&current_version)?;
        let feed = Box::new(HttpReleaseFeed::new(feed_client, config.feed_url.clone()));

        Ok(Self {
            config,
            current_version,
            client,
            feed,
            target: PlatformTarget::current(),
            executable: None,
            installer: platform_installer(),
            relauncher: Box::new(ProcessRelauncher),
        })
    }

    #[must_use]
    pub fn with_feed(mut self, feed: impl ReleaseFeed + 'static) -> Self {
        self.feed = Box::new(feed);
        self
    }

    #[must_use]
    pub fn with_target(mut self, target: PlatformTarget) -> Self {
        self.target = target;
        self
    }

    /// Replace `executable` instead of the running binary.
    #[must_use]
    pub fn with_executable(mut self, executable: impl Into<PathBuf>) -> Self {
        self.executable = Some(executable.into());
        self
    }

    #[must_use]
    pub fn with_installer(mut self, installer: impl BinaryInstaller + 'static) -> Self {
        self.installer = Box::new(installer);
        self
    }

    #[must_use]
    pub fn with_relauncher(mut self, relauncher: impl Relauncher + 'static) -> Self {
        self.relauncher = Box::new(relauncher);
        self
    }

    /// Run one update check from the version gate through the relaunch.
    ///
    /// # Errors
    /// Returns the first stage failure; nothing after a failing stage runs and
    /// the executable on disk is left as it was unless the replace succeeded.
    pub async fn run(&self) -> Result<UpdateOutcome, UpdateError> {
        if self.current_version == DEV_VERSION && !self.config.force_check_on_dev_build {
            info!("Update check skipped (dev build)");
            return Ok(UpdateOutcome::SkippedDevBuild);
        }

        parse_version(&self.current_version)?;

        debug!("Fetching release feed {}", self.feed.url());
        let release = self.feed.latest_release().await?;
        let latest = release.version().to_string();

        match compare_versions(&release.tag_name, &self.current_version)? {
            VersionOrdering::UpToDate => {
                info!("Version {} is up to date", self.current_version);
                return Ok(UpdateOutcome::UpToDate {
                    current: self.current_version.clone(),
                    latest,
                });
            }
            VersionOrdering::UpdateAvailable => {
                info!(
                    "New version available: {latest} (current: {})",
                    self.current_version
                );
            }
        }

        let target = self.target.asset_name();
        let Some(asset) = select_asset(&release.assets, &target) else {
            warn!("No matching binary found for this platform ({target})");
            return Ok(UpdateOutcome::NoMatchingAsset { target, latest });
        };

        let download = download_to_temp(&self.client, &asset.browser_download_url).await?;
        match asset.sha256() {
            Some(expected) => verify_sha256(download.path(), &expected, &asset.name)?,
            None => debug!("No digest published for {}, skipping verification", asset.name),
        }
        make_executable(download.path())?;

        let executable = self.executable()?;
        info!(
            "Installing {} bytes over {} ({})",
            download.len(),
            executable.display(),
            self.installer.name()
        );
        self.installer
            .install(download.path(), &executable)
            .map_err(|source| UpdateError::ReplaceFailed {
                target: executable.display().to_string(),
                source,
            })?;

        info!("Update installed, restarting");
        self.relauncher
            .relaunch(&executable)
            .map_err(|source| UpdateError::RestartFailed {
                path: executable.display().to_string(),
                source,
            })?;

        Ok(UpdateOutcome::Applied {
            from: self.current_version.clone(),
            to: latest,
            executable,
        })
    }

    fn executable(&self) -> Result<PathBuf, UpdateError> {
        match &self.executable {
            Some(path) => Ok(path.clone()),
            None => std::env::current_exe().map_err(UpdateError::CurrentExe),
        }
    }
}
