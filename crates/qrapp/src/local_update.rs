//! `--serve`: build a bumped release of this workspace and publish it on the
//! local release feed.

use std::ffi::OsString;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use log::{debug, info};
use qrapp_core::local_feed::{LocalFeed, LocalRelease};
use qrapp_core::update::LOCAL_FEED_PORT;
use qrapp_platform::{APP_NAME, HideWindow, PlatformTarget};
use tokio::process::Command;

use crate::error::AppError;

pub const LOCAL_RELEASE_VERSION: &str = "1.0.2";

/// Separate from the regular target directory so the build never overwrites
/// the binary that is currently running.
const LOCAL_TARGET_DIR: &str = "target/local-feed";

fn build_command(cargo: OsString, target_dir: &Path) -> Command {
    let mut command = Command::new(cargo);
    command
        .args(["build", "--release", "--package", APP_NAME, "--target-dir"])
        .arg(target_dir)
        .env("QRAPP_VERSION", LOCAL_RELEASE_VERSION)
        .hide_window();
    command
}

fn built_binary_path(target_dir: &Path) -> PathBuf {
    let file_name = format!("{APP_NAME}{}", std::env::consts::EXE_SUFFIX);
    target_dir.join("release").join(file_name)
}

async fn build_release(target_dir: &Path) -> Result<Vec<u8>, AppError> {
    let cargo = std::env::var_os("CARGO").unwrap_or_else(|| OsString::from("cargo"));
    info!("Building local release {LOCAL_RELEASE_VERSION}");
    debug!("Build output directory: {}", target_dir.display());

    let status = build_command(cargo, target_dir)
        .status()
        .await
        .map_err(AppError::BuildSpawn)?;
    if !status.success() {
        return Err(AppError::BuildFailed(status));
    }

    let path = built_binary_path(target_dir);
    tokio::fs::read(&path)
        .await
        .map_err(|source| AppError::BuildOutput {
            path: path.display().to_string(),
            source,
        })
}

/// Build the bumped release and serve it on the local feed port until the
/// process exits.
pub async fn build_and_serve() -> Result<(), AppError> {
    let binary = build_release(Path::new(LOCAL_TARGET_DIR)).await?;
    let asset_name = PlatformTarget::current().asset_name();
    let release = LocalRelease::new(LOCAL_RELEASE_VERSION, asset_name, binary).with_sha256_digest();

    let feed = LocalFeed::bind(SocketAddr::from(([0, 0, 0, 0], LOCAL_FEED_PORT)), release).await?;
    feed.serve().await?;
    Ok(())
}
