use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use axum::body::{Body, Bytes};
use axum::routing::get;
use futures_util::{StreamExt, stream};
use qrapp_core::auto_update::{BinaryInstaller, InstallError, Relauncher, StagedRenameInstaller};
use qrapp_core::local_feed::{LocalFeed, LocalFeedStats, LocalRelease};
use qrapp_core::{
    ReleaseAsset, ReleaseDescriptor, ReleaseFeed, UpdateConfig, UpdateError, UpdateOutcome,
    Updater,
};
use qrapp_platform::PlatformTarget;
use tempfile::{TempDir, tempdir};

const OLD_BINARY: &[u8] = b"#!/bin/sh\necho qrapp 1.0.1\n";
const NEW_BINARY: &[u8] = b"#!/bin/sh\necho qrapp 1.0.2\n";

#[derive(Clone, Default)]
struct RecordingRelauncher {
    launched: Arc<Mutex<Vec<PathBuf>>>,
}

impl RecordingRelauncher {
    fn launched(&self) -> Vec<PathBuf> {
        self.launched.lock().expect("relaunch log").clone()
    }
}

impl Relauncher for RecordingRelauncher {
    fn relaunch(&self, executable: &Path) -> std::io::Result<()> {
        self.launched
            .lock()
            .expect("relaunch log")
            .push(executable.to_path_buf());
        Ok(())
    }
}

struct FailingRelauncher;

impl Relauncher for FailingRelauncher {
    fn relaunch(&self, _executable: &Path) -> std::io::Result<()> {
        Err(std::io::Error::from(std::io::ErrorKind::PermissionDenied))
    }
}

struct FailingInstaller;

impl BinaryInstaller for FailingInstaller {
    fn name(&self) -> &'static str {
        "failing"
    }

    fn install(&self, _new_binary: &Path, target: &Path) -> Result<(), InstallError> {
        Err(InstallError::Io {
            context: "failed to move staged binary into place",
            path: target.display().to_string(),
            source: std::io::Error::from(std::io::ErrorKind::PermissionDenied),
        })
    }
}

struct Installed {
    _dir: TempDir,
    executable: PathBuf,
}

fn installed_binary() -> Installed {
    let dir = tempdir().expect("create temp dir");
    let executable = dir.path().join("qrapp");
    std::fs::write(&executable, OLD_BINARY).expect("write installed binary");
    Installed {
        _dir: dir,
        executable,
    }
}

fn loopback() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 0))
}

fn asset_name() -> String {
    PlatformTarget::current().asset_name()
}

async fn start_feed(release: LocalRelease) -> (String, LocalFeedStats) {
    let feed = LocalFeed::bind(loopback(), release)
        .await
        .expect("bind local feed");
    let url = feed.feed_url();
    let stats = feed.stats();
    let _server = feed.spawn();
    (url, stats)
}

fn updater(version: &str, feed_url: &str, installed: &Installed) -> Updater {
    updater_with(UpdateConfig::local(0).with_feed_url(feed_url), version, installed)
}

fn updater_with(config: UpdateConfig, version: &str, installed: &Installed) -> Updater {
    Updater::new(config, version)
        .expect("build updater")
        .with_executable(&installed.executable)
        .with_installer(StagedRenameInstaller)
}

fn short_timeouts(feed_url: &str) -> UpdateConfig {
    UpdateConfig::local(0)
        .with_feed_url(feed_url)
        .with_timeouts(Duration::from_secs(1), Duration::from_secs(1))
}

/// Advertises one newer release whose binary lives at `download_url`.
struct StaticFeed {
    release: ReleaseDescriptor,
}

impl StaticFeed {
    fn pointing_at(download_url: impl Into<String>) -> Self {
        Self {
            release: ReleaseDescriptor {
                tag_name: "v1.0.2".to_string(),
                assets: vec![ReleaseAsset {
                    name: asset_name(),
                    browser_download_url: download_url.into(),
                    digest: None,
                }],
            },
        }
    }
}

#[async_trait]
impl ReleaseFeed for StaticFeed {
    fn url(&self) -> &str {
        "static://release"
    }

    async fn latest_release(&self) -> Result<ReleaseDescriptor, UpdateError> {
        Ok(self.release.clone())
    }
}

async fn serve_router(router: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind(loopback())
        .await
        .expect("bind loopback");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, router).await;
    });
    addr
}

fn closed_port() -> SocketAddr {
    let listener = std::net::TcpListener::bind(loopback()).expect("reserve port");
    let addr = listener.local_addr().expect("reserved addr");
    drop(listener);
    addr
}

fn assert_untouched(installed: &Installed, relauncher: &RecordingRelauncher) {
    let on_disk = std::fs::read(&installed.executable).expect("read installed binary");
    assert_eq!(on_disk, OLD_BINARY);
    assert!(relauncher.launched().is_empty());
}

#[tokio::test]
async fn newer_local_release_is_installed_and_relaunched() {
    let (url, stats) = start_feed(LocalRelease::new("1.0.2", asset_name(), NEW_BINARY)).await;
    let installed = installed_binary();
    let relauncher = RecordingRelauncher::default();

    let outcome = updater("1.0.1", &url, &installed)
        .with_relauncher(relauncher.clone())
        .run()
        .await
        .expect("update should apply");

    assert_eq!(
        outcome,
        UpdateOutcome::Applied {
            from: "1.0.1".to_string(),
            to: "1.0.2".to_string(),
            executable: installed.executable.clone(),
        }
    );
    let on_disk = std::fs::read(&installed.executable).expect("read replaced binary");
    assert_eq!(on_disk, NEW_BINARY);
    assert_eq!(relauncher.launched(), vec![installed.executable.clone()]);
    assert_eq!(stats.release_requests(), 1);
    assert_eq!(stats.downloads(), 1);
}

#[cfg(unix)]
#[tokio::test]
async fn replaced_binary_keeps_executable_bit() {
    use std::os::unix::fs::PermissionsExt;

    let (url, _stats) = start_feed(LocalRelease::new("1.0.2", asset_name(), NEW_BINARY)).await;
    let installed = installed_binary();
    std::fs::set_permissions(
        &installed.executable,
        std::fs::Permissions::from_mode(0o755),
    )
    .expect("chmod installed binary");

    updater("1.0.1", &url, &installed)
        .with_relauncher(RecordingRelauncher::default())
        .run()
        .await
        .expect("update should apply");

    let mode = std::fs::metadata(&installed.executable)
        .expect("stat replaced binary")
        .permissions()
        .mode();
    assert_eq!(mode & 0o777, 0o755);
}

#[tokio::test]
async fn older_release_stops_after_feed_fetch() {
    let (url, stats) = start_feed(LocalRelease::new("1.0.0", asset_name(), NEW_BINARY)).await;
    let installed = installed_binary();
    let relauncher = RecordingRelauncher::default();

    let outcome = updater("1.0.2", &url, &installed)
        .with_relauncher(relauncher.clone())
        .run()
        .await
        .expect("up to date is not an error");

    assert_eq!(
        outcome,
        UpdateOutcome::UpToDate {
            current: "1.0.2".to_string(),
            latest: "1.0.0".to_string(),
        }
    );
    assert_eq!(stats.release_requests(), 1);
    assert_eq!(stats.downloads(), 0);
    assert!(relauncher.launched().is_empty());
    let on_disk = std::fs::read(&installed.executable).expect("read installed binary");
    assert_eq!(on_disk, OLD_BINARY);
}

#[tokio::test]
async fn equal_release_is_up_to_date() {
    let (url, stats) = start_feed(LocalRelease::new("1.0.2", asset_name(), NEW_BINARY)).await;
    let installed = installed_binary();

    let outcome = updater("v1.0.2", &url, &installed)
        .run()
        .await
        .expect("up to date is not an error");

    assert!(matches!(outcome, UpdateOutcome::UpToDate { .. }));
    assert_eq!(stats.downloads(), 0);
}

#[tokio::test]
async fn dev_build_never_contacts_feed() {
    let (url, stats) = start_feed(LocalRelease::new("99.0.0", asset_name(), NEW_BINARY)).await;
    let installed = installed_binary();

    let outcome = updater("dev", &url, &installed)
        .run()
        .await
        .expect("dev build skip is not an error");

    assert_eq!(outcome, UpdateOutcome::SkippedDevBuild);
    assert_eq!(stats.release_requests(), 0);
    assert_eq!(stats.downloads(), 0);
}

#[tokio::test]
async fn release_without_platform_binary_downloads_nothing() {
    let (url, stats) = start_feed(LocalRelease::new(
        "1.0.2",
        "qrapp-plan9-mips",
        NEW_BINARY,
    ))
    .await;
    let installed = installed_binary();

    let outcome = updater("1.0.1", &url, &installed)
        .run()
        .await
        .expect("missing asset is not an error");

    assert_eq!(
        outcome,
        UpdateOutcome::NoMatchingAsset {
            target: asset_name(),
            latest: "1.0.2".to_string(),
        }
    );
    assert_eq!(stats.downloads(), 0);
}

#[tokio::test]
async fn failed_replace_keeps_original_binary() {
    let (url, _stats) = start_feed(LocalRelease::new("1.0.2", asset_name(), NEW_BINARY)).await;
    let installed = installed_binary();
    let relauncher = RecordingRelauncher::default();

    let result = updater("1.0.1", &url, &installed)
        .with_installer(FailingInstaller)
        .with_relauncher(relauncher.clone())
        .run()
        .await;

    let error = result.expect_err("replace should fail");
    assert!(matches!(error, UpdateError::ReplaceFailed { .. }));
    assert_eq!(error.stage(), "replace");
    let on_disk = std::fs::read(&installed.executable).expect("read installed binary");
    assert_eq!(on_disk, OLD_BINARY);
    assert!(relauncher.launched().is_empty());
}

#[tokio::test]
async fn failed_relaunch_is_reported_after_install() {
    let (url, _stats) = start_feed(LocalRelease::new("1.0.2", asset_name(), NEW_BINARY)).await;
    let installed = installed_binary();

    let result = updater("1.0.1", &url, &installed)
        .with_relauncher(FailingRelauncher)
        .run()
        .await;

    assert!(matches!(result, Err(UpdateError::RestartFailed { .. })));
    let on_disk = std::fs::read(&installed.executable).expect("read installed binary");
    assert_eq!(on_disk, NEW_BINARY);
}

#[tokio::test]
async fn published_digest_is_verified() {
    let release = LocalRelease::new("1.0.2", asset_name(), NEW_BINARY).with_sha256_digest();
    let (url, _stats) = start_feed(release).await;
    let installed = installed_binary();

    let outcome = updater("1.0.1", &url, &installed)
        .with_relauncher(RecordingRelauncher::default())
        .run()
        .await
        .expect("digest should match");

    assert!(matches!(outcome, UpdateOutcome::Applied { .. }));
}

#[tokio::test]
async fn digest_mismatch_aborts_before_replace() {
    let release = LocalRelease::new("1.0.2", asset_name(), NEW_BINARY)
        .with_digest(format!("sha256:{}", "0".repeat(64)));
    let (url, stats) = start_feed(release).await;
    let installed = installed_binary();

    let result = updater("1.0.1", &url, &installed)
        .with_relauncher(RecordingRelauncher::default())
        .run()
        .await;

    assert!(matches!(result, Err(UpdateError::ChecksumMismatch { .. })));
    assert_eq!(stats.downloads(), 1);
    let on_disk = std::fs::read(&installed.executable).expect("read installed binary");
    assert_eq!(on_disk, OLD_BINARY);
}

#[tokio::test]
async fn missing_feed_document_reports_status() {
    let (url, _stats) = start_feed(LocalRelease::new("1.0.2", asset_name(), NEW_BINARY)).await;
    let missing = url.replace("latest.json", "missing.json");
    let installed = installed_binary();

    let result = updater("1.0.1", &missing, &installed).run().await;

    match result {
        Err(UpdateError::FeedStatus { status, .. }) => {
            assert_eq!(status, reqwest::StatusCode::NOT_FOUND);
        }
        other => panic!("expected FeedStatus, got {other:?}"),
    }
}

#[tokio::test]
async fn non_json_feed_is_malformed() {
    let name = asset_name();
    let (url, _stats) = start_feed(LocalRelease::new("1.0.2", name.clone(), NEW_BINARY)).await;
    let binary_url = url.replace("latest.json", &name);
    let installed = installed_binary();

    let result = updater("1.0.1", &binary_url, &installed).run().await;

    assert!(matches!(result, Err(UpdateError::FeedMalformed { .. })));
}

#[tokio::test]
async fn closed_port_is_unreachable() {
    let addr = closed_port();
    let installed = installed_binary();

    let result = updater("1.0.1", &format!("http://{addr}/latest.json"), &installed)
        .run()
        .await;

    let error = result.expect_err("feed should be unreachable");
    assert!(matches!(error, UpdateError::FeedUnreachable { .. }));
    assert!(error.is_network());
}

#[tokio::test]
async fn slow_download_that_keeps_flowing_completes() {
    let body = || async {
        let chunks = stream::iter(0..10).then(|_| async {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok::<_, std::io::Error>(Bytes::from(vec![0x51_u8; 1024]))
        });
        Body::from_stream(chunks)
    };
    let addr = serve_router(Router::new().route("/qrapp", get(body))).await;
    let installed = installed_binary();
    let relauncher = RecordingRelauncher::default();

    let outcome = updater_with(short_timeouts("static://release"), "1.0.1", &installed)
        .with_feed(StaticFeed::pointing_at(format!("http://{addr}/qrapp")))
        .with_relauncher(relauncher.clone())
        .run()
        .await
        .expect("a download slower than the timeout should still finish");

    assert!(matches!(outcome, UpdateOutcome::Applied { .. }));
    let on_disk = std::fs::read(&installed.executable).expect("read replaced binary");
    assert_eq!(on_disk.len(), 10 * 1024);
    assert_eq!(relauncher.launched(), vec![installed.executable.clone()]);
}

#[tokio::test]
async fn missing_download_reports_status() {
    let (url, stats) = start_feed(LocalRelease::new("1.0.2", asset_name(), NEW_BINARY)).await;
    let missing = url.replace("latest.json", "qrapp-gone");
    let installed = installed_binary();
    let relauncher = RecordingRelauncher::default();

    let result = updater("1.0.1", &url, &installed)
        .with_feed(StaticFeed::pointing_at(missing))
        .with_relauncher(relauncher.clone())
        .run()
        .await;

    let error = result.expect_err("download should fail");
    match &error {
        UpdateError::DownloadStatus { status, .. } => {
            assert_eq!(*status, reqwest::StatusCode::NOT_FOUND);
        }
        other => panic!("expected DownloadStatus, got {other:?}"),
    }
    assert_eq!(error.stage(), "download");
    assert_eq!(stats.downloads(), 0);
    assert_untouched(&installed, &relauncher);
}

#[tokio::test]
async fn refused_download_connection_fails() {
    let addr = closed_port();
    let installed = installed_binary();
    let relauncher = RecordingRelauncher::default();

    let result = updater("1.0.1", "static://release", &installed)
        .with_feed(StaticFeed::pointing_at(format!("http://{addr}/qrapp")))
        .with_relauncher(relauncher.clone())
        .run()
        .await;

    let error = result.expect_err("download should fail");
    assert!(matches!(error, UpdateError::DownloadFailed { .. }));
    assert!(error.is_network());
    assert_untouched(&installed, &relauncher);
}

#[tokio::test]
async fn stalled_download_body_times_out() {
    let body = || async {
        let first = stream::once(async { Ok::<_, std::io::Error>(Bytes::from_static(b"#!")) });
        Body::from_stream(first.chain(stream::pending()))
    };
    let addr = serve_router(Router::new().route("/qrapp", get(body))).await;
    let installed = installed_binary();
    let relauncher = RecordingRelauncher::default();

    let result = updater_with(short_timeouts("static://release"), "1.0.1", &installed)
        .with_feed(StaticFeed::pointing_at(format!("http://{addr}/qrapp")))
        .with_relauncher(relauncher.clone())
        .run()
        .await;

    let error = result.expect_err("stalled body should time out");
    assert!(matches!(error, UpdateError::DownloadFailed { .. }));
    assert_untouched(&installed, &relauncher);
}

#[tokio::test]
async fn silent_feed_times_out_as_unreachable() {
    let listener = tokio::net::TcpListener::bind(loopback())
        .await
        .expect("bind loopback");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((socket, _)) = listener.accept().await {
            held.push(socket);
        }
    });
    let installed = installed_binary();
    let relauncher = RecordingRelauncher::default();

    let result = updater_with(
        short_timeouts(&format!("http://{addr}/latest.json")),
        "1.0.1",
        &installed,
    )
    .with_relauncher(relauncher.clone())
    .run()
    .await;

    match result {
        Err(UpdateError::FeedUnreachable { source, .. }) => assert!(source.is_timeout()),
        other => panic!("expected FeedUnreachable, got {other:?}"),
    }
    assert_untouched(&installed, &relauncher);
}
