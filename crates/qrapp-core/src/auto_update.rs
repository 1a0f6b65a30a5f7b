use std::fs::{File, OpenOptions};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use futures_util::StreamExt;
use log::{debug, info, warn};
use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;
use thiserror::Error;
use tokio::io::AsyncWriteExt;

use crate::error::UpdateError;

#[derive(Debug, Error)]
pub enum InstallError {
    #[error("{context} ({path}): {source}")]
    Io {
        context: &'static str,
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{0} is not the running executable")]
    NotRunningExecutable(String),
}

impl InstallError {
    fn io(context: &'static str, path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            context,
            path: path.display().to_string(),
            source,
        }
    }
}

/// A fully downloaded release binary. The backing temp file is removed when
/// this value is dropped.
#[derive(Debug)]
pub struct DownloadedBinary {
    file: NamedTempFile,
    len: u64,
}

impl DownloadedBinary {
    #[must_use]
    pub fn path(&self) -> &Path {
        self.file.path()
    }

    #[must_use]
    pub fn len(&self) -> u64 {
        self.len
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// Stream `url` into a fresh temp file.
///
/// # Errors
/// Returns an error when the temp file cannot be created, the request fails
/// or answers with a non-success status, or the body cannot be written out
/// completely.
pub async fn download_to_temp(
    client: &reqwest::Client,
    url: &str,
) -> Result<DownloadedBinary, UpdateError> {
    let temp = tempfile::Builder::new()
        .prefix("qrapp-update-")
        .tempfile()
        .map_err(UpdateError::TempFile)?;

    info!("Downloading update from {url}");
    let response = client
        .get(url)
        .send()
        .await
        .map_err(|source| UpdateError::DownloadFailed {
            url: url.to_string(),
            source,
        })?;

    if !response.status().is_success() {
        return Err(UpdateError::DownloadStatus {
            url: url.to_string(),
            status: response.status(),
        });
    }

    let handle = temp
        .as_file()
        .try_clone()
        .map_err(|error| UpdateError::download_write(temp.path(), error))?;
    let mut file = tokio::fs::File::from_std(handle);
    let mut downloaded: u64 = 0;

    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|source| UpdateError::DownloadFailed {
            url: url.to_string(),
            source,
        })?;
        file.write_all(&chunk)
            .await
            .map_err(|error| UpdateError::download_write(temp.path(), error))?;
        downloaded += chunk.len() as u64;
    }

    file.flush()
        .await
        .map_err(|error| UpdateError::download_write(temp.path(), error))?;
    file.sync_all()
        .await
        .map_err(|error| UpdateError::download_write(temp.path(), error))?;

    info!("Download complete: {downloaded} bytes");
    Ok(DownloadedBinary {
        file: temp,
        len: downloaded,
    })
}

/// Check a downloaded file against the digest published for `asset_name`.
///
/// # Errors
/// Returns [`UpdateError::ChecksumMismatch`] when the digests differ, or a
/// download write error when the file cannot be read back.
pub fn verify_sha256(path: &Path, expected: &str, asset_name: &str) -> Result<(), UpdateError> {
    let actual = sha256_file(path)?;
    if actual.eq_ignore_ascii_case(expected) {
        info!("Update checksum verified for {asset_name}");
        Ok(())
    } else {
        Err(UpdateError::ChecksumMismatch {
            asset: asset_name.to_string(),
            expected: expected.to_ascii_lowercase(),
            actual,
        })
    }
}

fn sha256_file(path: &Path) -> Result<String, UpdateError> {
    let mut file = File::open(path).map_err(|error| UpdateError::download_write(path, error))?;
    let mut hasher = Sha256::new();
    let mut buffer = [0_u8; 8192];

    loop {
        let read = file
            .read(&mut buffer)
            .map_err(|error| UpdateError::download_write(path, error))?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}

/// Set the executable bits on a downloaded binary. A no-op on Windows.
///
/// # Errors
/// Returns [`UpdateError::PermissionSetFailed`] when the mode cannot be set.
#[cfg(unix)]
pub fn make_executable(path: &Path) -> Result<(), UpdateError> {
    use std::os::unix::fs::PermissionsExt;

    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)).map_err(|source| {
        UpdateError::PermissionSetFailed {
            path: path.display().to_string(),
            source,
        }
    })
}

/// Set the executable bits on a downloaded binary. A no-op on Windows.
///
/// # Errors
/// Never fails on this platform.
#[cfg(not(unix))]
pub fn make_executable(_path: &Path) -> Result<(), UpdateError> {
    Ok(())
}

/// Swaps a new executable image in for an existing one.
///
/// Implementations must leave `target` either untouched or fully replaced.
pub trait BinaryInstaller: Send + Sync {
    fn name(&self) -> &'static str;

    /// Replace `target` with the contents of `new_binary`.
    ///
    /// # Errors
    /// Returns an error when the replacement could not be completed; `target`
    /// then still holds its previous contents.
    fn install(&self, new_binary: &Path, target: &Path) -> Result<(), InstallError>;
}

/// Copies the new image next to the target and renames it over the target.
/// The rename is atomic on POSIX filesystems.
#[derive(Debug, Default, Clone, Copy)]
pub struct StagedRenameInstaller;

impl BinaryInstaller for StagedRenameInstaller {
    fn name(&self) -> &'static str {
        "staged-rename"
    }

    fn install(&self, new_binary: &Path, target: &Path) -> Result<(), InstallError> {
        let staging = staging_path(target);
        debug!(
            "Staging {} at {} before swap",
            new_binary.display(),
            staging.display()
        );

        if let Err(error) = stage_and_swap(new_binary, target, &staging) {
            if staging.exists()
                && let Err(cleanup) = std::fs::remove_file(&staging)
            {
                warn!(
                    "Failed to remove staging file {}: {cleanup}",
                    staging.display()
                );
            }
            return Err(error);
        }
        Ok(())
    }
}

fn staging_path(target: &Path) -> PathBuf {
    let file_name = target
        .file_name()
        .map_or_else(|| "qrapp".into(), |name| name.to_string_lossy());
    target.with_file_name(format!(".{file_name}.update"))
}

fn stage_and_swap(new_binary: &Path, target: &Path, staging: &Path) -> Result<(), InstallError> {
    let mut source = File::open(new_binary)
        .map_err(|error| InstallError::io("failed to open new binary", new_binary, error))?;
    let mut staged = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(staging)
        .map_err(|error| InstallError::io("failed to create staging file", staging, error))?;

    std::io::copy(&mut source, &mut staged)
        .map_err(|error| InstallError::io("failed to write staging file", staging, error))?;
    staged
        .sync_all()
        .map_err(|error| InstallError::io("failed to flush staging file", staging, error))?;
    drop(staged);

    if let Ok(metadata) = std::fs::metadata(target) {
        std::fs::set_permissions(staging, metadata.permissions()).map_err(|error| {
            InstallError::io("failed to copy permissions to staging file", staging, error)
        })?;
    }

    std::fs::rename(staging, target)
        .map_err(|error| InstallError::io("failed to move staged binary into place", target, error))
}

/// Replaces the running executable through the `self-replace` crate, which
/// also works where running images are locked (Windows).
#[derive(Debug, Default, Clone, Copy)]
pub struct SelfReplaceInstaller;

impl BinaryInstaller for SelfReplaceInstaller {
    fn name(&self) -> &'static str {
        "self-replace"
    }

    fn install(&self, new_binary: &Path, target: &Path) -> Result<(), InstallError> {
        let current = std::env::current_exe()
            .map_err(|error| InstallError::io("failed to get current executable", target, error))?;
        if !same_path(&current, target) {
            return Err(InstallError::NotRunningExecutable(
                target.display().to_string(),
            ));
        }

        info!("Replacing binary via self-replace");
        self_replace::self_replace(new_binary)
            .map_err(|error| InstallError::io("failed to replace binary", target, error))
    }
}

fn same_path(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}

/// Installer suited to replacing the running executable on this platform.
#[must_use]
pub fn platform_installer() -> Box<dyn BinaryInstaller> {
    if cfg!(windows) {
        Box::new(SelfReplaceInstaller)
    } else {
        Box::new(StagedRenameInstaller)
    }
}

/// Starts a fresh instance of an executable.
pub trait Relauncher: Send + Sync {
    /// Spawn `executable` without waiting for it.
    ///
    /// # Errors
    /// Returns an error when the process cannot be spawned.
    fn relaunch(&self, executable: &Path) -> std::io::Result<()>;
}

/// Spawns the executable with no arguments, like a fresh launch.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessRelauncher;

impl Relauncher for ProcessRelauncher {
    fn relaunch(&self, executable: &Path) -> std::io::Result<()> {
        let executable = relaunch_path(executable);
        info!("Restarting from: {}", executable.display());
        Command::new(&executable)
            .stdin(Stdio::null())
            .spawn()
            .map(|_child| ())
    }
}

/// On Linux, after a swap `/proc/self/exe` points at the old deleted inode and
/// `current_exe()` carries a ` (deleted)` suffix; the new binary lives at the
/// path without it.
#[must_use]
pub fn relaunch_path(executable: &Path) -> PathBuf {
    let path_str = executable.to_string_lossy();
    match path_str.strip_suffix(" (deleted)") {
        Some(fixed) => {
            debug!("Adjusted exe path from deleted inode: {fixed}");
            PathBuf::from(fixed)
        }
        None => executable.to_path_buf(),
    }
}
