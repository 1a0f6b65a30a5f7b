use std::fmt;

/// Prefix of every published release artifact.
pub const APP_NAME: &str = "qrapp";

/// Release artifact name for one OS/architecture pair, e.g.
/// `qrapp-linux-amd64` or `qrapp-windows-arm64.exe`.
///
/// Published artifacts use Go-style platform names (`darwin`, `amd64`), so
/// the Rust target triple components are mapped onto those.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformTarget {
    os: String,
    arch: String,
}

impl PlatformTarget {
    #[must_use]
    pub fn current() -> Self {
        Self::from_parts(std::env::consts::OS, std::env::consts::ARCH)
    }

    /// Build a target from Rust `std::env::consts` style names.
    #[must_use]
    pub fn from_parts(os: &str, arch: &str) -> Self {
        Self {
            os: release_os_name(os).to_string(),
            arch: release_arch_name(arch).to_string(),
        }
    }

    #[must_use]
    pub fn is_windows(&self) -> bool {
        self.os == "windows"
    }

    #[must_use]
    pub fn asset_name(&self) -> String {
        let mut name = format!("{APP_NAME}-{}-{}", self.os, self.arch);
        if self.is_windows() {
            name.push_str(".exe");
        }
        name
    }
}

impl fmt::Display for PlatformTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.asset_name())
    }
}

fn release_os_name(os: &str) -> &str {
    match os {
        "macos" => "darwin",
        other => other,
    }
}

fn release_arch_name(arch: &str) -> &str {
    match arch {
        "x86_64" => "amd64",
        "aarch64" => "arm64",
        "x86" => "386",
        "powerpc64" => "ppc64",
        "s390x" => "s390x",
        other => other,
    }
}
