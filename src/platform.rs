// src/platform.rs
// Platform profile: everything that varies by OS/arch, selected once

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Operating systems with published client builds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Os {
    Linux,
    Darwin,
    Windows,
}

impl Os {
    pub fn current() -> Self {
        if cfg!(target_os = "windows") {
            Os::Windows
        } else if cfg!(target_os = "macos") {
            Os::Darwin
        } else {
            Os::Linux
        }
    }

    /// Token used in release file names
    pub fn token(&self) -> &'static str {
        match self {
            Os::Linux => "linux",
            Os::Darwin => "darwin",
            Os::Windows => "windows",
        }
    }
}

/// Everything platform-dependent that the release pipeline and the
/// client descriptors need. Built once and injected; tests build their own.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformProfile {
    pub os: Os,
    /// Filename token for the OS (e.g. `linux`)
    pub os_token: String,
    /// Filename token for the CPU architecture (e.g. `amd64`)
    pub arch_token: String,
    /// Archive extension including the leading dot
    pub archive_extension: String,
    /// Suffix appended to executable names (`.exe` on Windows)
    pub executable_suffix: String,
    /// Default Ethereum data directory
    pub data_dir: PathBuf,
    /// Default keystore directory
    pub keystore_dir: PathBuf,
}

impl PlatformProfile {
    /// Profile for the host this process runs on
    pub fn current() -> Self {
        Self::for_os(Os::current(), std::env::consts::ARCH)
    }

    /// Profile for an explicit OS and Rust arch name (`x86_64`, `aarch64`, ...)
    pub fn for_os(os: Os, arch: &str) -> Self {
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        let data_dir = match os {
            Os::Linux => home.join(".ethereum"),
            Os::Darwin => home.join("Library").join("Ethereum"),
            Os::Windows => dirs::data_dir()
                .unwrap_or_else(|| home.join("AppData").join("Roaming"))
                .join("Ethereum"),
        };
        let (archive_extension, executable_suffix) = match os {
            Os::Windows => (".zip", ".exe"),
            Os::Linux | Os::Darwin => (".tar.gz", ""),
        };

        Self {
            os,
            os_token: os.token().to_string(),
            arch_token: arch_token(arch).to_string(),
            archive_extension: archive_extension.to_string(),
            executable_suffix: executable_suffix.to_string(),
            keystore_dir: data_dir.join("keystore"),
            data_dir,
        }
    }

    /// Platform-specific executable name, e.g. `geth` -> `geth.exe`
    pub fn executable_name(&self, base: &str) -> String {
        format!("{}{}", base, self.executable_suffix)
    }

    /// Archive file name with the extension removed, or None if the
    /// name does not carry this platform's archive extension
    pub fn archive_base_name<'a>(&self, file_name: &'a str) -> Option<&'a str> {
        file_name.strip_suffix(self.archive_extension.as_str())
    }
}

fn arch_token(arch: &str) -> &str {
    match arch {
        "x86_64" => "amd64",
        "x86" => "386",
        "aarch64" => "arm64",
        "arm" => "arm7",
        other => other,
    }
}
