// src/clients/parity.rs
// Parity Ethereum, published as GitHub release assets

use std::path::PathBuf;

use super::{ClientDescriptor, IpcLocation};
use crate::platform::{Os, PlatformProfile};
use crate::release::{ReleaseFilter, RepositoryLocator};

pub const READINESS_MARKER: &str = "Public node URL";

pub fn descriptor(profile: &PlatformProfile) -> ClientDescriptor {
    // assets are prefixed with the node-style platform name
    let platform = match profile.os {
        Os::Windows => "win32",
        Os::Linux | Os::Darwin => profile.os_token.as_str(),
    };

    ClientDescriptor {
        name: "parity".to_string(),
        display_name: "Parity".to_string(),
        repository: RepositoryLocator::github("PhilippLgh", "EthCapetownWorkshop"),
        binary_name: profile.executable_name("parity"),
        filter: ReleaseFilter::new([platform], Vec::<String>::new()),
        strip_build_metadata: false,
        version_constraint: None,
        readiness_marker: READINESS_MARKER.to_string(),
        base_flags: Vec::new(),
        settings: Vec::new(),
        ipc: IpcLocation::Fixed(ipc_path(profile)),
        cache_file_flags: Vec::new(),
    }
}

fn ipc_path(profile: &PlatformProfile) -> PathBuf {
    let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
    match profile.os {
        Os::Windows => dirs::data_dir()
            .unwrap_or_else(|| home.join("AppData").join("Roaming"))
            .join("Local")
            .join("Parity")
            .join("Ethereum")
            .join("jsonrpc.ipc"),
        Os::Linux => home
            .join(".local")
            .join("share")
            .join("io.parity.ethereum")
            .join("jsonrpc.ipc"),
        Os::Darwin => home
            .join("Library")
            .join("Application Support")
            .join("io.parity.ethereum")
            .join("jsonrpc.ipc"),
    }
}
