// src/clients/clef.rs
// Clef account signer, driven over its stdio UI protocol

use super::{CacheFileFlag, ClientDescriptor, IpcLocation};
use crate::flags::SettingSpec;
use crate::platform::PlatformProfile;
use crate::release::{ReleaseFilter, RepositoryLocator};

pub const READINESS_MARKER: &str = "HTTP endpoint opened";

/// Clef only ships in the alltools bundle
pub const MIN_VERSION: &str = ">=1.9.0";

pub fn descriptor(profile: &PlatformProfile) -> ClientDescriptor {
    ClientDescriptor {
        name: "clef".to_string(),
        display_name: "Clef".to_string(),
        repository: RepositoryLocator::geth_store(),
        binary_name: profile.executable_name("clef"),
        filter: ReleaseFilter::new(
            ["alltools", profile.os_token.as_str(), profile.arch_token.as_str()],
            Vec::<String>::new(),
        ),
        strip_build_metadata: true,
        version_constraint: Some(MIN_VERSION.to_string()),
        readiness_marker: READINESS_MARKER.to_string(),
        base_flags: ["--rpc", "--ipcdisable", "--stdio-ui", "--stdio-ui-test", "--advanced"]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        settings: vec![
            SettingSpec::flag("keystoreDir", "--keystore %s")
                .with_default(profile.keystore_dir.to_string_lossy())
                .with_label("Keystore Directory")
                .with_kind("directory"),
            SettingSpec::flag("rpcHost", "--rpcaddr %s")
                .with_default("localhost")
                .with_label("RPC Host"),
            SettingSpec::flag("rpcPort", "--rpcport %s")
                .with_default("8550")
                .with_label("RPC Port"),
            SettingSpec::flag("chainId", "--chainid %s")
                .with_default("1")
                .with_label("Chain ID"),
        ],
        ipc: IpcLocation::None,
        cache_file_flags: vec![CacheFileFlag {
            flag: "--4bytedb".to_string(),
            file_name: "4byte.json".to_string(),
        }],
    }
}
