// src/clients/geth.rs
// go-ethereum full node

use super::{ClientDescriptor, IpcLocation};
use crate::flags::{SettingOption, SettingSpec};
use crate::platform::PlatformProfile;
use crate::release::{ReleaseFilter, RepositoryLocator};

pub const READINESS_MARKER: &str = "IPC endpoint opened";

const METAMASK_ORIGINS: &str = "moz-extension://e582a415-cf54-468e-9b4b-f32b576f7bf7,chrome-extension://nkbihfbeogaeaoehlefnkodbefgpgknn";

pub fn descriptor(profile: &PlatformProfile) -> ClientDescriptor {
    ClientDescriptor {
        name: "geth".to_string(),
        display_name: "Geth".to_string(),
        repository: RepositoryLocator::geth_store(),
        binary_name: profile.executable_name("geth"),
        filter: ReleaseFilter::new(
            [profile.os_token.as_str(), profile.arch_token.as_str()],
            ["unstable", "alltools", "swarm"],
        ),
        strip_build_metadata: true,
        version_constraint: None,
        readiness_marker: READINESS_MARKER.to_string(),
        base_flags: Vec::new(),
        settings: settings(profile),
        ipc: IpcLocation::FromLogs {
            marker: READINESS_MARKER.to_string(),
        },
        cache_file_flags: Vec::new(),
    }
}

fn settings(profile: &PlatformProfile) -> Vec<SettingSpec> {
    vec![
        SettingSpec::choices(
            "network",
            vec![
                SettingOption::new("main", "Main", ""),
                SettingOption::new("ropsten", "Ropsten (testnet)", "--testnet"),
                SettingOption::new("rinkeby", "Rinkeby (testnet)", "--rinkeby"),
                SettingOption::new("goerli", "Görli (testnet)", "--goerli"),
            ],
        )
        .with_default("main")
        .with_label("Network"),
        SettingSpec::simple_options("syncMode", &["fast", "full", "light"], "--syncmode %s")
            .with_default("light")
            .with_label("Sync Mode"),
        SettingSpec::flag("dataDir", "--datadir %s")
            .with_default(profile.data_dir.to_string_lossy())
            .with_label("Data Directory")
            .with_kind("directory"),
        SettingSpec::choices(
            "console",
            vec![
                SettingOption::new("true", "Yes", "console"),
                SettingOption::new("false", "No", ""),
            ],
        )
        .with_default("false")
        .with_label("Enable console"),
        SettingSpec::choices(
            "rpc",
            vec![
                SettingOption::new("none", "No", ""),
                SettingOption::new(
                    "metamask",
                    "On for MetaMask",
                    format!("--rpc --rpccorsdomain {}", METAMASK_ORIGINS),
                ),
                SettingOption::new("on", "On for all origins", "--rpc --rpccorsdomain=*"),
            ],
        )
        .with_default("none")
        .with_label("RPC API"),
        SettingSpec::choices(
            "ws",
            vec![
                SettingOption::new("none", "No", ""),
                SettingOption::new("on", "On for all origins", "--ws --wsorigins=*"),
            ],
        )
        .with_default("none")
        .with_label("WebSockets API"),
        SettingSpec::choices(
            "graphql",
            vec![
                SettingOption::new("true", "Yes (v1.9.0 and later)", "--graphql"),
                SettingOption::new("false", "No", ""),
            ],
        )
        .with_default("false")
        .with_label("Enable GraphQL"),
    ]
}
