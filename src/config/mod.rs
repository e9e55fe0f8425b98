// src/config/mod.rs
// Configuration: environment overrides and the optional user config file

pub mod env;
pub mod file;

pub use env::{ProviderConfig, SupervisorConfig};
pub use file::{ClientSection, GridConfig};
