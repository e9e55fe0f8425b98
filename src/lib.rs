// src/lib.rs
// Grid - provisioning and supervision of Ethereum client binaries

#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used))]

pub mod clients;
pub mod config;
pub mod error;
pub mod flags;
pub mod platform;
pub mod release;
pub mod supervisor;

pub use error::{GridError, Result};
