//! Supervisor lifecycle state machine

use serde::{Deserialize, Serialize};

// ============================================================================
// State
// ============================================================================

/// Lifecycle state of a supervised process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SupervisorState {
    /// No process attached
    Stopped,
    /// Provisioning the binary or waiting for first output
    Starting,
    /// Process is producing output
    Started,
    /// Readiness marker seen; the RPC endpoint is open
    Connected,
    /// Interrupt sent, waiting for exit
    Stopping,
    /// Start failed or the process died abnormally
    Error,
}

impl SupervisorState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stopped => "stopped",
            Self::Starting => "starting",
            Self::Started => "started",
            Self::Connected => "connected",
            Self::Stopping => "stopping",
            Self::Error => "error",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "stopped" => Some(Self::Stopped),
            "starting" => Some(Self::Starting),
            "started" => Some(Self::Started),
            "connected" => Some(Self::Connected),
            "stopping" => Some(Self::Stopping),
            "error" => Some(Self::Error),
            _ => None,
        }
    }

    /// True while a process is (or is about to be) attached
    pub fn is_running(&self) -> bool {
        matches!(self, Self::Starting | Self::Started | Self::Connected | Self::Stopping)
    }

    /// Allowed edges. `Connected` is only reachable from `Started`, and the
    /// only ways out of `Error` and `Stopped` are recovery and a new start.
    pub fn can_transition_to(&self, next: SupervisorState) -> bool {
        use SupervisorState::*;
        matches!(
            (self, next),
            (Stopped, Starting)
                | (Starting, Started | Error | Stopping)
                | (Started, Connected | Stopping | Stopped | Error)
                | (Connected, Stopping | Stopped | Error)
                | (Stopping, Stopped | Error)
                | (Error, Stopped)
        )
    }
}

impl std::fmt::Display for SupervisorState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
