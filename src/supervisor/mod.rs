//! Process supervision
//!
//! A [`ProcessSupervisor`] owns one client subprocess: it provisions the
//! binary through a [`ReleaseProvider`](crate::release::ReleaseProvider),
//! builds the launch flags, spawns the process and runs its output through
//! the [`ProtocolBridge`]. Callers observe everything through
//! [`SupervisorEvent`]s.

pub mod bridge;
pub mod events;
pub mod probe;
pub mod process;
pub mod state;

pub use bridge::{BridgeLine, LineBuffer, LineKind, ProtocolBridge};
pub use events::{Notification, NotificationKind, OutputStream, SupervisorEvent, SupervisorFailure};
pub use probe::check_connection;
pub use process::ProcessSupervisor;
pub use state::SupervisorState;
