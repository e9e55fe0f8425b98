//! Typed events published by a supervisor
//!
//! Callers subscribe to a broadcast channel of [`SupervisorEvent`]s instead of
//! registering callbacks per method name. Approval requests arrive as
//! [`Notification`]s and are answered through `ProcessSupervisor::approve`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::GridError;

// ============================================================================
// Events
// ============================================================================

/// Which pipe a line came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputStream {
    Stdout,
    Stderr,
}

impl OutputStream {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stdout => "stdout",
            Self::Stderr => "stderr",
        }
    }
}

/// Events emitted during a supervisor's lifecycle
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SupervisorEvent {
    Starting,
    Started,
    /// Readiness marker observed
    Connect,
    Stopping,
    Stopped,
    Error(SupervisorFailure),
    Log {
        stream: OutputStream,
        line: String,
    },
    DownloadProgress {
        percent: u8,
    },
    Notification(Notification),
    /// Inbound message carrying an `error` member
    ProtocolError {
        method: Option<String>,
        id: Option<Value>,
        error: Value,
    },
    /// A line that looked like JSON but did not parse
    ParseWarning {
        line: String,
        error: String,
    },
}

impl SupervisorEvent {
    /// External event name (`approveTx`, `downloadProgress`, ...)
    pub fn name(&self) -> &str {
        match self {
            Self::Starting => "starting",
            Self::Started => "started",
            Self::Connect => "connect",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
            Self::Error(_) => "error",
            Self::Log { .. } => "log",
            Self::DownloadProgress { .. } => "downloadProgress",
            Self::Notification(n) => n.kind.event_name(),
            Self::ProtocolError { .. } => "protocolError",
            Self::ParseWarning { .. } => "parseWarning",
        }
    }
}

/// Clonable snapshot of a failure, for delivery over the event channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupervisorFailure {
    pub message: String,
    pub exit_code: Option<i32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub last_logs: Vec<String>,
}

impl From<&GridError> for SupervisorFailure {
    fn from(err: &GridError) -> Self {
        let (exit_code, last_logs) = match err.root() {
            GridError::AbnormalExit { code, last_logs } => (*code, last_logs.clone()),
            _ => (None, Vec::new()),
        };
        Self {
            message: err.to_string(),
            exit_code,
            last_logs,
        }
    }
}

// ============================================================================
// Notifications
// ============================================================================

/// Closed set of inbound methods the stdio UI protocol defines
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum NotificationKind {
    ApproveTx,
    ApproveSignData,
    ApproveListing,
    ApproveNewAccount,
    ShowInfo,
    ShowError,
    OnApprovedTx,
    OnSignerStartup,
    OnInputRequired,
    /// Anything else, kept verbatim
    Unknown(String),
}

impl NotificationKind {
    /// Map a wire method (`ui_approveTx` or `approveTx`) to its kind
    pub fn from_method(method: &str) -> Self {
        let name = method.strip_prefix("ui_").unwrap_or(method);
        match name {
            "approveTx" => Self::ApproveTx,
            "approveSignData" => Self::ApproveSignData,
            "approveListing" => Self::ApproveListing,
            "approveNewAccount" => Self::ApproveNewAccount,
            "showInfo" => Self::ShowInfo,
            "showError" => Self::ShowError,
            "onApprovedTx" => Self::OnApprovedTx,
            "onSignerStartup" => Self::OnSignerStartup,
            "onInputRequired" => Self::OnInputRequired,
            _ => Self::Unknown(method.to_string()),
        }
    }

    pub fn event_name(&self) -> &str {
        match self {
            Self::ApproveTx => "approveTx",
            Self::ApproveSignData => "approveSignData",
            Self::ApproveListing => "approveListing",
            Self::ApproveNewAccount => "approveNewAccount",
            Self::ShowInfo => "showInfo",
            Self::ShowError => "showError",
            Self::OnApprovedTx => "onApprovedTx",
            Self::OnSignerStartup => "onSignerStartup",
            Self::OnInputRequired => "onInputRequired",
            Self::Unknown(method) => method,
        }
    }

    /// A user-facing decision the caller must answer
    pub fn requires_approval(&self) -> bool {
        matches!(
            self,
            Self::ApproveTx | Self::ApproveSignData | Self::ApproveListing | Self::ApproveNewAccount
        )
    }

    /// Informational kinds that may be acknowledged without asking anyone
    pub fn auto_acknowledged(&self) -> bool {
        matches!(
            self,
            Self::ShowInfo | Self::ShowError | Self::OnApprovedTx | Self::OnSignerStartup
        )
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self, Self::Unknown(_))
    }
}

/// An inbound request or one-way notification
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
    pub kind: NotificationKind,
    pub method: String,
    /// Present when the sender expects a reply
    pub id: Option<Value>,
    pub params: Value,
}

impl Notification {
    pub fn expects_reply(&self) -> bool {
        self.id.as_ref().is_some_and(|id| !id.is_null())
    }

    /// Short human-readable description
    pub fn summary(&self) -> String {
        let first = self.first_param();
        let text = |v: &Value| v.get("text").and_then(Value::as_str).unwrap_or_default().to_string();

        match &self.kind {
            NotificationKind::ApproveTx => "Transaction Signing is awaiting review.".to_string(),
            NotificationKind::ApproveSignData => "Message signing is awaiting review.".to_string(),
            NotificationKind::ApproveListing => "Account listing is awaiting review.".to_string(),
            NotificationKind::ApproveNewAccount => {
                "New account request is awaiting review.".to_string()
            }
            NotificationKind::ShowInfo | NotificationKind::ShowError => text(first),
            NotificationKind::OnApprovedTx => format!(
                "Signed {}",
                first
                    .pointer("/tx/hash")
                    .and_then(Value::as_str)
                    .unwrap_or("transaction")
            ),
            NotificationKind::OnSignerStartup => {
                let info = first.get("info").unwrap_or(&Value::Null);
                let field = |k: &str| info.get(k).and_then(Value::as_str).unwrap_or("n/a").to_string();
                format!(
                    "Clef is up. Web: {} IPC:{}",
                    field("extapi_http"),
                    field("extapi_ipc")
                )
            }
            NotificationKind::OnInputRequired => format!("Input required:{}", text(first)),
            NotificationKind::Unknown(method) => format!("Unhandled method {}", method),
        }
    }

    /// `params[0]` for positional params, the object itself otherwise
    fn first_param(&self) -> &Value {
        match &self.params {
            Value::Array(items) => items.first().unwrap_or(&Value::Null),
            other => other,
        }
    }
}
