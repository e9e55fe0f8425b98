// src/error.rs
// Error taxonomy for provisioning and supervision

use thiserror::Error;

use crate::supervisor::SupervisorState;

/// Main error type for the Grid library
#[derive(Error, Debug)]
pub enum GridError {
    /// Malformed settings schema. Always a caller/config bug, never retried.
    #[error("schema error: {0}")]
    Schema(String),

    #[error("download failed for {file_name}: {reason}")]
    Download { file_name: String, reason: String },

    #[error("extraction failed for {file_name}: {reason}")]
    Extraction { file_name: String, reason: String },

    #[error("failed to spawn {binary}: {source}")]
    Spawn {
        binary: String,
        #[source]
        source: std::io::Error,
    },

    /// Subprocess exited non-zero; carries the trailing log lines
    #[error("process exited abnormally with code {}", display_code(.code))]
    AbnormalExit {
        code: Option<i32>,
        last_logs: Vec<String>,
    },

    #[error("no process attached")]
    NotRunning,

    #[error("no output from process within {0:?}")]
    StartupTimeout(std::time::Duration),

    #[error("start failed: {0}")]
    Start(#[source] Box<GridError>),

    #[error("stop failed: {0}")]
    Stop(String),

    #[error("invalid state transition {from} -> {to}")]
    InvalidTransition {
        from: SupervisorState,
        to: SupervisorState,
    },

    #[error("release index error: {0}")]
    Index(String),

    #[error("no release matching `{0}`")]
    NoMatchingRelease(String),

    #[error("version error: {0}")]
    Version(String),

    #[error("unknown client `{0}`")]
    UnknownClient(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("task cancelled")]
    Cancelled,

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

/// Convenience type alias for Result using GridError
pub type Result<T> = std::result::Result<T, GridError>;

fn display_code(code: &Option<i32>) -> String {
    match code {
        Some(code) => code.to_string(),
        None => "none (terminated by signal)".to_string(),
    }
}

impl GridError {
    /// Wrap a provisioning or spawn failure as a StartError
    pub fn start(inner: GridError) -> Self {
        match inner {
            GridError::Start(_) => inner,
            other => GridError::Start(Box::new(other)),
        }
    }

    /// The error wrapped by a StartError, or self
    pub fn root(&self) -> &GridError {
        match self {
            GridError::Start(inner) => inner.root(),
            other => other,
        }
    }

    pub fn download(file_name: impl Into<String>, reason: impl ToString) -> Self {
        GridError::Download {
            file_name: file_name.into(),
            reason: reason.to_string(),
        }
    }

    pub fn extraction(file_name: impl Into<String>, reason: impl ToString) -> Self {
        GridError::Extraction {
            file_name: file_name.into(),
            reason: reason.to_string(),
        }
    }
}

impl From<tokio::task::JoinError> for GridError {
    fn from(err: tokio::task::JoinError) -> Self {
        if err.is_cancelled() {
            GridError::Cancelled
        } else {
            GridError::Anyhow(anyhow::anyhow!(err.to_string()))
        }
    }
}
