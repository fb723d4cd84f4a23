use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum RpcError {
    #[error("Authentication with the scheduler failed: {hint}")]
    Authentication { hint: String },

    #[error("Failed to connect to scheduler at {addr}: {source}")]
    Connection {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("No previous job id found.")]
    JobIdResolution,

    #[error("Failed to access job id cache at {}: {source}", .path.display())]
    Storage {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Remote call failed ({kind}): {message}")]
    Transport { kind: String, message: String },

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Not connected to a scheduler; call connect() first")]
    NotConnected,

    #[error("Already connected to a scheduler")]
    AlreadyConnected,

    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl RpcError {
    /// Remote-call-level failures, whether reported by the scheduler or
    /// detected locally while decoding its reply.
    pub fn is_transport(&self) -> bool {
        matches!(self, RpcError::Transport { .. } | RpcError::Protocol(_))
    }

    /// Misuse of the client lifecycle. Never worth retrying.
    pub fn is_usage(&self) -> bool {
        matches!(self, RpcError::NotConnected | RpcError::AlreadyConnected)
    }

    pub(crate) fn connection(addr: impl Into<String>, source: std::io::Error) -> Self {
        RpcError::Connection {
            addr: addr.into(),
            source,
        }
    }

    pub(crate) fn storage(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        RpcError::Storage {
            path: path.into(),
            source,
        }
    }
}

impl From<serde_json::Error> for RpcError {
    fn from(e: serde_json::Error) -> Self {
        RpcError::Protocol(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, RpcError>;
