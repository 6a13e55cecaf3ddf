//! The `error` module defines the error taxonomy shared by every actor.
//!
//! Errors are never globally fatal. Callers map them onto one of two
//! recovery paths: local cleanup (an unreachable peer is unsubscribed) or
//! delegation to an external retry mechanism (the ingest queue redelivers).

use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BrokerError {
    /// The target actor's mailbox is closed or it dropped the reply.
    #[error("{target} is unreachable")]
    Unreachable { target: String },

    #[error("call to {target} timed out after {after:?}")]
    Timeout { target: String, after: Duration },

    #[error("storage error: {0}")]
    Storage(#[from] sled::Error),

    #[error("codec error: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("websocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),

    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl BrokerError {
    pub fn unreachable(target: impl Into<String>) -> Self {
        BrokerError::Unreachable {
            target: target.into(),
        }
    }

    /// Short stable label for logs and interaction records.
    pub fn as_label(&self) -> &'static str {
        match self {
            BrokerError::Unreachable { .. } => "unreachable",
            BrokerError::Timeout { .. } => "timeout",
            BrokerError::Storage(_) => "storage",
            BrokerError::Codec(_) => "codec",
            BrokerError::Config(_) => "config",
            BrokerError::Io(_) => "io",
            BrokerError::WebSocket(_) => "websocket",
            BrokerError::InvalidRequest(_) => "invalid_request",
        }
    }
}

pub type Result<T> = std::result::Result<T, BrokerError>;
