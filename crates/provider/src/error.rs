//! Error types for the provider lifecycle

use thiserror::Error;

use crate::config::Transport;

pub type Result<T> = std::result::Result<T, ProviderError>;

#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to bind {transport} listener: {source}")]
    Bind {
        transport: Transport,
        #[source]
        source: std::io::Error,
    },

    #[error("Transport {0} is not supported on this platform")]
    UnsupportedTransport(Transport),

    #[error("Invalid handshake {input:?}: {reason}")]
    Handshake { input: String, reason: String },

    #[error("Provider factory for {name:?} failed: {reason}")]
    Factory { name: String, reason: String },

    #[error("Provider server {name:?} failed: {reason}")]
    Server { name: String, reason: String },

    #[error("Orchestration task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}
