//! Error types for the pool server
//!
//! A single `thiserror`-based error enum covers configuration, network,
//! protocol and validation failures, with a crate-wide `Result` alias.

use thiserror::Error;

/// Main error type for the pool server
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// HTTP transport errors talking to the daemon
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// JSON parsing errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Daemon returned a JSON-RPC error member
    #[error("Daemon RPC error {code}: {message}")]
    Rpc {
        /// JSON-RPC error code
        code: i64,
        /// JSON-RPC error message
        message: String,
    },

    /// Mining protocol errors (bad frames, bad payloads)
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Malformed or undersized block template data
    #[error("Invalid template: {0}")]
    InvalidTemplate(String),

    /// Invalid wallet address
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    /// TLS setup errors
    #[error("TLS error: {0}")]
    Tls(String),

    /// Generic errors
    #[error("{0}")]
    Other(String),
}

/// Result type alias for the pool server
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a protocol error
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    /// Create an invalid-template error
    pub fn invalid_template(msg: impl Into<String>) -> Self {
        Self::InvalidTemplate(msg.into())
    }

    /// Create an invalid-address error
    pub fn invalid_address(msg: impl Into<String>) -> Self {
        Self::InvalidAddress(msg.into())
    }

    /// Create a TLS error
    pub fn tls(msg: impl Into<String>) -> Self {
        Self::Tls(msg.into())
    }

    /// Create a generic error
    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }
}
