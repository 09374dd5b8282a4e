//! Error types for protocol and topology operations

use std::io;
use thiserror::Error;

/// Result type used throughout the crate
pub type RedisResult<T> = Result<T, RedisError>;

/// Comprehensive error type for protocol and topology operations
#[derive(Error, Debug)]
pub enum RedisError {
    /// IO error during network operations
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// The byte stream could not be parsed as a valid RESP frame.
    /// Always fatal to the owning connection.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Transport-level failure (refused, reset, closed) on a specific node
    #[error("Connection error ({addr}): {message}")]
    Connection {
        /// Address of the failing connection (host:port or socket path)
        addr: String,
        /// Description of the failure
        message: String,
    },

    /// A configured I/O timeout elapsed. The connection is considered
    /// desynchronized and must be disconnected, not reused.
    #[error("Operation timed out ({0})")]
    Timeout(String),

    /// The server returned a RESP error frame. The connection stays usable.
    #[error("Server error: {message}")]
    Server {
        /// Leading word of the error message (e.g. `WRONGTYPE`, `LOADING`)
        code: String,
        /// Full error message as sent by the server
        message: String,
    },

    /// Invalid options at construction time
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// A write (or a read with no replica available) was requested but no
    /// master is configured
    #[error("No master connection available")]
    NoMaster,

    /// Every configured sentinel was tried and none could be reached
    #[error("No sentinel available")]
    NoSentinel,

    /// Sentinel does not monitor the requested service. Fatal: retrying
    /// across sentinels will not fix it.
    #[error("Sentinel reports no master for service '{0}'")]
    MasterNotFound(String),

    /// A node's actual role (via `ROLE`) does not match what topology
    /// metadata expected
    #[error("Role mismatch for {addr}: expected {expected}, server reports {actual}")]
    RoleMismatch {
        /// Address of the offending node
        addr: String,
        /// Role the topology expected
        expected: String,
        /// Role the server reported
        actual: String,
    },

    /// The node set of a distribution strategy is empty
    #[error("No nodes available for distribution")]
    NoNodes,

    /// The command cannot be routed by this aggregate
    #[error("Operation not supported: {0}")]
    Unsupported(String),

    /// Type conversion error on a reply value
    #[error("Type conversion error: {0}")]
    Type(String),

    /// Maximum retry attempts exceeded
    #[error("Maximum retry attempts ({0}) exceeded")]
    MaxRetriesExceeded(usize),

    /// The server answered something the handshake did not expect
    #[error("Unexpected response: {0}")]
    UnexpectedResponse(String),
}

impl RedisError {
    /// Build a `Server` error from a raw RESP error message, extracting the
    /// leading word as the error code (e.g. `WRONGTYPE` from
    /// `WRONGTYPE Operation against a key...`).
    #[must_use]
    pub fn server(message: impl Into<String>) -> Self {
        let message = message.into();
        let code = message
            .split_whitespace()
            .next()
            .unwrap_or_default()
            .to_string();
        Self::Server { code, message }
    }

    /// Build a `Connection` error for the given node address
    #[must_use]
    pub fn connection(addr: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Connection {
            addr: addr.into(),
            message: message.into(),
        }
    }

    /// Check whether this is a `LOADING` server reply (the target node is
    /// still loading its dataset)
    #[must_use]
    pub fn is_loading(&self) -> bool {
        matches!(self, Self::Server { code, .. } if code == "LOADING")
    }

    /// Check whether an aggregate may transparently retry this error on
    /// another connection. Covers transport failures, timeouts and the
    /// transient `LOADING` server reply; protocol and configuration errors
    /// are never retried.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Io(_) | Self::Connection { .. } | Self::Timeout(_) => true,
            Self::Server { .. } => self.is_loading(),
            _ => false,
        }
    }
}
