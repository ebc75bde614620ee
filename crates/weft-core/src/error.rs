//! Unified error system for Weft
//!
//! A single error type shared by every crate in the workspace. Subsystems
//! construct variants through the helper methods rather than building the
//! struct variants by hand, so call sites stay short and the taxonomy stays
//! closed.

use serde::{Deserialize, Serialize};

/// Unified error type for all Weft operations
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
pub enum WeftError {
    /// Malformed input or configuration
    #[error("Invalid argument: {message}")]
    InvalidArgument {
        /// What was malformed
        message: String,
    },

    /// Operation is not valid in the current lifecycle state
    #[error("Incorrect state: {message}")]
    IncorrectState {
        /// Which state precondition was violated
        message: String,
    },

    /// A bounded pool, slot table, or session table is full
    #[error("Resource exhausted: {message}")]
    ResourceExhausted {
        /// Which resource ran out
        message: String,
    },

    /// Fabric, session, or group not present
    #[error("Not found: {message}")]
    NotFound {
        /// What was absent
        message: String,
    },

    /// A peer did not respond within the interaction deadline
    #[error("Timeout: {message}")]
    Timeout {
        /// Which operation timed out
        message: String,
    },

    /// Datagram dispatch or multicast membership change failed
    #[error("Transport error: {message}")]
    Transport {
        /// What the transport reported
        message: String,
    },

    /// The operation was cancelled before it could resolve
    #[error("Cancelled: {message}")]
    Cancelled {
        /// Why it was cancelled
        message: String,
    },

    /// Persistent storage read/write failed
    #[error("Storage error: {message}")]
    Storage {
        /// What the storage delegate reported
        message: String,
    },

    /// Wire codec encode/decode failed
    #[error("Codec error: {message}")]
    Codec {
        /// What could not be encoded or decoded
        message: String,
    },
}

impl WeftError {
    /// Create an invalid argument error
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Create an incorrect state error
    pub fn incorrect_state(message: impl Into<String>) -> Self {
        Self::IncorrectState {
            message: message.into(),
        }
    }

    /// Create a resource exhausted error
    pub fn resource_exhausted(message: impl Into<String>) -> Self {
        Self::ResourceExhausted {
            message: message.into(),
        }
    }

    /// Create a not found error
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound {
            message: message.into(),
        }
    }

    /// Create a timeout error
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::Timeout {
            message: message.into(),
        }
    }

    /// Create a transport error
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    /// Create a cancelled error
    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::Cancelled {
            message: message.into(),
        }
    }

    /// Create a storage error
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    /// Create a codec error
    pub fn codec(message: impl Into<String>) -> Self {
        Self::Codec {
            message: message.into(),
        }
    }
}

/// Standard Result type for Weft operations
pub type WeftResult<T> = std::result::Result<T, WeftError>;

impl From<std::io::Error> for WeftError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => Self::not_found(err.to_string()),
            std::io::ErrorKind::TimedOut => Self::timeout(err.to_string()),
            _ => Self::transport(err.to_string()),
        }
    }
}
