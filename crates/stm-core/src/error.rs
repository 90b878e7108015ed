//! Error types for stm-core.
//!
//! Wire-level failures (AEAD rejection, malformed frames, diffs against
//! unknown states) are dropped silently inside the transport and never
//! reach this type. The errors here cover the surfaces a caller can
//! actually act on: socket setup, key handling, and codec misuse.

use thiserror::Error;

/// Main error type for stm operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error from underlying system calls.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Protocol violation or malformed message.
    #[error("protocol error: {message}")]
    Protocol { message: String },

    /// Codec error during encoding/decoding.
    #[error("codec error: {message}")]
    Codec { message: String },

    /// Session key could not be parsed or applied.
    #[error("key error: {message}")]
    Key { message: String },

    /// No peer address is known yet.
    #[error("not attached to a peer")]
    NotAttached,
}

impl Error {
    pub(crate) fn codec(message: impl Into<String>) -> Self {
        Error::Codec {
            message: message.into(),
        }
    }

    pub(crate) fn protocol(message: impl Into<String>) -> Self {
        Error::Protocol {
            message: message.into(),
        }
    }

    pub(crate) fn key(message: impl Into<String>) -> Self {
        Error::Key {
            message: message.into(),
        }
    }
}

/// Convenience result type for stm operations.
pub type Result<T> = std::result::Result<T, Error>;
