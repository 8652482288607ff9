//! Error types for the rtslink protocol engine
//!
//! This module contains all error types used throughout the core: cryptographic
//! errors, session errors, packet and transfer errors, key storage errors, the
//! main `RtsError` type that unifies them, and `CommandError`, the single failure
//! shape handed to callers waiting on a command.

use core::time::Duration;

use crate::protocol::messages::{CommandKind, RtsTag};

// ----------------------------------------------------------------------------
// Specific Error Types
// ----------------------------------------------------------------------------

/// Specific cryptographic error types
#[derive(Debug, thiserror::Error)]
pub enum CryptographicError {
    #[error("Encryption failed")]
    EncryptionFailed,
    #[error("Decryption failed")]
    DecryptionFailed,
    #[error("Key derivation failed")]
    KeyDerivationFailed,
}

/// Specific session error types
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Session not ready for commands (state: {state})")]
    NotReady { state: &'static str },
    #[error("Session is not waiting for a PIN")]
    NotAwaitingPin,
    #[error("Malformed PIN: {reason}")]
    MalformedPin { reason: &'static str },
    #[error("A {kind} request is already pending")]
    Busy { kind: CommandKind },
}

/// Specific packet validation error types
#[derive(Debug, thiserror::Error)]
pub enum PacketError {
    #[error("Frame too short (expected at least {expected}, got {actual})")]
    TooShort { expected: usize, actual: usize },
    #[error("Not a handshake frame (first byte {first})")]
    NotHandshake { first: u8 },
}

/// Specific transfer error types
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("Transfer {file_id} exceeded {limit} bytes")]
    TooLarge { file_id: u32, limit: usize },
}

/// Specific key storage error types
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Key store I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Key store format error: {0}")]
    Format(#[from] serde_json::Error),
    #[error("Key store contains malformed key material: {reason}")]
    MalformedKey { reason: String },
}

// ----------------------------------------------------------------------------
// Main Error Type
// ----------------------------------------------------------------------------

/// Core error types for the rtslink protocol engine
#[derive(Debug, thiserror::Error)]
pub enum RtsError {
    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("Cryptographic error: {0}")]
    Crypto(#[from] CryptographicError),

    #[error("Invalid packet: {0}")]
    InvalidPacket(#[from] PacketError),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Transport refused or failed to carry a frame
    #[error("Transport error: {reason}")]
    Transport { reason: String },

    /// Channel communication error between the client handle and the session task
    #[error("Channel error: {message}")]
    Channel { message: String },

    /// Configuration error
    #[error("Configuration error: {reason}")]
    Configuration { reason: String },
}

// ----------------------------------------------------------------------------
// Convenience Error Constructors
// ----------------------------------------------------------------------------

impl RtsError {
    /// Create a transport error with a reason
    pub fn transport<T: Into<String>>(reason: T) -> Self {
        RtsError::Transport {
            reason: reason.into(),
        }
    }

    /// Create a channel error with a message
    pub fn channel_error<T: Into<String>>(message: T) -> Self {
        RtsError::Channel {
            message: message.into(),
        }
    }

    /// Create a configuration error with a reason
    pub fn config_error<T: Into<String>>(reason: T) -> Self {
        RtsError::Configuration {
            reason: reason.into(),
        }
    }

    /// Create a not-ready error for the named state
    pub fn not_ready(state: &'static str) -> Self {
        RtsError::Session(SessionError::NotReady { state })
    }

    /// Create a decryption failure
    pub fn decryption_failed() -> Self {
        RtsError::Crypto(CryptographicError::DecryptionFailed)
    }
}

// ----------------------------------------------------------------------------
// Command Failures
// ----------------------------------------------------------------------------

/// Failure delivered to a caller waiting on a command response
///
/// Every way a command can go wrong (peer rejection, timeout, teardown,
/// interruption) collapses into this one type.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CommandError {
    /// The peer answered with the generic response tag instead of the expected one
    #[error("Robot rejected {kind} request (code {code}): {message}")]
    Rejected {
        kind: CommandKind,
        code: u8,
        message: String,
    },
    /// No response arrived within the allowed window
    #[error("No response to {kind} request after {after:?}")]
    NoResponse { kind: CommandKind, after: Duration },
    /// A newer request of the same kind replaced this one
    #[error("{kind} request was superseded by a newer request")]
    Superseded { kind: CommandKind },
    /// The wait was interrupted locally
    #[error("{kind} request was cancelled")]
    Cancelled { kind: CommandKind },
    /// The peer returned a response of the right kind with a failure status
    #[error("{kind} request failed with exit code {exit_code}")]
    Failed { kind: CommandKind, exit_code: u32 },
    /// A response arrived that cannot satisfy this request
    #[error("Unexpected {tag:?} response to {kind} request")]
    Unexpected { kind: CommandKind, tag: RtsTag },
    /// The session was torn down while the request was pending
    #[error("Session disconnected")]
    Disconnected,
    /// A chunked transfer was abandoned before completing
    #[error("Transfer {file_id} aborted after exceeding {limit} bytes")]
    TransferAborted { file_id: u32, limit: usize },
    /// The request could not be issued at all
    #[error("Request not sent: {reason}")]
    NotSent { reason: String },
}

// ----------------------------------------------------------------------------
// Type Aliases
// ----------------------------------------------------------------------------

pub type Result<T> = core::result::Result<T, RtsError>;
