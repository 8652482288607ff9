//! rtslink Core Protocol Implementation
//!
//! This crate implements the secure pairing and session protocol used to
//! control a robot over a short-range, packet-size-limited link. It covers the
//! version handshake, the key exchange mixed with an operator PIN, the
//! authenticated encryption of all later traffic, correlation of commands to
//! their responses, and reassembly of chunked file transfers.
//!
//! The transport itself is external: frames come in through
//! `Session::handle_frame` and leave through a `FrameSink`.

// ----------------------------------------------------------------------------
// Module Declarations
// ----------------------------------------------------------------------------

pub mod config;
pub mod errors;
pub mod keystore;
pub mod protocol;
pub mod runtime;
pub mod session;
pub mod transport;

// ----------------------------------------------------------------------------
// Public API
// ----------------------------------------------------------------------------

pub use config::{SessionConfig, TimeoutConfig};
pub use errors::{
    CommandError, CryptographicError, PacketError, Result, RtsError, SessionError,
    StorageError, TransferError,
};
pub use keystore::{FileKeyStore, KeyStore, MemoryKeyStore};
pub use protocol::{
    CommandKind, CompletedTransfer, OverlapPolicy, PublicKey, Request, Response, RtsMessage,
    RtsTag, WifiNetwork, PROTOCOL_VERSION,
};
pub use runtime::{spawn_session, CommandOutcome, EventReceiver, RobotClient};
pub use session::{IssuedRequest, Session, SessionEvent, SessionStats};
pub use transport::FrameSink;
