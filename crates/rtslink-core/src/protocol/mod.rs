//! Robot transport protocol
//!
//! Crypto primitives, the crypto channel, the message schema and codec, and the
//! three protocol components driven by the session router: the pairing state
//! machine, the request correlator and the chunked transfer reassembler.

pub mod channel;
pub mod codec;
pub mod correlator;
pub mod crypto;
pub mod messages;
pub mod pairing;
pub mod transfer;

pub use channel::CryptoChannel;
pub use codec::{BincodeCodec, MessageCodec};
pub use correlator::{OverlapPolicy, PendingResponse, RequestCorrelator, Ticket};
pub use crypto::{AeadNonce, KeyPair, PublicKey, Role, SessionKeys};
pub use messages::{CommandKind, ConnectionType, Request, Response, RtsMessage, RtsTag, WifiNetwork, PROTOCOL_VERSION};
pub use pairing::{PairingState, ReadyLink};
pub use transfer::{CompletedTransfer, FileChunk, TransferReassembler};
