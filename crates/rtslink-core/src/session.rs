//! Message Router
//!
//! A `Session` is the single entry point for inbound frames and outbound
//! commands of one connected robot. Inbound frames are decrypted when the
//! session is encrypted, unpacked, and dispatched by tag to the pairing state
//! machine, the request correlator or the transfer reassembler. Outbound
//! messages are packed, encrypted when required and handed to the transport.
//!
//! Malformed or undecryptable frames never fail the session: they are logged,
//! counted in `SessionStats` and dropped.

use core::mem;

use tracing::{debug, info, warn};

use crate::config::SessionConfig;
use crate::errors::{CommandError, Result, RtsError, SessionError, TransferError};
use crate::keystore::KeyStore;
use crate::protocol::codec::{decode_handshake, encode_handshake, is_handshake_frame, BincodeCodec, MessageCodec};
use crate::protocol::correlator::{PendingResponse, Ticket};
use crate::protocol::crypto::PublicKey;
use crate::protocol::messages::{CommandKind, Request, Response, RtsMessage};
use crate::protocol::pairing::{PairingInput, PairingState, Reply, SavedSession, Transition};
use crate::protocol::transfer::{CompletedTransfer, FileChunk};
use crate::transport::FrameSink;

// ----------------------------------------------------------------------------
// Events and Statistics
// ----------------------------------------------------------------------------

/// Notable things that happened while handling a frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Version handshake accepted
    HandshakeComplete { version: u32 },
    /// Robot speaks a protocol version we do not support
    VersionMismatch { offered: u32, supported: u32 },
    /// Key exchange is waiting for the operator's PIN
    PinRequested,
    /// Secure channel established
    Paired { reconnected: bool },
    /// A transfer completed with no log request waiting for it
    TransferComplete(CompletedTransfer),
    /// OTA progress report with no caller waiting for it
    OtaProgress { status: u8, current: u64, expected: u64 },
    /// Robot cancelled pairing or forced a disconnect
    PairingCancelled,
    /// Transport connection closed
    Disconnected,
}

/// Counters for frames handled by a session
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub frames_received: u64,
    pub frames_sent: u64,
    pub decrypt_failures: u64,
    pub malformed_frames: u64,
    /// Messages that did not fit the pairing state
    pub abnormal_messages: u64,
    pub unhandled_messages: u64,
    pub transfers_completed: u64,
    /// Sessions restarted by a new version handshake
    pub sessions_superseded: u64,
    /// Events discarded because the event receiver fell behind
    pub events_dropped: u64,
}

/// A command that was sent and is waiting for its response
#[derive(Debug)]
pub struct IssuedRequest {
    pub kind: CommandKind,
    pub ticket: Ticket,
    pub response: PendingResponse,
}

// ----------------------------------------------------------------------------
// Session
// ----------------------------------------------------------------------------

/// Protocol session with one robot
pub struct Session<S: FrameSink, C: MessageCodec = BincodeCodec> {
    peer_name: String,
    config: SessionConfig,
    state: PairingState,
    sink: S,
    codec: C,
    store: Option<Box<dyn KeyStore>>,
    stats: SessionStats,
}

impl<S: FrameSink> Session<S, BincodeCodec> {
    /// Create a new session using the default codec
    pub fn new(peer_name: impl Into<String>, config: SessionConfig, sink: S) -> Self {
        Self::with_codec(peer_name, config, sink, BincodeCodec)
    }
}

impl<S: FrameSink, C: MessageCodec> Session<S, C> {
    /// Create a new session with a custom codec
    pub fn with_codec(peer_name: impl Into<String>, config: SessionConfig, sink: S, codec: C) -> Self {
        Self {
            peer_name: peer_name.into(),
            config,
            state: PairingState::default(),
            sink,
            codec,
            store: None,
            stats: SessionStats::default(),
        }
    }

    /// Attach a key store for reconnection and persistence
    pub fn with_key_store(mut self, store: Box<dyn KeyStore>) -> Self {
        self.store = Some(store);
        self
    }

    // ------------------------------------------------------------------------
    // Inbound
    // ------------------------------------------------------------------------

    /// Handle one complete inbound frame
    ///
    /// Returns an error only when a reply could not be handed to the transport.
    pub fn handle_frame(&mut self, frame: &[u8]) -> Result<Option<SessionEvent>> {
        self.stats.frames_received += 1;

        if is_handshake_frame(frame) {
            let version = decode_handshake(frame)?;
            return self.on_handshake(version);
        }

        let plaintext = match self.state.channel_mut() {
            Some(channel) => match channel.decrypt(frame) {
                Ok(plaintext) => plaintext,
                Err(e) => {
                    self.stats.decrypt_failures += 1;
                    warn!(
                        "Dropping undecryptable frame from {} ({} total): {}",
                        self.peer_name, self.stats.decrypt_failures, e
                    );
                    return Ok(None);
                }
            },
            None => frame.to_vec(),
        };

        let message = match self.codec.unpack(&plaintext) {
            Ok(message) => message,
            Err(e) => {
                self.stats.malformed_frames += 1;
                warn!("Dropping malformed frame from {}: {}", self.peer_name, e);
                return Ok(None);
            }
        };

        debug!("<- {:?} from {}", message.tag(), self.peer_name);
        self.dispatch(message)
    }

    fn on_handshake(&mut self, version: u32) -> Result<Option<SessionEvent>> {
        if !matches!(self.state, PairingState::Unpaired { .. }) {
            info!(
                "New handshake from {} supersedes session in state {}",
                self.peer_name,
                self.state.state_name()
            );
            self.stats.sessions_superseded += 1;
            self.teardown();
        }
        self.drive(PairingInput::Handshake { version })
    }

    fn dispatch(&mut self, message: RtsMessage) -> Result<Option<SessionEvent>> {
        let tag = message.tag();
        match message {
            RtsMessage::ConnRequest { public_key } => {
                let saved = self.saved_session(&public_key);
                self.drive(PairingInput::ConnRequest {
                    robot_key: public_key,
                    saved,
                })
            }
            RtsMessage::NonceMessage {
                to_robot_nonce,
                to_device_nonce,
            } => self.drive(PairingInput::Nonce {
                to_robot: to_robot_nonce,
                to_device: to_device_nonce,
            }),
            RtsMessage::ChallengeMessage { number } => self.drive(PairingInput::Challenge(number)),
            RtsMessage::ChallengeSuccess => self.drive(PairingInput::ChallengeSuccess),
            RtsMessage::CancelPairing | RtsMessage::ForceDisconnect => {
                self.fail_pending(CommandError::Disconnected);
                self.drive(PairingInput::Cancel)
            }
            RtsMessage::FileDownload {
                file_id,
                packet_number,
                packet_total,
                file_chunk,
                ..
            } => Ok(self.on_file_chunk(FileChunk {
                file_id,
                packet_number,
                packet_total,
                data: file_chunk,
            })),
            RtsMessage::LogResponse { exit_code, file_id } => {
                Ok(self.on_log_response(exit_code, file_id))
            }
            RtsMessage::OtaUpdateResponse {
                status,
                current,
                expected,
            } => Ok(self.on_ota_progress(status, current, expected)),
            RtsMessage::Response { code, text } => Ok(self.on_generic_response(code, text)),
            other => match CommandKind::for_response(tag) {
                Some(kind) => Ok(self.on_command_response(kind, other)),
                None => {
                    self.stats.unhandled_messages += 1;
                    debug!("Dropping unhandled {:?} from {}", tag, self.peer_name);
                    Ok(None)
                }
            },
        }
    }

    fn on_command_response(&mut self, kind: CommandKind, message: RtsMessage) -> Option<SessionEvent> {
        match self.state.ready_link() {
            Some(link) => {
                link.correlator.complete(kind, Response::Message(message));
            }
            None => self.not_ready_drop(kind),
        }
        None
    }

    fn on_ota_progress(&mut self, status: u8, current: u64, expected: u64) -> Option<SessionEvent> {
        let Some(link) = self.state.ready_link() else {
            self.not_ready_drop(CommandKind::Ota);
            return None;
        };
        if link.correlator.is_pending(CommandKind::Ota) {
            link.correlator.complete(
                CommandKind::Ota,
                Response::Message(RtsMessage::OtaUpdateResponse {
                    status,
                    current,
                    expected,
                }),
            );
            None
        } else {
            Some(SessionEvent::OtaProgress {
                status,
                current,
                expected,
            })
        }
    }

    fn on_log_response(&mut self, exit_code: u32, file_id: u32) -> Option<SessionEvent> {
        let Some(link) = self.state.ready_link() else {
            self.not_ready_drop(CommandKind::Logs);
            return None;
        };
        if exit_code != 0 {
            warn!("Log request failed on robot with exit code {}", exit_code);
            link.correlator.fail(
                CommandKind::Logs,
                CommandError::Failed {
                    kind: CommandKind::Logs,
                    exit_code,
                },
            );
        } else {
            debug!("Log bundle {} is on its way", file_id);
            link.reassembler.expect(file_id);
        }
        None
    }

    fn on_file_chunk(&mut self, chunk: FileChunk) -> Option<SessionEvent> {
        let Some(link) = self.state.ready_link() else {
            self.not_ready_drop(CommandKind::Logs);
            return None;
        };
        match link.reassembler.accept(chunk) {
            Ok(Some(transfer)) => {
                self.stats.transfers_completed += 1;
                info!(
                    "Transfer {} complete ({} bytes in {} packets)",
                    transfer.file_id,
                    transfer.data.len(),
                    transfer.packets
                );
                if link.correlator.is_pending(CommandKind::Logs) {
                    link.correlator
                        .complete(CommandKind::Logs, Response::Transfer(transfer));
                    None
                } else {
                    Some(SessionEvent::TransferComplete(transfer))
                }
            }
            Ok(None) => None,
            Err(TransferError::TooLarge { file_id, limit }) => {
                warn!("Aborting transfer {}: larger than {} bytes", file_id, limit);
                link.correlator.fail(
                    CommandKind::Logs,
                    CommandError::TransferAborted { file_id, limit },
                );
                None
            }
        }
    }

    fn on_generic_response(&mut self, code: u8, text: String) -> Option<SessionEvent> {
        let Some(link) = self.state.ready_link() else {
            self.stats.abnormal_messages += 1;
            warn!("Robot response {} ({}) before pairing completed", code, text);
            return None;
        };
        let failed = link.correlator.fail_most_recent(|kind| CommandError::Rejected {
            kind,
            code,
            message: text.clone(),
        });
        match failed {
            Some(kind) => info!("Robot rejected {} request: {} ({})", kind, text, code),
            None => debug!("Robot response {} ({}) with nothing pending", code, text),
        }
        None
    }

    fn not_ready_drop(&mut self, kind: CommandKind) {
        self.stats.abnormal_messages += 1;
        warn!(
            "Dropping {} response in state {}",
            kind,
            self.state.state_name()
        );
    }

    // ------------------------------------------------------------------------
    // Pairing
    // ------------------------------------------------------------------------

    /// Resume key exchange with the operator's PIN
    pub fn submit_pin(&mut self, pin: &str) -> Result<()> {
        if !matches!(self.state, PairingState::AwaitingPin(_)) {
            return Err(SessionError::NotAwaitingPin.into());
        }
        if pin.is_empty() || !pin.bytes().all(|b| b.is_ascii_digit()) {
            return Err(SessionError::MalformedPin {
                reason: "PIN must be a non-empty string of digits",
            }
            .into());
        }
        if self.config.pin_digits.is_some_and(|digits| pin.len() != digits) {
            return Err(SessionError::MalformedPin {
                reason: "PIN has the wrong number of digits",
            }
            .into());
        }
        self.drive(PairingInput::Pin(pin.to_string()))?;
        Ok(())
    }

    /// Cancel pairing locally and tell the robot
    pub fn cancel_pairing(&mut self) -> Result<()> {
        if matches!(self.state, PairingState::Unpaired { .. }) {
            return Ok(());
        }
        let sealed = self.state.is_encrypted();
        let result = self.send_message(&RtsMessage::CancelPairing, sealed);
        info!("Pairing with {} cancelled locally", self.peer_name);
        self.fail_pending(CommandError::Disconnected);
        self.state = PairingState::Unpaired {
            version: self.state.negotiated_version(),
        };
        result
    }

    /// Drop all session state; pending commands fail with `Disconnected`
    pub fn teardown(&mut self) {
        self.fail_pending(CommandError::Disconnected);
        if !matches!(self.state, PairingState::Unpaired { version: None }) {
            debug!(
                "Session with {} reset from {}",
                self.peer_name,
                self.state.state_name()
            );
        }
        self.state = PairingState::default();
    }

    fn drive(&mut self, input: PairingInput) -> Result<Option<SessionEvent>> {
        let state = mem::take(&mut self.state);
        let transition = state.transition(input, &self.config);
        self.apply(transition)
    }

    fn apply(&mut self, transition: Transition) -> Result<Option<SessionEvent>> {
        let Transition {
            state,
            reply,
            event,
            abnormal,
        } = transition;

        self.state = state;
        if abnormal {
            self.stats.abnormal_messages += 1;
        }
        if let Some(reply) = reply {
            match reply {
                Reply::Handshake(version) => self.send_raw(encode_handshake(version))?,
                Reply::Plain(message) => self.send_message(&message, false)?,
                Reply::Sealed(message) => self.send_message(&message, true)?,
            }
        }
        if let Some(SessionEvent::Paired { reconnected: false }) = event {
            self.persist_session();
        }
        Ok(event)
    }

    fn fail_pending(&mut self, error: CommandError) {
        if let Some(link) = self.state.ready_link() {
            let failed = link.correlator.fail_all(error);
            link.reassembler.clear();
            if failed > 0 {
                debug!("Failed {} pending requests", failed);
            }
        }
    }

    fn saved_session(&self, robot_key: &PublicKey) -> Option<SavedSession> {
        if !self.config.reuse_saved_sessions {
            return None;
        }
        let store = self.store.as_ref()?;
        match (store.load(), store.load_session(robot_key)) {
            (Ok(Some(key_pair)), Ok(Some(keys))) => Some(SavedSession { key_pair, keys }),
            (Err(e), _) | (_, Err(e)) => {
                warn!("Key store lookup failed, pairing from scratch: {}", e);
                None
            }
            _ => None,
        }
    }

    fn persist_session(&mut self) {
        if !self.config.persist_sessions {
            return;
        }
        if let (Some(store), PairingState::Ready(link)) = (self.store.as_mut(), &self.state) {
            let saved = store
                .save(&link.peer.key_pair)
                .and_then(|_| store.save_session(&link.peer.robot_key, link.channel.keys()));
            match saved {
                Ok(()) => debug!("Saved session keys for robot {}", link.peer.robot_key.short_hex()),
                Err(e) => warn!("Failed to save session keys: {}", e),
            }
        }
    }

    // ------------------------------------------------------------------------
    // Commands
    // ------------------------------------------------------------------------

    /// Send a command and register for its response
    pub fn issue(&mut self, request: Request) -> Result<IssuedRequest> {
        let state_name = self.state.state_name();
        let policy = self.config.overlap_policy;
        let link = self
            .state
            .ready_link()
            .ok_or_else(|| RtsError::not_ready(state_name))?;

        let kind = request.kind();
        let (ticket, response) = link.correlator.issue(kind, policy)?;

        if let Some(message) = request.into_message() {
            if let Err(e) = self.send_message(&message, true) {
                if let Some(link) = self.state.ready_link() {
                    link.correlator.cancel(kind, ticket);
                }
                return Err(e);
            }
        }

        Ok(IssuedRequest {
            kind,
            ticket,
            response,
        })
    }

    /// Install SSH public keys on the robot, one `authorized_keys` line each
    ///
    /// The robot acknowledges nothing, so no request is tracked.
    pub fn authorize_ssh_keys(&mut self, keys: &[String]) -> Result<()> {
        if !self.state.is_authenticated() {
            return Err(RtsError::not_ready(self.state.state_name()));
        }
        let authorized_keys = keys
            .iter()
            .map(|key| format!("{}\n", key.trim_end()))
            .collect();
        info!("Sending {} SSH key(s) to {}", keys.len(), self.peer_name);
        self.send_message(&RtsMessage::SshRequest { authorized_keys }, true)
    }

    /// Stop waiting for a response; a stale ticket leaves newer requests alone
    pub fn cancel_request(&mut self, kind: CommandKind, ticket: Ticket) -> bool {
        match self.state.ready_link() {
            Some(link) => link.correlator.cancel(kind, ticket),
            None => false,
        }
    }

    /// Abort a wait on operator request; OTA also tells the robot to stop
    pub fn interrupt(&mut self, kind: CommandKind, ticket: Ticket) -> Result<bool> {
        let cancelled = self.cancel_request(kind, ticket);
        if cancelled && kind == CommandKind::Ota {
            info!("Asking robot to cancel OTA update");
            self.send_message(&RtsMessage::OtaCancelRequest, true)?;
        }
        Ok(cancelled)
    }

    // ------------------------------------------------------------------------
    // Outbound
    // ------------------------------------------------------------------------

    fn send_message(&mut self, message: &RtsMessage, sealed: bool) -> Result<()> {
        let mut bytes = self.codec.pack(message)?;
        if sealed {
            let state_name = self.state.state_name();
            let channel = self
                .state
                .channel_mut()
                .ok_or_else(|| RtsError::not_ready(state_name))?;
            bytes = channel.encrypt(&bytes)?;
        }
        debug!(
            "-> {:?} to {} ({} bytes{})",
            message.tag(),
            self.peer_name,
            bytes.len(),
            if sealed { ", sealed" } else { "" }
        );
        self.send_raw(bytes)
    }

    fn send_raw(&mut self, frame: Vec<u8>) -> Result<()> {
        self.sink.send_frame(frame)?;
        self.stats.frames_sent += 1;
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------------

    pub fn peer_name(&self) -> &str {
        &self.peer_name
    }

    pub fn state_name(&self) -> &'static str {
        self.state.state_name()
    }

    pub fn is_encrypted(&self) -> bool {
        self.state.is_encrypted()
    }

    pub fn is_authenticated(&self) -> bool {
        self.state.is_authenticated()
    }

    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Number of commands waiting for a response
    pub fn pending_count(&self) -> usize {
        match &self.state {
            PairingState::Ready(link) => link.correlator.pending_count(),
            _ => 0,
        }
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
