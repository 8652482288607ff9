//! Pairing State Machine
//!
//! Drives a session from the version handshake through key exchange, PIN
//! entry and the challenge round to an authenticated, encrypted channel.
//!
//! The state is a tagged enum and transitions consume it, so the crypto
//! channel only exists in encrypted states and the request correlator and
//! transfer reassembler only exist once the session is `Ready`.

use tracing::{debug, info, warn};

use crate::config::SessionConfig;
use crate::session::SessionEvent;

use super::channel::CryptoChannel;
use super::correlator::RequestCorrelator;
use super::crypto::{derive_session_keys, mix_pin, AeadNonce, KeyPair, PublicKey, Role, SessionKeys};
use super::messages::{ConnectionType, RtsMessage, RtsTag, PROTOCOL_VERSION};
use super::transfer::TransferReassembler;

// ----------------------------------------------------------------------------
// State Payloads
// ----------------------------------------------------------------------------

/// Key material carried from a saved session into a reconnection
pub struct SavedSession {
    pub key_pair: KeyPair,
    pub keys: SessionKeys,
}

/// The robot this session pairs with and how we got here
#[derive(Debug)]
pub struct PairedPeer {
    pub key_pair: KeyPair,
    pub robot_key: PublicKey,
    pub reconnected: bool,
}

/// Key exchange in progress, waiting for the robot's nonces
#[derive(Debug)]
pub struct KeyExchange {
    key_pair: KeyPair,
    robot_key: PublicKey,
    saved_keys: Option<SessionKeys>,
}

/// Nonces received, waiting for the operator's PIN
#[derive(Debug)]
pub struct PendingPin {
    peer: PairedPeer,
    keys: SessionKeys,
    to_robot_nonce: AeadNonce,
    to_device_nonce: AeadNonce,
}

/// Everything owned by an authenticated session
#[derive(Debug)]
pub struct ReadyLink {
    pub channel: CryptoChannel,
    pub correlator: RequestCorrelator,
    pub reassembler: TransferReassembler,
    pub peer: PairedPeer,
}

impl ReadyLink {
    fn new(channel: CryptoChannel, peer: PairedPeer, config: &SessionConfig) -> Self {
        Self {
            channel,
            correlator: RequestCorrelator::new(),
            reassembler: TransferReassembler::new()
                .with_max_transfer_bytes(config.max_transfer_bytes),
            peer,
        }
    }
}

// ----------------------------------------------------------------------------
// State
// ----------------------------------------------------------------------------

/// Pairing progress of one session
#[derive(Debug)]
pub enum PairingState {
    /// No pairing yet; `version` is set once the handshake was accepted
    Unpaired { version: Option<u32> },
    AwaitingNonce(KeyExchange),
    AwaitingPin(PendingPin),
    AwaitingChallenge {
        channel: CryptoChannel,
        peer: PairedPeer,
    },
    AwaitingChallengeSuccess {
        channel: CryptoChannel,
        peer: PairedPeer,
    },
    Ready(ReadyLink),
}

impl Default for PairingState {
    fn default() -> Self {
        PairingState::Unpaired { version: None }
    }
}

/// Input driving a transition
pub enum PairingInput {
    /// Raw version handshake from the robot
    Handshake { version: u32 },
    /// Robot offers its public key; `saved` is set when reconnecting
    ConnRequest {
        robot_key: PublicKey,
        saved: Option<SavedSession>,
    },
    /// Robot's starting nonces for both directions
    Nonce {
        to_robot: AeadNonce,
        to_device: AeadNonce,
    },
    /// Operator PIN, already validated for shape
    Pin(String),
    Challenge(u32),
    ChallengeSuccess,
    /// Robot cancelled pairing or forced a disconnect
    Cancel,
}

impl PairingInput {
    fn name(&self) -> &'static str {
        match self {
            PairingInput::Handshake { .. } => "Handshake",
            PairingInput::ConnRequest { .. } => "ConnRequest",
            PairingInput::Nonce { .. } => "Nonce",
            PairingInput::Pin(_) => "Pin",
            PairingInput::Challenge(_) => "Challenge",
            PairingInput::ChallengeSuccess => "ChallengeSuccess",
            PairingInput::Cancel => "Cancel",
        }
    }
}

/// Frame to send as part of a transition
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// Raw version handshake frame
    Handshake(u32),
    /// Envelope sent without encryption
    Plain(RtsMessage),
    /// Envelope sent through the crypto channel of the new state
    Sealed(RtsMessage),
}

/// Result of a transition
#[derive(Debug)]
pub struct Transition {
    pub state: PairingState,
    pub reply: Option<Reply>,
    pub event: Option<SessionEvent>,
    /// The input did not fit the state and was ignored
    pub abnormal: bool,
}

impl Transition {
    fn to(state: PairingState) -> Self {
        Self {
            state,
            reply: None,
            event: None,
            abnormal: false,
        }
    }

    fn reply(mut self, reply: Reply) -> Self {
        self.reply = Some(reply);
        self
    }

    fn event(mut self, event: SessionEvent) -> Self {
        self.event = Some(event);
        self
    }

    fn ignored(state: PairingState) -> Self {
        Self {
            abnormal: true,
            ..Self::to(state)
        }
    }
}

// ----------------------------------------------------------------------------
// State Machine Implementation
// ----------------------------------------------------------------------------

impl PairingState {
    /// Get current state name for logging
    pub fn state_name(&self) -> &'static str {
        match self {
            PairingState::Unpaired { .. } => "Unpaired",
            PairingState::AwaitingNonce(_) => "AwaitingNonce",
            PairingState::AwaitingPin(_) => "AwaitingPin",
            PairingState::AwaitingChallenge { .. } => "AwaitingChallenge",
            PairingState::AwaitingChallengeSuccess { .. } => "AwaitingChallengeSuccess",
            PairingState::Ready(_) => "Ready",
        }
    }

    /// Protocol version agreed in the handshake, if one was accepted
    pub fn negotiated_version(&self) -> Option<u32> {
        match self {
            PairingState::Unpaired { version } => *version,
            // Key exchange only starts after an accepted handshake
            _ => Some(PROTOCOL_VERSION),
        }
    }

    /// Whether traffic passes through the crypto channel
    pub fn is_encrypted(&self) -> bool {
        self.channel().is_some()
    }

    /// Whether the challenge round has completed
    pub fn is_authenticated(&self) -> bool {
        matches!(self, PairingState::Ready(_))
    }

    pub fn channel(&self) -> Option<&CryptoChannel> {
        match self {
            PairingState::AwaitingChallenge { channel, .. }
            | PairingState::AwaitingChallengeSuccess { channel, .. } => Some(channel),
            PairingState::Ready(link) => Some(&link.channel),
            _ => None,
        }
    }

    pub fn channel_mut(&mut self) -> Option<&mut CryptoChannel> {
        match self {
            PairingState::AwaitingChallenge { channel, .. }
            | PairingState::AwaitingChallengeSuccess { channel, .. } => Some(channel),
            PairingState::Ready(link) => Some(&mut link.channel),
            _ => None,
        }
    }

    pub fn ready_link(&mut self) -> Option<&mut ReadyLink> {
        match self {
            PairingState::Ready(link) => Some(link),
            _ => None,
        }
    }

    /// Process an input and move to the next state (consumes self)
    pub fn transition(self, input: PairingInput, config: &SessionConfig) -> Transition {
        let from = self.state_name();
        let input_name = input.name();

        let transition = match (self, input) {
            // A handshake always restarts pairing
            (_, PairingInput::Handshake { version }) => {
                if version == PROTOCOL_VERSION {
                    info!("Version handshake accepted (v{})", version);
                    Transition::to(PairingState::Unpaired {
                        version: Some(version),
                    })
                    .reply(Reply::Handshake(PROTOCOL_VERSION))
                    .event(SessionEvent::HandshakeComplete { version })
                } else {
                    warn!(
                        "Robot offered protocol v{}, only v{} is supported",
                        version, PROTOCOL_VERSION
                    );
                    Transition::to(PairingState::default()).event(SessionEvent::VersionMismatch {
                        offered: version,
                        supported: PROTOCOL_VERSION,
                    })
                }
            }

            (PairingState::Unpaired { version: Some(_) }, PairingInput::ConnRequest { robot_key, saved }) => {
                let (key_pair, saved_keys, connection_type) = match saved {
                    Some(saved) => {
                        info!("Reconnecting to robot {}", robot_key.short_hex());
                        (saved.key_pair, Some(saved.keys), ConnectionType::Reconnection)
                    }
                    None => {
                        info!("First-time pairing with robot {}", robot_key.short_hex());
                        (KeyPair::generate(), None, ConnectionType::FirstTimePair)
                    }
                };
                let reply = RtsMessage::ConnResponse {
                    connection_type,
                    public_key: key_pair.public_key(),
                };
                Transition::to(PairingState::AwaitingNonce(KeyExchange {
                    key_pair,
                    robot_key,
                    saved_keys,
                }))
                .reply(Reply::Plain(reply))
            }

            (PairingState::AwaitingNonce(exchange), PairingInput::Nonce { to_robot, to_device }) => {
                let KeyExchange {
                    key_pair,
                    robot_key,
                    saved_keys,
                } = exchange;

                match saved_keys {
                    Some(keys) => {
                        let peer = PairedPeer {
                            key_pair,
                            robot_key,
                            reconnected: true,
                        };
                        let channel = CryptoChannel::new(keys, to_robot, to_device);
                        Transition::to(PairingState::AwaitingChallenge { channel, peer })
                            .reply(Reply::Plain(nonce_ack()))
                    }
                    None => match derive_session_keys(Role::Client, &key_pair, &robot_key) {
                        Ok(keys) => {
                            info!("Nonces received, waiting for PIN");
                            Transition::to(PairingState::AwaitingPin(PendingPin {
                                peer: PairedPeer {
                                    key_pair,
                                    robot_key,
                                    reconnected: false,
                                },
                                keys,
                                to_robot_nonce: to_robot,
                                to_device_nonce: to_device,
                            }))
                            .event(SessionEvent::PinRequested)
                        }
                        Err(e) => {
                            warn!("Key derivation with robot {} failed: {}", robot_key.short_hex(), e);
                            Transition::ignored(PairingState::default())
                        }
                    },
                }
            }

            (PairingState::AwaitingPin(pending), PairingInput::Pin(pin)) => {
                match mix_pin(&pending.keys, &pin) {
                    Ok(keys) => {
                        let channel =
                            CryptoChannel::new(keys, pending.to_robot_nonce, pending.to_device_nonce);
                        Transition::to(PairingState::AwaitingChallenge {
                            channel,
                            peer: pending.peer,
                        })
                        .reply(Reply::Plain(nonce_ack()))
                    }
                    Err(e) => {
                        warn!("PIN mixing failed: {}", e);
                        Transition::ignored(PairingState::AwaitingPin(pending))
                    }
                }
            }

            (PairingState::AwaitingChallenge { channel, peer }, PairingInput::Challenge(number)) => {
                debug!("Answering challenge {}", number);
                Transition::to(PairingState::AwaitingChallengeSuccess { channel, peer }).reply(
                    Reply::Sealed(RtsMessage::ChallengeMessage {
                        number: number.wrapping_add(1),
                    }),
                )
            }

            (PairingState::AwaitingChallengeSuccess { channel, peer }, PairingInput::ChallengeSuccess) => {
                let reconnected = peer.reconnected;
                info!(
                    "Secure channel with robot {} established{}",
                    peer.robot_key.short_hex(),
                    if reconnected { " (reconnected)" } else { "" }
                );
                Transition::to(PairingState::Ready(ReadyLink::new(channel, peer, config)))
                    .event(SessionEvent::Paired { reconnected })
            }

            (PairingState::Unpaired { version }, PairingInput::Cancel) => {
                Transition::to(PairingState::Unpaired { version })
            }

            (state, PairingInput::Cancel) => {
                info!("Robot cancelled pairing");
                Transition::to(PairingState::Unpaired {
                    version: state.negotiated_version(),
                })
                .event(SessionEvent::PairingCancelled)
            }

            (state, _) => {
                warn!("Ignoring {} in state {}", input_name, state.state_name());
                Transition::ignored(state)
            }
        };

        if transition.state.state_name() != from {
            debug!("Pairing {} -> {} on {}", from, transition.state.state_name(), input_name);
        }
        transition
    }
}

fn nonce_ack() -> RtsMessage {
    RtsMessage::Ack {
        acked: RtsTag::NonceMessage,
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
