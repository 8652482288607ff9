//! Test utilities for driving a session against a simulated robot
//!
//! `SimulatedRobot` plays the robot side of the pairing protocol using the same
//! crypto primitives as the client, so tests can exercise complete exchanges
//! frame by frame without any transport.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use rtslink_core::keystore::{KeyStore, MemoryKeyStore};
use rtslink_core::protocol::codec::{encode_handshake, BincodeCodec, MessageCodec};
use rtslink_core::protocol::crypto::{
    derive_session_keys, mix_pin, AeadNonce, KeyPair, PublicKey, Role, SessionKeys,
};
use rtslink_core::protocol::messages::{ConnectionType, RtsMessage, PROTOCOL_VERSION};
use rtslink_core::protocol::CryptoChannel;
use rtslink_core::{FrameSink, Result, Session, SessionConfig, SessionEvent};

// ----------------------------------------------------------------------------
// Simulated Robot
// ----------------------------------------------------------------------------

/// Robot side of the pairing protocol
pub struct SimulatedRobot {
    key_pair: KeyPair,
    pin: String,
    saved_keys: Option<SessionKeys>,
    client_key: Option<PublicKey>,
    connection_type: Option<ConnectionType>,
    to_robot_nonce: AeadNonce,
    to_device_nonce: AeadNonce,
    channel: Option<CryptoChannel>,
    codec: BincodeCodec,
}

impl SimulatedRobot {
    /// Create a robot displaying `pin`
    pub fn new(pin: &str) -> Self {
        Self {
            key_pair: KeyPair::generate(),
            pin: pin.to_string(),
            saved_keys: None,
            client_key: None,
            connection_type: None,
            to_robot_nonce: AeadNonce::random(),
            to_device_nonce: AeadNonce::random(),
            channel: None,
            codec: BincodeCodec,
        }
    }

    /// Recreate a robot that remembers a previous session
    pub fn remembering(secret: [u8; 32], saved_keys: SessionKeys) -> Self {
        Self {
            key_pair: KeyPair::from_secret_bytes(secret),
            saved_keys: Some(saved_keys),
            ..Self::new("000000")
        }
    }

    pub fn public_key(&self) -> PublicKey {
        self.key_pair.public_key()
    }

    pub fn secret_bytes(&self) -> [u8; 32] {
        self.key_pair.secret_bytes()
    }

    /// Robot-side session keys once the channel is up
    pub fn session_keys(&self) -> Option<SessionKeys> {
        self.channel.as_ref().map(|channel| channel.keys().clone())
    }

    pub fn connection_type(&self) -> Option<ConnectionType> {
        self.connection_type
    }

    pub fn handshake(&self) -> Vec<u8> {
        encode_handshake(PROTOCOL_VERSION)
    }

    pub fn conn_request(&self) -> Vec<u8> {
        self.plain(&RtsMessage::ConnRequest {
            public_key: self.public_key(),
        })
    }

    /// Read the client's `ConnResponse`
    pub fn on_conn_response(&mut self, frame: &[u8]) -> (ConnectionType, PublicKey) {
        match self.codec.unpack(frame).unwrap() {
            RtsMessage::ConnResponse {
                connection_type,
                public_key,
            } => {
                self.client_key = Some(public_key);
                self.connection_type = Some(connection_type);
                (connection_type, public_key)
            }
            other => panic!("expected ConnResponse, got {:?}", other),
        }
    }

    pub fn nonce_message(&self) -> Vec<u8> {
        self.plain(&RtsMessage::NonceMessage {
            to_robot_nonce: self.to_robot_nonce,
            to_device_nonce: self.to_device_nonce,
        })
    }

    /// Read the plaintext nonce ack and switch to encrypted traffic
    pub fn on_nonce_ack(&mut self, frame: &[u8]) {
        let message = self.codec.unpack(frame).unwrap();
        assert!(
            matches!(message, RtsMessage::Ack { .. }),
            "expected Ack, got {:?}",
            message
        );

        let keys = match (self.connection_type, self.saved_keys.clone()) {
            (Some(ConnectionType::Reconnection), Some(keys)) => keys,
            _ => {
                let client_key = self.client_key.expect("client key before nonce ack");
                let raw = derive_session_keys(Role::Robot, &self.key_pair, &client_key).unwrap();
                mix_pin(&raw, &self.pin).unwrap()
            }
        };
        self.channel = Some(CryptoChannel::new(
            keys,
            self.to_device_nonce,
            self.to_robot_nonce,
        ));
    }

    pub fn seal(&mut self, message: &RtsMessage) -> Vec<u8> {
        let bytes = self.codec.pack(message).unwrap();
        self.channel
            .as_mut()
            .expect("encrypted channel")
            .encrypt(&bytes)
            .unwrap()
    }

    pub fn open(&mut self, frame: &[u8]) -> RtsMessage {
        let bytes = self
            .channel
            .as_mut()
            .expect("encrypted channel")
            .decrypt(frame)
            .unwrap();
        self.codec.unpack(&bytes).unwrap()
    }

    pub fn plain(&self, message: &RtsMessage) -> Vec<u8> {
        self.codec.pack(message).unwrap()
    }
}

// ----------------------------------------------------------------------------
// Session Helpers
// ----------------------------------------------------------------------------

pub type TestSession = Session<Vec<Vec<u8>>>;

/// Create a session collecting its outbound frames
pub fn test_session() -> TestSession {
    Session::new("Vector-T3ST", SessionConfig::testing(), Vec::new())
}

/// Take every frame the session has sent so far
pub fn drain(session: &mut TestSession) -> Vec<Vec<u8>> {
    std::mem::take(session.sink_mut())
}

/// Exchange the version handshake and discard the echo
pub fn complete_handshake(session: &mut TestSession, robot: &SimulatedRobot) {
    session.handle_frame(&robot.handshake()).unwrap();
    drain(session);
}

/// Run a complete pairing, returning the events seen along the way
pub fn pair(session: &mut TestSession, robot: &mut SimulatedRobot, pin: &str) -> Vec<SessionEvent> {
    let mut events = Vec::new();

    events.extend(session.handle_frame(&robot.handshake()).unwrap());
    drain(session);

    events.extend(session.handle_frame(&robot.conn_request()).unwrap());
    let frames = drain(session);
    let (connection_type, _) = robot.on_conn_response(&frames[0]);

    events.extend(session.handle_frame(&robot.nonce_message()).unwrap());
    if connection_type == ConnectionType::FirstTimePair {
        session.submit_pin(pin).unwrap();
    }
    let frames = drain(session);
    robot.on_nonce_ack(&frames[0]);

    let challenge = robot.seal(&RtsMessage::ChallengeMessage { number: 41 });
    events.extend(session.handle_frame(&challenge).unwrap());
    let frames = drain(session);
    assert_eq!(
        robot.open(&frames[0]),
        RtsMessage::ChallengeMessage { number: 42 }
    );

    let success = robot.seal(&RtsMessage::ChallengeSuccess);
    events.extend(session.handle_frame(&success).unwrap());
    events
}

// ----------------------------------------------------------------------------
// Shared Key Store
// ----------------------------------------------------------------------------

/// Memory key store that outlives the session owning it
#[derive(Clone, Default)]
pub struct SharedKeyStore(pub Arc<Mutex<MemoryKeyStore>>);

impl KeyStore for SharedKeyStore {
    fn load(&self) -> Result<Option<KeyPair>> {
        self.0.lock().unwrap().load()
    }

    fn save(&mut self, key_pair: &KeyPair) -> Result<()> {
        self.0.lock().unwrap().save(key_pair)
    }

    fn load_session(&self, robot_key: &PublicKey) -> Result<Option<SessionKeys>> {
        self.0.lock().unwrap().load_session(robot_key)
    }

    fn save_session(&mut self, robot_key: &PublicKey, keys: &SessionKeys) -> Result<()> {
        self.0.lock().unwrap().save_session(robot_key, keys)
    }
}

/// Frame sink that fails every send
pub struct ClosedSink;

impl FrameSink for ClosedSink {
    fn send_frame(&mut self, _frame: Vec<u8>) -> Result<()> {
        Err(rtslink_core::RtsError::transport("link down"))
    }
}
