//! Robot transport message schema
//!
//! Every frame after the raw version handshake carries one `RtsMessage`
//! wrapped in two tagged envelopes: the outer `ExternalComms` and the inner
//! protocol-version enum `RtsConnection`. This module defines that closed
//! message set, its tags, the command kinds used for response correlation, and
//! the typed `Request`/`Response` values exchanged with callers.

use core::fmt;

use serde::{Deserialize, Serialize};

use super::crypto::{AeadNonce, PublicKey};
use super::transfer::CompletedTransfer;

/// Protocol version spoken by this implementation
pub const PROTOCOL_VERSION: u32 = 5;

// ----------------------------------------------------------------------------
// Envelopes
// ----------------------------------------------------------------------------

/// Outer envelope of every non-handshake frame
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExternalComms {
    RtsConnection(RtsConnection),
}

/// Protocol-version-specific inner envelope
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RtsConnection {
    V5(RtsMessage),
}

impl ExternalComms {
    /// Wrap a message in the current version's envelopes
    pub fn wrap(message: RtsMessage) -> Self {
        ExternalComms::RtsConnection(RtsConnection::V5(message))
    }

    /// Unwrap to the inner message
    pub fn into_message(self) -> RtsMessage {
        match self {
            ExternalComms::RtsConnection(RtsConnection::V5(message)) => message,
        }
    }
}

// ----------------------------------------------------------------------------
// Supporting Types
// ----------------------------------------------------------------------------

/// Connection type announced in a `ConnResponse`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionType {
    FirstTimePair,
    Reconnection,
}

/// One access point reported by a wifi scan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WifiNetwork {
    pub ssid_hex: String,
    pub signal_strength: u8,
    pub auth_type: u8,
    pub hidden: bool,
}

impl WifiNetwork {
    /// Human-readable SSID, falling back to the hex form
    pub fn ssid(&self) -> String {
        decode_ssid(&self.ssid_hex)
    }
}

/// Encode an SSID the way the robot expects it on the wire
pub fn encode_ssid(ssid: &str) -> String {
    hex::encode(ssid.as_bytes())
}

/// Decode a hex SSID from the wire, keeping the raw form if it is not valid UTF-8 hex
pub fn decode_ssid(ssid_hex: &str) -> String {
    hex::decode(ssid_hex)
        .ok()
        .and_then(|bytes| String::from_utf8(bytes).ok())
        .unwrap_or_else(|| ssid_hex.to_string())
}

// ----------------------------------------------------------------------------
// Message Set
// ----------------------------------------------------------------------------

/// All messages of protocol version 5
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RtsMessage {
    // Pairing
    ConnRequest {
        public_key: PublicKey,
    },
    ConnResponse {
        connection_type: ConnectionType,
        public_key: PublicKey,
    },
    NonceMessage {
        to_robot_nonce: AeadNonce,
        to_device_nonce: AeadNonce,
    },
    Ack {
        acked: RtsTag,
    },
    ChallengeMessage {
        number: u32,
    },
    ChallengeSuccess,
    CancelPairing,
    ForceDisconnect,

    // Wifi
    WifiScanRequest,
    WifiScanResponse {
        status_code: u8,
        networks: Vec<WifiNetwork>,
    },
    WifiConnectRequest {
        ssid_hex: String,
        password: String,
        timeout_secs: u8,
        auth_type: u8,
        hidden: bool,
    },
    WifiConnectResponse {
        ssid_hex: String,
        connection_state: u8,
    },
    WifiForgetRequest {
        delete_all: bool,
        ssid_hex: String,
    },
    WifiForgetResponse {
        did_delete: bool,
        ssid_hex: String,
    },
    WifiIpRequest,
    WifiIpResponse {
        has_ipv4: bool,
        has_ipv6: bool,
        ipv4: [u8; 4],
        ipv6: [u8; 16],
    },
    WifiAccessPointRequest {
        enable: bool,
    },
    WifiAccessPointResponse {
        enabled: bool,
        ssid: String,
        password: String,
    },

    // Robot state
    StatusRequest,
    StatusResponse {
        wifi_ssid_hex: String,
        wifi_state: u8,
        access_point: bool,
        ble_state: u8,
        battery_state: u8,
        version: String,
        ota_in_progress: bool,
        has_owner: bool,
    },
    CloudSessionRequest {
        session_token: String,
        client_name: String,
        app_id: String,
    },
    CloudSessionResponse {
        success: bool,
        status_code: u8,
        client_token_guid: String,
    },

    // Software update
    OtaUpdateRequest {
        url: String,
    },
    OtaCancelRequest,
    OtaUpdateResponse {
        status: u8,
        current: u64,
        expected: u64,
    },

    // Application plumbing
    AppConnectionIdRequest {
        connection_id: String,
    },
    AppConnectionIdResponse,
    SdkProxyRequest {
        client_guid: String,
        message_id: String,
        url_path: String,
        json: String,
    },
    SdkProxyResponse {
        message_id: String,
        status_code: u16,
        response_type: String,
        response_body: String,
    },
    /// Pieces of an SSH `authorized_keys` file; the robot concatenates them and sends no reply
    SshRequest {
        authorized_keys: Vec<String>,
    },

    // Logs
    LogRequest {
        mode: u8,
        filter: Vec<String>,
    },
    LogResponse {
        exit_code: u32,
        file_id: u32,
    },
    FileDownload {
        status: u8,
        file_id: u32,
        packet_number: u32,
        packet_total: u32,
        file_chunk: Vec<u8>,
    },

    /// Generic response, used by the robot to reject a request
    Response {
        code: u8,
        text: String,
    },
}

/// Closed tag set of `RtsMessage`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum RtsTag {
    ConnRequest = 0x01,
    ConnResponse = 0x02,
    NonceMessage = 0x03,
    Ack = 0x04,
    ChallengeMessage = 0x05,
    ChallengeSuccess = 0x06,
    CancelPairing = 0x07,
    ForceDisconnect = 0x08,
    WifiScanRequest = 0x10,
    WifiScanResponse = 0x11,
    WifiConnectRequest = 0x12,
    WifiConnectResponse = 0x13,
    WifiForgetRequest = 0x14,
    WifiForgetResponse = 0x15,
    WifiIpRequest = 0x16,
    WifiIpResponse = 0x17,
    WifiAccessPointRequest = 0x18,
    WifiAccessPointResponse = 0x19,
    StatusRequest = 0x20,
    StatusResponse = 0x21,
    CloudSessionRequest = 0x22,
    CloudSessionResponse = 0x23,
    OtaUpdateRequest = 0x30,
    OtaCancelRequest = 0x31,
    OtaUpdateResponse = 0x32,
    AppConnectionIdRequest = 0x40,
    AppConnectionIdResponse = 0x41,
    SdkProxyRequest = 0x42,
    SdkProxyResponse = 0x43,
    SshRequest = 0x44,
    LogRequest = 0x50,
    LogResponse = 0x51,
    FileDownload = 0x52,
    Response = 0x60,
}

impl RtsMessage {
    /// Get the tag of this message
    pub fn tag(&self) -> RtsTag {
        match self {
            RtsMessage::ConnRequest { .. } => RtsTag::ConnRequest,
            RtsMessage::ConnResponse { .. } => RtsTag::ConnResponse,
            RtsMessage::NonceMessage { .. } => RtsTag::NonceMessage,
            RtsMessage::Ack { .. } => RtsTag::Ack,
            RtsMessage::ChallengeMessage { .. } => RtsTag::ChallengeMessage,
            RtsMessage::ChallengeSuccess => RtsTag::ChallengeSuccess,
            RtsMessage::CancelPairing => RtsTag::CancelPairing,
            RtsMessage::ForceDisconnect => RtsTag::ForceDisconnect,
            RtsMessage::WifiScanRequest => RtsTag::WifiScanRequest,
            RtsMessage::WifiScanResponse { .. } => RtsTag::WifiScanResponse,
            RtsMessage::WifiConnectRequest { .. } => RtsTag::WifiConnectRequest,
            RtsMessage::WifiConnectResponse { .. } => RtsTag::WifiConnectResponse,
            RtsMessage::WifiForgetRequest { .. } => RtsTag::WifiForgetRequest,
            RtsMessage::WifiForgetResponse { .. } => RtsTag::WifiForgetResponse,
            RtsMessage::WifiIpRequest => RtsTag::WifiIpRequest,
            RtsMessage::WifiIpResponse { .. } => RtsTag::WifiIpResponse,
            RtsMessage::WifiAccessPointRequest { .. } => RtsTag::WifiAccessPointRequest,
            RtsMessage::WifiAccessPointResponse { .. } => RtsTag::WifiAccessPointResponse,
            RtsMessage::StatusRequest => RtsTag::StatusRequest,
            RtsMessage::StatusResponse { .. } => RtsTag::StatusResponse,
            RtsMessage::CloudSessionRequest { .. } => RtsTag::CloudSessionRequest,
            RtsMessage::CloudSessionResponse { .. } => RtsTag::CloudSessionResponse,
            RtsMessage::OtaUpdateRequest { .. } => RtsTag::OtaUpdateRequest,
            RtsMessage::OtaCancelRequest => RtsTag::OtaCancelRequest,
            RtsMessage::OtaUpdateResponse { .. } => RtsTag::OtaUpdateResponse,
            RtsMessage::AppConnectionIdRequest { .. } => RtsTag::AppConnectionIdRequest,
            RtsMessage::AppConnectionIdResponse => RtsTag::AppConnectionIdResponse,
            RtsMessage::SdkProxyRequest { .. } => RtsTag::SdkProxyRequest,
            RtsMessage::SdkProxyResponse { .. } => RtsTag::SdkProxyResponse,
            RtsMessage::SshRequest { .. } => RtsTag::SshRequest,
            RtsMessage::LogRequest { .. } => RtsTag::LogRequest,
            RtsMessage::LogResponse { .. } => RtsTag::LogResponse,
            RtsMessage::FileDownload { .. } => RtsTag::FileDownload,
            RtsMessage::Response { .. } => RtsTag::Response,
        }
    }
}

// ----------------------------------------------------------------------------
// Command Kinds
// ----------------------------------------------------------------------------

/// Closed set of command kinds that can have one pending response each
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CommandKind {
    WifiScan,
    WifiConnect,
    WifiForget,
    WifiAccessPoint,
    WifiIp,
    Status,
    CloudSession,
    Ota,
    ConnectionId,
    SdkProxy,
    Logs,
}

impl CommandKind {
    /// Number of kinds
    pub const COUNT: usize = 11;

    /// All kinds, in table order
    pub const ALL: [CommandKind; Self::COUNT] = [
        CommandKind::WifiScan,
        CommandKind::WifiConnect,
        CommandKind::WifiForget,
        CommandKind::WifiAccessPoint,
        CommandKind::WifiIp,
        CommandKind::Status,
        CommandKind::CloudSession,
        CommandKind::Ota,
        CommandKind::ConnectionId,
        CommandKind::SdkProxy,
        CommandKind::Logs,
    ];

    /// Slot of this kind in a fixed-size table
    pub fn index(self) -> usize {
        self as usize
    }

    /// Map a response tag to the kind it resolves
    ///
    /// `FileDownload` is absent: chunks resolve `Logs` only once reassembled.
    pub fn for_response(tag: RtsTag) -> Option<CommandKind> {
        match tag {
            RtsTag::WifiScanResponse => Some(CommandKind::WifiScan),
            RtsTag::WifiConnectResponse => Some(CommandKind::WifiConnect),
            RtsTag::WifiForgetResponse => Some(CommandKind::WifiForget),
            RtsTag::WifiAccessPointResponse => Some(CommandKind::WifiAccessPoint),
            RtsTag::WifiIpResponse => Some(CommandKind::WifiIp),
            RtsTag::StatusResponse => Some(CommandKind::Status),
            RtsTag::CloudSessionResponse => Some(CommandKind::CloudSession),
            RtsTag::OtaUpdateResponse => Some(CommandKind::Ota),
            RtsTag::AppConnectionIdResponse => Some(CommandKind::ConnectionId),
            RtsTag::SdkProxyResponse => Some(CommandKind::SdkProxy),
            RtsTag::LogResponse => Some(CommandKind::Logs),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CommandKind::WifiScan => "wifi-scan",
            CommandKind::WifiConnect => "wifi-connect",
            CommandKind::WifiForget => "wifi-forget",
            CommandKind::WifiAccessPoint => "wifi-ap",
            CommandKind::WifiIp => "wifi-ip",
            CommandKind::Status => "status",
            CommandKind::CloudSession => "cloud-session",
            CommandKind::Ota => "ota",
            CommandKind::ConnectionId => "connection-id",
            CommandKind::SdkProxy => "sdk-proxy",
            CommandKind::Logs => "logs",
        }
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ----------------------------------------------------------------------------
// Requests and Responses
// ----------------------------------------------------------------------------

/// A typed command issued by the caller
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    WifiScan,
    WifiConnect {
        ssid: String,
        password: String,
        timeout_secs: u8,
        auth_type: u8,
        hidden: bool,
    },
    /// Forget one network, or all of them when `ssid` is `None`
    WifiForget {
        ssid: Option<String>,
    },
    WifiAccessPoint {
        enable: bool,
    },
    WifiIp,
    Status,
    CloudSession {
        session_token: String,
        client_name: String,
        app_id: String,
    },
    OtaStart {
        url: String,
    },
    OtaCancel,
    /// Sends nothing; waits for the next OTA progress report
    OtaProgress,
    ConnectionId {
        connection_id: String,
    },
    SdkProxy {
        client_guid: String,
        message_id: String,
        url_path: String,
        json: String,
    },
    Logs {
        mode: u8,
        filter: Vec<String>,
    },
}

impl Request {
    /// Command kind this request waits on
    pub fn kind(&self) -> CommandKind {
        match self {
            Request::WifiScan => CommandKind::WifiScan,
            Request::WifiConnect { .. } => CommandKind::WifiConnect,
            Request::WifiForget { .. } => CommandKind::WifiForget,
            Request::WifiAccessPoint { .. } => CommandKind::WifiAccessPoint,
            Request::WifiIp => CommandKind::WifiIp,
            Request::Status => CommandKind::Status,
            Request::CloudSession { .. } => CommandKind::CloudSession,
            Request::OtaStart { .. } | Request::OtaCancel | Request::OtaProgress => {
                CommandKind::Ota
            }
            Request::ConnectionId { .. } => CommandKind::ConnectionId,
            Request::SdkProxy { .. } => CommandKind::SdkProxy,
            Request::Logs { .. } => CommandKind::Logs,
        }
    }

    /// Wire message for this request, `None` for wait-only requests
    pub fn into_message(self) -> Option<RtsMessage> {
        let message = match self {
            Request::WifiScan => RtsMessage::WifiScanRequest,
            Request::WifiConnect {
                ssid,
                password,
                timeout_secs,
                auth_type,
                hidden,
            } => RtsMessage::WifiConnectRequest {
                ssid_hex: encode_ssid(&ssid),
                password,
                timeout_secs,
                auth_type,
                hidden,
            },
            Request::WifiForget { ssid } => RtsMessage::WifiForgetRequest {
                delete_all: ssid.is_none(),
                ssid_hex: ssid.as_deref().map(encode_ssid).unwrap_or_default(),
            },
            Request::WifiAccessPoint { enable } => RtsMessage::WifiAccessPointRequest { enable },
            Request::WifiIp => RtsMessage::WifiIpRequest,
            Request::Status => RtsMessage::StatusRequest,
            Request::CloudSession {
                session_token,
                client_name,
                app_id,
            } => RtsMessage::CloudSessionRequest {
                session_token,
                client_name,
                app_id,
            },
            Request::OtaStart { url } => RtsMessage::OtaUpdateRequest { url },
            Request::OtaCancel => RtsMessage::OtaCancelRequest,
            Request::OtaProgress => return None,
            Request::ConnectionId { connection_id } => {
                RtsMessage::AppConnectionIdRequest { connection_id }
            }
            Request::SdkProxy {
                client_guid,
                message_id,
                url_path,
                json,
            } => RtsMessage::SdkProxyRequest {
                client_guid,
                message_id,
                url_path,
                json,
            },
            Request::Logs { mode, filter } => RtsMessage::LogRequest { mode, filter },
        };
        Some(message)
    }
}

/// Successful result of a command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// The decoded response message
    Message(RtsMessage),
    /// A reassembled file (log download)
    Transfer(CompletedTransfer),
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
