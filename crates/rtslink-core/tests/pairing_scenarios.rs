//! End-to-end session scenarios driven frame by frame against a simulated robot

mod test_utils;

use futures::FutureExt;
use rtslink_core::protocol::codec::{BincodeCodec, MessageCodec};
use rtslink_core::protocol::messages::{ConnectionType, RtsMessage, RtsTag};
use rtslink_core::{
    CommandError, CommandKind, Request, Response, RtsError, Session, SessionConfig, SessionError,
    SessionEvent,
};
use test_utils::{
    complete_handshake, drain, pair, test_session, ClosedSink, SharedKeyStore, SimulatedRobot,
};

fn status_response(version: &str) -> RtsMessage {
    RtsMessage::StatusResponse {
        wifi_ssid_hex: "486f6d654e6574".to_string(),
        wifi_state: 1,
        access_point: false,
        ble_state: 1,
        battery_state: 0,
        version: version.to_string(),
        ota_in_progress: false,
        has_owner: true,
    }
}

fn log_chunk(file_id: u32, packet_number: u32, packet_total: u32, data: &[u8]) -> RtsMessage {
    RtsMessage::FileDownload {
        status: 0,
        file_id,
        packet_number,
        packet_total,
        file_chunk: data.to_vec(),
    }
}

// ----------------------------------------------------------------------------
// Pairing
// ----------------------------------------------------------------------------

#[test]
fn test_first_time_pair_uses_fresh_key() {
    let mut session = test_session();
    let mut robot = SimulatedRobot::new("123456");

    let event = session.handle_frame(&robot.handshake()).unwrap();
    assert_eq!(event, Some(SessionEvent::HandshakeComplete { version: 5 }));
    assert_eq!(drain(&mut session), vec![robot.handshake()]);

    session.handle_frame(&robot.conn_request()).unwrap();
    let frames = drain(&mut session);
    assert_eq!(frames.len(), 1);
    let (connection_type, client_key) = robot.on_conn_response(&frames[0]);
    assert_eq!(connection_type, ConnectionType::FirstTimePair);
    assert_ne!(client_key, robot.public_key());
    assert_eq!(session.state_name(), "AwaitingNonce");
}

#[test]
fn test_pin_entry_sends_single_plaintext_ack() {
    let mut session = test_session();
    let mut robot = SimulatedRobot::new("1234");

    complete_handshake(&mut session, &robot);
    session.handle_frame(&robot.conn_request()).unwrap();
    let frames = drain(&mut session);
    robot.on_conn_response(&frames[0]);

    let event = session.handle_frame(&robot.nonce_message()).unwrap();
    assert_eq!(event, Some(SessionEvent::PinRequested));
    assert!(drain(&mut session).is_empty());
    assert!(!session.is_encrypted());

    session.submit_pin("1234").unwrap();
    let frames = drain(&mut session);
    assert_eq!(frames.len(), 1);
    assert_eq!(
        BincodeCodec.unpack(&frames[0]).unwrap(),
        RtsMessage::Ack {
            acked: RtsTag::NonceMessage
        }
    );
    assert!(session.is_encrypted());
    assert!(!session.is_authenticated());

    // Everything after the ack is sealed
    robot.on_nonce_ack(&frames[0]);
    let challenge = robot.seal(&RtsMessage::ChallengeMessage { number: 1 });
    session.handle_frame(&challenge).unwrap();
    let frames = drain(&mut session);
    assert!(BincodeCodec.unpack(&frames[0]).is_err());
    assert_eq!(
        robot.open(&frames[0]),
        RtsMessage::ChallengeMessage { number: 2 }
    );
}

#[test]
fn test_challenge_answered_with_successor() {
    let mut session = test_session();
    let mut robot = SimulatedRobot::new("654321");

    complete_handshake(&mut session, &robot);
    session.handle_frame(&robot.conn_request()).unwrap();
    let frames = drain(&mut session);
    robot.on_conn_response(&frames[0]);
    session.handle_frame(&robot.nonce_message()).unwrap();
    session.submit_pin("654321").unwrap();
    let frames = drain(&mut session);
    robot.on_nonce_ack(&frames[0]);

    let challenge = robot.seal(&RtsMessage::ChallengeMessage { number: 7 });
    assert_eq!(session.handle_frame(&challenge).unwrap(), None);
    let frames = drain(&mut session);
    assert_eq!(
        robot.open(&frames[0]),
        RtsMessage::ChallengeMessage { number: 8 }
    );
    assert_eq!(session.state_name(), "AwaitingChallengeSuccess");

    let success = robot.seal(&RtsMessage::ChallengeSuccess);
    let event = session.handle_frame(&success).unwrap();
    assert_eq!(event, Some(SessionEvent::Paired { reconnected: false }));
    assert!(session.is_authenticated());
}

#[test]
fn test_wrong_pin_stalls_at_challenge() {
    let mut session = test_session();
    let mut robot = SimulatedRobot::new("111111");

    complete_handshake(&mut session, &robot);
    session.handle_frame(&robot.conn_request()).unwrap();
    let frames = drain(&mut session);
    robot.on_conn_response(&frames[0]);
    session.handle_frame(&robot.nonce_message()).unwrap();
    session.submit_pin("222222").unwrap();
    let frames = drain(&mut session);
    robot.on_nonce_ack(&frames[0]);

    let challenge = robot.seal(&RtsMessage::ChallengeMessage { number: 7 });
    assert_eq!(session.handle_frame(&challenge).unwrap(), None);
    assert_eq!(session.stats().decrypt_failures, 1);
    assert_eq!(session.state_name(), "AwaitingChallenge");
    assert!(drain(&mut session).is_empty());
}

#[test]
fn test_unsupported_version_reported() {
    let mut session = test_session();
    let frame = rtslink_core::protocol::codec::encode_handshake(4);
    let event = session.handle_frame(&frame).unwrap();
    assert_eq!(
        event,
        Some(SessionEvent::VersionMismatch {
            offered: 4,
            supported: 5
        })
    );
    assert!(drain(&mut session).is_empty());
}

#[test]
fn test_reconnection_skips_pin() {
    let store = SharedKeyStore::default();

    let mut first = test_session().with_key_store(Box::new(store.clone()));
    let mut robot = SimulatedRobot::new("123456");
    let events = pair(&mut first, &mut robot, "123456");
    assert!(events.contains(&SessionEvent::Paired { reconnected: false }));
    assert_eq!(store.0.lock().unwrap().session_count(), 1);

    let robot_keys = robot.session_keys().unwrap();
    let mut robot = SimulatedRobot::remembering(robot.secret_bytes(), robot_keys);
    let mut second = test_session().with_key_store(Box::new(store.clone()));

    complete_handshake(&mut second, &robot);
    second.handle_frame(&robot.conn_request()).unwrap();
    let frames = drain(&mut second);
    let (connection_type, _) = robot.on_conn_response(&frames[0]);
    assert_eq!(connection_type, ConnectionType::Reconnection);

    // No PIN prompt: the nonce is acknowledged straight away
    assert_eq!(second.handle_frame(&robot.nonce_message()).unwrap(), None);
    let frames = drain(&mut second);
    robot.on_nonce_ack(&frames[0]);

    let challenge = robot.seal(&RtsMessage::ChallengeMessage { number: 99 });
    second.handle_frame(&challenge).unwrap();
    let frames = drain(&mut second);
    assert_eq!(
        robot.open(&frames[0]),
        RtsMessage::ChallengeMessage { number: 100 }
    );
    let event = second
        .handle_frame(&robot.seal(&RtsMessage::ChallengeSuccess))
        .unwrap();
    assert_eq!(event, Some(SessionEvent::Paired { reconnected: true }));
}

#[test]
fn test_saved_sessions_ignored_when_disabled() {
    let store = SharedKeyStore::default();
    let mut first = test_session().with_key_store(Box::new(store.clone()));
    let mut robot = SimulatedRobot::new("123456");
    pair(&mut first, &mut robot, "123456");

    let config = SessionConfig::testing().with_saved_sessions(false, false);
    let mut second = Session::new("Vector-T3ST", config, Vec::new()).with_key_store(Box::new(store));
    complete_handshake(&mut second, &robot);
    second.handle_frame(&robot.conn_request()).unwrap();
    let frames = drain(&mut second);
    let (connection_type, _) = robot.on_conn_response(&frames[0]);
    assert_eq!(connection_type, ConnectionType::FirstTimePair);
}

#[test]
fn test_new_handshake_supersedes_ready_session() {
    let mut session = test_session();
    let mut robot = SimulatedRobot::new("123456");
    pair(&mut session, &mut robot, "123456");

    let pending = session.issue(Request::Status).unwrap();
    drain(&mut session);

    let event = session.handle_frame(&robot.handshake()).unwrap();
    assert_eq!(event, Some(SessionEvent::HandshakeComplete { version: 5 }));
    assert_eq!(session.stats().sessions_superseded, 1);
    assert_eq!(session.state_name(), "Unpaired");
    assert!(!session.is_encrypted());
    assert!(matches!(
        pending.response.now_or_never(),
        Some(Err(CommandError::Disconnected))
    ));
}

#[test]
fn test_robot_cancel_fails_pending() {
    let mut session = test_session();
    let mut robot = SimulatedRobot::new("123456");
    pair(&mut session, &mut robot, "123456");

    let pending = session.issue(Request::WifiScan).unwrap();
    let event = session
        .handle_frame(&robot.seal(&RtsMessage::CancelPairing))
        .unwrap();
    assert_eq!(event, Some(SessionEvent::PairingCancelled));
    assert_eq!(session.state_name(), "Unpaired");
    assert!(matches!(
        pending.response.now_or_never(),
        Some(Err(CommandError::Disconnected))
    ));

    // The robot may start over without repeating the version handshake
    let retry = SimulatedRobot::new("123456");
    session.handle_frame(&retry.conn_request()).unwrap();
    assert_eq!(session.state_name(), "AwaitingNonce");
    assert_eq!(session.stats().abnormal_messages, 0);
}

#[test]
fn test_ssh_keys_sent_sealed_without_pending_request() {
    let mut session = test_session();
    let mut robot = SimulatedRobot::new("123456");
    let keys = vec![
        "ssh-rsa AAAAB3Nza first\n".to_string(),
        "ssh-ed25519 AAAAC3Nza second".to_string(),
    ];

    assert!(matches!(
        session.authorize_ssh_keys(&keys),
        Err(RtsError::Session(SessionError::NotReady { state: "Unpaired" }))
    ));
    assert!(drain(&mut session).is_empty());

    pair(&mut session, &mut robot, "123456");
    session.authorize_ssh_keys(&keys).unwrap();
    let frames = drain(&mut session);
    assert_eq!(frames.len(), 1);
    assert_eq!(
        robot.open(&frames[0]),
        RtsMessage::SshRequest {
            authorized_keys: vec![
                "ssh-rsa AAAAB3Nza first\n".to_string(),
                "ssh-ed25519 AAAAC3Nza second\n".to_string(),
            ],
        }
    );
    assert_eq!(session.pending_count(), 0);
}

#[test]
fn test_conn_request_before_handshake_ignored() {
    let mut session = test_session();
    let robot = SimulatedRobot::new("123456");

    assert_eq!(session.handle_frame(&robot.conn_request()).unwrap(), None);
    assert!(drain(&mut session).is_empty());
    assert_eq!(session.state_name(), "Unpaired");
    assert_eq!(session.stats().abnormal_messages, 1);
}

#[test]
fn test_local_cancel_keeps_handshake() {
    let mut session = test_session();
    let mut robot = SimulatedRobot::new("123456");
    pair(&mut session, &mut robot, "123456");

    session.cancel_pairing().unwrap();
    assert_eq!(robot.open(&drain(&mut session)[0]), RtsMessage::CancelPairing);
    assert_eq!(session.state_name(), "Unpaired");

    let retry = SimulatedRobot::new("123456");
    session.handle_frame(&retry.conn_request()).unwrap();
    assert_eq!(drain(&mut session).len(), 1);
    assert_eq!(session.state_name(), "AwaitingNonce");

    // A full teardown forgets the handshake
    session.teardown();
    session.handle_frame(&retry.conn_request()).unwrap();
    assert_eq!(session.state_name(), "Unpaired");
}

// ----------------------------------------------------------------------------
// Encrypted Traffic
// ----------------------------------------------------------------------------

#[test]
fn test_tampered_frame_does_not_advance_nonce() {
    let mut session = test_session();
    let mut robot = SimulatedRobot::new("123456");
    pair(&mut session, &mut robot, "123456");

    let pending = session.issue(Request::Status).unwrap();
    drain(&mut session);

    let genuine = robot.seal(&status_response("2.0.1"));
    let mut tampered = genuine.clone();
    tampered[0] ^= 0x01;

    assert_eq!(session.handle_frame(&tampered).unwrap(), None);
    assert_eq!(session.stats().decrypt_failures, 1);
    assert_eq!(session.pending_count(), 1);

    session.handle_frame(&genuine).unwrap();
    match pending.response.now_or_never() {
        Some(Ok(Response::Message(message))) => assert_eq!(message, status_response("2.0.1")),
        other => panic!("unexpected outcome {:?}", other),
    }
}

#[test]
fn test_commands_are_sealed() {
    let mut session = test_session();
    let mut robot = SimulatedRobot::new("123456");
    pair(&mut session, &mut robot, "123456");

    session
        .issue(Request::WifiConnect {
            ssid: "HomeNet".to_string(),
            password: "hunter22".to_string(),
            timeout_secs: 15,
            auth_type: 6,
            hidden: false,
        })
        .unwrap();
    let frames = drain(&mut session);
    assert_eq!(frames.len(), 1);
    assert_eq!(
        robot.open(&frames[0]),
        RtsMessage::WifiConnectRequest {
            ssid_hex: "486f6d654e6574".to_string(),
            password: "hunter22".to_string(),
            timeout_secs: 15,
            auth_type: 6,
            hidden: false,
        }
    );
}

#[test]
fn test_issue_reports_transport_failure() {
    let mut session = Session::new("Vector-T3ST", SessionConfig::testing(), ClosedSink);
    let robot = SimulatedRobot::new("123456");
    assert!(matches!(
        session.handle_frame(&robot.handshake()),
        Err(RtsError::Transport { .. })
    ));
    assert!(matches!(
        session.issue(Request::Status),
        Err(RtsError::Session(SessionError::NotReady { .. }))
    ));
}

// ----------------------------------------------------------------------------
// Correlation
// ----------------------------------------------------------------------------

#[test]
fn test_second_status_supersedes_first() {
    let mut session = test_session();
    let mut robot = SimulatedRobot::new("123456");
    pair(&mut session, &mut robot, "123456");

    let first = session.issue(Request::Status).unwrap();
    let second = session.issue(Request::Status).unwrap();
    assert!(matches!(
        first.response.now_or_never(),
        Some(Err(CommandError::Superseded {
            kind: CommandKind::Status
        }))
    ));

    session
        .handle_frame(&robot.seal(&status_response("2.0.1")))
        .unwrap();
    assert!(matches!(
        second.response.now_or_never(),
        Some(Ok(Response::Message(RtsMessage::StatusResponse { .. })))
    ));
    assert_eq!(session.pending_count(), 0);
}

#[test]
fn test_generic_response_rejects_latest_command() {
    let mut session = test_session();
    let mut robot = SimulatedRobot::new("123456");
    pair(&mut session, &mut robot, "123456");

    let status = session.issue(Request::Status).unwrap();
    let ota = session
        .issue(Request::OtaStart {
            url: "http://updates.local/v2.ota".to_string(),
        })
        .unwrap();

    let rejection = RtsMessage::Response {
        code: 1,
        text: "Not cloud authorized".to_string(),
    };
    session.handle_frame(&robot.seal(&rejection)).unwrap();

    match ota.response.now_or_never() {
        Some(Err(CommandError::Rejected {
            kind,
            code,
            message,
        })) => {
            assert_eq!(kind, CommandKind::Ota);
            assert_eq!(code, 1);
            assert_eq!(message, "Not cloud authorized");
        }
        other => panic!("unexpected outcome {:?}", other),
    }
    assert_eq!(session.pending_count(), 1);
    drop(status);
}

#[test]
fn test_unsolicited_ota_progress_becomes_event() {
    let mut session = test_session();
    let mut robot = SimulatedRobot::new("123456");
    pair(&mut session, &mut robot, "123456");

    let progress = RtsMessage::OtaUpdateResponse {
        status: 2,
        current: 512,
        expected: 4096,
    };
    let event = session.handle_frame(&robot.seal(&progress)).unwrap();
    assert_eq!(
        event,
        Some(SessionEvent::OtaProgress {
            status: 2,
            current: 512,
            expected: 4096
        })
    );
}

#[test]
fn test_stale_cancel_keeps_newer_request() {
    let mut session = test_session();
    let mut robot = SimulatedRobot::new("123456");
    pair(&mut session, &mut robot, "123456");

    let first = session.issue(Request::WifiIp).unwrap();
    let second = session.issue(Request::WifiIp).unwrap();
    assert!(!session.cancel_request(CommandKind::WifiIp, first.ticket));
    assert_eq!(session.pending_count(), 1);
    assert!(session.cancel_request(CommandKind::WifiIp, second.ticket));
    assert_eq!(session.pending_count(), 0);
}

#[test]
fn test_interrupting_ota_tells_robot() {
    let mut session = test_session();
    let mut robot = SimulatedRobot::new("123456");
    pair(&mut session, &mut robot, "123456");

    let ota = session
        .issue(Request::OtaStart {
            url: "http://updates.local/v2.ota".to_string(),
        })
        .unwrap();
    drain(&mut session);

    assert!(session.interrupt(CommandKind::Ota, ota.ticket).unwrap());
    let frames = drain(&mut session);
    assert_eq!(robot.open(&frames[0]), RtsMessage::OtaCancelRequest);

    // Interrupting something that is no longer pending sends nothing
    let status = session.issue(Request::Status).unwrap();
    drain(&mut session);
    session.cancel_request(CommandKind::Status, status.ticket);
    assert!(!session.interrupt(CommandKind::Status, status.ticket).unwrap());
    assert!(drain(&mut session).is_empty());
}

// ----------------------------------------------------------------------------
// Transfers
// ----------------------------------------------------------------------------

#[test]
fn test_log_download_reassembles_chunks() {
    let mut session = test_session();
    let mut robot = SimulatedRobot::new("123456");
    pair(&mut session, &mut robot, "123456");

    let logs = session
        .issue(Request::Logs {
            mode: 0,
            filter: Vec::new(),
        })
        .unwrap();
    let frames = drain(&mut session);
    assert_eq!(
        robot.open(&frames[0]),
        RtsMessage::LogRequest {
            mode: 0,
            filter: Vec::new()
        }
    );

    session
        .handle_frame(&robot.seal(&RtsMessage::LogResponse {
            exit_code: 0,
            file_id: 42,
        }))
        .unwrap();
    for (number, data) in [(1, b"AB".as_slice()), (2, b"CD"), (3, b"E")] {
        session
            .handle_frame(&robot.seal(&log_chunk(42, number, 3, data)))
            .unwrap();
    }

    match logs.response.now_or_never() {
        Some(Ok(Response::Transfer(transfer))) => {
            assert_eq!(transfer.file_id, 42);
            assert_eq!(transfer.data, b"ABCDE".to_vec());
            assert_eq!(transfer.packets, 3);
        }
        other => panic!("unexpected outcome {:?}", other),
    }
    assert_eq!(session.stats().transfers_completed, 1);
}

#[test]
fn test_unrequested_transfer_becomes_event() {
    let mut session = test_session();
    let mut robot = SimulatedRobot::new("123456");
    pair(&mut session, &mut robot, "123456");

    assert_eq!(
        session
            .handle_frame(&robot.seal(&log_chunk(9, 1, 2, b"he")))
            .unwrap(),
        None
    );
    match session
        .handle_frame(&robot.seal(&log_chunk(9, 2, 2, b"llo")))
        .unwrap()
    {
        Some(SessionEvent::TransferComplete(transfer)) => {
            assert_eq!(transfer.data, b"hello".to_vec());
        }
        other => panic!("unexpected event {:?}", other),
    }
}

#[test]
fn test_failed_log_request_reports_exit_code() {
    let mut session = test_session();
    let mut robot = SimulatedRobot::new("123456");
    pair(&mut session, &mut robot, "123456");

    let logs = session
        .issue(Request::Logs {
            mode: 1,
            filter: vec!["vic-engine".to_string()],
        })
        .unwrap();
    session
        .handle_frame(&robot.seal(&RtsMessage::LogResponse {
            exit_code: 3,
            file_id: 0,
        }))
        .unwrap();
    assert!(matches!(
        logs.response.now_or_never(),
        Some(Err(CommandError::Failed {
            kind: CommandKind::Logs,
            exit_code: 3
        }))
    ));
}

#[test]
fn test_oversized_transfer_aborts_log_request() {
    let config = SessionConfig::testing().with_max_transfer_bytes(Some(4));
    let mut session = Session::new("Vector-T3ST", config, Vec::new());
    let mut robot = SimulatedRobot::new("123456");
    pair(&mut session, &mut robot, "123456");

    let logs = session
        .issue(Request::Logs {
            mode: 0,
            filter: Vec::new(),
        })
        .unwrap();
    session
        .handle_frame(&robot.seal(&log_chunk(5, 1, 3, b"abc")))
        .unwrap();
    session
        .handle_frame(&robot.seal(&log_chunk(5, 2, 3, b"def")))
        .unwrap();
    assert!(matches!(
        logs.response.now_or_never(),
        Some(Err(CommandError::TransferAborted {
            file_id: 5,
            limit: 4
        }))
    ));

    // The rest of the aborted file is not reported as a finished transfer
    let event = session
        .handle_frame(&robot.seal(&log_chunk(5, 3, 3, b"g")))
        .unwrap();
    assert_eq!(event, None);
    assert_eq!(session.stats().transfers_completed, 0);
}
