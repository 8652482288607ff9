//! Property-based tests for the crypto channel and transfer reassembly
//!
//! These tests check the invariants the session relies on: nonces advance by
//! exactly one per frame in each direction, a failed decryption leaves the
//! receive counter untouched, and reassembly preserves arrival order.

use proptest::prelude::*;
use rtslink_core::protocol::crypto::{AeadNonce, SessionKeys};
use rtslink_core::protocol::{CryptoChannel, FileChunk, TransferReassembler};

/// Generate arbitrary session keys
fn arb_keys() -> impl Strategy<Value = SessionKeys> {
    (any::<[u8; 32]>(), any::<[u8; 32]>()).prop_map(|(tx, rx)| SessionKeys { tx, rx })
}

/// Generate arbitrary starting nonce
fn arb_nonce() -> impl Strategy<Value = AeadNonce> {
    any::<[u8; 24]>().prop_map(AeadNonce::new)
}

/// Generate a batch of payloads
fn arb_payloads() -> impl Strategy<Value = Vec<Vec<u8>>> {
    prop::collection::vec(prop::collection::vec(any::<u8>(), 0..256), 1..16)
}

/// Build the two ends of a channel that talk to each other
fn channel_pair(keys: SessionKeys, a_to_b: AeadNonce, b_to_a: AeadNonce) -> (CryptoChannel, CryptoChannel) {
    let mirrored = SessionKeys {
        tx: keys.rx,
        rx: keys.tx,
    };
    (
        CryptoChannel::new(keys, a_to_b, b_to_a),
        CryptoChannel::new(mirrored, b_to_a, a_to_b),
    )
}

proptest! {
    /// Property: every frame decrypts on the far side in order
    #[test]
    fn frames_decrypt_in_order(
        keys in arb_keys(),
        a_to_b in arb_nonce(),
        b_to_a in arb_nonce(),
        payloads in arb_payloads(),
    ) {
        let (mut a, mut b) = channel_pair(keys, a_to_b, b_to_a);
        for payload in &payloads {
            let frame = a.encrypt(payload).unwrap();
            prop_assert_eq!(frame.len(), payload.len() + 16);
            prop_assert_eq!(&b.decrypt(&frame).unwrap(), payload);
        }
    }

    /// Property: nonces advance by exactly one per frame
    #[test]
    fn nonce_advances_once_per_frame(
        keys in arb_keys(),
        start in arb_nonce(),
        payloads in arb_payloads(),
    ) {
        let (mut a, _) = channel_pair(keys, start, start);
        let mut expected = start;
        for payload in &payloads {
            a.encrypt(payload).unwrap();
            expected.increment();
            prop_assert_eq!(*a.tx_nonce(), expected);
        }
        prop_assert_eq!(*a.rx_nonce(), start);
    }

    /// Property: a corrupted frame is rejected and the next genuine one still opens
    #[test]
    fn corrupted_frame_leaves_receiver_in_step(
        keys in arb_keys(),
        start in arb_nonce(),
        payload in prop::collection::vec(any::<u8>(), 0..128),
        flip in any::<prop::sample::Index>(),
    ) {
        let (mut a, mut b) = channel_pair(keys, start, start);
        let frame = a.encrypt(&payload).unwrap();

        let mut corrupted = frame.clone();
        let at = flip.index(corrupted.len());
        corrupted[at] ^= 0x80;

        prop_assert!(b.decrypt(&corrupted).is_err());
        prop_assert_eq!(*b.rx_nonce(), start);
        prop_assert_eq!(b.decrypt(&frame).unwrap(), payload);
    }

    /// Property: reassembly is the concatenation of chunks in arrival order
    #[test]
    fn reassembly_concatenates_in_arrival_order(
        file_id in any::<u32>(),
        chunks in arb_payloads(),
    ) {
        let total = chunks.len() as u32;
        let mut reassembler = TransferReassembler::new();
        let mut completed = None;

        for (i, data) in chunks.iter().enumerate() {
            prop_assert!(completed.is_none());
            completed = reassembler
                .accept(FileChunk {
                    file_id,
                    packet_number: i as u32 + 1,
                    packet_total: total,
                    data: data.clone(),
                })
                .unwrap();
        }

        let transfer = completed.expect("last chunk completes the transfer");
        prop_assert_eq!(transfer.file_id, file_id);
        prop_assert_eq!(transfer.packets, total);
        prop_assert_eq!(transfer.data, chunks.concat());
        prop_assert!(reassembler.in_flight().is_none());
    }
}

#[test]
fn nonce_wraps_around() {
    let mut nonce = AeadNonce::new([0xFF; 24]);
    nonce.increment();
    assert_eq!(nonce, AeadNonce::new([0; 24]));
}
