//! Crypto Channel
//!
//! Owns the per-direction session keys and nonces of an encrypted session.
//! Each successful encrypt or decrypt advances its direction's nonce by exactly
//! one step; a failed decrypt leaves the receive nonce untouched.

use tracing::debug;

use crate::errors::Result;

use super::crypto::{open, seal, AeadNonce, SessionKeys};

/// Symmetric channel for one encrypted session
#[derive(Debug)]
pub struct CryptoChannel {
    keys: SessionKeys,
    tx_nonce: AeadNonce,
    rx_nonce: AeadNonce,
}

impl CryptoChannel {
    /// Create a new channel from derived keys and starting nonces
    pub fn new(keys: SessionKeys, tx_nonce: AeadNonce, rx_nonce: AeadNonce) -> Self {
        Self {
            keys,
            tx_nonce,
            rx_nonce,
        }
    }

    /// Encrypt an outbound frame and advance the send nonce
    pub fn encrypt(&mut self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let sealed = seal(&self.keys.tx, &self.tx_nonce, plaintext)?;
        self.tx_nonce.increment();
        Ok(sealed)
    }

    /// Decrypt an inbound frame, advancing the receive nonce only on success
    pub fn decrypt(&mut self, ciphertext: &[u8]) -> Result<Vec<u8>> {
        match open(&self.keys.rx, &self.rx_nonce, ciphertext) {
            Ok(plaintext) => {
                self.rx_nonce.increment();
                Ok(plaintext)
            }
            Err(e) => {
                debug!("Decrypt failed for {} byte frame", ciphertext.len());
                Err(e)
            }
        }
    }

    /// Nonce the next encrypt will use
    pub fn tx_nonce(&self) -> &AeadNonce {
        &self.tx_nonce
    }

    /// Nonce the next decrypt will use
    pub fn rx_nonce(&self) -> &AeadNonce {
        &self.rx_nonce
    }

    /// Session keys, for persisting the session
    pub fn keys(&self) -> &SessionKeys {
        &self.keys
    }
}
