//! Cryptographic primitives for rtslink
//!
//! Thin wrappers composing the external crypto crates into the operations the
//! pairing protocol needs:
//!
//! - X25519 key pairs for the asymmetric exchange
//! - direction-keyed session key derivation (libsodium `crypto_kx` layout)
//! - PIN mixing with a keyed hash (HMAC-SHA256)
//! - XChaCha20-Poly1305 sealing/opening with a 24-byte counter nonce

use chacha20poly1305::{
    aead::{Aead, KeyInit},
    XChaCha20Poly1305, XNonce,
};
use hmac::{Hmac, Mac};
use rand_core::{CryptoRng, OsRng, RngCore};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256, Sha512};
use x25519_dalek::{PublicKey as DalekPublicKey, StaticSecret};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::errors::{CryptographicError, Result, RtsError};

// ----------------------------------------------------------------------------
// Constants
// ----------------------------------------------------------------------------

/// X25519 public key length
pub const PUBLIC_KEY_BYTES: usize = 32;

/// Symmetric session key length
pub const SESSION_KEY_BYTES: usize = 32;

/// XChaCha20-Poly1305 nonce length
pub const NONCE_BYTES: usize = 24;

/// Poly1305 authentication tag length
pub const TAG_BYTES: usize = 16;

// ----------------------------------------------------------------------------
// Public Key
// ----------------------------------------------------------------------------

/// A peer's X25519 public key
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PublicKey([u8; PUBLIC_KEY_BYTES]);

impl PublicKey {
    /// Create a public key from raw bytes
    pub fn new(bytes: [u8; PUBLIC_KEY_BYTES]) -> Self {
        Self(bytes)
    }

    /// Get the raw bytes
    pub fn as_bytes(&self) -> &[u8; PUBLIC_KEY_BYTES] {
        &self.0
    }

    /// Short hex prefix, safe for logs
    pub fn short_hex(&self) -> String {
        hex::encode(&self.0[..6])
    }
}

impl core::fmt::Display for PublicKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

// ----------------------------------------------------------------------------
// Key Pair (X25519)
// ----------------------------------------------------------------------------

/// X25519 key pair used for the pairing key exchange
pub struct KeyPair {
    secret: StaticSecret,
    public: PublicKey,
}

impl core::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("KeyPair")
            .field("public", &self.public.short_hex())
            .field("secret", &"<redacted>")
            .finish()
    }
}

impl KeyPair {
    /// Generate a new random key pair
    pub fn generate() -> Self {
        Self::generate_with_rng(&mut OsRng)
    }

    /// Generate a new key pair with a custom RNG
    pub fn generate_with_rng<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        let mut secret_bytes = [0u8; 32];
        rng.fill_bytes(&mut secret_bytes);
        let pair = Self::from_secret_bytes(secret_bytes);
        secret_bytes.zeroize();
        pair
    }

    /// Rebuild a key pair from stored secret bytes
    pub fn from_secret_bytes(secret_bytes: [u8; 32]) -> Self {
        let secret = StaticSecret::from(secret_bytes);
        let public = PublicKey(DalekPublicKey::from(&secret).to_bytes());
        Self { secret, public }
    }

    /// Get the public half
    pub fn public_key(&self) -> PublicKey {
        self.public
    }

    /// Get the secret bytes (for the key store only)
    pub fn secret_bytes(&self) -> [u8; 32] {
        self.secret.to_bytes()
    }

    fn diffie_hellman(&self, remote: &PublicKey) -> Result<[u8; 32]> {
        let shared = self
            .secret
            .diffie_hellman(&DalekPublicKey::from(*remote.as_bytes()));
        if !shared.was_contributory() {
            return Err(RtsError::Crypto(CryptographicError::KeyDerivationFailed));
        }
        Ok(shared.to_bytes())
    }
}

// ----------------------------------------------------------------------------
// Session Keys
// ----------------------------------------------------------------------------

/// Which side of the exchange the local key pair belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// The app/controller side
    Client,
    /// The robot side
    Robot,
}

/// Direction-keyed symmetric keys for one session
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct SessionKeys {
    /// Key for frames we send
    pub tx: [u8; SESSION_KEY_BYTES],
    /// Key for frames we receive
    pub rx: [u8; SESSION_KEY_BYTES],
}

impl core::fmt::Debug for SessionKeys {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str("SessionKeys(<redacted>)")
    }
}

/// Derive the direction-keyed session keys.
///
/// `h = SHA-512(shared || client_pk || robot_pk)`; the client receives with
/// `h[0..32]` and sends with `h[32..64]`, the robot mirrors that.
pub fn derive_session_keys(role: Role, local: &KeyPair, remote: &PublicKey) -> Result<SessionKeys> {
    let shared = local.diffie_hellman(remote)?;

    let (client_pk, robot_pk) = match role {
        Role::Client => (local.public_key(), *remote),
        Role::Robot => (*remote, local.public_key()),
    };

    let mut hasher = Sha512::new();
    hasher.update(shared);
    hasher.update(client_pk.as_bytes());
    hasher.update(robot_pk.as_bytes());
    let digest = hasher.finalize();

    let mut first = [0u8; SESSION_KEY_BYTES];
    let mut second = [0u8; SESSION_KEY_BYTES];
    first.copy_from_slice(&digest[..SESSION_KEY_BYTES]);
    second.copy_from_slice(&digest[SESSION_KEY_BYTES..]);

    Ok(match role {
        Role::Client => SessionKeys { rx: first, tx: second },
        Role::Robot => SessionKeys { tx: first, rx: second },
    })
}

/// Mix the operator PIN into both direction keys.
///
/// Each key is replaced by `HMAC-SHA256(key = pin, message = direction key)`.
pub fn mix_pin(keys: &SessionKeys, pin: &str) -> Result<SessionKeys> {
    Ok(SessionKeys {
        tx: keyed_hash(pin.as_bytes(), &keys.tx)?,
        rx: keyed_hash(pin.as_bytes(), &keys.rx)?,
    })
}

fn keyed_hash(key: &[u8], message: &[u8]) -> Result<[u8; 32]> {
    let mut mac = <Hmac<Sha256> as Mac>::new_from_slice(key)
        .map_err(|_| RtsError::Crypto(CryptographicError::KeyDerivationFailed))?;
    mac.update(message);
    let mut out = [0u8; 32];
    out.copy_from_slice(&mac.finalize().into_bytes());
    Ok(out)
}

// ----------------------------------------------------------------------------
// Nonce
// ----------------------------------------------------------------------------

/// 24-byte XChaCha20 nonce treated as a little-endian counter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AeadNonce([u8; NONCE_BYTES]);

impl AeadNonce {
    /// Create a nonce from raw bytes
    pub fn new(bytes: [u8; NONCE_BYTES]) -> Self {
        Self(bytes)
    }

    /// Generate a random starting nonce
    pub fn random() -> Self {
        let mut bytes = [0u8; NONCE_BYTES];
        OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Get the raw bytes
    pub fn as_bytes(&self) -> &[u8; NONCE_BYTES] {
        &self.0
    }

    /// Advance by one, little-endian with wrap-around
    pub fn increment(&mut self) {
        for byte in self.0.iter_mut() {
            let (next, carry) = byte.overflowing_add(1);
            *byte = next;
            if !carry {
                break;
            }
        }
    }

    /// The value one step ahead, leaving `self` untouched
    pub fn incremented(&self) -> Self {
        let mut next = *self;
        next.increment();
        next
    }
}

// ----------------------------------------------------------------------------
// AEAD
// ----------------------------------------------------------------------------

/// Encrypt `plaintext` under `key` and `nonce`
pub fn seal(key: &[u8; SESSION_KEY_BYTES], nonce: &AeadNonce, plaintext: &[u8]) -> Result<Vec<u8>> {
    let cipher = XChaCha20Poly1305::new(key.into());
    cipher
        .encrypt(XNonce::from_slice(nonce.as_bytes()), plaintext)
        .map_err(|_| RtsError::Crypto(CryptographicError::EncryptionFailed))
}

/// Decrypt and authenticate `ciphertext` under `key` and `nonce`
pub fn open(key: &[u8; SESSION_KEY_BYTES], nonce: &AeadNonce, ciphertext: &[u8]) -> Result<Vec<u8>> {
    if ciphertext.len() < TAG_BYTES {
        return Err(RtsError::decryption_failed());
    }
    let cipher = XChaCha20Poly1305::new(key.into());
    cipher
        .decrypt(XNonce::from_slice(nonce.as_bytes()), ciphertext)
        .map_err(|_| RtsError::decryption_failed())
}


// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
