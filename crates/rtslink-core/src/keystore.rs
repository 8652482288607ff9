//! Key storage for reconnection
//!
//! Holds the client key pair and the session keys agreed with each robot, so a
//! later connection can skip the PIN exchange. Two implementations are
//! provided: an in-memory store for tests and a JSON file store for the CLI.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::errors::{Result, StorageError};
use crate::protocol::crypto::{KeyPair, PublicKey, SessionKeys, SESSION_KEY_BYTES};

// ----------------------------------------------------------------------------
// Key Store Trait
// ----------------------------------------------------------------------------

/// Persistent store for the client key pair and per-robot session keys
pub trait KeyStore: Send {
    /// Load the client key pair
    fn load(&self) -> Result<Option<KeyPair>>;

    /// Save the client key pair
    ///
    /// Sessions agreed under a different key pair can no longer be resumed and
    /// are dropped when the key pair changes.
    fn save(&mut self, key_pair: &KeyPair) -> Result<()>;

    /// Load the session keys saved for a robot
    fn load_session(&self, robot_key: &PublicKey) -> Result<Option<SessionKeys>>;

    /// Save the session keys for a robot
    fn save_session(&mut self, robot_key: &PublicKey, keys: &SessionKeys) -> Result<()>;
}

// ----------------------------------------------------------------------------
// Memory Key Store
// ----------------------------------------------------------------------------

/// In-memory key store for testing
#[derive(Default)]
pub struct MemoryKeyStore {
    secret: Option<[u8; 32]>,
    sessions: BTreeMap<PublicKey, SessionKeys>,
}

impl MemoryKeyStore {
    /// Create a new empty memory store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of saved robot sessions
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }
}

impl KeyStore for MemoryKeyStore {
    fn load(&self) -> Result<Option<KeyPair>> {
        Ok(self.secret.map(KeyPair::from_secret_bytes))
    }

    fn save(&mut self, key_pair: &KeyPair) -> Result<()> {
        let secret = key_pair.secret_bytes();
        if self.secret.is_some_and(|old| old != secret) {
            self.sessions.clear();
        }
        self.secret = Some(secret);
        Ok(())
    }

    fn load_session(&self, robot_key: &PublicKey) -> Result<Option<SessionKeys>> {
        Ok(self.sessions.get(robot_key).cloned())
    }

    fn save_session(&mut self, robot_key: &PublicKey, keys: &SessionKeys) -> Result<()> {
        self.sessions.insert(*robot_key, keys.clone());
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// File Key Store
// ----------------------------------------------------------------------------

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoredKeys {
    #[serde(default)]
    client_secret: Option<String>,
    #[serde(default)]
    sessions: BTreeMap<String, StoredSession>,
}

#[derive(Debug, Serialize, Deserialize)]
struct StoredSession {
    tx: String,
    rx: String,
}

/// JSON file key store with hex-encoded key material
pub struct FileKeyStore {
    path: PathBuf,
    contents: StoredKeys,
}

impl FileKeyStore {
    /// Open a store at `path`, starting empty if the file does not exist
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let contents = if path.exists() {
            let text = fs::read_to_string(&path).map_err(StorageError::from)?;
            serde_json::from_str(&text).map_err(StorageError::from)?
        } else {
            debug!("Key store {} not found, starting empty", path.display());
            StoredKeys::default()
        };
        Ok(Self { path, contents })
    }

    /// Path of the backing file
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(StorageError::from)?;
            }
        }
        let text = serde_json::to_string_pretty(&self.contents).map_err(StorageError::from)?;
        let staging = self.path.with_extension("tmp");
        fs::write(&staging, text).map_err(StorageError::from)?;
        fs::rename(&staging, &self.path).map_err(StorageError::from)?;
        Ok(())
    }
}

fn decode_key(field: &str, text: &str) -> Result<[u8; SESSION_KEY_BYTES]> {
    let bytes = hex::decode(text).map_err(|e| StorageError::MalformedKey {
        reason: format!("{field}: {e}"),
    })?;
    let key: [u8; SESSION_KEY_BYTES] = bytes.try_into().map_err(|_| StorageError::MalformedKey {
        reason: format!("{field}: expected {SESSION_KEY_BYTES} bytes"),
    })?;
    Ok(key)
}

impl KeyStore for FileKeyStore {
    fn load(&self) -> Result<Option<KeyPair>> {
        match self.contents.client_secret.as_deref() {
            Some(text) => Ok(Some(KeyPair::from_secret_bytes(decode_key(
                "client_secret",
                text,
            )?))),
            None => Ok(None),
        }
    }

    fn save(&mut self, key_pair: &KeyPair) -> Result<()> {
        let secret = hex::encode(key_pair.secret_bytes());
        if self
            .contents
            .client_secret
            .as_ref()
            .is_some_and(|old| *old != secret)
            && !self.contents.sessions.is_empty()
        {
            debug!(
                "Client key replaced, dropping {} saved sessions",
                self.contents.sessions.len()
            );
            self.contents.sessions.clear();
        }
        self.contents.client_secret = Some(secret);
        self.persist()
    }

    fn load_session(&self, robot_key: &PublicKey) -> Result<Option<SessionKeys>> {
        match self.contents.sessions.get(&robot_key.to_string()) {
            Some(stored) => Ok(Some(SessionKeys {
                tx: decode_key("tx", &stored.tx)?,
                rx: decode_key("rx", &stored.rx)?,
            })),
            None => Ok(None),
        }
    }

    fn save_session(&mut self, robot_key: &PublicKey, keys: &SessionKeys) -> Result<()> {
        self.contents.sessions.insert(
            robot_key.to_string(),
            StoredSession {
                tx: hex::encode(keys.tx),
                rx: hex::encode(keys.rx),
            },
        );
        self.persist()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
