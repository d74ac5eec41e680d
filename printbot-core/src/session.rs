//! Session snapshot: the identity and friend list that survive a restart.
//! The host treats the encoded form as an opaque blob.

use serde::{Deserialize, Serialize};

use crate::identity::{bytes_32, Keypair, PublicKey};

/// Leading byte of every snapshot, bumped when the layout changes.
const SNAPSHOT_VERSION: u8 = 1;

#[derive(Clone, Serialize, Deserialize)]
pub struct SessionState {
    #[serde(with = "bytes_32")]
    secret_key: [u8; 32],
    pub name: String,
    pub friends: Vec<PublicKey>,
}

impl SessionState {
    pub fn new(keypair: &Keypair, name: impl Into<String>) -> Self {
        Self {
            secret_key: keypair.secret_bytes(),
            name: name.into(),
            friends: Vec::new(),
        }
    }

    pub fn keypair(&self) -> Keypair {
        Keypair::from_secret_bytes(self.secret_key)
    }

    /// Add a friend once. Returns false if already present.
    pub fn add_friend(&mut self, key: PublicKey) -> bool {
        if self.friends.contains(&key) {
            return false;
        }
        self.friends.push(key);
        true
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, SnapshotError> {
        let mut out = vec![SNAPSHOT_VERSION];
        out.extend(bincode::serialize(self)?);
        Ok(out)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, SnapshotError> {
        match bytes.split_first() {
            Some((&SNAPSHOT_VERSION, body)) => Ok(bincode::deserialize(body)?),
            Some((&v, _)) => Err(SnapshotError::Version(v)),
            None => Err(SnapshotError::Empty),
        }
    }
}

impl std::fmt::Debug for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionState")
            .field("name", &self.name)
            .field("friends", &self.friends.len())
            .finish_non_exhaustive()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error("snapshot is empty")]
    Empty,
    #[error("unsupported snapshot version {0}")]
    Version(u8),
    #[error("snapshot codec: {0}")]
    Codec(#[from] bincode::Error),
}
