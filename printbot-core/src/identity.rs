//! Peer identity and crypto: keypairs, peer ID, per-direction session keys, frame sealing.

use std::fmt;

use chacha20poly1305::aead::{Aead, KeyInit};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use x25519_dalek::{PublicKey as X25519PublicKey, StaticSecret};

/// Peer public key (32 bytes, X25519). This is the address a friend adds.
#[derive(Debug, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct PublicKey(#[serde(with = "bytes_32")] [u8; 32]);

pub(crate) mod bytes_32 {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    pub fn serialize<S: Serializer>(v: &[u8; 32], serializer: S) -> Result<S::Ok, S::Error> {
        v.as_slice().serialize(serializer)
    }
    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<[u8; 32], D::Error> {
        let buf: Vec<u8> = Deserialize::deserialize(d)?;
        buf.try_into()
            .map_err(|_| serde::de::Error::custom("expected 32 bytes"))
    }
}

impl PublicKey {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        PublicKey(bytes)
    }

    /// Parse a 64-character hex string, as found in config files.
    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        let mut out = [0u8; 32];
        hex::decode_to_slice(s.trim(), &mut out)?;
        Ok(PublicKey(out))
    }

    pub fn peer_id(&self) -> PeerId {
        PeerId::from_public_key(&self.0)
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode_upper(self.0))
    }
}

/// Peer ID: SHA-256 prefix of the public key. Keys the friend list, transfers and queue entries.
#[derive(Clone, Copy, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct PeerId(#[serde(with = "bytes_16")] [u8; 16]);

mod bytes_16 {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    pub fn serialize<S: Serializer>(v: &[u8; 16], serializer: S) -> Result<S::Ok, S::Error> {
        v.as_slice().serialize(serializer)
    }
    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<[u8; 16], D::Error> {
        let buf: Vec<u8> = Deserialize::deserialize(d)?;
        buf.try_into()
            .map_err(|_| serde::de::Error::custom("expected 16 bytes"))
    }
}

impl PeerId {
    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        PeerId(bytes)
    }

    pub fn from_public_key(public: &[u8; 32]) -> Self {
        let digest = Sha256::digest(public);
        let mut id = [0u8; 16];
        id.copy_from_slice(&digest[..16]);
        PeerId(id)
    }
}

// Logs only need enough of the id to tell peers apart.
impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(&self.0[..4]))
    }
}

impl fmt::Debug for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PeerId({})", hex::encode(self.0))
    }
}

/// X25519 keypair. The secret only leaves this type through `secret_bytes` for the session snapshot.
pub struct Keypair {
    secret: StaticSecret,
    public: PublicKey,
    peer_id: PeerId,
}

impl Keypair {
    pub fn generate() -> Self {
        Self::from_secret(StaticSecret::random_from_rng(OsRng))
    }

    /// Restore a keypair from a persisted secret.
    pub fn from_secret_bytes(bytes: [u8; 32]) -> Self {
        Self::from_secret(StaticSecret::from(bytes))
    }

    fn from_secret(secret: StaticSecret) -> Self {
        let public = PublicKey(X25519PublicKey::from(&secret).to_bytes());
        let peer_id = public.peer_id();
        Self {
            secret,
            public,
            peer_id,
        }
    }

    pub fn secret_bytes(&self) -> [u8; 32] {
        self.secret.to_bytes()
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.public
    }

    pub fn peer_id(&self) -> PeerId {
        self.peer_id
    }

    pub fn shared_secret(&self, other_public: &PublicKey) -> [u8; 32] {
        let other = X25519PublicKey::from(other_public.0);
        self.secret.diffie_hellman(&other).to_bytes()
    }

    /// Keys for one connection: (ours to send with, ours to receive with).
    /// Each direction gets its own key so both counters may start at zero.
    pub fn session_keys(&self, other_public: &PublicKey) -> SessionKeys {
        let shared = self.shared_secret(other_public);
        SessionKeys {
            tx: derive_direction_key(&shared, &self.public),
            rx: derive_direction_key(&shared, other_public),
        }
    }
}

#[derive(Clone, Copy)]
pub struct SessionKeys {
    pub tx: [u8; 32],
    pub rx: [u8; 32],
}

/// Key for frames sent by `sender`.
pub fn derive_direction_key(shared_secret: &[u8; 32], sender: &PublicKey) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(b"printbot-session-v1");
    hasher.update(shared_secret);
    hasher.update(sender.as_bytes());
    hasher.finalize().into()
}

/// ChaCha20-Poly1305 with a 64-bit counter nonce; callers never reuse a counter under one key.
pub fn encrypt_wire(
    key: &[u8; 32],
    nonce: u64,
    plaintext: &[u8],
) -> Result<Vec<u8>, WireCryptoError> {
    let cipher = chacha20poly1305::ChaCha20Poly1305::new_from_slice(key)
        .map_err(|_| WireCryptoError::Key)?;
    cipher
        .encrypt(&counter_nonce(nonce), plaintext)
        .map_err(|_| WireCryptoError::Encrypt)
}

pub fn decrypt_wire(
    key: &[u8; 32],
    nonce: u64,
    ciphertext: &[u8],
) -> Result<Vec<u8>, WireCryptoError> {
    let cipher = chacha20poly1305::ChaCha20Poly1305::new_from_slice(key)
        .map_err(|_| WireCryptoError::Key)?;
    cipher
        .decrypt(&counter_nonce(nonce), ciphertext)
        .map_err(|_| WireCryptoError::Decrypt)
}

fn counter_nonce(nonce: u64) -> chacha20poly1305::Nonce {
    let mut bytes = [0u8; 12];
    bytes[4..12].copy_from_slice(&nonce.to_le_bytes());
    *chacha20poly1305::Nonce::from_slice(&bytes)
}

#[derive(Debug, thiserror::Error)]
pub enum WireCryptoError {
    #[error("invalid key")]
    Key,
    #[error("encryption failed")]
    Encrypt,
    #[error("decryption failed")]
    Decrypt,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peer_id_follows_public_key() {
        let kp = Keypair::generate();
        assert_eq!(kp.public_key().peer_id(), kp.peer_id());
    }

    #[test]
    fn secret_restores_same_identity() {
        let kp = Keypair::generate();
        let restored = Keypair::from_secret_bytes(kp.secret_bytes());
        assert_eq!(restored.public_key(), kp.public_key());
        assert_eq!(restored.peer_id(), kp.peer_id());
    }

    #[test]
    fn session_keys_pair_up() {
        let a = Keypair::generate();
        let b = Keypair::generate();
        let ka = a.session_keys(b.public_key());
        let kb = b.session_keys(a.public_key());
        assert_eq!(ka.tx, kb.rx);
        assert_eq!(ka.rx, kb.tx);
        assert_ne!(ka.tx, ka.rx);
    }

    #[test]
    fn sealed_frame_opens_with_peer_rx_key() {
        let a = Keypair::generate();
        let b = Keypair::generate();
        let ka = a.session_keys(b.public_key());
        let kb = b.session_keys(a.public_key());
        let sealed = encrypt_wire(&ka.tx, 7, b"status").unwrap();
        assert_eq!(decrypt_wire(&kb.rx, 7, &sealed).unwrap(), b"status");
        assert!(decrypt_wire(&kb.rx, 8, &sealed).is_err());
        assert!(decrypt_wire(&kb.tx, 7, &sealed).is_err());
    }

    #[test]
    fn public_key_hex_roundtrip() {
        let kp = Keypair::generate();
        let text = kp.public_key().to_string();
        assert_eq!(text.len(), 64);
        assert_eq!(&PublicKey::from_hex(&text).unwrap(), kp.public_key());
        assert!(PublicKey::from_hex("F404").is_err());
    }
}
