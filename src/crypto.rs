//! Symmetric payload encryption
//!
//! AES-256-GCM over UTF-8 text. Key material is derived from a secret with
//! SHA-256 and travels as URL-safe base64. Ciphertext is URL-safe base64 of
//! `[nonce (12 bytes)][ciphertext][tag (16 bytes)]`.
//!
//! All operations are pure computation, cheap enough to run inside the
//! coordinating actor.

use std::collections::HashMap;

use aes_gcm::{
    aead::{Aead, KeyInit, Payload},
    Aes256Gcm, Nonce,
};
use base64::engine::{general_purpose::URL_SAFE, Engine};
use rand::Rng;
use sha2::{Digest, Sha256};

use crate::error::EncryptionError;
use crate::types::RoomId;

const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;

/// Fixed-size symmetric key
#[derive(Clone, PartialEq, Eq)]
pub struct KeyMaterial([u8; 32]);

impl KeyMaterial {
    /// Hash a secret of any length into key material; deterministic
    pub fn derive(secret: &str) -> Self {
        let digest = Sha256::digest(secret.as_bytes());
        let mut key = [0u8; 32];
        key.copy_from_slice(&digest);
        Self(key)
    }

    /// Fresh random key
    pub fn generate() -> Self {
        Self(rand::thread_rng().gen())
    }

    /// URL-safe base64 form, as handed to clients
    pub fn to_base64(&self) -> String {
        URL_SAFE.encode(self.0)
    }

    pub fn from_base64(encoded: &str) -> Result<Self, EncryptionError> {
        let bytes = URL_SAFE
            .decode(encoded.trim())
            .map_err(|e| EncryptionError::InvalidKey(format!("Failed to decode base64: {}", e)))?;

        let key: [u8; 32] = bytes.as_slice().try_into().map_err(|_| {
            EncryptionError::InvalidKey(format!(
                "Key must be 32 bytes (256 bits), got {} bytes",
                bytes.len()
            ))
        })?;
        Ok(Self(key))
    }

    fn cipher(&self) -> Aes256Gcm {
        Aes256Gcm::new(aes_gcm::Key::<Aes256Gcm>::from_slice(&self.0))
    }
}

impl std::fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("KeyMaterial(<redacted>)")
    }
}

/// Encrypt text under `key`; a fresh nonce is drawn per call
pub fn encrypt(plaintext: &str, key: &KeyMaterial) -> Result<String, EncryptionError> {
    let nonce_bytes: [u8; NONCE_LEN] = rand::thread_rng().gen();
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = key
        .cipher()
        .encrypt(nonce, Payload::from(plaintext.as_bytes()))
        .map_err(|e| EncryptionError::Encrypt(format!("AES-GCM failed: {}", e)))?;

    let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    sealed.extend_from_slice(&nonce_bytes);
    sealed.extend_from_slice(&ciphertext);
    Ok(URL_SAFE.encode(sealed))
}

/// Decrypt text produced by [`encrypt`]
///
/// A tag mismatch is reported as [`EncryptionError::Tampered`]; every other
/// problem as [`EncryptionError::Decode`].
pub fn decrypt(ciphertext: &str, key: &KeyMaterial) -> Result<String, EncryptionError> {
    let sealed = URL_SAFE
        .decode(ciphertext.trim())
        .map_err(|e| EncryptionError::Decode(format!("Invalid base64: {}", e)))?;

    if sealed.len() < NONCE_LEN + TAG_LEN {
        return Err(EncryptionError::Decode("Encrypted data too short".to_string()));
    }

    let (nonce, body) = sealed.split_at(NONCE_LEN);
    let plaintext = key
        .cipher()
        .decrypt(Nonce::from_slice(nonce), Payload::from(body))
        .map_err(|_| EncryptionError::Tampered)?;

    String::from_utf8(plaintext).map_err(|e| EncryptionError::Decode(format!("Invalid UTF-8: {}", e)))
}

/// Master key plus optional per-room overrides
#[derive(Debug)]
pub struct EncryptionGateway {
    master: KeyMaterial,
    room_keys: HashMap<RoomId, KeyMaterial>,
}

impl EncryptionGateway {
    /// Derive the master key from `secret`, or generate one when there is none
    pub fn new(secret: Option<&str>) -> Self {
        let master = match secret {
            Some(secret) => KeyMaterial::derive(secret),
            None => KeyMaterial::generate(),
        };
        Self {
            master,
            room_keys: HashMap::new(),
        }
    }

    pub fn encrypt(&self, plaintext: &str) -> Result<String, EncryptionError> {
        encrypt(plaintext, &self.master)
    }

    pub fn decrypt(&self, ciphertext: &str) -> Result<String, EncryptionError> {
        decrypt(ciphertext, &self.master)
    }

    /// Generate and install a random key for `room`, returning it
    pub fn create_room_key(&mut self, room: &RoomId) -> KeyMaterial {
        let key = KeyMaterial::generate();
        self.room_keys.insert(room.clone(), key.clone());
        key
    }

    /// Install a serialized key for `room`; the previous key is kept on error
    pub fn set_room_key(&mut self, room: &RoomId, serialized: &str) -> Result<(), EncryptionError> {
        let key = KeyMaterial::from_base64(serialized)?;
        self.room_keys.insert(room.clone(), key);
        Ok(())
    }

    pub fn remove_room_key(&mut self, room: &RoomId) {
        self.room_keys.remove(room);
    }

    /// Room key when set, master key otherwise
    pub fn key_for(&self, room: &RoomId) -> &KeyMaterial {
        self.room_keys.get(room).unwrap_or(&self.master)
    }

    pub fn encrypt_for_room(&self, room: &RoomId, plaintext: &str) -> Result<String, EncryptionError> {
        encrypt(plaintext, self.key_for(room))
    }
}
