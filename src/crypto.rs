//! AES-256-GCM codec for package encryption.
//!
//! Two nonce disciplines, selected per call: common data derives the nonce
//! from SHA-256 of the plaintext so identical plaintexts under the same key
//! produce byte-identical blobs (convergent encryption, which is what makes
//! cross-user dedup of the shared layer possible); unique data draws the
//! nonce from the OS RNG. Output layout is `nonce || ciphertext+tag`.

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};

use crate::error::{Result, ServiceError};

/// AES-256 key length in bytes.
pub const KEY_SIZE: usize = 32;

/// GCM nonce length in bytes.
pub const NONCE_SIZE: usize = 12;

/// AEAD cipher bound to one data encryption key.
pub struct Cipher {
    aead: Aes256Gcm,
}

impl Cipher {
    /// Build a cipher from a raw DEK. The key must be exactly 32 bytes.
    pub fn new(key: &[u8]) -> Result<Self> {
        if key.len() != KEY_SIZE {
            return Err(ServiceError::Crypto(format!(
                "key must be {} bytes (AES-256), got {}",
                KEY_SIZE,
                key.len()
            )));
        }
        let aead = Aes256Gcm::new_from_slice(key)
            .map_err(|e| ServiceError::Crypto(e.to_string()))?;
        Ok(Self { aead })
    }

    /// Encrypt `plaintext`, returning `nonce || ciphertext`. With
    /// `common = true` the nonce is the SHA-256 prefix of the plaintext;
    /// do not replace this with a random nonce, convergence is the point.
    pub fn encrypt(&self, plaintext: &[u8], common: bool) -> Result<Vec<u8>> {
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        if common {
            let sum = Sha256::digest(plaintext);
            nonce_bytes.copy_from_slice(&sum[..NONCE_SIZE]);
        } else {
            OsRng.fill_bytes(&mut nonce_bytes);
        }

        let ct = self
            .aead
            .encrypt(Nonce::from_slice(&nonce_bytes), plaintext)
            .map_err(|_| ServiceError::Crypto("AES-GCM encryption failed".into()))?;

        let mut out = Vec::with_capacity(NONCE_SIZE + ct.len());
        out.extend_from_slice(&nonce_bytes);
        out.extend_from_slice(&ct);
        Ok(out)
    }

    /// Split `nonce || ciphertext` and open the GCM envelope.
    pub fn decrypt(&self, blob: &[u8]) -> Result<Vec<u8>> {
        if blob.len() < NONCE_SIZE {
            return Err(ServiceError::Crypto(format!(
                "ciphertext too short: {} bytes",
                blob.len()
            )));
        }
        let (nonce_bytes, ct) = blob.split_at(NONCE_SIZE);
        self.aead
            .decrypt(Nonce::from_slice(nonce_bytes), ct)
            .map_err(|_| ServiceError::Crypto("AES-GCM authentication failed".into()))
    }
}
