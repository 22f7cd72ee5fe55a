// ABOUTME: Authenticated encryption of the local secrets file.
// ABOUTME: ChaCha20-Poly1305 with a random nonce per seal; the key is stored hex-encoded.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chacha20poly1305::aead::rand_core::RngCore;
use chacha20poly1305::aead::{Aead, AeadCore, KeyInit, OsRng, Payload};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};

/// First line of every sealed file. Also bound into the tag as associated data.
pub const SEALED_HEADER: &str = "jailwarden-sealed-v1";

const KEY_LEN: usize = 32;
const NONCE_LEN: usize = 12;

#[derive(Debug, thiserror::Error)]
pub enum CipherError {
    #[error("key must be {KEY_LEN} hex-encoded bytes")]
    InvalidKey,

    #[error("not a sealed secrets file: {0}")]
    Malformed(&'static str),

    #[error("decryption failed: wrong key or modified file")]
    Rejected,

    #[error("encryption failed")]
    Seal,
}

/// `len` random bytes from the OS generator, hex-encoded.
pub fn random_hex(len: usize) -> String {
    let mut bytes = vec![0u8; len];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Symmetric key for the secrets file.
#[derive(Clone)]
pub struct SecretKey(Key);

impl std::fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SecretKey(..)")
    }
}

impl SecretKey {
    pub fn generate() -> Self {
        Self(ChaCha20Poly1305::generate_key(&mut OsRng))
    }

    pub fn from_hex(text: &str) -> Result<Self, CipherError> {
        let bytes = hex::decode(text.trim()).map_err(|_| CipherError::InvalidKey)?;
        if bytes.len() != KEY_LEN {
            return Err(CipherError::InvalidKey);
        }
        Ok(Self(*Key::from_slice(&bytes)))
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Encrypt `plaintext` into the text form written to disk.
    pub fn seal(&self, plaintext: &[u8]) -> Result<String, CipherError> {
        let cipher = ChaCha20Poly1305::new(&self.0);
        let nonce = ChaCha20Poly1305::generate_nonce(&mut OsRng);
        let payload = Payload {
            msg: plaintext,
            aad: SEALED_HEADER.as_bytes(),
        };
        let ciphertext = cipher
            .encrypt(&nonce, payload)
            .map_err(|_| CipherError::Seal)?;

        let mut blob = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        blob.extend_from_slice(&nonce);
        blob.extend_from_slice(&ciphertext);
        Ok(format!("{SEALED_HEADER}\n{}\n", STANDARD.encode(blob)))
    }

    pub fn open(&self, sealed: &str) -> Result<Vec<u8>, CipherError> {
        let body = sealed
            .strip_prefix(SEALED_HEADER)
            .and_then(|rest| rest.strip_prefix('\n'))
            .ok_or(CipherError::Malformed("missing header"))?;
        let blob = STANDARD
            .decode(body.trim())
            .map_err(|_| CipherError::Malformed("invalid base64 body"))?;
        if blob.len() < NONCE_LEN {
            return Err(CipherError::Malformed("truncated body"));
        }

        let (nonce, ciphertext) = blob.split_at(NONCE_LEN);
        let payload = Payload {
            msg: ciphertext,
            aad: SEALED_HEADER.as_bytes(),
        };
        ChaCha20Poly1305::new(&self.0)
            .decrypt(Nonce::from_slice(nonce), payload)
            .map_err(|_| CipherError::Rejected)
    }
}
