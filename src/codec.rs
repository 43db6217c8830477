//! share codec: authenticated encryption of unseal key shares
//!
//! each share is sealed with chacha20poly1305 under a single key generated
//! at init time. the sealed blob is nonce-prefixed and base64 encoded so it
//! survives any text-shaped storage (json record file or tag blocks).
//! losing the key file permanently loses every share - there is no recovery
//! path, by design.

use std::fs;
use std::path::Path;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chacha20poly1305::{
    aead::{Aead, KeyInit},
    ChaCha20Poly1305, Nonce,
};
use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

const KEY_LEN: usize = 32;
const NONCE_LEN: usize = 12;

/// generate random bytes
pub fn random_bytes<const N: usize>() -> [u8; N] {
    let mut bytes = [0u8; N];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes
}

/// symmetric key protecting all shares of one initialization.
///
/// generated once per `init`, read-only thereafter.
#[derive(Clone)]
pub struct ShareKey([u8; KEY_LEN]);

impl ShareKey {
    /// generate a fresh uniformly random key
    pub fn generate() -> Self {
        Self(random_bytes())
    }

    /// encode as a single opaque text token
    pub fn to_token(&self) -> String {
        URL_SAFE_NO_PAD.encode(self.0)
    }

    /// decode from the token form
    pub fn from_token(token: &str) -> Result<Self> {
        let bytes = URL_SAFE_NO_PAD
            .decode(token.trim())
            .map_err(|_| Error::Format("invalid key token".into()))?;
        let arr: [u8; KEY_LEN] = bytes
            .try_into()
            .map_err(|_| Error::Format("invalid key length".into()))?;
        Ok(Self(arr))
    }

    /// write the key token to a file
    pub fn save(&self, path: &Path) -> Result<()> {
        fs::write(path, self.to_token()).map_err(|e| Error::Storage(e.to_string()))
    }

    /// read the key token from a file
    pub fn load(path: &Path) -> Result<Self> {
        let token = fs::read_to_string(path).map_err(|e| Error::Storage(e.to_string()))?;
        Self::from_token(&token)
    }

    /// seal one plaintext share. output is base64(nonce || ciphertext).
    pub fn encrypt(&self, share: &str) -> Result<String> {
        let cipher = ChaCha20Poly1305::new_from_slice(&self.0)
            .map_err(|e| Error::Format(e.to_string()))?;
        let nonce_bytes: [u8; NONCE_LEN] = random_bytes();
        let nonce = Nonce::from_slice(&nonce_bytes);
        let ciphertext = cipher
            .encrypt(nonce, share.as_bytes())
            .map_err(|e| Error::Format(e.to_string()))?;

        let mut sealed = nonce_bytes.to_vec();
        sealed.extend(ciphertext);
        Ok(URL_SAFE_NO_PAD.encode(sealed))
    }

    /// open one sealed share. any tampering, truncation or key mismatch
    /// fails with [`Error::Authentication`]; wrong plaintext is never
    /// returned silently.
    pub fn decrypt(&self, sealed: &str) -> Result<String> {
        let bytes = URL_SAFE_NO_PAD
            .decode(sealed.trim())
            .map_err(|_| Error::Authentication)?;
        if bytes.len() <= NONCE_LEN {
            return Err(Error::Authentication);
        }
        let cipher = ChaCha20Poly1305::new_from_slice(&self.0)
            .map_err(|_| Error::Authentication)?;
        let nonce = Nonce::from_slice(&bytes[..NONCE_LEN]);
        let plaintext = cipher
            .decrypt(nonce, &bytes[NONCE_LEN..])
            .map_err(|_| Error::Authentication)?;
        String::from_utf8(plaintext).map_err(|_| Error::Authentication)
    }
}

impl std::fmt::Debug for ShareKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // never leak key material through debug output
        write!(f, "ShareKey(..)")
    }
}

/// the durable record of all encrypted shares, in original order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShareRecord {
    pub encrypted_keys: Vec<String>,
}

impl ShareRecord {
    pub fn new(encrypted_keys: Vec<String>) -> Self {
        Self { encrypted_keys }
    }

    pub fn len(&self) -> usize {
        self.encrypted_keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.encrypted_keys.is_empty()
    }

    /// write the record as json
    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self).map_err(|e| Error::Format(e.to_string()))?;
        fs::write(path, json).map_err(|e| Error::Storage(e.to_string()))
    }

    /// load the record from json
    pub fn load(path: &Path) -> Result<Self> {
        let json = fs::read_to_string(path).map_err(|e| Error::Storage(e.to_string()))?;
        serde_json::from_str(&json).map_err(|e| Error::Format(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let key = ShareKey::generate();
        let share = "a1b2c3d4e5f60718293a4b5c6d7e8f90a1b2c3d4e5f60718293a4b5c6d7e8f90aa";
        let sealed = key.encrypt(share).unwrap();
        assert_ne!(sealed, share);
        assert_eq!(key.decrypt(&sealed).unwrap(), share);
    }

    #[test]
    fn test_decrypt_wrong_key_fails() {
        let key = ShareKey::generate();
        let other = ShareKey::generate();
        let sealed = key.encrypt("secret share").unwrap();
        assert!(matches!(other.decrypt(&sealed), Err(Error::Authentication)));
    }

    #[test]
    fn test_decrypt_tampered_fails() {
        let key = ShareKey::generate();
        let sealed = key.encrypt("secret share").unwrap();

        let mut raw = URL_SAFE_NO_PAD.decode(&sealed).unwrap();
        let last = raw.len() - 1;
        raw[last] ^= 0x01;
        let tampered = URL_SAFE_NO_PAD.encode(raw);

        assert!(matches!(key.decrypt(&tampered), Err(Error::Authentication)));
    }

    #[test]
    fn test_decrypt_truncated_fails() {
        let key = ShareKey::generate();
        let sealed = key.encrypt("secret share").unwrap();
        let truncated = &sealed[..sealed.len() / 2];
        assert!(matches!(key.decrypt(truncated), Err(Error::Authentication)));

        // even an empty token fails cleanly
        assert!(matches!(key.decrypt(""), Err(Error::Authentication)));
    }

    #[test]
    fn test_key_token_roundtrip() {
        let key = ShareKey::generate();
        let token = key.to_token();
        let restored = ShareKey::from_token(&token).unwrap();

        let sealed = key.encrypt("hello").unwrap();
        assert_eq!(restored.decrypt(&sealed).unwrap(), "hello");
    }

    #[test]
    fn test_key_token_rejects_garbage() {
        assert!(ShareKey::from_token("not!!base64").is_err());
        assert!(ShareKey::from_token("c2hvcnQ").is_err()); // wrong length
    }

    #[test]
    fn test_key_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keyfob.key");
        let key = ShareKey::generate();
        key.save(&path).unwrap();
        let restored = ShareKey::load(&path).unwrap();
        assert_eq!(key.to_token(), restored.to_token());
    }

    #[test]
    fn test_record_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shares.json");
        let record = ShareRecord::new(vec!["ct-one".into(), "ct-two".into(), "ct-three".into()]);
        record.save(&path).unwrap();
        let loaded = ShareRecord::load(&path).unwrap();
        assert_eq!(record, loaded);
        assert_eq!(loaded.len(), 3);
    }

    #[test]
    fn test_record_rejects_malformed_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shares.json");
        std::fs::write(&path, "{\"wrong_field\": 3}").unwrap();
        assert!(matches!(ShareRecord::load(&path), Err(Error::Format(_))));
    }
}
