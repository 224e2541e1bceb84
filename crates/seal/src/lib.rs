//! Symmetric sealing of secret values for storage.
//!
//! Each value is encrypted with AES-256-GCM under the platform master key
//! using a fresh 12-byte nonce. The stored form is `base64(nonce || ciphertext)`,
//! where the GCM tag is part of the ciphertext. Tampering with any byte of the
//! sealed form fails the tag check and surfaces as [`SealError::OpenFailed`].

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use rand::rngs::OsRng;
use rand::RngCore;

const NONCE_LEN: usize = 12;
const KEY_LEN: usize = 32;

#[derive(Debug, thiserror::Error)]
pub enum SealError {
    #[error("sealing key must be at least {KEY_LEN} bytes")]
    KeyTooShort,
    #[error("invalid sealed data")]
    InvalidData,
    #[error("decryption failed")]
    OpenFailed,
}

/// A sealing context bound to one master key. Cheap to clone.
#[derive(Clone)]
pub struct Sealer {
    cipher: Aes256Gcm,
}

impl std::fmt::Debug for Sealer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sealer").finish_non_exhaustive()
    }
}

impl Sealer {
    /// Build a sealer from key material. Only the first 32 bytes are used;
    /// shorter keys are rejected.
    pub fn new(key: &[u8]) -> Result<Self, SealError> {
        if key.len() < KEY_LEN {
            return Err(SealError::KeyTooShort);
        }
        let cipher = Aes256Gcm::new_from_slice(&key[..KEY_LEN]).map_err(|_| SealError::KeyTooShort)?;
        Ok(Self { cipher })
    }

    /// Encrypt a cleartext value into its base64 sealed form.
    pub fn seal(&self, plaintext: &str) -> Result<String, SealError> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);
        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|_| SealError::OpenFailed)?;
        let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        out.extend_from_slice(&nonce_bytes);
        out.extend_from_slice(&ciphertext);
        Ok(BASE64.encode(out))
    }

    /// Decrypt a sealed value produced by [`Sealer::seal`].
    pub fn open(&self, sealed: &str) -> Result<String, SealError> {
        let data = BASE64.decode(sealed).map_err(|_| SealError::InvalidData)?;
        if data.len() < NONCE_LEN {
            return Err(SealError::InvalidData);
        }
        let (nonce_bytes, ciphertext) = data.split_at(NONCE_LEN);
        let nonce = Nonce::from_slice(nonce_bytes);
        let plaintext = self
            .cipher
            .decrypt(nonce, ciphertext)
            .map_err(|_| SealError::OpenFailed)?;
        String::from_utf8(plaintext).map_err(|_| SealError::OpenFailed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn test_sealer() -> Sealer {
        Sealer::new(b"0123456789abcdef0123456789abcdef").unwrap()
    }

    #[test]
    fn round_trip() {
        let s = test_sealer();
        let sealed = s.seal("supersecret").unwrap();
        assert_ne!(sealed, "supersecret");
        assert_eq!(s.open(&sealed).unwrap(), "supersecret");
    }

    #[test]
    fn short_key_rejected() {
        assert!(matches!(Sealer::new(b"too short"), Err(SealError::KeyTooShort)));
    }

    #[test]
    fn extra_key_bytes_ignored() {
        let a = Sealer::new(b"0123456789abcdef0123456789abcdef").unwrap();
        let b = Sealer::new(b"0123456789abcdef0123456789abcdeftrailing").unwrap();
        let sealed = a.seal("v").unwrap();
        assert_eq!(b.open(&sealed).unwrap(), "v");
    }

    #[test]
    fn nonces_are_fresh() {
        let s = test_sealer();
        assert_ne!(s.seal("same").unwrap(), s.seal("same").unwrap());
    }

    #[test]
    fn garbage_is_invalid() {
        let s = test_sealer();
        assert!(matches!(s.open("not base64!!"), Err(SealError::InvalidData)));
        assert!(matches!(s.open("AAAA"), Err(SealError::InvalidData)));
    }

    #[test]
    fn wrong_key_fails() {
        let sealed = test_sealer().seal("v").unwrap();
        let other = Sealer::new(b"ffffffffffffffffffffffffffffffff").unwrap();
        assert!(matches!(other.open(&sealed), Err(SealError::OpenFailed)));
    }

    proptest! {
        #[test]
        fn seal_open_round_trips(value in ".{0,256}") {
            let s = test_sealer();
            let sealed = s.seal(&value).unwrap();
            prop_assert_eq!(s.open(&sealed).unwrap(), value);
        }

        #[test]
        fn bit_flips_are_rejected(value in "[a-zA-Z0-9 ]{1,64}", flip in 0usize..1024) {
            let s = test_sealer();
            let sealed = s.seal(&value).unwrap();
            let mut raw = BASE64.decode(&sealed).unwrap();
            let idx = flip % raw.len();
            raw[idx] ^= 0x01;
            let tampered = BASE64.encode(&raw);
            prop_assert!(s.open(&tampered).is_err());
        }
    }
}
