//! Symmetric encryption of return parameters.
//!
//! Tokens are `base64url(nonce || ciphertext)` with XChaCha20-Poly1305, so a
//! flipped bit anywhere in the token fails authentication instead of
//! decrypting to garbage.

use super::CodecError;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chacha20poly1305::{
    aead::{Aead, KeyInit},
    XChaCha20Poly1305, XNonce,
};
use rand::RngCore;
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

const KEY_LEN: usize = 32;
const NONCE_LEN: usize = 24;

/// Process-wide 256-bit parameter encryption key.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct EncryptionKey([u8; KEY_LEN]);

impl EncryptionKey {
    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }

    /// Parse a hex-encoded 32-byte key as stored in configuration.
    pub fn from_hex(hex_key: &str) -> Result<Self, CodecError> {
        let bytes = hex::decode(hex_key.trim())
            .map_err(|e| CodecError::InvalidKey(format!("key is not valid hex: {}", e)))?;
        let bytes: [u8; KEY_LEN] = bytes.try_into().map_err(|v: Vec<u8>| {
            CodecError::InvalidKey(format!("expected {} bytes, got {}", KEY_LEN, v.len()))
        })?;
        Ok(Self(bytes))
    }

    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_LEN];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(bytes)
    }

    fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }
}

impl fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("EncryptionKey(****)")
    }
}

/// Seals and opens single string values.
#[derive(Clone, Debug)]
pub struct ParamCipher {
    key: EncryptionKey,
}

impl ParamCipher {
    pub fn new(key: EncryptionKey) -> Self {
        Self { key }
    }

    /// Encrypt `plaintext` into a URL-safe token. Every call uses a fresh
    /// nonce, so sealing the same value twice yields different tokens.
    pub fn seal(&self, plaintext: &str) -> Result<String, CodecError> {
        let cipher = XChaCha20Poly1305::new(self.key.as_bytes().into());

        let mut nonce = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce);

        let ciphertext = cipher
            .encrypt(XNonce::from_slice(&nonce), plaintext.as_bytes())
            .map_err(|e| CodecError::Encryption(e.to_string()))?;

        let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        sealed.extend_from_slice(&nonce);
        sealed.extend_from_slice(&ciphertext);

        Ok(URL_SAFE_NO_PAD.encode(sealed))
    }

    /// Decrypt a token produced by [`ParamCipher::seal`] under the same key.
    pub fn open(&self, token: &str) -> Result<String, CodecError> {
        let sealed = URL_SAFE_NO_PAD
            .decode(token.trim())
            .map_err(|_| CodecError::Decode("token is not valid base64url".to_string()))?;

        if sealed.len() <= NONCE_LEN {
            return Err(CodecError::Decode("token is too short".to_string()));
        }

        let (nonce, ciphertext) = sealed.split_at(NONCE_LEN);
        let cipher = XChaCha20Poly1305::new(self.key.as_bytes().into());
        let plaintext = cipher
            .decrypt(XNonce::from_slice(nonce), ciphertext)
            .map_err(|_| CodecError::Decode("token failed authentication".to_string()))?;

        String::from_utf8(plaintext)
            .map_err(|_| CodecError::Decode("token plaintext is not UTF-8".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seal_open_roundtrip() {
        let cipher = ParamCipher::new(EncryptionKey::generate());
        let token = cipher.seal("42").unwrap();
        assert_eq!(cipher.open(&token).unwrap(), "42");
    }

    #[test]
    fn test_tokens_are_url_safe() {
        let cipher = ParamCipher::new(EncryptionKey::generate());
        let token = cipher.seal("ids=1|42|7|3&hash=abcdef").unwrap();
        assert!(token
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }

    #[test]
    fn test_nonce_makes_tokens_distinct() {
        let cipher = ParamCipher::new(EncryptionKey::generate());
        assert_ne!(cipher.seal("42").unwrap(), cipher.seal("42").unwrap());
    }

    #[test]
    fn test_wrong_key_fails() {
        let sealer = ParamCipher::new(EncryptionKey::generate());
        let opener = ParamCipher::new(EncryptionKey::generate());
        let token = sealer.seal("42").unwrap();
        assert!(matches!(opener.open(&token), Err(CodecError::Decode(_))));
    }

    #[test]
    fn test_bit_flip_fails() {
        let cipher = ParamCipher::new(EncryptionKey::generate());
        let token = cipher.seal("42").unwrap();
        let mut raw = URL_SAFE_NO_PAD.decode(&token).unwrap();
        for i in 0..raw.len() {
            raw[i] ^= 0x01;
            let tampered = URL_SAFE_NO_PAD.encode(&raw);
            assert!(cipher.open(&tampered).is_err(), "flip at byte {} accepted", i);
            raw[i] ^= 0x01;
        }
    }

    #[test]
    fn test_garbage_rejected() {
        let cipher = ParamCipher::new(EncryptionKey::generate());
        assert!(cipher.open("not a token!").is_err());
        assert!(cipher.open("").is_err());
        assert!(cipher.open("AAAA").is_err());
    }

    #[test]
    fn test_key_from_hex() {
        let hex_key = "00".repeat(32);
        assert!(EncryptionKey::from_hex(&hex_key).is_ok());
        assert!(matches!(
            EncryptionKey::from_hex("abcd"),
            Err(CodecError::InvalidKey(_))
        ));
        assert!(EncryptionKey::from_hex("zz").is_err());
    }

    #[test]
    fn test_key_debug_is_masked() {
        let key = EncryptionKey::from_bytes([7u8; 32]);
        assert_eq!(format!("{:?}", key), "EncryptionKey(****)");
    }
}
