//! Keyed hash over the order identifier string carried in the return URL.

use super::CodecError;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::fmt;

type HmacSha256 = Hmac<Sha256>;

/// HMAC-SHA256 key used to bind `formId|orderId|ownerId|feedId`.
#[derive(Clone)]
pub struct HashKey {
    mac: HmacSha256,
}

impl HashKey {
    pub fn new(secret: &[u8]) -> Result<Self, CodecError> {
        if secret.is_empty() {
            return Err(CodecError::InvalidKey("hash key must not be empty".to_string()));
        }
        let mac = HmacSha256::new_from_slice(secret)
            .map_err(|e| CodecError::InvalidKey(e.to_string()))?;
        Ok(Self { mac })
    }

    /// Hex-encoded HMAC of `ids`.
    pub fn keyed_hash(&self, ids: &str) -> String {
        let mut mac = self.mac.clone();
        mac.update(ids.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    /// Constant-time comparison of a presented hex hash against `ids`.
    pub fn verify(&self, ids: &str, presented: &str) -> bool {
        let Ok(presented) = hex::decode(presented.trim()) else {
            return false;
        };
        let mut mac = self.mac.clone();
        mac.update(ids.as_bytes());
        mac.verify_slice(&presented).is_ok()
    }
}

impl fmt::Debug for HashKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("HashKey(****)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_is_deterministic() {
        let key = HashKey::new(b"salt").unwrap();
        assert_eq!(key.keyed_hash("1|42|7|3"), key.keyed_hash("1|42|7|3"));
        assert_eq!(key.keyed_hash("1|42|7|3").len(), 64);
    }

    #[test]
    fn test_verify_accepts_own_hash() {
        let key = HashKey::new(b"salt").unwrap();
        let hash = key.keyed_hash("1|42|7|3");
        assert!(key.verify("1|42|7|3", &hash));
    }

    #[test]
    fn test_verify_rejects_other_ids_and_keys() {
        let key = HashKey::new(b"salt").unwrap();
        let other = HashKey::new(b"pepper").unwrap();
        let hash = key.keyed_hash("1|42|7|3");

        assert!(!key.verify("1|43|7|3", &hash));
        assert!(!other.verify("1|42|7|3", &hash));
        assert!(!key.verify("1|42|7|3", "not-hex"));
        assert!(!key.verify("1|42|7|3", ""));
    }

    #[test]
    fn test_empty_key_rejected() {
        assert!(HashKey::new(b"").is_err());
    }
}
