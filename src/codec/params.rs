//! Parameter envelopes and return-URL query decoding.

use super::{CodecError, EncryptionKey, HashKey, ParamCipher};
use std::collections::BTreeMap;

/// Query parameter carrying the encrypted `ids` + `hash` envelope.
pub const RETURN_MARKER: &str = "gf_dpo_group_return";
/// Query parameter carrying the separately encrypted order id.
pub const ORDER_ID_PARAM: &str = "eid";
/// Unencrypted test/live flag (`on` / `off`).
pub const MODE_PARAM: &str = "mode";
/// Return mode flag, always `2` for this integration.
pub const RETURN_MODE_PARAM: &str = "rm";
/// Gateway correlation parameter; its presence marks a callback.
pub const TRANSACTION_TOKEN_PARAM: &str = "TransactionToken";
pub const COMPANY_REF_PARAM: &str = "CompanyRef";

/// Key under which a bare (`=`-less) envelope segment is decoded.
pub const BARE_SEGMENT_KEY: &str = "id";

const PAIR_SEPARATOR: char = '&';
const KEY_VALUE_SEPARATOR: char = '=';

/// Encrypts parameter maps and single values, and owns the keyed hash.
#[derive(Clone, Debug)]
pub struct ParamCodec {
    cipher: ParamCipher,
    hash_key: HashKey,
}

impl ParamCodec {
    pub fn new(encryption_key: EncryptionKey, hash_key: HashKey) -> Self {
        Self {
            cipher: ParamCipher::new(encryption_key),
            hash_key,
        }
    }

    /// Build a codec from the hex encryption key and raw hash secret held in
    /// configuration.
    pub fn from_secrets(encryption_key_hex: &str, hash_secret: &str) -> Result<Self, CodecError> {
        Ok(Self::new(
            EncryptionKey::from_hex(encryption_key_hex)?,
            HashKey::new(hash_secret.as_bytes())?,
        ))
    }

    /// Serialize `params` as `k1=v1&k2=v2` (key order) and encrypt the result.
    ///
    /// Keys must be non-empty and free of `=` and `&`; values must be free of
    /// `&`. An empty map is rejected because it would not decode.
    pub fn encode(&self, params: &BTreeMap<String, String>) -> Result<String, CodecError> {
        if params.is_empty() {
            return Err(CodecError::InvalidParam("no parameters to encode".to_string()));
        }

        let mut serialized = String::new();
        for (key, value) in params {
            if key.is_empty()
                || key.contains(KEY_VALUE_SEPARATOR)
                || key.contains(PAIR_SEPARATOR)
            {
                return Err(CodecError::InvalidParam(format!("invalid key {:?}", key)));
            }
            if value.contains(PAIR_SEPARATOR) {
                return Err(CodecError::InvalidParam(format!(
                    "value for {:?} contains '{}'",
                    key, PAIR_SEPARATOR
                )));
            }
            if !serialized.is_empty() {
                serialized.push(PAIR_SEPARATOR);
            }
            serialized.push_str(key);
            serialized.push(KEY_VALUE_SEPARATOR);
            serialized.push_str(value);
        }

        self.cipher.seal(&serialized)
    }

    /// Decrypt an envelope and split it back into key/value pairs.
    pub fn decode(&self, envelope: &str) -> Result<BTreeMap<String, String>, CodecError> {
        let plaintext = self.cipher.open(envelope)?;
        parse_pairs(&plaintext)
    }

    pub fn encrypt_value(&self, value: &str) -> Result<String, CodecError> {
        self.cipher.seal(value)
    }

    pub fn decrypt_value(&self, token: &str) -> Result<String, CodecError> {
        self.cipher.open(token)
    }

    pub fn keyed_hash(&self, ids: &str) -> String {
        self.hash_key.keyed_hash(ids)
    }

    pub fn verify_hash(&self, ids: &str, presented: &str) -> bool {
        self.hash_key.verify(ids, presented)
    }
}

fn parse_pairs(plaintext: &str) -> Result<BTreeMap<String, String>, CodecError> {
    let mut pairs = BTreeMap::new();

    for segment in plaintext.split(PAIR_SEPARATOR) {
        if segment.is_empty() {
            return Err(CodecError::Decode("empty parameter segment".to_string()));
        }

        let (key, value) = match segment.split_once(KEY_VALUE_SEPARATOR) {
            Some((key, _)) if key.is_empty() => {
                return Err(CodecError::Decode("parameter with empty key".to_string()));
            }
            Some((key, value)) => (key, value),
            None => (BARE_SEGMENT_KEY, segment),
        };

        if pairs.insert(key.to_string(), value.to_string()).is_some() {
            return Err(CodecError::Decode(format!("duplicate parameter {:?}", key)));
        }
    }

    Ok(pairs)
}

/// Decoded view of the query string a returning customer arrives with.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReturnParams {
    /// Decrypted contents of the return marker (`ids`, `hash`).
    pub envelope: Option<BTreeMap<String, String>>,
    /// Decrypted `eid`.
    pub order_id: Option<String>,
    /// `eid` exactly as received (the `eidu` echo used in confirmation URLs).
    pub order_id_token: Option<String>,
    /// `mode` passes through unencrypted.
    pub mode: Option<String>,
    /// Everything else, verbatim (gateway-owned parameters).
    pub gateway: BTreeMap<String, String>,
}

impl ReturnParams {
    pub fn from_query<I, K, V>(codec: &ParamCodec, query: I) -> Result<Self, CodecError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut params = ReturnParams::default();

        for (key, value) in query {
            let (key, value) = (key.as_ref(), value.as_ref());
            match key {
                RETURN_MARKER => {
                    if params.envelope.is_some() {
                        return Err(CodecError::Decode(format!("duplicate {}", RETURN_MARKER)));
                    }
                    params.envelope = Some(codec.decode(value)?);
                }
                ORDER_ID_PARAM => {
                    if params.order_id.is_some() {
                        return Err(CodecError::Decode(format!("duplicate {}", ORDER_ID_PARAM)));
                    }
                    params.order_id = Some(codec.decrypt_value(value)?);
                    params.order_id_token = Some(value.to_string());
                }
                MODE_PARAM => params.mode = Some(value.to_string()),
                _ => {
                    params.gateway.insert(key.to_string(), value.to_string());
                }
            }
        }

        Ok(params)
    }

    pub fn gateway_param(&self, name: &str) -> Option<&str> {
        self.gateway
            .get(name)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }

    pub fn transaction_token(&self) -> Option<&str> {
        self.gateway_param(TRANSACTION_TOKEN_PARAM)
    }

    pub fn company_ref(&self) -> Option<&str> {
        self.gateway_param(COMPANY_REF_PARAM)
    }

    pub fn envelope_value(&self, key: &str) -> Option<&str> {
        self.envelope
            .as_ref()
            .and_then(|e| e.get(key))
            .map(String::as_str)
    }

    pub fn is_test_mode(&self) -> bool {
        self.mode.as_deref() == Some("on")
    }
}
