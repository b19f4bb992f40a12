//! Signed parameter codec
//!
//! Protects the order-identifying parameters that travel through the hosted
//! payment page and back. Two independent protections are applied:
//!
//! - the parameters are encrypted into opaque URL-safe tokens ([`ParamCipher`])
//! - the order identifiers are bound by a keyed hash ([`HashKey`]) that is
//!   recomputed when the customer returns
//!
//! Anything that fails either check is rejected; nothing is partially trusted.

pub mod cipher;
pub mod hash;
pub mod params;

pub use cipher::{EncryptionKey, ParamCipher};
pub use hash::HashKey;
pub use params::{ParamCodec, ReturnParams, RETURN_MARKER};

/// Errors produced while sealing or opening return parameters
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    #[error("invalid codec key: {0}")]
    InvalidKey(String),

    #[error("encryption failed: {0}")]
    Encryption(String),

    #[error("malformed or tampered envelope: {0}")]
    Decode(String),

    #[error("parameter cannot be encoded: {0}")]
    InvalidParam(String),
}
