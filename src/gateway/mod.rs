//! Gateway session client
//!
//! Talks the API3G XML protocol: `createToken` opens a payment session and
//! `verifyToken` reports its result. Transport is pluggable so the HTTP layer
//! can be replaced in tests.

pub mod client;
pub mod transport;
pub mod types;
pub mod xml;

pub use client::{GatewayEndpoints, GatewaySessionClient};
pub use transport::{GatewayTransport, HttpTransport};
pub use types::{
    FailureCause, GatewayResult, MerchantCredential, OrderDetails, Outcome, ResultCode,
    SessionCreation, SessionToken,
};

#[derive(Debug, Clone, thiserror::Error)]
pub enum GatewayError {
    #[error("gateway transport error: {0}")]
    Transport(String),

    #[error("gateway returned HTTP {status}")]
    HttpStatus { status: u16 },

    #[error("failed to encode gateway request: {0}")]
    Encode(String),

    #[error("malformed gateway response: {0}")]
    Parse(String),
}

impl GatewayError {
    /// Failures worth another attempt inside a bounded poll.
    pub fn is_transient(&self) -> bool {
        match self {
            GatewayError::Transport(_) => true,
            GatewayError::HttpStatus { status } => *status >= 500 || *status == 429,
            GatewayError::Encode(_) | GatewayError::Parse(_) => false,
        }
    }
}
