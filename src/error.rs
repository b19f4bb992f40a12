//! Return-flow error taxonomy
//!
//! Layer errors (`CodecError`, `GatewayError`, `StoreError`, `PollError`)
//! roll up into [`ReturnFlowError`], which knows its HTTP status and the
//! message that is safe to show a customer.

use crate::codec::CodecError;
use crate::domain::{OrderState, StoreError};
use crate::gateway::GatewayError;
use crate::services::verification_poller::PollError;

#[derive(Debug, thiserror::Error)]
pub enum ReturnFlowError {
    #[error("return parameters could not be decoded: {0}")]
    Decode(#[source] CodecError),

    #[error("return parameters could not be encoded: {0}")]
    Encode(#[source] CodecError),

    #[error("callback carries no integrity proof")]
    MissingProof,

    #[error("integrity proof does not match order identifiers")]
    HashMismatch,

    #[error("payment session could not be created: {0}")]
    SessionCreation(String),

    #[error("verify response could not be parsed: {0}")]
    VerifyParse(String),

    #[error("verification timed out after {attempts} attempts")]
    VerificationTimeout { attempts: u32 },

    #[error("order {0} not found")]
    OrderNotFound(String),

    #[error("feed {feed_id} for form {form_id} not found")]
    FeedNotFound { feed_id: String, form_id: String },

    #[error("order already settled as {0}")]
    AlreadySettled(OrderState),

    #[error("request cancelled")]
    Cancelled,

    #[error("order store error: {0}")]
    Store(String),

    #[error("gateway error: {0}")]
    Gateway(#[source] GatewayError),
}

impl From<StoreError> for ReturnFlowError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::OrderNotFound(id) => ReturnFlowError::OrderNotFound(id),
            StoreError::Backend(msg) => ReturnFlowError::Store(msg),
        }
    }
}

impl From<PollError> for ReturnFlowError {
    fn from(err: PollError) -> Self {
        match err {
            PollError::Timeout { attempts, .. } => ReturnFlowError::VerificationTimeout { attempts },
            PollError::Cancelled { .. } => ReturnFlowError::Cancelled,
            PollError::Gateway(GatewayError::Parse(msg)) => ReturnFlowError::VerifyParse(msg),
            PollError::Gateway(e) => ReturnFlowError::Gateway(e),
        }
    }
}

impl ReturnFlowError {
    pub fn status_code(&self) -> u16 {
        match self {
            ReturnFlowError::Decode(_) | ReturnFlowError::MissingProof => 400,
            ReturnFlowError::HashMismatch => 403,
            ReturnFlowError::OrderNotFound(_) | ReturnFlowError::FeedNotFound { .. } => 404,
            ReturnFlowError::SessionCreation(_)
            | ReturnFlowError::VerifyParse(_)
            | ReturnFlowError::Gateway(_) => 502,
            ReturnFlowError::AlreadySettled(_) => 409,
            ReturnFlowError::Cancelled => 503,
            ReturnFlowError::VerificationTimeout { .. } => 504,
            ReturnFlowError::Encode(_) | ReturnFlowError::Store(_) => 500,
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            ReturnFlowError::Decode(_) => "INVALID_RETURN_PARAMETERS",
            ReturnFlowError::Encode(_) => "ENCODING_FAILED",
            ReturnFlowError::MissingProof => "MISSING_PROOF",
            ReturnFlowError::HashMismatch => "HASH_MISMATCH",
            ReturnFlowError::SessionCreation(_) => "SESSION_CREATION_FAILED",
            ReturnFlowError::VerifyParse(_) => "VERIFY_PARSE_FAILED",
            ReturnFlowError::VerificationTimeout { .. } => "VERIFICATION_TIMEOUT",
            ReturnFlowError::OrderNotFound(_) => "ORDER_NOT_FOUND",
            ReturnFlowError::FeedNotFound { .. } => "FEED_NOT_FOUND",
            ReturnFlowError::AlreadySettled(_) => "ORDER_ALREADY_SETTLED",
            ReturnFlowError::Cancelled => "CANCELLED",
            ReturnFlowError::Store(_) => "STORE_ERROR",
            ReturnFlowError::Gateway(_) => "GATEWAY_ERROR",
        }
    }

    /// Customer-facing message. Session creation failures carry the
    /// gateway's own explanation; everything else stays generic.
    pub fn user_message(&self) -> String {
        match self {
            ReturnFlowError::SessionCreation(msg) => msg.clone(),
            ReturnFlowError::Decode(_)
            | ReturnFlowError::MissingProof
            | ReturnFlowError::HashMismatch => "Invalid payment return request.".to_string(),
            ReturnFlowError::OrderNotFound(_) | ReturnFlowError::FeedNotFound { .. } => {
                "The order for this payment could not be found.".to_string()
            }
            ReturnFlowError::VerifyParse(_)
            | ReturnFlowError::VerificationTimeout { .. }
            | ReturnFlowError::Gateway(_) => {
                "We could not confirm your payment with the gateway. Please try again later."
                    .to_string()
            }
            ReturnFlowError::AlreadySettled(_) => {
                "This order has already been paid or closed.".to_string()
            }
            ReturnFlowError::Cancelled => "The request was cancelled.".to_string(),
            ReturnFlowError::Encode(_) | ReturnFlowError::Store(_) => {
                "An internal error occurred.".to_string()
            }
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ReturnFlowError::VerificationTimeout { .. }
                | ReturnFlowError::Gateway(_)
                | ReturnFlowError::Cancelled
                | ReturnFlowError::Store(_)
        )
    }
}
