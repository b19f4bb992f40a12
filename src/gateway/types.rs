use crate::domain::CustomerDetails;
use crate::logging::mask_token;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::fmt;

/// Merchant company token plus the live/sandbox selector.
#[derive(Clone, PartialEq, Eq)]
pub struct MerchantCredential {
    pub company_token: String,
    pub test_mode: bool,
}

impl MerchantCredential {
    pub fn new(company_token: impl Into<String>, test_mode: bool) -> Self {
        Self {
            company_token: company_token.into(),
            test_mode,
        }
    }
}

impl fmt::Debug for MerchantCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MerchantCredential")
            .field("company_token", &mask_token(&self.company_token))
            .field("test_mode", &self.test_mode)
            .finish()
    }
}

/// Gateway-issued correlation id for one payment attempt.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionToken(String);

impl SessionToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Everything `createToken` needs to know about the order being paid.
#[derive(Debug, Clone)]
pub struct OrderDetails {
    pub amount: Decimal,
    pub currency: String,
    pub company_ref: String,
    pub redirect_url: String,
    pub back_url: String,
    pub service_type: String,
    pub service_description: String,
    pub service_date: DateTime<Utc>,
    pub customer: CustomerDetails,
}

/// Result of a session creation attempt. Failures carry a diagnostic
/// suitable for showing to the customer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionCreation {
    pub success: bool,
    pub session_token: Option<SessionToken>,
    pub error: Option<String>,
}

impl SessionCreation {
    pub fn created(token: SessionToken) -> Self {
        Self {
            success: true,
            session_token: Some(token),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            session_token: None,
            error: Some(error.into()),
        }
    }
}

/// Three-digit gateway result code, compared case-sensitively as a string.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResultCode(String);

impl ResultCode {
    pub const APPROVED: &'static str = "000";
    pub const CANCELLED: &'static str = "901";
    pub const PAGE_READY: &'static str = "900";
    /// Codes meaning "no final answer yet": not paid yet, pending at bank,
    /// queued authorization, pending split payment.
    const PENDING_SETTLEMENT: [&'static str; 4] = ["900", "003", "005", "007"];

    pub fn new(code: impl Into<String>) -> Self {
        Self(code.into().trim().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_page_ready(&self) -> bool {
        self.0 == Self::PAGE_READY
    }

    pub fn is_pending_settlement(&self) -> bool {
        Self::PENDING_SETTLEMENT.contains(&self.0.as_str())
    }
}

impl fmt::Display for ResultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Parsed `verifyToken` response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayResult {
    pub result_code: ResultCode,
    pub result_explanation: Option<String>,
    pub transaction_amount: Option<Decimal>,
    pub transaction_currency: Option<String>,
    pub approval_code: Option<String>,
}

/// Why a payment ended in the failed branch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureCause {
    /// The gateway answered with a non-success code.
    Declined { code: String },
    /// The poll ran out of attempts or time.
    VerificationTimeout,
    /// The verify response could not be parsed.
    MalformedResponse,
}

impl FailureCause {
    /// `declined` for business outcomes, `infrastructure` otherwise.
    pub fn kind(&self) -> &'static str {
        match self {
            FailureCause::Declined { .. } => "declined",
            FailureCause::VerificationTimeout | FailureCause::MalformedResponse => "infrastructure",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Approved,
    Cancelled,
    Failed(FailureCause),
}

impl Outcome {
    /// Callback-time mapping. Only an exact `000` approves.
    pub fn from_result_code(code: &ResultCode) -> Self {
        match code.as_str() {
            ResultCode::APPROVED => Outcome::Approved,
            ResultCode::CANCELLED => Outcome::Cancelled,
            other => Outcome::Failed(FailureCause::Declined {
                code: other.to_string(),
            }),
        }
    }

    /// Keyword used to pick a confirmation by name.
    pub fn keyword(&self) -> &'static str {
        match self {
            Outcome::Approved => "approved",
            Outcome::Cancelled => "cancelled",
            Outcome::Failed(_) => "failed",
        }
    }
}
