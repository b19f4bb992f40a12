//! Orders as the hosting order store exposes them.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Display format for payment dates on the order record.
pub const PAYMENT_DATE_FORMAT: &str = "%y-%m-%d %H:%M:%S";
pub const PAYMENT_METHOD: &str = "DPO Pay";
pub const NOTE_AUTHOR_NOTIFY: &str = "DPO Pay Notify Response";
pub const NOTE_AUTHOR_REDIRECT: &str = "DPO Pay Redirect Response";

/// Identity of one payable entry. Never changes after submission.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OrderReference {
    pub order_id: String,
    pub form_id: String,
    #[serde(default)]
    pub owner_id: String,
    pub feed_id: String,
}

impl OrderReference {
    /// `formId|orderId|ownerId|feedId`, the string covered by the return hash.
    pub fn ids_string(&self) -> String {
        format!(
            "{}|{}|{}|{}",
            self.form_id, self.order_id, self.owner_id, self.feed_id
        )
    }

    /// Inverse of [`OrderReference::ids_string`]. The owner may be empty
    /// (anonymous submission); every other field must be present.
    pub fn parse_ids(ids: &str) -> Option<Self> {
        let mut fields = ids.split('|');
        let form_id = fields.next()?;
        let order_id = fields.next()?;
        let owner_id = fields.next()?;
        let feed_id = fields.next()?;

        if fields.next().is_some()
            || form_id.is_empty()
            || order_id.is_empty()
            || feed_id.is_empty()
        {
            return None;
        }

        Some(Self {
            order_id: order_id.to_string(),
            form_id: form_id.to_string(),
            owner_id: owner_id.to_string(),
            feed_id: feed_id.to_string(),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OrderState {
    #[default]
    Pending,
    Approved,
    Declined,
    Cancelled,
    Failed,
}

impl OrderState {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderState::Pending => "Pending",
            OrderState::Approved => "Approved",
            OrderState::Declined => "Declined",
            OrderState::Cancelled => "Cancelled",
            OrderState::Failed => "Failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, OrderState::Pending)
    }

    /// Only `Pending` may move, and only to a terminal state.
    pub fn can_transition_to(&self, next: OrderState) -> bool {
        matches!(self, OrderState::Pending) && next.is_terminal()
    }
}

impl fmt::Display for OrderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Billing details captured by the form.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CustomerDetails {
    pub first_name: String,
    pub last_name: String,
    pub address: String,
    pub city: String,
    pub country: String,
    pub phone: String,
    pub email: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Note {
    pub author: String,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

impl Note {
    pub fn new(author: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            author: author.into(),
            message: message.into(),
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub reference: OrderReference,
    #[serde(default)]
    pub state: OrderState,
    pub currency: String,
    pub total: Decimal,
    #[serde(default)]
    pub customer: CustomerDetails,
    #[serde(default)]
    pub transaction_id: Option<String>,
    #[serde(default)]
    pub transaction_type: Option<u8>,
    /// Comma-decimal amount as recorded on approval, e.g. `10,00`.
    #[serde(default)]
    pub payment_amount: Option<String>,
    #[serde(default)]
    pub payment_method: Option<String>,
    #[serde(default)]
    pub payment_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub is_fulfilled: bool,
    #[serde(default)]
    pub session_token: Option<String>,
    #[serde(default)]
    pub company_ref: Option<String>,
    #[serde(default)]
    pub notes: Vec<Note>,
}

impl Order {
    pub fn new(reference: OrderReference, currency: impl Into<String>, total: Decimal) -> Self {
        Self {
            reference,
            state: OrderState::Pending,
            currency: currency.into(),
            total,
            customer: CustomerDetails::default(),
            transaction_id: None,
            transaction_type: None,
            payment_amount: None,
            payment_method: None,
            payment_date: None,
            is_fulfilled: false,
            session_token: None,
            company_ref: None,
            notes: Vec::new(),
        }
    }

    pub fn with_customer(mut self, customer: CustomerDetails) -> Self {
        self.customer = customer;
        self
    }

    pub fn id(&self) -> &str {
        &self.reference.order_id
    }

    pub fn payment_date_display(&self) -> Option<String> {
        self.payment_date
            .map(|d| d.format(PAYMENT_DATE_FORMAT).to_string())
    }
}

/// Fields written on approval.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentFields {
    pub transaction_id: String,
    pub transaction_type: u8,
    pub payment_amount: String,
    pub payment_method: String,
    pub payment_date: DateTime<Utc>,
    pub is_fulfilled: bool,
}

/// One complete state change, applied by the store in a single write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderTransition {
    pub target: OrderState,
    pub payment: Option<PaymentFields>,
    pub note: Note,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionResult {
    Applied(Order),
    /// The order had already left `Pending`; nothing was written.
    AlreadyTerminal(OrderState),
}

/// Ledger row written alongside an approval.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub order_id: String,
    pub kind: String,
    pub reference: String,
    pub amount: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NotificationEvent {
    CompletePayment,
}

impl NotificationEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationEvent::CompletePayment => "complete_payment",
        }
    }
}

/// Format an amount with two decimals and a comma separator, no grouping:
/// `10.00` → `10,00`, `1234.5` → `1234,50`.
pub fn format_comma_amount(amount: Decimal) -> String {
    format!("{:.2}", amount.round_dp(2)).replace('.', ",")
}

/// Gateway-facing amount: two decimals, dot separator, no grouping.
pub fn format_dot_amount(amount: Decimal) -> String {
    format!("{:.2}", amount.round_dp(2))
}
