//! Order state machine
//!
//! Turns a mapped gateway outcome into exactly one order mutation. The state
//! change, payment fields and audit note go to the store as a single
//! conditional write (`Pending` only), so a redelivered callback finds the
//! order terminal and produces no further side effects.

use crate::domain::order::{
    format_comma_amount, NOTE_AUTHOR_NOTIFY, NOTE_AUTHOR_REDIRECT, PAYMENT_METHOD,
};
use crate::domain::{
    Note, NotificationEvent, Order, OrderState, OrderStore, OrderTransition, PaymentFields,
    StoreError, TransactionRecord, TransitionResult,
};
use crate::gateway::{FailureCause, Outcome};
use crate::log_payment_event;
use chrono::Utc;
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};

/// Transaction type recorded for a completed card payment.
const TRANSACTION_TYPE_PAYMENT: u8 = 1;

/// Facts about the gateway transaction that the mutation records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettlementFacts {
    /// Gateway transaction token, recorded as the transaction id.
    pub transaction_id: String,
    pub company_ref: Option<String>,
    pub approval_code: Option<String>,
    /// Amount the gateway reports as paid.
    pub amount: Option<Decimal>,
}

#[derive(Clone)]
pub struct OrderStateMachine {
    store: Arc<dyn OrderStore>,
}

impl OrderStateMachine {
    pub fn new(store: Arc<dyn OrderStore>) -> Self {
        Self { store }
    }

    /// Build the single write that moves a `Pending` order to the state
    /// `outcome` calls for.
    pub fn transition_for(order: &Order, outcome: &Outcome, facts: &SettlementFacts) -> OrderTransition {
        let token = &facts.transaction_id;
        match outcome {
            Outcome::Approved => {
                let amount = facts.amount.unwrap_or(order.total);
                OrderTransition {
                    target: OrderState::Approved,
                    payment: Some(PaymentFields {
                        transaction_id: token.clone(),
                        transaction_type: TRANSACTION_TYPE_PAYMENT,
                        payment_amount: format_comma_amount(amount),
                        payment_method: PAYMENT_METHOD.to_string(),
                        payment_date: Utc::now(),
                        is_fulfilled: true,
                    }),
                    note: Note::new(
                        NOTE_AUTHOR_NOTIFY,
                        format!(
                            "Transaction approved, DPO Pay TransId: {} ApprovalCode: {}",
                            token,
                            facts.approval_code.as_deref().unwrap_or("")
                        ),
                    ),
                }
            }
            Outcome::Cancelled => OrderTransition {
                target: OrderState::Cancelled,
                payment: None,
                note: Note::new(
                    NOTE_AUTHOR_REDIRECT,
                    format!("Transaction Cancelled, Pay Request ID: {}", token),
                ),
            },
            Outcome::Failed(FailureCause::Declined { code }) => OrderTransition {
                target: OrderState::Declined,
                payment: None,
                note: Note::new(
                    NOTE_AUTHOR_NOTIFY,
                    format!("Transaction declined, DPO Pay TransId: {} ResultCode: {}", token, code),
                ),
            },
            Outcome::Failed(cause) => OrderTransition {
                target: OrderState::Failed,
                payment: None,
                note: Note::new(
                    NOTE_AUTHOR_NOTIFY,
                    format!(
                        "Transaction verification failed ({}), DPO Pay TransId: {}",
                        describe_infrastructure_failure(cause),
                        token
                    ),
                ),
            },
        }
    }

    /// Apply the outcome. Approval side effects (ledger row, notification)
    /// run only when this call performed the transition.
    #[instrument(skip(self, order, facts), fields(order_id = %order.id(), outcome = outcome.keyword()))]
    pub async fn settle(
        &self,
        order: &Order,
        outcome: &Outcome,
        facts: &SettlementFacts,
    ) -> Result<TransitionResult, StoreError> {
        let transition = Self::transition_for(order, outcome, facts);
        let target = transition.target;
        let result = self.store.apply_transition(order.id(), transition).await?;

        let updated = match &result {
            TransitionResult::AlreadyTerminal(state) => {
                info!(current_state = %state, "Order already settled, skipping");
                return Ok(result);
            }
            TransitionResult::Applied(updated) => updated,
        };

        match outcome {
            Outcome::Approved => {
                log_payment_event!(
                    event = "payment_approved",
                    order_id = updated.id(),
                    transaction_id = facts.transaction_id,
                    amount = updated.payment_amount,
                    payment_date = updated.payment_date_display(),
                );
                self.complete_payment(updated, facts).await;
            }
            Outcome::Cancelled => {
                log_payment_event!(
                    event = "payment_cancelled",
                    order_id = updated.id(),
                    transaction_id = facts.transaction_id,
                );
            }
            Outcome::Failed(cause @ FailureCause::Declined { .. }) => {
                warn!(
                    failure_kind = cause.kind(),
                    target_state = %target,
                    transaction_id = %facts.transaction_id,
                    "Payment declined"
                );
            }
            Outcome::Failed(cause) => {
                error!(
                    failure_kind = cause.kind(),
                    target_state = %target,
                    transaction_id = %facts.transaction_id,
                    cause = describe_infrastructure_failure(cause),
                    "Payment verification failed"
                );
            }
        }

        Ok(result)
    }

    /// Ledger row and `complete_payment` notification. The order is already
    /// approved at this point, so failures are logged and not propagated.
    async fn complete_payment(&self, order: &Order, facts: &SettlementFacts) {
        let record = TransactionRecord {
            order_id: order.id().to_string(),
            kind: NotificationEvent::CompletePayment.as_str().to_string(),
            reference: facts
                .company_ref
                .clone()
                .or_else(|| order.company_ref.clone())
                .unwrap_or_default(),
            amount: order.payment_amount.clone().unwrap_or_default(),
        };
        if let Err(e) = self.store.record_transaction(record).await {
            error!(order_id = %order.id(), error = %e, "Failed to record transaction");
        }

        if let Err(e) = self
            .store
            .send_notification(order, NotificationEvent::CompletePayment)
            .await
        {
            error!(order_id = %order.id(), error = %e, "Failed to send complete_payment notification");
        }
    }
}

fn describe_infrastructure_failure(cause: &FailureCause) -> &'static str {
    match cause {
        FailureCause::VerificationTimeout => "verification timed out",
        FailureCause::MalformedResponse => "malformed gateway response",
        FailureCause::Declined { .. } => "declined",
    }
}
