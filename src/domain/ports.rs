use super::feed::FeedConfig;
use super::order::{
    Note, NotificationEvent, Order, OrderTransition, TransactionRecord, TransitionResult,
};
use async_trait::async_trait;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("order {0} not found")]
    OrderNotFound(String),

    #[error("storage backend error: {0}")]
    Backend(String),
}

/// Order/entry storage owned by the hosting form system.
#[async_trait]
pub trait OrderStore: Send + Sync {
    async fn get_order(&self, order_id: &str) -> Result<Option<Order>, StoreError>;

    /// Remember the session token and company reference of the outbound
    /// payment attempt. Does not change the order state.
    async fn record_session(
        &self,
        order_id: &str,
        session_token: &str,
        company_ref: &str,
    ) -> Result<(), StoreError>;

    /// Apply `transition` only if the order is still `Pending`. State,
    /// payment fields and note are written together or not at all.
    async fn apply_transition(
        &self,
        order_id: &str,
        transition: OrderTransition,
    ) -> Result<TransitionResult, StoreError>;

    /// Add an audit note without changing state.
    async fn append_note(&self, order_id: &str, note: Note) -> Result<(), StoreError>;

    async fn record_transaction(&self, record: TransactionRecord) -> Result<(), StoreError>;

    async fn send_notification(
        &self,
        order: &Order,
        event: NotificationEvent,
    ) -> Result<(), StoreError>;
}

/// Feed (merchant configuration) lookup.
#[async_trait]
pub trait FeedRepository: Send + Sync {
    async fn get_feed(&self, feed_id: &str, form_id: &str) -> Result<Option<FeedConfig>, StoreError>;
}
