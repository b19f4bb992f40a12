use crate::domain::{
    FeedConfig, FeedRepository, Note, NotificationEvent, Order, OrderState, OrderStore,
    OrderTransition, StoreError, TransactionRecord, TransitionResult,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// A notification the store was asked to dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentNotification {
    pub order_id: String,
    pub event: NotificationEvent,
}

/// Most recent ledger rows and notifications kept for inspection.
pub const DEFAULT_LOG_CAPACITY: usize = 1024;

/// A thread-safe in-memory order store.
///
/// The conditional `Pending`-only write runs under a single write guard, so
/// concurrent callbacks for the same order cannot both apply. Ledger rows and
/// notifications are kept in bounded logs; the oldest entry is dropped once
/// `log_capacity` is reached.
#[derive(Clone)]
pub struct InMemoryOrderStore {
    orders: Arc<RwLock<HashMap<String, Order>>>,
    transactions: Arc<RwLock<VecDeque<TransactionRecord>>>,
    notifications: Arc<RwLock<VecDeque<SentNotification>>>,
    log_capacity: usize,
}

impl Default for InMemoryOrderStore {
    fn default() -> Self {
        Self::with_log_capacity(DEFAULT_LOG_CAPACITY)
    }
}

fn push_bounded<T>(log: &mut VecDeque<T>, capacity: usize, entry: T) {
    if log.len() >= capacity {
        log.pop_front();
    }
    log.push_back(entry);
}

impl InMemoryOrderStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_log_capacity(log_capacity: usize) -> Self {
        Self {
            orders: Arc::default(),
            transactions: Arc::default(),
            notifications: Arc::default(),
            log_capacity: log_capacity.max(1),
        }
    }

    pub async fn insert_order(&self, order: Order) {
        let mut orders = self.orders.write().await;
        orders.insert(order.id().to_string(), order);
    }

    pub async fn transactions(&self) -> Vec<TransactionRecord> {
        self.transactions.read().await.iter().cloned().collect()
    }

    pub async fn notifications(&self) -> Vec<SentNotification> {
        self.notifications.read().await.iter().cloned().collect()
    }
}

#[async_trait]
impl OrderStore for InMemoryOrderStore {
    async fn get_order(&self, order_id: &str) -> Result<Option<Order>, StoreError> {
        let orders = self.orders.read().await;
        Ok(orders.get(order_id).cloned())
    }

    async fn record_session(
        &self,
        order_id: &str,
        session_token: &str,
        company_ref: &str,
    ) -> Result<(), StoreError> {
        let mut orders = self.orders.write().await;
        let order = orders
            .get_mut(order_id)
            .ok_or_else(|| StoreError::OrderNotFound(order_id.to_string()))?;
        order.session_token = Some(session_token.to_string());
        order.company_ref = Some(company_ref.to_string());
        Ok(())
    }

    async fn apply_transition(
        &self,
        order_id: &str,
        transition: OrderTransition,
    ) -> Result<TransitionResult, StoreError> {
        let mut orders = self.orders.write().await;
        let order = orders
            .get_mut(order_id)
            .ok_or_else(|| StoreError::OrderNotFound(order_id.to_string()))?;

        if !order.state.can_transition_to(transition.target) {
            debug!(order_id, current = %order.state, target = %transition.target, "Transition refused");
            return Ok(TransitionResult::AlreadyTerminal(order.state));
        }

        order.state = transition.target;
        if let Some(payment) = transition.payment {
            order.transaction_id = Some(payment.transaction_id);
            order.transaction_type = Some(payment.transaction_type);
            order.payment_amount = Some(payment.payment_amount);
            order.payment_method = Some(payment.payment_method);
            order.payment_date = Some(payment.payment_date);
            order.is_fulfilled = payment.is_fulfilled;
        }
        order.notes.push(transition.note);

        Ok(TransitionResult::Applied(order.clone()))
    }

    async fn append_note(&self, order_id: &str, note: Note) -> Result<(), StoreError> {
        let mut orders = self.orders.write().await;
        let order = orders
            .get_mut(order_id)
            .ok_or_else(|| StoreError::OrderNotFound(order_id.to_string()))?;
        order.notes.push(note);
        Ok(())
    }

    async fn record_transaction(&self, record: TransactionRecord) -> Result<(), StoreError> {
        let mut transactions = self.transactions.write().await;
        push_bounded(&mut transactions, self.log_capacity, record);
        Ok(())
    }

    async fn send_notification(
        &self,
        order: &Order,
        event: NotificationEvent,
    ) -> Result<(), StoreError> {
        info!(order_id = %order.id(), event = event.as_str(), "Notification dispatched");
        let mut notifications = self.notifications.write().await;
        push_bounded(
            &mut notifications,
            self.log_capacity,
            SentNotification {
                order_id: order.id().to_string(),
                event,
            },
        );
        Ok(())
    }
}

/// Feeds keyed by `(feed_id, form_id)`.
#[derive(Default, Clone)]
pub struct InMemoryFeedRepository {
    feeds: Arc<RwLock<HashMap<(String, String), FeedConfig>>>,
}

impl InMemoryFeedRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_feed(&self, feed: FeedConfig) {
        let mut feeds = self.feeds.write().await;
        feeds.insert((feed.feed_id.clone(), feed.form_id.clone()), feed);
    }
}

#[async_trait]
impl FeedRepository for InMemoryFeedRepository {
    async fn get_feed(&self, feed_id: &str, form_id: &str) -> Result<Option<FeedConfig>, StoreError> {
        let feeds = self.feeds.read().await;
        Ok(feeds
            .get(&(feed_id.to_string(), form_id.to_string()))
            .cloned())
    }
}

/// Feeds and orders loaded into the in-memory stores at startup.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SeedData {
    #[serde(default)]
    pub feeds: Vec<FeedConfig>,
    #[serde(default)]
    pub orders: Vec<Order>,
}

impl SeedData {
    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        let raw = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| StoreError::Backend(format!("cannot read {}: {}", path.display(), e)))?;
        serde_json::from_str(&raw)
            .map_err(|e| StoreError::Backend(format!("invalid seed file {}: {}", path.display(), e)))
    }

    /// Load everything into the stores. Seeded orders always start `Pending`.
    pub async fn apply(self, orders: &InMemoryOrderStore, feeds: &InMemoryFeedRepository) {
        let (feed_count, order_count) = (self.feeds.len(), self.orders.len());
        for feed in self.feeds {
            feeds.insert_feed(feed).await;
        }
        for mut order in self.orders {
            order.state = OrderState::Pending;
            orders.insert_order(order).await;
        }
        info!(feeds = feed_count, orders = order_count, "Seed data loaded");
    }
}
