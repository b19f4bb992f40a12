//! Orders, feeds and the ports through which the hosting system stores them.

pub mod feed;
pub mod order;
pub mod ports;

pub use feed::{Confirmation, FeedConfig};
pub use order::{
    CustomerDetails, Note, NotificationEvent, Order, OrderReference, OrderState, OrderTransition,
    PaymentFields, TransactionRecord, TransitionResult,
};
pub use ports::{FeedRepository, OrderStore, StoreError};
