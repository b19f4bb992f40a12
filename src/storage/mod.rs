//! Store implementations backing the order and feed ports.

pub mod in_memory;

pub use in_memory::{InMemoryFeedRepository, InMemoryOrderStore, SeedData};
