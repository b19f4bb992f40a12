//! HTTP API for the payment return flow

pub mod return_flow;

pub use return_flow::{router, AppState};
