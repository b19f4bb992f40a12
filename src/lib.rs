//! DPO Pay hosted-payment return flow
//!
//! Sends customers to the gateway's hosted payment page with tamper-evident
//! return parameters, verifies the round trip when they come back, and
//! settles the order exactly once.

pub mod codec;
pub mod config;
pub mod domain;
pub mod error;
pub mod gateway;
pub mod logging;
pub mod services;
pub mod storage;

#[cfg(feature = "server")]
pub mod api;
#[cfg(feature = "server")]
pub mod middleware;

pub use error::ReturnFlowError;
