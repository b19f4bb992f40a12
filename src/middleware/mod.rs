//! HTTP middleware
//!
//! Provides request id generation and request/response logging

pub mod logging;
