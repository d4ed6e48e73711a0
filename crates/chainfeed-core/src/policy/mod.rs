//! Reliability policies shared by the handlers.
//!
//! ```text
//! reconnect:   dial → [ExponentialBackoff, 60s ceiling] → replay subscriptions
//! unsubscribe: send → [ExponentialBackoff, 10s ceiling] → unregister
//! ```

pub mod backoff;

pub use backoff::{retry, Attempt, BackoffConfig, ExponentialBackoff, RetryError};
