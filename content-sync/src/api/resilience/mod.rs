//! Resilience features for instance clients
//!
//! Provides retry policies and concurrency limiting for requests against the
//! content backends.

pub mod concurrency;
pub mod config;
pub mod retry;

pub use concurrency::{ConcurrencyLimiter, ConcurrencyStats};
pub use config::{ConcurrencyConfig, ResilienceConfig};
pub use retry::{RetryConfig, RetryPolicy, RetryableError};
