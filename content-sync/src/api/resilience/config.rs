//! Resilience configuration
//!
//! Groups the retry policy and the request concurrency limit used by the HTTP
//! adapter, the loader and the fingerprint pool.

use super::retry::RetryConfig;

/// Resilience settings for one instance client
#[derive(Debug, Clone, Default)]
pub struct ResilienceConfig {
    pub retry: RetryConfig,
    pub concurrency: ConcurrencyConfig,
}

/// Concurrency limiting configuration
#[derive(Debug, Clone)]
pub struct ConcurrencyConfig {
    /// Maximum concurrent HTTP requests to one instance
    pub max_concurrent_requests: usize,
    /// Whether concurrency limiting is enabled
    pub enabled: bool,
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self {
            max_concurrent_requests: 8,
            enabled: true,
        }
    }
}

impl ConcurrencyConfig {
    pub fn limited(max_concurrent_requests: usize) -> Self {
        Self {
            max_concurrent_requests: max_concurrent_requests.max(1),
            enabled: true,
        }
    }
}

impl ResilienceConfig {
    /// Build from the sync settings of the loaded configuration
    pub fn new(max_attempts: u32, max_concurrent_requests: usize) -> Self {
        Self {
            retry: RetryConfig {
                max_attempts: max_attempts.max(1),
                ..RetryConfig::default()
            },
            concurrency: ConcurrencyConfig::limited(max_concurrent_requests),
        }
    }

    /// No retries and no limiting (for tests)
    pub fn disabled() -> Self {
        Self {
            retry: RetryConfig::none(),
            concurrency: ConcurrencyConfig {
                max_concurrent_requests: usize::MAX,
                enabled: false,
            },
        }
    }
}
