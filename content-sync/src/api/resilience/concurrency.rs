//! Concurrency limiter implementation
//!
//! Provides a semaphore-based limiter bounding the number of in-flight
//! requests against one instance, shared by the loader fan-out, the
//! fingerprint pool and the HTTP adapter.

use super::config::ConcurrencyConfig;
use anyhow::{Context, Result};
use log::debug;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Tokio's semaphore tops out well below `usize::MAX`
const UNLIMITED_PERMITS: usize = 1_000_000;

/// Semaphore-based concurrency limiter
#[derive(Debug, Clone)]
pub struct ConcurrencyLimiter {
    semaphore: Arc<Semaphore>,
    config: ConcurrencyConfig,
    requests_acquired: Arc<AtomicU64>,
    requests_waited: Arc<AtomicU64>,
}

impl ConcurrencyLimiter {
    pub fn new(config: ConcurrencyConfig) -> Self {
        let permits = if config.enabled {
            config.max_concurrent_requests.clamp(1, UNLIMITED_PERMITS)
        } else {
            UNLIMITED_PERMITS
        };

        Self {
            semaphore: Arc::new(Semaphore::new(permits)),
            config,
            requests_acquired: Arc::new(AtomicU64::new(0)),
            requests_waited: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Limiter with a fixed number of permits
    pub fn with_permits(permits: usize) -> Self {
        Self::new(ConcurrencyConfig::limited(permits))
    }

    /// Acquire a permit, waiting if at capacity.
    /// The permit is released when dropped.
    pub async fn acquire(&self) -> Result<OwnedSemaphorePermit> {
        if self.config.enabled && self.semaphore.available_permits() == 0 {
            self.requests_waited.fetch_add(1, Ordering::Relaxed);
            debug!(
                "Concurrency limiter: waiting for permit ({} in use)",
                self.config.max_concurrent_requests
            );
        }

        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .context("Concurrency limiter closed")?;
        self.requests_acquired.fetch_add(1, Ordering::Relaxed);
        Ok(permit)
    }

    /// Try to acquire a permit without waiting
    pub fn try_acquire(&self) -> Option<OwnedSemaphorePermit> {
        let permit = self.semaphore.clone().try_acquire_owned().ok()?;
        self.requests_acquired.fetch_add(1, Ordering::Relaxed);
        Some(permit)
    }

    pub fn available_permits(&self) -> usize {
        if !self.config.enabled {
            return usize::MAX;
        }
        self.semaphore.available_permits()
    }

    pub fn stats(&self) -> ConcurrencyStats {
        ConcurrencyStats {
            available_permits: self.available_permits(),
            max_concurrent_requests: self.config.max_concurrent_requests,
            requests_acquired: self.requests_acquired.load(Ordering::Relaxed),
            requests_waited: self.requests_waited.load(Ordering::Relaxed),
            enabled: self.config.enabled,
        }
    }
}

/// Statistics for the concurrency limiter
#[derive(Debug, Clone)]
pub struct ConcurrencyStats {
    pub available_permits: usize,
    pub max_concurrent_requests: usize,
    /// Total permits acquired since creation
    pub requests_acquired: u64,
    /// Number of times a request had to wait for a permit
    pub requests_waited: u64,
    pub enabled: bool,
}

impl ConcurrencyStats {
    /// Share of requests that had to wait
    pub fn wait_rate(&self) -> f64 {
        if self.requests_acquired == 0 {
            0.0
        } else {
            self.requests_waited as f64 / self.requests_acquired as f64
        }
    }
}
