//! Per-client admission control.
//!
//! A sliding-window rate limiter keyed by client network address, held in
//! shared in-process memory. One limiter guards one endpoint; endpoints with
//! different ceilings get their own instances (pledge submission is stricter
//! than the quotation preview).
//!
//! This is abuse hygiene, not a correctness guarantee: state lives in the
//! process, is lost on restart, and is not shared across horizontally scaled
//! instances. The duplicate-email uniqueness rule at the storage layer is
//! what actually protects pool state. A deployment needing shared limits can
//! put an implementation of the same `admit` contract in front of an
//! external store without touching callers.
//!
//! Memory is bounded two ways: idle clients are pruned every
//! [`PRUNE_INTERVAL`] admissions, and a hard cap on tracked clients rejects
//! new addresses once the map is full even after pruning.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use thiserror::Error;

/// How often the whole map is pruned of idle clients, in admission calls.
pub const PRUNE_INTERVAL: u64 = 256;

/// Default ceiling per window.
pub const DEFAULT_MAX_REQUESTS: u32 = 60;

/// Default window width.
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(60);

/// Default hard cap on tracked client addresses.
pub const DEFAULT_MAX_TRACKED_CLIENTS: usize = 10_000;

/// Rejection: the client exceeded its ceiling for the window, or the
/// limiter is tracking as many clients as it is willing to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("rate limit exceeded")]
pub struct RateLimitExceeded;

/// Rate limiter configuration.
#[derive(Debug, Clone)]
pub struct RateLimiterConfig {
    /// Requests admitted per client per window.
    pub max_requests: u32,
    /// Sliding window width.
    pub window: Duration,
    /// Hard cap on distinct tracked client addresses.
    pub max_tracked_clients: usize,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            max_requests: DEFAULT_MAX_REQUESTS,
            window: DEFAULT_WINDOW,
            max_tracked_clients: DEFAULT_MAX_TRACKED_CLIENTS,
        }
    }
}

impl RateLimiterConfig {
    /// Convenience constructor for a per-minute ceiling.
    #[must_use]
    pub fn per_minute(max_requests: u32) -> Self {
        Self {
            max_requests,
            ..Self::default()
        }
    }
}

/// Sliding-window limiter over per-client admission timestamps.
///
/// Construct once at process start and share. The per-key counter update is
/// atomic under the single internal mutex, so concurrent submissions from
/// one client cannot undercount.
pub struct RateLimiter {
    config: RateLimiterConfig,
    clients: Mutex<HashMap<IpAddr, Vec<Instant>>>,
    admissions: AtomicU64,
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("config", &self.config)
            .field("tracked_clients", &self.tracked_clients())
            .finish()
    }
}

impl RateLimiter {
    /// Creates a limiter with the given configuration.
    #[must_use]
    pub fn new(config: RateLimiterConfig) -> Self {
        Self {
            config,
            clients: Mutex::new(HashMap::new()),
            admissions: AtomicU64::new(0),
        }
    }

    /// Admits or rejects one request from `client`.
    ///
    /// Stale timestamps are discarded first; the request is admitted iff the
    /// remaining count is below the ceiling, and admission records a fresh
    /// timestamp.
    ///
    /// # Errors
    ///
    /// Returns [`RateLimitExceeded`] when the client is over its ceiling or
    /// when the tracked-client cap is reached for a new address.
    pub fn admit(&self, client: IpAddr) -> Result<(), RateLimitExceeded> {
        let now = Instant::now();
        let cutoff = now.checked_sub(self.config.window).unwrap_or(now);

        let count = self.admissions.fetch_add(1, Ordering::Relaxed);
        let prune_all = count > 0 && count % PRUNE_INTERVAL == 0;

        let mut clients = self
            .clients
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        if prune_all {
            clients.retain(|_, stamps| {
                stamps.retain(|&t| t > cutoff);
                !stamps.is_empty()
            });
        }

        if !clients.contains_key(&client) && clients.len() >= self.config.max_tracked_clients {
            // Full map and a new address: prune, then give up if still full.
            clients.retain(|_, stamps| {
                stamps.retain(|&t| t > cutoff);
                !stamps.is_empty()
            });
            if clients.len() >= self.config.max_tracked_clients {
                tracing::warn!(
                    client = %client,
                    tracked = clients.len(),
                    "rejecting new client: tracked-client cap reached"
                );
                return Err(RateLimitExceeded);
            }
        }

        let stamps = clients.entry(client).or_default();
        stamps.retain(|&t| t > cutoff);
        if stamps.len() >= self.config.max_requests as usize {
            tracing::warn!(
                client = %client,
                requests = stamps.len(),
                ceiling = self.config.max_requests,
                "rate limit exceeded"
            );
            return Err(RateLimitExceeded);
        }
        stamps.push(now);
        Ok(())
    }

    /// Number of client addresses currently tracked.
    #[must_use]
    pub fn tracked_clients(&self) -> usize {
        self.clients
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}
