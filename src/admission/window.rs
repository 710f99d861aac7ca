//! Per-client, per-provider request windows.
//!
//! Each `(client, provider)` pair owns a counter and the instant its window
//! opened. The window is reset lazily by the first request that arrives after
//! it has elapsed, so this is a fixed window rather than a sliding log: a
//! burst straddling a boundary can see up to twice the nominal rate.

use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::RwLock;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, trace};

use super::error::GateError;
use super::identity::{ClientIdentity, Provider};
use crate::config::{LimitTable, ProviderLimits};

type WindowKey = (ClientIdentity, Provider);

/// Counter state for one `(client, provider)` pair.
///
/// `count` is at least 1 while the entry exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateWindowEntry {
    pub count: u64,
    pub window_start: Instant,
}

impl RateWindowEntry {
    fn fresh(now: Instant) -> Self {
        Self {
            count: 1,
            window_start: now,
        }
    }

    /// Whether the window has rolled over. The boundary instant itself still
    /// belongs to the old window.
    pub fn is_expired(&self, now: Instant, window: Duration) -> bool {
        now.saturating_duration_since(self.window_start) > window
    }

    /// Time left until the window rolls over.
    pub fn remaining(&self, now: Instant, window: Duration) -> Duration {
        window.saturating_sub(now.saturating_duration_since(self.window_start))
    }
}

/// Validated window settings for one provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowLimits {
    pub window: Duration,
    pub max_requests: u64,
}

impl WindowLimits {
    pub fn from_config(provider: &Provider, limits: &ProviderLimits) -> Result<Self, GateError> {
        if limits.window_ms == 0 {
            return Err(GateError::InvalidLimits {
                provider: provider.clone(),
                reason: "window_ms must be greater than zero".to_string(),
            });
        }
        if limits.max_requests == 0 {
            return Err(GateError::InvalidLimits {
                provider: provider.clone(),
                reason: "max_requests must be greater than zero".to_string(),
            });
        }

        Ok(Self {
            window: Duration::from_millis(limits.window_ms),
            max_requests: limits.max_requests,
        })
    }
}

/// Result of a rate window check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateDecision {
    pub allowed: bool,
    /// Requests counted in the current window, including this one
    pub count: u64,
    pub limit: u64,
    /// Time until the current window rolls over
    pub retry_after: Duration,
}

impl RateDecision {
    /// Retry hint in whole seconds, rounded up and never zero.
    pub fn retry_after_secs(&self) -> u64 {
        let secs = self.retry_after.as_secs();
        let secs = if self.retry_after.subsec_nanos() > 0 {
            secs + 1
        } else {
            secs
        };
        secs.max(1)
    }
}

/// The in-memory rate limiter.
///
/// Entries live only in process memory; a restart forgets every window.
pub struct RateLimiter {
    entries: DashMap<WindowKey, RateWindowEntry>,
    limits: Arc<RwLock<LimitTable>>,
}

impl RateLimiter {
    pub fn new(limits: Arc<RwLock<LimitTable>>) -> Self {
        Self {
            entries: DashMap::new(),
            limits,
        }
    }

    /// Count a request against its window and decide whether it may proceed.
    pub fn admit(
        &self,
        client: &ClientIdentity,
        provider: &Provider,
    ) -> Result<RateDecision, GateError> {
        self.admit_at(client, provider, Instant::now())
    }

    /// Same as [`admit`](Self::admit) with an explicit clock reading.
    ///
    /// Rejected requests still count toward the window. On error the entry is
    /// left untouched.
    pub fn admit_at(
        &self,
        client: &ClientIdentity,
        provider: &Provider,
        now: Instant,
    ) -> Result<RateDecision, GateError> {
        let limits = self.limits_for(provider)?;

        trace!(client = %client, provider = %provider, "Checking rate window");

        let entry = match self.entries.entry((client.clone(), provider.clone())) {
            Entry::Vacant(vacant) => {
                debug!(
                    client = %client,
                    provider = %provider,
                    limit = limits.max_requests,
                    window_ms = limits.window.as_millis() as u64,
                    "Opening rate window"
                );
                *vacant.insert(RateWindowEntry::fresh(now))
            }
            Entry::Occupied(mut occupied) => {
                let entry = occupied.get_mut();
                if entry.is_expired(now, limits.window) {
                    *entry = RateWindowEntry::fresh(now);
                } else {
                    entry.count = entry
                        .count
                        .checked_add(1)
                        .ok_or(GateError::CounterOverflow)?;
                }
                *entry
            }
        };

        let allowed = entry.count <= limits.max_requests;
        if !allowed {
            debug!(
                client = %client,
                provider = %provider,
                count = entry.count,
                limit = limits.max_requests,
                "Rate window exceeded"
            );
        }

        Ok(RateDecision {
            allowed,
            count: entry.count,
            limit: limits.max_requests,
            retry_after: entry.remaining(now, limits.window),
        })
    }

    fn limits_for(&self, provider: &Provider) -> Result<WindowLimits, GateError> {
        let table = self.limits.read();
        WindowLimits::from_config(provider, table.for_provider(provider))
    }

    /// Drop every entry whose window has elapsed. Returns how many were removed.
    pub fn sweep_expired(&self, now: Instant) -> usize {
        let before = self.entries.len();
        self.entries.retain(|(_, provider), entry| match self.limits_for(provider) {
            Ok(limits) => !entry.is_expired(now, limits.window),
            Err(_) => true,
        });
        before.saturating_sub(self.entries.len())
    }

    /// Run [`sweep_expired`](Self::sweep_expired) on a fixed interval.
    pub fn spawn_sweeper(self: Arc<Self>, every: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let removed = self.sweep_expired(Instant::now());
                if removed > 0 {
                    debug!(removed, remaining = self.entry_count(), "Swept expired rate windows");
                }
            }
        })
    }

    /// Get the current count for a pair, if it has a window.
    pub fn counter_value(&self, client: &ClientIdentity, provider: &Provider) -> Option<u64> {
        self.entries
            .get(&(client.clone(), provider.clone()))
            .map(|entry| entry.count)
    }

    /// Get the number of tracked windows.
    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }

    /// Clear all windows.
    pub fn clear(&self) {
        self.entries.clear();
    }
}
