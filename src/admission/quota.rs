//! Daily cumulative quota per client and provider.
//!
//! Usage lives in the durable [`UsageStore`] under a bucket named after the
//! provider and the current UTC date, so each day starts from zero and old
//! buckets stay behind as history.

use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use tracing::debug;

use super::identity::{ClientIdentity, Provider};
use crate::config::LimitTable;
use crate::store::UsageStore;

/// Bucket key scoping usage to one provider on one UTC day.
pub fn bucket_key(provider: &Provider, date: NaiveDate) -> String {
    format!("{}:{}", provider, date.format("%Y-%m-%d"))
}

fn today() -> NaiveDate {
    Utc::now().date_naive()
}

/// Result of a daily quota check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuotaDecision {
    /// No cap is configured for the provider
    Unlimited,
    Allowed { used: u64, max: u64 },
    Exhausted { used: u64, max: u64 },
}

impl QuotaDecision {
    pub fn is_allowed(&self) -> bool {
        !matches!(self, QuotaDecision::Exhausted { .. })
    }
}

/// Usage summary for the status endpoint.
///
/// `max` and `remaining` are `None` when the provider has no cap.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UsageReport {
    pub used: u64,
    pub max: Option<u64>,
    pub remaining: Option<u64>,
    pub enabled: bool,
}

/// Gate enforcing the per-day cap.
///
/// The gate only reads; the pipeline records a use after the guarded job
/// succeeds.
pub struct DailyQuotaGate {
    store: Arc<UsageStore>,
    limits: Arc<RwLock<LimitTable>>,
}

impl DailyQuotaGate {
    pub fn new(store: Arc<UsageStore>, limits: Arc<RwLock<LimitTable>>) -> Self {
        Self { store, limits }
    }

    /// The active cap for a provider, if any.
    pub fn cap_for(&self, provider: &Provider) -> Option<u64> {
        self.limits.read().for_provider(provider).daily.cap()
    }

    /// Decide whether another job may run today.
    pub async fn check_and_admit(
        &self,
        client: &ClientIdentity,
        provider: &Provider,
    ) -> QuotaDecision {
        self.check_and_admit_on(client, provider, today()).await
    }

    /// Same as [`check_and_admit`](Self::check_and_admit) for a given day.
    pub async fn check_and_admit_on(
        &self,
        client: &ClientIdentity,
        provider: &Provider,
        date: NaiveDate,
    ) -> QuotaDecision {
        let Some(max) = self.cap_for(provider) else {
            return QuotaDecision::Unlimited;
        };

        let used = self.store.get(client, &bucket_key(provider, date)).await;
        if used < max {
            QuotaDecision::Allowed { used, max }
        } else {
            debug!(client = %client, provider = %provider, used, max, "Daily quota exhausted");
            QuotaDecision::Exhausted { used, max }
        }
    }

    /// Count one completed job against today's bucket.
    pub async fn record_success(&self, client: &ClientIdentity, provider: &Provider) -> u64 {
        self.record_success_on(client, provider, today()).await
    }

    pub async fn record_success_on(
        &self,
        client: &ClientIdentity,
        provider: &Provider,
        date: NaiveDate,
    ) -> u64 {
        let bucket = bucket_key(provider, date);
        let used = self.store.increment(client, &bucket).await;
        debug!(client = %client, bucket = %bucket, used, "Recorded daily usage");
        used
    }

    /// Today's usage for a client.
    pub async fn usage(&self, client: &ClientIdentity, provider: &Provider) -> UsageReport {
        self.usage_on(client, provider, today()).await
    }

    pub async fn usage_on(
        &self,
        client: &ClientIdentity,
        provider: &Provider,
        date: NaiveDate,
    ) -> UsageReport {
        let used = self.store.get(client, &bucket_key(provider, date)).await;
        match self.cap_for(provider) {
            Some(max) => UsageReport {
                used,
                max: Some(max),
                remaining: Some(max.saturating_sub(used)),
                enabled: true,
            },
            None => UsageReport {
                used,
                max: None,
                remaining: None,
                enabled: false,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DailyQuotaConfig, ProviderLimits};
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn gate_with_cap(tmp: &TempDir, enabled: bool, max: u64) -> DailyQuotaGate {
        let store = Arc::new(UsageStore::open(tmp.path().join("usage.json")));
        let table = LimitTable {
            default: ProviderLimits::default(),
            providers: HashMap::from([(
                Provider::Gemini,
                ProviderLimits {
                    daily: DailyQuotaConfig { enabled, max },
                    ..ProviderLimits::default()
                },
            )]),
        };
        DailyQuotaGate::new(store, Arc::new(RwLock::new(table)))
    }

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 3, d).unwrap()
    }

    #[test]
    fn test_bucket_key_format() {
        assert_eq!(bucket_key(&Provider::Gemini, day(7)), "gemini:2025-03-07");
        assert_eq!(
            bucket_key(&Provider::OpenRouter, day(21)),
            "openrouter:2025-03-21"
        );
    }

    #[tokio::test]
    async fn test_cap_of_five_allows_exactly_five() {
        let tmp = TempDir::new().unwrap();
        let gate = gate_with_cap(&tmp, true, 5);
        let client = ClientIdentity::from_token("c1").unwrap();

        for _ in 0..5 {
            let decision = gate.check_and_admit_on(&client, &Provider::Gemini, day(1)).await;
            assert!(decision.is_allowed());
            gate.record_success_on(&client, &Provider::Gemini, day(1)).await;
        }

        let decision = gate.check_and_admit_on(&client, &Provider::Gemini, day(1)).await;
        assert_eq!(decision, QuotaDecision::Exhausted { used: 5, max: 5 });

        let report = gate.usage_on(&client, &Provider::Gemini, day(1)).await;
        assert_eq!(report.used, 5);
        assert_eq!(report.remaining, Some(0));
        assert!(report.enabled);
    }

    #[tokio::test]
    async fn test_new_day_starts_fresh() {
        let tmp = TempDir::new().unwrap();
        let gate = gate_with_cap(&tmp, true, 1);
        let client = ClientIdentity::from_token("c1").unwrap();

        gate.record_success_on(&client, &Provider::Gemini, day(1)).await;
        assert!(!gate.check_and_admit_on(&client, &Provider::Gemini, day(1)).await.is_allowed());
        assert!(gate.check_and_admit_on(&client, &Provider::Gemini, day(2)).await.is_allowed());
    }

    #[tokio::test]
    async fn test_disabled_quota_always_admits() {
        let tmp = TempDir::new().unwrap();
        let gate = gate_with_cap(&tmp, false, 1);
        let client = ClientIdentity::from_token("c1").unwrap();

        for _ in 0..10 {
            gate.record_success_on(&client, &Provider::Gemini, day(1)).await;
        }

        let decision = gate.check_and_admit_on(&client, &Provider::Gemini, day(1)).await;
        assert_eq!(decision, QuotaDecision::Unlimited);

        let report = gate.usage_on(&client, &Provider::Gemini, day(1)).await;
        assert_eq!(report.used, 10);
        assert_eq!(report.max, None);
        assert_eq!(report.remaining, None);
        assert!(!report.enabled);
    }

    #[tokio::test]
    async fn test_zero_cap_always_admits() {
        let tmp = TempDir::new().unwrap();
        let gate = gate_with_cap(&tmp, true, 0);
        let client = ClientIdentity::from_token("c1").unwrap();

        let decision = gate.check_and_admit_on(&client, &Provider::Gemini, day(1)).await;
        assert_eq!(decision, QuotaDecision::Unlimited);
    }

    #[tokio::test]
    async fn test_usage_is_per_client() {
        let tmp = TempDir::new().unwrap();
        let gate = gate_with_cap(&tmp, true, 3);
        let a = ClientIdentity::from_token("a").unwrap();
        let b = ClientIdentity::from_token("b").unwrap();

        gate.record_success_on(&a, &Provider::Gemini, day(1)).await;
        gate.record_success_on(&a, &Provider::Gemini, day(1)).await;

        assert_eq!(gate.usage_on(&a, &Provider::Gemini, day(1)).await.remaining, Some(1));
        assert_eq!(gate.usage_on(&b, &Provider::Gemini, day(1)).await.remaining, Some(3));
    }
}
