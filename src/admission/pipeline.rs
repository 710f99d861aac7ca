//! The admission pipeline in front of every AI job.
//!
//! Gates run in a fixed order: single-flight, daily quota, rate window. The
//! first rejection short-circuits. An admitted job runs on its own task so a
//! caller that goes away does not cancel it; a successful job is counted
//! against today's quota before the client's single-flight slot is released.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::error::{GateError, JobError, Rejection};
use super::guard::{FlightPermit, SingleFlight};
use super::identity::{ClientIdentity, Provider};
use super::quota::{DailyQuotaGate, QuotaDecision, UsageReport};
use super::window::RateLimiter;
use crate::config::{AdmissionConfig, FailurePolicy, LimitTable};
use crate::store::UsageStore;

/// A job that passed every gate.
///
/// Holds the client's single-flight slot until dropped.
#[derive(Debug)]
pub struct Admission {
    permit: FlightPermit,
    provider: Provider,
}

impl Admission {
    pub fn client(&self) -> &ClientIdentity {
        self.permit.client()
    }

    pub fn provider(&self) -> &Provider {
        &self.provider
    }
}

/// Composes the gates and runs guarded jobs.
pub struct AdmissionPipeline {
    guard: Arc<SingleFlight>,
    quota: Arc<DailyQuotaGate>,
    limiter: Arc<RateLimiter>,
    limits: Arc<RwLock<LimitTable>>,
    policy: FailurePolicy,
    sweep_interval: Option<Duration>,
}

impl AdmissionPipeline {
    pub fn new(store: Arc<UsageStore>, config: &AdmissionConfig) -> Self {
        let limits = Arc::new(RwLock::new(config.limits.clone()));
        let sweep_interval =
            (config.sweep_interval_secs > 0).then(|| Duration::from_secs(config.sweep_interval_secs));

        Self {
            guard: Arc::new(SingleFlight::new()),
            quota: Arc::new(DailyQuotaGate::new(store, limits.clone())),
            limiter: Arc::new(RateLimiter::new(limits.clone())),
            limits,
            policy: config.failure_policy,
            sweep_interval,
        }
    }

    /// Replace the limit table used by both the quota gate and the limiter.
    pub fn set_limits(&self, table: LimitTable) {
        *self.limits.write() = table;
    }

    pub fn policy(&self) -> FailurePolicy {
        self.policy
    }

    pub fn guard(&self) -> &Arc<SingleFlight> {
        &self.guard
    }

    pub fn quota(&self) -> &Arc<DailyQuotaGate> {
        &self.quota
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    /// Evaluate the gates for one request.
    pub async fn admit(
        &self,
        client: &ClientIdentity,
        provider: &Provider,
    ) -> Result<Admission, Rejection> {
        let Some(permit) = self.guard.try_permit(client) else {
            info!(client = %client, provider = %provider, "Rejected: job already in flight");
            return Err(Rejection::Busy);
        };

        // An early return below drops the permit and frees the slot again.
        if let QuotaDecision::Exhausted { used, max } =
            self.quota.check_and_admit(client, provider).await
        {
            info!(client = %client, provider = %provider, used, max, "Rejected: daily quota exhausted");
            return Err(Rejection::QuotaExhausted { max, used });
        }

        match self.limiter.admit(client, provider) {
            Ok(decision) if decision.allowed => {}
            Ok(decision) => {
                let retry_after_secs = decision.retry_after_secs();
                info!(
                    client = %client,
                    provider = %provider,
                    count = decision.count,
                    limit = decision.limit,
                    retry_after_secs,
                    "Rejected: rate limited"
                );
                return Err(Rejection::RateLimited { retry_after_secs });
            }
            Err(err) => self.on_gate_error(client, provider, err)?,
        }

        debug!(client = %client, provider = %provider, "Admitted");
        Ok(Admission {
            permit,
            provider: provider.clone(),
        })
    }

    fn on_gate_error(
        &self,
        client: &ClientIdentity,
        provider: &Provider,
        err: GateError,
    ) -> Result<(), Rejection> {
        match self.policy {
            FailurePolicy::Open => {
                warn!(client = %client, provider = %provider, error = %err, "Rate limiter failed, admitting request");
                Ok(())
            }
            FailurePolicy::Closed => {
                error!(client = %client, provider = %provider, error = %err, "Rate limiter failed, rejecting request");
                Err(Rejection::Unavailable)
            }
        }
    }

    /// Admit, then run `job` to completion on its own task.
    ///
    /// The single-flight slot is held for the whole job and released on every
    /// outcome, including a panic. Only a successful job is counted against
    /// the daily quota.
    pub async fn run<F, Fut, T, E>(
        &self,
        client: &ClientIdentity,
        provider: &Provider,
        job: F,
    ) -> Result<T, JobError<E>>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: Send + 'static,
    {
        let admission = self.admit(client, provider).await?;
        let quota = Arc::clone(&self.quota);

        let handle = tokio::spawn(async move {
            let outcome = job().await;
            if outcome.is_ok() {
                quota
                    .record_success(admission.client(), admission.provider())
                    .await;
            }
            drop(admission);
            outcome
        });

        match handle.await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) => Err(JobError::Failed(err)),
            Err(join_err) => {
                error!(client = %client, provider = %provider, error = %join_err, "Guarded job aborted");
                Err(JobError::Aborted)
            }
        }
    }

    /// Today's usage for a client and provider.
    pub async fn usage(&self, client: &ClientIdentity, provider: &Provider) -> UsageReport {
        self.quota.usage(client, provider).await
    }

    /// Start the background eviction of expired rate windows, if enabled.
    pub fn spawn_sweeper(&self) -> Option<JoinHandle<()>> {
        self.sweep_interval
            .map(|every| Arc::clone(&self.limiter).spawn_sweeper(every))
    }
}
