//! Admission outcomes and gate faults.

use thiserror::Error;

use super::identity::Provider;

/// Why a job was not admitted.
///
/// Every variant is retryable; the message is meant to be shown to the user.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Rejection {
    /// Another job for the same client is still running
    #[error("A file is already being processed for this client. Please wait for it to finish.")]
    Busy,

    /// The provider's daily cap has been consumed
    #[error("Daily limit reached: {used} of {max} requests used today. The limit resets at 00:00 UTC.")]
    QuotaExhausted { max: u64, used: u64 },

    /// Too many requests inside the current rate window
    #[error("Too many requests. Please try again in {retry_after_secs} seconds.")]
    RateLimited { retry_after_secs: u64 },

    /// A gate failed internally and the failure policy is closed
    #[error("Request admission is temporarily unavailable. Please try again shortly.")]
    Unavailable,
}

impl Rejection {
    /// Short machine-readable tag for the rejection.
    pub fn kind(&self) -> &'static str {
        match self {
            Rejection::Busy => "busy",
            Rejection::QuotaExhausted { .. } => "quota",
            Rejection::RateLimited { .. } => "rate_limit",
            Rejection::Unavailable => "unavailable",
        }
    }

    pub fn retry_after_secs(&self) -> Option<u64> {
        match self {
            Rejection::RateLimited { retry_after_secs } => Some(*retry_after_secs),
            _ => None,
        }
    }
}

/// Internal fault raised while evaluating a gate.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GateError {
    #[error("invalid limits for provider {provider}: {reason}")]
    InvalidLimits { provider: Provider, reason: String },

    #[error("rate window counter overflowed")]
    CounterOverflow,
}

/// Outcome of a guarded job that did not produce a value.
#[derive(Debug, Error)]
pub enum JobError<E> {
    /// The job never started
    #[error(transparent)]
    Rejected(#[from] Rejection),

    /// The job ran and returned an error
    #[error("{0}")]
    Failed(E),

    /// The job panicked or was torn down before finishing
    #[error("job aborted before completion")]
    Aborted,
}
