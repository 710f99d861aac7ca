//! Admission control for AI jobs.
//!
//! A job is admitted only if the client has nothing else in flight, has
//! daily quota left for the provider and is inside its rate window.

mod error;
mod guard;
mod identity;
mod pipeline;
mod quota;
mod window;

pub use error::{GateError, JobError, Rejection};
pub use guard::{FlightPermit, SingleFlight};
pub use identity::{ClientIdentity, Provider};
pub use pipeline::{Admission, AdmissionPipeline};
pub use quota::{bucket_key, DailyQuotaGate, QuotaDecision, UsageReport};
pub use window::{RateDecision, RateLimiter, RateWindowEntry, WindowLimits};
