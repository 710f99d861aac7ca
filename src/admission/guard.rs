//! Single-flight guard: at most one running job per client.

use std::sync::Arc;

use dashmap::DashSet;
use tracing::trace;

use super::identity::ClientIdentity;

/// Tracks which clients currently have a job in flight.
///
/// A client is in flight while its identity is in the set. Releasing removes
/// it, so idle clients cost nothing.
#[derive(Debug, Default)]
pub struct SingleFlight {
    in_flight: DashSet<ClientIdentity>,
}

impl SingleFlight {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark the client as busy. Returns `false` if it already was.
    pub fn try_acquire(&self, client: &ClientIdentity) -> bool {
        let acquired = self.in_flight.insert(client.clone());
        trace!(client = %client, acquired, "Single-flight acquire");
        acquired
    }

    /// Mark the client as idle. Unconditional.
    pub fn release(&self, client: &ClientIdentity) {
        self.in_flight.remove(client);
        trace!(client = %client, "Single-flight release");
    }

    /// Acquire a scoped permit that releases the client when dropped.
    ///
    /// Dropping covers every exit path of the holder, including unwinding out
    /// of a panicking task.
    pub fn try_permit(self: &Arc<Self>, client: &ClientIdentity) -> Option<FlightPermit> {
        self.try_acquire(client).then(|| FlightPermit {
            guard: Arc::clone(self),
            client: client.clone(),
        })
    }

    pub fn is_in_flight(&self, client: &ClientIdentity) -> bool {
        self.in_flight.contains(client)
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }
}

/// Proof that a client holds the single-flight slot.
#[derive(Debug)]
pub struct FlightPermit {
    guard: Arc<SingleFlight>,
    client: ClientIdentity,
}

impl FlightPermit {
    pub fn client(&self) -> &ClientIdentity {
        &self.client
    }
}

impl Drop for FlightPermit {
    fn drop(&mut self) {
        self.guard.release(&self.client);
    }
}
