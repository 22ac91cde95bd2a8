//! Gate services - the business rules, composed over the ports.

mod admission;
mod challenge;
mod gate;
mod ledger;

pub use admission::AdmissionController;
pub use challenge::ChallengeIssuer;
pub use gate::Gatekeeper;
pub use ledger::CostLedger;

use std::time::Duration;

/// Seconds as a duration, clamping negative and non-finite values to zero.
pub(crate) fn secs(value: f64) -> Duration {
    Duration::try_from_secs_f64(value.max(0.0)).unwrap_or_default()
}

#[cfg(test)]
pub(crate) mod testing;
