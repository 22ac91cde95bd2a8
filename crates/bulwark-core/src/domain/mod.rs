//! Domain types - the values that flow between the gate components.

mod challenge;
mod money;
mod outcome;

pub use challenge::{ChallengeGrant, ChallengeValidation, InvalidReason, IssueOutcome};
pub use money::{cost_member, micros_to_usd, parse_cost_member, usd_to_micros};
pub use outcome::{
    AdmitCheck, CostCheck, ErrorClass, GateTicket, LedgerSnapshot, ReasonCode, Rejection,
    ThrottleReason, WindowDecision,
};
