//! Ports - trait definitions for external dependencies.
//! These are the "interfaces" that infrastructure must implement.

mod anomaly;
mod clock;
mod estimator;
mod settings;
mod store;
mod token;

pub use anomaly::{AnomalySink, Component, TracingAnomalySink};
pub use clock::{Clock, ManualClock, SystemClock};
pub use estimator::{CostEstimator, GenerationRequest, TokenUsage};
pub use settings::{SettingsSource, StaticSettings};
pub use store::{
    AdmitRequest, AdmitVerdict, AdmitWindow, AtomicStore, ConsumeRequest, ConsumeVerdict,
    CostCheckRequest, CostRecordRequest, CostVerdict, IssueRequest, IssueVerdict, LedgerQuery,
    LedgerTotals, StrikeRequest,
};
pub use token::{TokenGenerator, UuidTokenGenerator};
