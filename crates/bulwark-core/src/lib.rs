//! # Bulwark Core
//!
//! The domain layer of the Bulwark gate.
//! Identity resolution, challenge/admission/cost rules and the ports they
//! run against. No infrastructure dependencies: every piece of shared state
//! lives behind [`ports::AtomicStore`].

pub mod domain;
pub mod error;
pub mod identity;
pub mod keys;
pub mod ports;
pub mod services;
pub mod settings;

pub use error::{GuardError, SettingsError, StoreError};
pub use identity::{Identity, resolve};
pub use settings::{FailurePolicy, GuardSettings};
