//! Middleware modules.

pub mod error;
pub mod global_admission;
pub mod identity;
