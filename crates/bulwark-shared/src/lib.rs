//! # Bulwark Shared
//!
//! Wire types of the gate's HTTP surface, shared with clients.

pub mod dto;
pub mod response;

pub use response::ErrorResponse;
