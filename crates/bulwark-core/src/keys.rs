//! Key layout in the shared store: `<component>:<kind>:<stable_key>[:<date>]`.
//!
//! Stable keys may contain separators (IPv6 addresses), so variable parts
//! such as window sizes live in the kind segment, never after the key.

use chrono::{DateTime, NaiveDate, Utc};

pub fn admission_window(stable_key: &str, window_secs: u64) -> String {
    format!("admit:window-{window_secs}:{stable_key}")
}

pub fn global_window(scope: &str, window_secs: u64) -> String {
    format!("admit:global-{window_secs}:{scope}")
}

pub fn ban(stable_key: &str) -> String {
    format!("admit:ban:{stable_key}")
}

pub fn strikes(stable_key: &str) -> String {
    format!("admit:strikes:{stable_key}")
}

pub fn ban_level(stable_key: &str) -> String {
    format!("admit:banlevel:{stable_key}")
}

pub fn issuance_marker(stable_key: &str) -> String {
    format!("challenge:issued:{stable_key}")
}

pub fn active_challenges(stable_key: &str) -> String {
    format!("challenge:active:{stable_key}")
}

/// Prefix of challenge records; the challenge id completes the key.
pub const CHALLENGE_TOKEN_PREFIX: &str = "challenge:token:";

pub fn challenge_token(challenge_id: &str) -> String {
    format!("{CHALLENGE_TOKEN_PREFIX}{challenge_id}")
}

pub fn cost_burst(stable_key: &str) -> String {
    format!("cost:burst:{stable_key}")
}

pub fn cost_day(stable_key: &str, date: NaiveDate) -> String {
    format!("cost:day:{stable_key}:{}", date.format("%Y-%m-%d"))
}

pub fn cost_throttle(stable_key: &str) -> String {
    format!("cost:throttle:{stable_key}")
}

/// Seconds since the epoch with sub-second precision; the score unit of
/// every sorted set.
pub fn epoch_secs(at: DateTime<Utc>) -> f64 {
    at.timestamp_micros() as f64 / 1_000_000.0
}

/// Start of the UTC day containing `at`, in epoch seconds.
pub fn day_start_secs(at: DateTime<Utc>) -> f64 {
    let midnight = at.date_naive().and_hms_opt(0, 0, 0).unwrap_or_default();
    midnight.and_utc().timestamp() as f64
}
