//! USD amounts and cost receipt members.
//!
//! Ledger arithmetic runs on integer micro-dollars so that threshold
//! comparisons are exact; receipts carry the amount as a decimal string.

const MICROS_PER_USD: f64 = 1_000_000.0;

/// Convert a USD amount to micro-dollars. Negative and non-finite inputs
/// count as zero.
pub fn usd_to_micros(usd: f64) -> i64 {
    if !usd.is_finite() || usd <= 0.0 {
        return 0;
    }
    (usd * MICROS_PER_USD).round() as i64
}

pub fn micros_to_usd(micros: i64) -> f64 {
    micros as f64 / MICROS_PER_USD
}

/// Encode a cost receipt as `<identity>:<cost>`.
pub fn cost_member(identity: &str, micros: i64) -> String {
    format!("{identity}:{:.6}", micros_to_usd(micros))
}

/// Split a cost receipt into identity and micro-dollars.
///
/// The cost is the segment after the last separator, since identities
/// contain separators themselves. Returns `None` for malformed members.
pub fn parse_cost_member(member: &str) -> Option<(&str, i64)> {
    let (identity, cost) = member.rsplit_once(':')?;
    let usd: f64 = cost.parse().ok()?;
    if !usd.is_finite() || usd < 0.0 {
        return None;
    }
    Some((identity, usd_to_micros(usd)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_member_keeps_full_identity() {
        let member = cost_member("fp:c1:hash", usd_to_micros(0.001));
        assert_eq!(member, "fp:c1:hash:0.001000");
        assert_eq!(parse_cost_member(&member), Some(("fp:c1:hash", 1_000)));
    }

    #[test]
    fn test_malformed_members_are_skipped() {
        assert_eq!(parse_cost_member("no-separator"), None);
        assert_eq!(parse_cost_member("fp:c1:hash:abc"), None);
        assert_eq!(parse_cost_member("fp:c1:hash:-0.5"), None);
        assert_eq!(parse_cost_member("fp:c1:hash:NaN"), None);
    }

    #[test]
    fn test_invalid_amounts_count_as_zero() {
        assert_eq!(usd_to_micros(-1.0), 0);
        assert_eq!(usd_to_micros(f64::NAN), 0);
        assert_eq!(usd_to_micros(0.25), 250_000);
    }
}
