//! `GUARD_*` environment variables over the built-in defaults.

use std::str::FromStr;

use async_trait::async_trait;

use bulwark_core::ports::SettingsSource;
use bulwark_core::settings::WindowLimit;
use bulwark_core::{FailurePolicy, GuardSettings, SettingsError};

/// Reads the process environment on every load.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvSettingsSource;

#[async_trait]
impl SettingsSource for EnvSettingsSource {
    async fn load(&self) -> Result<GuardSettings, SettingsError> {
        parse_settings(|name| std::env::var(name).ok())
    }
}

/// Build settings from a variable lookup. Unset variables keep their
/// defaults; a set but unparsable one is an error.
pub fn parse_settings(
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<GuardSettings, SettingsError> {
    let mut s = GuardSettings::default();

    let a = &mut s.admission;
    set_with(&lookup, "GUARD_ADMISSION_WINDOWS", &mut a.windows, parse_windows)?;
    set_with(&lookup, "GUARD_GLOBAL_WINDOWS", &mut a.global_windows, parse_windows)?;
    set(&lookup, "GUARD_KEY_TTL_MARGIN_SECS", &mut a.key_ttl_margin_secs)?;
    set_with(&lookup, "GUARD_ADMISSION_FAILURE_POLICY", &mut a.failure_policy, parse_policy)?;

    let p = &mut a.penalty;
    set_with(&lookup, "GUARD_PENALTY_ENABLED", &mut p.enabled, parse_bool)?;
    set(&lookup, "GUARD_PENALTY_STRIKES", &mut p.strikes)?;
    set(&lookup, "GUARD_PENALTY_TRACKING_PERIOD_SECS", &mut p.tracking_period_secs)?;
    set(&lookup, "GUARD_PENALTY_BASE_BAN_SECS", &mut p.base_ban_secs)?;
    set(&lookup, "GUARD_PENALTY_MAX_BAN_SECS", &mut p.max_ban_secs)?;
    set(&lookup, "GUARD_PENALTY_LEVEL_DECAY_SECS", &mut p.level_decay_secs)?;

    let c = &mut s.cost;
    set(&lookup, "GUARD_COST_BURST_WINDOW_SECS", &mut c.burst_window_secs)?;
    set(&lookup, "GUARD_COST_BURST_THRESHOLD_USD", &mut c.burst_threshold_usd)?;
    set(&lookup, "GUARD_COST_DAILY_LIMIT_USD", &mut c.daily_limit_usd)?;
    set(&lookup, "GUARD_COST_THROTTLE_SECS", &mut c.throttle_secs)?;
    set(&lookup, "GUARD_COST_DAY_KEY_TTL_SECS", &mut c.day_key_ttl_secs)?;
    set_with(&lookup, "GUARD_COST_FAILURE_POLICY", &mut c.failure_policy, parse_policy)?;

    let ch = &mut s.challenge;
    set(&lookup, "GUARD_CHALLENGE_TTL_SECS", &mut ch.ttl_secs)?;
    set(&lookup, "GUARD_CHALLENGE_COOLDOWN_SECS", &mut ch.cooldown_secs)?;
    set(&lookup, "GUARD_CHALLENGE_REUSE_EPSILON_SECS", &mut ch.reuse_epsilon_secs)?;
    set(&lookup, "GUARD_CHALLENGE_MAX_ACTIVE", &mut ch.max_active_per_key)?;
    set(&lookup, "GUARD_CHALLENGE_EXPIRED_GRACE_SECS", &mut ch.expired_grace_secs)?;
    set_with(
        &lookup,
        "GUARD_CHALLENGE_REQUIRE_FOR_BARE_IDENTITY",
        &mut ch.require_for_bare_identity,
        parse_bool,
    )?;
    set_with(&lookup, "GUARD_CHALLENGE_FAILURE_POLICY", &mut ch.failure_policy, parse_policy)?;

    Ok(s)
}

fn set<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &str,
    target: &mut T,
) -> Result<(), SettingsError> {
    set_with(lookup, name, target, |raw| raw.parse().ok())
}

fn set_with<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &str,
    target: &mut T,
    parse: impl Fn(&str) -> Option<T>,
) -> Result<(), SettingsError> {
    let Some(raw) = lookup(name) else {
        return Ok(());
    };
    *target = parse(raw.trim())
        .ok_or_else(|| SettingsError::Invalid(format!("{name}={raw}")))?;
    Ok(())
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw {
        "true" | "1" => Some(true),
        "false" | "0" => Some(false),
        _ => None,
    }
}

fn parse_policy(raw: &str) -> Option<FailurePolicy> {
    match raw {
        "fail_open" | "open" => Some(FailurePolicy::FailOpen),
        "fail_closed" | "closed" => Some(FailurePolicy::FailClosed),
        _ => None,
    }
}

/// `"60:10,3600:100"` - window seconds and limit per entry.
fn parse_windows(raw: &str) -> Option<Vec<WindowLimit>> {
    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            let (window, limit) = entry.split_once(':')?;
            Some(WindowLimit::new(
                window.trim().parse().ok()?,
                limit.trim().parse().ok()?,
            ))
        })
        .collect()
}
