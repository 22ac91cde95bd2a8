//! Settings sources - environment, Redis-held document, and a short-TTL
//! cache in front of either.

mod cached;
mod env;

pub use cached::CachedSettings;
pub use env::{EnvSettingsSource, parse_settings};

#[cfg(feature = "redis")]
mod redis;
#[cfg(feature = "redis")]
pub use self::redis::{RedisSettingsSource, SETTINGS_KEY};
