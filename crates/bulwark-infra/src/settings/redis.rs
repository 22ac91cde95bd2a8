//! Settings document held in Redis by the admin tooling.

use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;

use bulwark_core::ports::SettingsSource;
use bulwark_core::{GuardSettings, SettingsError};

/// Key of the JSON settings document.
pub const SETTINGS_KEY: &str = "settings:guard";

/// Reads `settings:guard` on every load; a missing document means defaults.
/// Wrap in [`super::CachedSettings`] to bound the read rate.
pub struct RedisSettingsSource {
    conn: ConnectionManager,
    key: String,
}

impl RedisSettingsSource {
    pub fn new(conn: ConnectionManager) -> Self {
        Self {
            conn,
            key: SETTINGS_KEY.to_string(),
        }
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = key.into();
        self
    }

    /// Replace the stored document.
    pub async fn publish(&self, settings: &GuardSettings) -> Result<(), SettingsError> {
        let document =
            serde_json::to_string(settings).map_err(|e| SettingsError::Invalid(e.to_string()))?;
        let mut conn = self.conn.clone();
        conn.set::<_, _, ()>(&self.key, document)
            .await
            .map_err(|e| SettingsError::Unavailable(e.to_string()))
    }
}

#[async_trait]
impl SettingsSource for RedisSettingsSource {
    async fn load(&self) -> Result<GuardSettings, SettingsError> {
        let mut conn = self.conn.clone();
        let document: Option<String> = conn
            .get(&self.key)
            .await
            .map_err(|e| SettingsError::Unavailable(e.to_string()))?;

        match document {
            Some(json) => {
                serde_json::from_str(&json).map_err(|e| SettingsError::Invalid(e.to_string()))
            }
            None => Ok(GuardSettings::default()),
        }
    }
}
