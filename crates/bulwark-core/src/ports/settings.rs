//! Configuration provider port.

use async_trait::async_trait;

use crate::error::SettingsError;
use crate::settings::GuardSettings;

/// Supplies the tunable thresholds. Implementations are read once per check,
/// so they must be fresh or backed by a short-TTL cache.
#[async_trait]
pub trait SettingsSource: Send + Sync {
    async fn load(&self) -> Result<GuardSettings, SettingsError>;
}

/// Fixed settings, for tests and single-binary deployments.
#[derive(Debug, Clone, Default)]
pub struct StaticSettings(pub GuardSettings);

#[async_trait]
impl SettingsSource for StaticSettings {
    async fn load(&self) -> Result<GuardSettings, SettingsError> {
        Ok(self.0.clone())
    }
}
