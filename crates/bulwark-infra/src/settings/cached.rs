//! Short-TTL cache in front of a settings source.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::Instant;

use bulwark_core::ports::SettingsSource;
use bulwark_core::{GuardSettings, SettingsError};

struct Snapshot {
    settings: GuardSettings,
    fetched_at: Instant,
}

/// Serves a snapshot for `ttl`, then refreshes from the inner source.
///
/// A failed refresh keeps serving the last good snapshot (or the defaults
/// when there never was one) and retries after another `ttl`, so this
/// source never returns an error.
pub struct CachedSettings<S> {
    source: S,
    ttl: Duration,
    snapshot: Mutex<Option<Snapshot>>,
}

impl<S: SettingsSource> CachedSettings<S> {
    pub fn new(source: S, ttl: Duration) -> Self {
        Self {
            source,
            ttl,
            snapshot: Mutex::new(None),
        }
    }
}

#[async_trait]
impl<S: SettingsSource> SettingsSource for CachedSettings<S> {
    async fn load(&self) -> Result<GuardSettings, SettingsError> {
        let mut snapshot = self.snapshot.lock().await;

        if let Some(current) = snapshot.as_ref() {
            if current.fetched_at.elapsed() < self.ttl {
                return Ok(current.settings.clone());
            }
        }

        let settings = match self.source.load().await {
            Ok(settings) => settings,
            Err(e) => {
                tracing::warn!(error = %e, "Settings refresh failed, serving last snapshot");
                snapshot
                    .as_ref()
                    .map(|s| s.settings.clone())
                    .unwrap_or_default()
            }
        };

        *snapshot = Some(Snapshot {
            settings: settings.clone(),
            fetched_at: Instant::now(),
        });
        Ok(settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Succeeds on the first load only, with a daily limit of 1.0.
    #[derive(Default)]
    struct FlakySource {
        loads: AtomicUsize,
    }

    #[async_trait]
    impl SettingsSource for FlakySource {
        async fn load(&self) -> Result<GuardSettings, SettingsError> {
            if self.loads.fetch_add(1, Ordering::SeqCst) > 0 {
                return Err(SettingsError::Unavailable("down".to_string()));
            }
            let mut settings = GuardSettings::default();
            settings.cost.daily_limit_usd = 1.0;
            Ok(settings)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_snapshot_is_reused_within_ttl() {
        let cached = CachedSettings::new(FlakySource::default(), Duration::from_secs(5));

        cached.load().await.unwrap();
        tokio::time::advance(Duration::from_secs(2)).await;
        cached.load().await.unwrap();

        assert_eq!(cached.source.loads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_refresh_serves_last_snapshot() {
        let cached = CachedSettings::new(FlakySource::default(), Duration::from_secs(5));

        cached.load().await.unwrap();
        tokio::time::advance(Duration::from_secs(6)).await;
        let settings = cached.load().await.unwrap();

        assert_eq!(cached.source.loads.load(Ordering::SeqCst), 2);
        assert_eq!(settings.cost.daily_limit_usd, 1.0);
    }

    #[tokio::test]
    async fn test_defaults_when_never_loaded() {
        struct Down;

        #[async_trait]
        impl SettingsSource for Down {
            async fn load(&self) -> Result<GuardSettings, SettingsError> {
                Err(SettingsError::Unavailable("down".to_string()))
            }
        }

        let cached = CachedSettings::new(Down, Duration::from_secs(5));
        assert_eq!(cached.load().await.unwrap(), GuardSettings::default());
    }
}
