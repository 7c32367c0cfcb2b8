use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

use super::settings::AppConfig;

/// Shared runtime configuration with validated updates from the API.
pub struct ConfigManager {
    config: Arc<RwLock<AppConfig>>,
}

impl ConfigManager {
    pub fn new(initial: AppConfig) -> Self {
        Self {
            config: Arc::new(RwLock::new(initial)),
        }
    }

    pub async fn get(&self) -> AppConfig {
        self.config.read().await.clone()
    }

    /// Replace the whole configuration. Rejected atomically when invalid.
    pub async fn update(&self, new_config: AppConfig) -> Result<(), String> {
        if let Err(errors) = new_config.validate() {
            return Err(errors.join(", "));
        }
        let mut config = self.config.write().await;
        *config = new_config;
        info!("Configuration updated");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn update_rejects_invalid_config() {
        let manager = ConfigManager::new(AppConfig::default());
        let mut bad = AppConfig::default();
        bad.server.port = 0;

        let err = manager.update(bad).await.unwrap_err();
        assert!(err.contains("server.port"));
        // Old config still in place.
        assert_eq!(manager.get().await.server.port, 8080);
    }

    #[tokio::test]
    async fn update_applies_valid_config() {
        let manager = ConfigManager::new(AppConfig::default());
        let mut next = AppConfig::default();
        next.screener.top_n = 5;

        manager.update(next).await.unwrap();
        assert_eq!(manager.get().await.screener.top_n, 5);
    }
}
