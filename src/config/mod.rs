use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::env;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TxConfig {
    pub database: DatabaseConfig,
    pub coordinator: CoordinatorConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub max_connections: u32,
    pub acquire_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    pub enable_slow_tx_warning: bool,
    pub slow_tx_threshold_ms: u64,
}

impl Default for TxConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                max_connections: 10,
                acquire_timeout_secs: 30,
            },
            coordinator: CoordinatorConfig {
                enable_slow_tx_warning: true,
                slow_tx_threshold_ms: 1000,
            },
        }
    }
}

impl TxConfig {
    pub fn from_env() -> Self {
        // Load .env if present so DATABASE_URL and overrides are picked up
        let _ = dotenvy::dotenv();
        Self::default().with_env_overrides()
    }

    fn with_env_overrides(mut self) -> Self {
        if let Ok(v) = env::var("AMBIENT_TX_MAX_CONNECTIONS") {
            self.database.max_connections = v.parse().unwrap_or(self.database.max_connections);
        }
        if let Ok(v) = env::var("AMBIENT_TX_ACQUIRE_TIMEOUT_SECS") {
            self.database.acquire_timeout_secs =
                v.parse().unwrap_or(self.database.acquire_timeout_secs);
        }
        if let Ok(v) = env::var("AMBIENT_TX_SLOW_TX_WARNING") {
            self.coordinator.enable_slow_tx_warning =
                v.parse().unwrap_or(self.coordinator.enable_slow_tx_warning);
        }
        if let Ok(v) = env::var("AMBIENT_TX_SLOW_TX_THRESHOLD_MS") {
            self.coordinator.slow_tx_threshold_ms =
                v.parse().unwrap_or(self.coordinator.slow_tx_threshold_ms);
        }
        self
    }
}

static CONFIG: Lazy<TxConfig> = Lazy::new(TxConfig::from_env);

/// Process-wide configuration singleton.
pub fn config() -> &'static TxConfig {
    &CONFIG
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = TxConfig::default();
        assert!(config.database.max_connections > 0);
        assert!(config.coordinator.slow_tx_threshold_ms > 0);
    }
}
