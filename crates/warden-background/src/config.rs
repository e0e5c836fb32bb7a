//! Background configuration

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use warden_core::{AutoLockSettings, Error, Result, MAX_AUTO_LOCK_MINUTES};

/// Environment variable overriding [`BackgroundConfig::database_path`]
pub const ENV_DB_PATH: &str = "WARDEN_DB_PATH";

/// Environment variable overriding [`BackgroundConfig::cross_chain_wait_secs`]
pub const ENV_CROSS_CHAIN_WAIT_SECS: &str = "WARDEN_CROSS_CHAIN_WAIT_SECS";

/// Background configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackgroundConfig {
    /// Auto-lock settings used until the user saves their own
    pub auto_lock: AutoLockSettings,
    /// Ceiling for the cross-chain settlement wait
    pub cross_chain_wait_secs: u64,
    /// Smallest flow tracked as a persisted process
    pub min_process_steps: usize,
    /// Outbound buffer per client port
    pub port_channel_capacity: usize,
    /// Settled pending requests remembered for status queries
    pub settled_history: usize,
    /// SQLite file; in-memory when unset
    pub database_path: Option<PathBuf>,
}

impl Default for BackgroundConfig {
    fn default() -> Self {
        Self {
            auto_lock: AutoLockSettings::default(),
            cross_chain_wait_secs: 60,
            min_process_steps: 3,
            port_channel_capacity: 100,
            settled_history: 256,
            database_path: None,
        }
    }
}

impl BackgroundConfig {
    /// Load from a JSON file (defaults when `None`), then apply environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path).map_err(|e| {
                    Error::Other(format!("Failed to read config {}: {}", path.display(), e))
                })?;
                serde_json::from_str(&raw)?
            }
            None => Self::default(),
        };

        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from a variable lookup
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(path) = lookup(ENV_DB_PATH).filter(|p| !p.is_empty()) {
            self.database_path = Some(PathBuf::from(path));
        }
        if let Some(secs) = lookup(ENV_CROSS_CHAIN_WAIT_SECS) {
            self.cross_chain_wait_secs = secs.trim().parse().map_err(|_| {
                Error::validation(format!("{} must be a number of seconds", ENV_CROSS_CHAIN_WAIT_SECS))
            })?;
        }
        Ok(())
    }

    /// Reject values the orchestrator cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.auto_lock.time_auto_lock > MAX_AUTO_LOCK_MINUTES {
            return Err(Error::validation(format!(
                "auto_lock.time_auto_lock must be at most {} minutes",
                MAX_AUTO_LOCK_MINUTES
            )));
        }
        if self.min_process_steps < 2 {
            return Err(Error::validation("min_process_steps must be at least 2"));
        }
        if self.port_channel_capacity == 0 {
            return Err(Error::validation("port_channel_capacity must be positive"));
        }
        Ok(())
    }

    /// Cross-chain wait ceiling
    pub fn cross_chain_wait(&self) -> Duration {
        Duration::from_secs(self.cross_chain_wait_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = BackgroundConfig::default();
        assert_eq!(config.cross_chain_wait(), Duration::from_secs(60));
        assert_eq!(config.min_process_steps, 3);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config: BackgroundConfig =
            serde_json::from_str(r#"{"cross_chain_wait_secs": 120}"#).unwrap();
        assert_eq!(config.cross_chain_wait_secs, 120);
        assert_eq!(config.port_channel_capacity, 100);
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            (ENV_DB_PATH, "/tmp/warden.db"),
            (ENV_CROSS_CHAIN_WAIT_SECS, "90"),
        ]
        .into_iter()
        .collect();

        let mut config = BackgroundConfig::default();
        config
            .apply_env(|key| env.get(key).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.database_path, Some(PathBuf::from("/tmp/warden.db")));
        assert_eq!(config.cross_chain_wait_secs, 90);

        let mut config = BackgroundConfig::default();
        let bad = config.apply_env(|key| {
            (key == ENV_CROSS_CHAIN_WAIT_SECS).then(|| "soon".to_string())
        });
        assert!(matches!(bad, Err(Error::Validation(_))));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{"auto_lock": {"timeAutoLock": 0, "alwaysLock": true}, "min_process_steps": 4}"#,
        )
        .unwrap();

        let config = BackgroundConfig::load(Some(&path)).unwrap();
        assert!(config.auto_lock.locks_after_action());
        assert_eq!(config.min_process_steps, 4);
    }
}
