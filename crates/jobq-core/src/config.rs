use crate::{JobError, Result, DEFAULT_MAX_RETRIES};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Persisted queue settings shared by the admin CLI and the workers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Default `max_retries` for jobs enqueued without one
    pub max_retries: u32,
    /// Base of the exponential backoff, in seconds
    pub backoff_base: u32,
    /// Idle wait between polls when no job is pending
    pub poll_interval_ms: u64,
    /// SQLite database file
    pub database_path: PathBuf,
    /// Attempts of an exclusive store operation before giving up on contention
    pub busy_retries: u32,
    /// Pause between contended attempts
    pub busy_retry_delay_ms: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        QueueConfig {
            max_retries: DEFAULT_MAX_RETRIES,
            backoff_base: 2,
            poll_interval_ms: 2000,
            database_path: PathBuf::from("data/queue.db"),
            busy_retries: 5,
            busy_retry_delay_ms: 100,
        }
    }
}

impl QueueConfig {
    pub const KEYS: [&'static str; 6] = [
        "max_retries",
        "backoff_base",
        "poll_interval_ms",
        "database_path",
        "busy_retries",
        "busy_retry_delay_ms",
    ];

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: QueueConfig = serde_yaml::from_str(&contents)?;
        Ok(config)
    }

    /// Load the config file, writing the defaults first if it does not exist.
    pub fn load_or_init(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            let config = QueueConfig::default();
            config.save(path)?;
            return Ok(config);
        }
        Self::from_file(path)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)?;
        }
        std::fs::write(path, serde_yaml::to_string(self)?)?;
        Ok(())
    }

    pub fn get(&self, key: &str) -> Result<String> {
        let value = match key {
            "max_retries" => self.max_retries.to_string(),
            "backoff_base" => self.backoff_base.to_string(),
            "poll_interval_ms" => self.poll_interval_ms.to_string(),
            "database_path" => self.database_path.display().to_string(),
            "busy_retries" => self.busy_retries.to_string(),
            "busy_retry_delay_ms" => self.busy_retry_delay_ms.to_string(),
            _ => return Err(unknown_key(key)),
        };
        Ok(value)
    }

    /// Parse `value` for `key` and store it. The config is left untouched on error.
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            "max_retries" => {
                let parsed = parse_value::<u32>(key, value)?;
                if parsed == 0 {
                    return Err(invalid_value(key, value));
                }
                self.max_retries = parsed;
            }
            "backoff_base" => self.backoff_base = parse_value(key, value)?,
            "poll_interval_ms" => self.poll_interval_ms = parse_value(key, value)?,
            "database_path" => {
                if value.is_empty() {
                    return Err(invalid_value(key, value));
                }
                self.database_path = PathBuf::from(value);
            }
            "busy_retries" => {
                let parsed = parse_value::<u32>(key, value)?;
                if parsed == 0 {
                    return Err(invalid_value(key, value));
                }
                self.busy_retries = parsed;
            }
            "busy_retry_delay_ms" => self.busy_retry_delay_ms = parse_value(key, value)?,
            _ => return Err(unknown_key(key)),
        }
        Ok(())
    }

    /// All keys with their current values, in a stable order.
    pub fn entries(&self) -> Vec<(&'static str, String)> {
        Self::KEYS
            .iter()
            .filter_map(|key| self.get(key).ok().map(|value| (*key, value)))
            .collect()
    }
}

fn parse_value<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value.trim().parse().map_err(|_| invalid_value(key, value))
}

fn invalid_value(key: &str, value: &str) -> JobError {
    JobError::InvalidConfigValue {
        key: key.to_string(),
        value: value.to_string(),
    }
}

fn unknown_key(key: &str) -> JobError {
    JobError::UnknownConfigKey {
        key: key.to_string(),
        valid: QueueConfig::KEYS.join(", "),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = QueueConfig::default();
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.backoff_base, 2);
        assert_eq!(config.poll_interval_ms, 2000);
    }

    #[test]
    fn test_load_or_init_writes_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join("config.yaml");

        let config = QueueConfig::load_or_init(&path).unwrap();
        assert!(path.exists());
        assert_eq!(config, QueueConfig::default());
        assert_eq!(QueueConfig::from_file(&path).unwrap(), config);
    }

    #[test]
    fn test_set_and_persist() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.yaml");

        let mut config = QueueConfig::load_or_init(&path).unwrap();
        config.set("max_retries", "5").unwrap();
        config.set("poll_interval_ms", "250").unwrap();
        config.save(&path).unwrap();

        let reloaded = QueueConfig::from_file(&path).unwrap();
        assert_eq!(reloaded.get("max_retries").unwrap(), "5");
        assert_eq!(reloaded.poll_interval_ms, 250);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.yaml");
        std::fs::write(&path, "backoff_base: 3\n").unwrap();

        let config = QueueConfig::from_file(&path).unwrap();
        assert_eq!(config.backoff_base, 3);
        assert_eq!(config.max_retries, 3);
    }

    #[test]
    fn test_unknown_key_and_bad_value() {
        let mut config = QueueConfig::default();

        assert!(matches!(
            config.set("colour", "blue"),
            Err(JobError::UnknownConfigKey { .. })
        ));
        assert!(matches!(
            config.set("max_retries", "lots"),
            Err(JobError::InvalidConfigValue { .. })
        ));
        assert!(matches!(
            config.set("max_retries", "0"),
            Err(JobError::InvalidConfigValue { .. })
        ));
        assert!(config.get("colour").is_err());
        assert_eq!(config, QueueConfig::default());
    }

    #[test]
    fn test_entries_cover_all_keys() {
        let entries = QueueConfig::default().entries();
        let keys: Vec<&str> = entries.iter().map(|(k, _)| *k).collect();
        assert_eq!(keys, QueueConfig::KEYS.to_vec());
    }
}
