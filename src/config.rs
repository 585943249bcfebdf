use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub measurement: MeasurementConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Step geometry resolution budget
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeasurementConfig {
    /// Milliseconds to wait for an anchor to mount and lay out (default: 3000)
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// First retry delay in milliseconds (default: 50)
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
    /// Cap for the exponential retry delay in milliseconds (default: 400)
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

fn default_timeout_ms() -> u64 {
    3000
}

fn default_backoff_ms() -> u64 {
    50
}

fn default_max_backoff_ms() -> u64 {
    400
}

impl Default for MeasurementConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
            backoff_ms: default_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Completion file; empty means `<data_dir>/coachmark/completed.json`
    #[serde(default)]
    pub path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Write logs to a file under `dir` instead of stderr
    #[serde(default)]
    pub to_file: bool,

    /// Log directory; empty means `<data_dir>/coachmark/logs`
    #[serde(default)]
    pub dir: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            to_file: false,
            dir: String::new(),
        }
    }
}

impl Config {
    /// Project-local config file
    pub fn local_config_path() -> PathBuf {
        PathBuf::from("coachmark.toml")
    }

    pub fn load(config_path: Option<&str>) -> Result<Self> {
        // Start with embedded defaults so nothing is required on disk
        let defaults = Config::default();
        let defaults_json =
            serde_json::to_string(&defaults).context("Failed to serialize default config")?;

        let mut builder = config::Config::builder().add_source(config::File::from_str(
            &defaults_json,
            config::FileFormat::Json,
        ));

        let local_config = Self::local_config_path();
        if local_config.exists() {
            builder = builder.add_source(config::File::from(local_config));
        }

        // User config in ~/.config/coachmark/ (optional global overrides)
        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("coachmark").join("config.toml");
            if user_config.exists() {
                builder = builder.add_source(config::File::from(user_config));
            }
        }

        // Explicit config file (CLI override)
        if let Some(path) = config_path {
            builder = builder.add_source(config::File::with_name(path));
        }

        // Environment variables with COACHMARK_ prefix
        builder = builder.add_source(
            config::Environment::with_prefix("COACHMARK")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build().context("Failed to load configuration")?;
        config
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }

    pub fn save_to(&self, path: &std::path::Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).context("Failed to create config directory")?;
            }
        }

        let toml_str =
            toml::to_string_pretty(self).context("Failed to serialize config to TOML")?;
        std::fs::write(path, toml_str).context("Failed to write config file")?;

        Ok(())
    }

    fn data_dir() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| std::env::current_dir().unwrap_or_default())
            .join("coachmark")
    }

    /// Absolute path of the completion store file
    pub fn store_path(&self) -> PathBuf {
        if self.store.path.is_empty() {
            return Self::data_dir().join("completed.json");
        }
        absolute(&self.store.path)
    }

    /// Absolute path of the logs directory
    pub fn logs_path(&self) -> PathBuf {
        if self.logging.dir.is_empty() {
            return Self::data_dir().join("logs");
        }
        absolute(&self.logging.dir)
    }
}

fn absolute(path: &str) -> PathBuf {
    let path = PathBuf::from(path);
    if path.is_absolute() {
        path
    } else {
        std::env::current_dir().unwrap_or_default().join(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_measurement_budget() {
        let config = Config::default();
        assert_eq!(config.measurement.timeout_ms, 3000);
        assert_eq!(config.measurement.backoff_ms, 50);
        assert_eq!(config.measurement.max_backoff_ms, 400);
        assert_eq!(config.logging.level, "info");
        assert!(!config.logging.to_file);
    }

    #[test]
    fn test_load_explicit_file_overrides_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("tour.toml");
        std::fs::write(
            &path,
            "[measurement]\ntimeout_ms = 750\n\n[store]\npath = \"/tmp/tours.json\"\n",
        )
        .unwrap();

        let config = Config::load(Some(path.to_str().unwrap())).unwrap();
        assert_eq!(config.measurement.timeout_ms, 750);
        assert_eq!(config.measurement.backoff_ms, 50);
        assert_eq!(config.store_path(), PathBuf::from("/tmp/tours.json"));
    }

    #[test]
    fn test_save_round_trips_through_load() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join("config.toml");

        let mut config = Config::default();
        config.logging.level = "debug".to_string();
        config.measurement.max_backoff_ms = 900;
        config.save_to(&path).unwrap();

        let loaded = Config::load(Some(path.to_str().unwrap())).unwrap();
        assert_eq!(loaded.logging.level, "debug");
        assert_eq!(loaded.measurement.max_backoff_ms, 900);
    }

    #[test]
    fn test_relative_store_path_is_absolutized() {
        let mut config = Config::default();
        config.store.path = "state/completed.json".to_string();
        let path = config.store_path();
        assert!(path.is_absolute());
        assert!(path.ends_with("state/completed.json"));
    }

    #[test]
    fn test_default_paths_live_under_coachmark() {
        let config = Config::default();
        assert!(config.store_path().ends_with("coachmark/completed.json"));
        assert!(config.logs_path().ends_with("coachmark/logs"));
    }
}
