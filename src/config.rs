//! Configuration file parser for ~/.config/feedmirror/config.toml.
//!
//! The config file is optional: a missing file yields `Config::default()`.
//! Unknown keys are ignored by serde, though we log a warning when the file
//! contains potential typos.
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::storage::{CommitMode, StoreOptions};

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// Config file exceeds maximum allowed size.
    #[error("Config file too large: {0}")]
    TooLarge(String),
}

// ============================================================================
// Configuration Structs
// ============================================================================

/// Top-level configuration.
///
/// All fields use `#[serde(default)]` so any subset of keys can be specified.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// SQLite file. `None` means `feeds.db` next to the config file.
    pub database_path: Option<PathBuf>,

    /// Pool size: concurrent readers plus the single writer.
    pub max_connections: u32,

    /// How long SQLite waits on a locked database before giving up.
    pub busy_timeout_ms: u64,

    /// How long to wait for a pooled connection.
    pub acquire_timeout_secs: u64,

    /// `"atomic"` (one transaction per batch) or `"boundaries"`.
    pub commit_mode: CommitMode,

    /// Abort a batch on the first unconvertible object instead of skipping it.
    pub strict_conversion: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_path: None,
            max_connections: 5,
            busy_timeout_ms: 5000,
            acquire_timeout_secs: 10,
            commit_mode: CommitMode::Atomic,
            strict_conversion: false,
        }
    }
}

impl Config {
    /// Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    const KNOWN_KEYS: [&'static str; 6] = [
        "database_path",
        "max_connections",
        "busy_timeout_ms",
        "acquire_timeout_secs",
        "commit_mode",
        "strict_conversion",
    ];

    /// Load configuration from a TOML file.
    ///
    /// - Missing file → `Ok(Config::default())`
    /// - Empty file → `Ok(Config::default())`
    /// - Invalid TOML → `Err(ConfigError::Parse)` with line number info
    /// - Unknown keys → accepted, logged as warning
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        // Check size before reading so a corrupted file can't exhaust memory
        match std::fs::metadata(path) {
            Ok(meta) if meta.len() > Self::MAX_FILE_SIZE => {
                return Err(ConfigError::TooLarge(format!(
                    "Config file is {} bytes (max {} bytes)",
                    meta.len(),
                    Self::MAX_FILE_SIZE
                )));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No config file found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
            Ok(_) => {}
        }

        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // Deleted between metadata and read
                tracing::debug!(path = %path.display(), "Config file disappeared, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
        };

        if content.trim().is_empty() {
            tracing::debug!(path = %path.display(), "Config file is empty, using defaults");
            return Ok(Self::default());
        }

        if let Ok(raw) = content.parse::<toml::Table>() {
            for key in raw.keys() {
                if !Self::KNOWN_KEYS.contains(&key.as_str()) {
                    tracing::warn!(key = %key, "Unknown key in config file, ignoring");
                }
            }
        }

        let config: Config = toml::from_str(&content)?;
        tracing::info!(
            path = %path.display(),
            commit_mode = ?config.commit_mode,
            "Loaded configuration"
        );
        Ok(config)
    }

    /// Database file, resolved against `config_dir` when not set explicitly.
    pub fn database_path(&self, config_dir: &Path) -> PathBuf {
        self.database_path
            .clone()
            .unwrap_or_else(|| config_dir.join("feeds.db"))
    }

    /// Store settings derived from this configuration.
    pub fn store_options(&self) -> StoreOptions {
        StoreOptions {
            max_connections: self.max_connections.max(1),
            busy_timeout: Duration::from_millis(self.busy_timeout_ms),
            acquire_timeout: Duration::from_secs(self.acquire_timeout_secs),
            commit_mode: self.commit_mode,
            strict_conversion: self.strict_conversion,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.database_path.is_none());
        assert_eq!(config.max_connections, 5);
        assert_eq!(config.busy_timeout_ms, 5000);
        assert_eq!(config.commit_mode, CommitMode::Atomic);
        assert!(!config.strict_conversion);
    }

    #[test]
    fn test_missing_file_returns_default() {
        let path = Path::new("/tmp/feedmirror_test_nonexistent_config.toml");
        let config = Config::load(path).unwrap();
        assert_eq!(config.commit_mode, CommitMode::Atomic);
    }

    #[test]
    fn test_empty_file_returns_default() {
        let dir = std::env::temp_dir().join("feedmirror_config_test_empty");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.toml");
        std::fs::write(&path, "  \n").unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.max_connections, 5);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_full_config() {
        let dir = std::env::temp_dir().join("feedmirror_config_test_full");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.toml");

        let content = r#"
database_path = "/var/lib/feedmirror/feeds.db"
max_connections = 2
busy_timeout_ms = 250
acquire_timeout_secs = 3
commit_mode = "boundaries"
strict_conversion = true
"#;
        std::fs::write(&path, content).unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(
            config.database_path(Path::new("/ignored")),
            PathBuf::from("/var/lib/feedmirror/feeds.db")
        );
        assert_eq!(config.commit_mode, CommitMode::Boundaries);
        assert!(config.strict_conversion);

        let options = config.store_options();
        assert_eq!(options.max_connections, 2);
        assert_eq!(options.busy_timeout, Duration::from_millis(250));
        assert_eq!(options.acquire_timeout, Duration::from_secs(3));

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_default_database_path_is_next_to_config() {
        let config = Config::default();
        assert_eq!(
            config.database_path(Path::new("/home/u/.config/feedmirror")),
            PathBuf::from("/home/u/.config/feedmirror/feeds.db")
        );
    }

    #[test]
    fn test_invalid_commit_mode_returns_error() {
        let dir = std::env::temp_dir().join("feedmirror_config_test_bad_mode");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.toml");
        std::fs::write(&path, "commit_mode = \"sometimes\"\n").unwrap();

        let err = Config::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
        assert!(err.to_string().contains("Invalid TOML"));

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_unknown_keys_accepted() {
        let dir = std::env::temp_dir().join("feedmirror_config_test_unknown");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.toml");
        std::fs::write(&path, "max_connections = 3\ntotally_fake_key = 1\n").unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.max_connections, 3);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_too_large_file_rejected() {
        let dir = std::env::temp_dir().join("feedmirror_config_test_too_large");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.toml");
        std::fs::write(&path, "a".repeat(1_048_577)).unwrap();

        let err = Config::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::TooLarge(_)));
        assert!(err.to_string().contains("too large"));

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_zero_connections_clamped() {
        let config = Config {
            max_connections: 0,
            ..Config::default()
        };
        assert_eq!(config.store_options().max_connections, 1);
    }
}
