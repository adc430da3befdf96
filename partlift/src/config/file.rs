//! INI configuration file.
//!
//! # Example
//!
//! ```ini
//! [transfer]
//! part_size = 8MiB
//! concurrency = 4
//! max_attempts = 3
//! retry_delay_ms = 100
//! abort_policy = retain
//! single_shot_threshold = 0
//! checkpoint_dir = /var/lib/partlift/checkpoints
//!
//! [store]
//! root = /srv/blobs
//!
//! [logging]
//! level = info
//! file = /var/log/partlift.log
//! ```
//!
//! Missing keys fall back to defaults; unknown keys are ignored on load.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use ini::Ini;
use thiserror::Error;

use super::{
    default_checkpoint_dir, format_size, parse_size, AbortPolicy, TransferConfig,
    DEFAULT_CONCURRENCY, DEFAULT_PART_SIZE,
};
use crate::logging::LoggingConfig;
use crate::retry::{RetryPolicy, DEFAULT_MAX_ATTEMPTS, DEFAULT_MAX_DELAY_SECS};

const CONFIG_DIR_NAME: &str = "partlift";
const CONFIG_FILE_NAME: &str = "config.ini";

/// Errors loading, saving or editing the configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {}: {reason}", path.display())]
    Read { path: PathBuf, reason: String },

    #[error("failed to write config file {}: {source}", path.display())]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid value for {key}: {value:?} ({reason})")]
    InvalidValue {
        key: String,
        value: String,
        reason: String,
    },

    #[error("unknown configuration key: {0}")]
    UnknownKey(String),
}

/// `[transfer]` section.
#[derive(Debug, Clone, PartialEq)]
pub struct TransferSettings {
    pub part_size: u64,
    pub concurrency: usize,
    pub max_attempts: u32,
    /// Initial backoff delay; 0 retries immediately.
    pub retry_delay_ms: u64,
    pub abort_policy: AbortPolicy,
    pub single_shot_threshold: u64,
    pub checkpoint_dir: Option<PathBuf>,
}

impl Default for TransferSettings {
    fn default() -> Self {
        Self {
            part_size: DEFAULT_PART_SIZE,
            concurrency: DEFAULT_CONCURRENCY,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            retry_delay_ms: crate::retry::DEFAULT_INITIAL_DELAY_MS,
            abort_policy: AbortPolicy::default(),
            single_shot_threshold: 0,
            checkpoint_dir: None,
        }
    }
}

/// `[store]` section.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StoreSettings {
    /// Root directory of the directory-backed store.
    pub root: Option<PathBuf>,
}

/// `[logging]` section.
#[derive(Debug, Clone, PartialEq)]
pub struct LoggingSettings {
    pub level: String,
    pub file: Option<PathBuf>,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
        }
    }
}

/// Parsed configuration file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigFile {
    pub transfer: TransferSettings,
    pub store: StoreSettings,
    pub logging: LoggingSettings,
}

/// Default configuration file location (`<config dir>/partlift/config.ini`).
pub fn config_file_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(CONFIG_DIR_NAME)
        .join(CONFIG_FILE_NAME)
}

impl ConfigFile {
    /// Load from the default location. A missing file yields defaults.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&config_file_path())
    }

    /// Load from `path`. A missing file yields defaults.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let ini = Ini::load_from_file(path).map_err(|e| ConfigError::Read {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        Self::from_ini(&ini)
    }

    fn from_ini(ini: &Ini) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        for key in ConfigKey::all() {
            let value = ini
                .section(Some(key.section()))
                .and_then(|props| props.get(key.key_name()));
            if let Some(value) = value {
                key.set(&mut config, value)?;
            }
        }
        Ok(config)
    }

    /// Save to the default location.
    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(&config_file_path())
    }

    /// Save to `path`, creating parent directories.
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        let write_err = |source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(write_err)?;
        }

        let mut ini = Ini::new();
        for key in ConfigKey::all() {
            let value = key.get(self);
            if !value.is_empty() {
                ini.with_section(Some(key.section()))
                    .set(key.key_name(), value);
            }
        }
        ini.write_to_file(path).map_err(write_err)
    }

    /// Runtime transfer configuration described by this file.
    pub fn to_transfer_config(&self) -> TransferConfig {
        let t = &self.transfer;
        let retry = if t.max_attempts <= 1 {
            RetryPolicy::None
        } else if t.retry_delay_ms == 0 {
            RetryPolicy::fixed(t.max_attempts, Duration::ZERO)
        } else {
            RetryPolicy::ExponentialBackoff {
                max_attempts: t.max_attempts,
                initial_delay: Duration::from_millis(t.retry_delay_ms),
                max_delay: Duration::from_secs(DEFAULT_MAX_DELAY_SECS),
                multiplier: crate::retry::DEFAULT_BACKOFF_MULTIPLIER,
            }
        };

        TransferConfig {
            part_size: t.part_size,
            concurrency: t.concurrency,
            retry,
            abort_policy: t.abort_policy,
            single_shot_threshold: t.single_shot_threshold,
            checkpoint_dir: t
                .checkpoint_dir
                .clone()
                .unwrap_or_else(default_checkpoint_dir),
        }
    }

    /// Logging configuration described by this file.
    pub fn to_logging_config(&self) -> LoggingConfig {
        LoggingConfig {
            level: self.logging.level.clone(),
            file: self.logging.file.clone(),
            ..LoggingConfig::default()
        }
    }
}

/// A settable configuration key, addressed as `section.key`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigKey {
    TransferPartSize,
    TransferConcurrency,
    TransferMaxAttempts,
    TransferRetryDelayMs,
    TransferAbortPolicy,
    TransferSingleShotThreshold,
    TransferCheckpointDir,
    StoreRoot,
    LoggingLevel,
    LoggingFile,
}

impl ConfigKey {
    /// Every key, in file order.
    pub fn all() -> &'static [ConfigKey] {
        &[
            Self::TransferPartSize,
            Self::TransferConcurrency,
            Self::TransferMaxAttempts,
            Self::TransferRetryDelayMs,
            Self::TransferAbortPolicy,
            Self::TransferSingleShotThreshold,
            Self::TransferCheckpointDir,
            Self::StoreRoot,
            Self::LoggingLevel,
            Self::LoggingFile,
        ]
    }

    /// INI section name.
    pub fn section(&self) -> &'static str {
        match self {
            Self::TransferPartSize
            | Self::TransferConcurrency
            | Self::TransferMaxAttempts
            | Self::TransferRetryDelayMs
            | Self::TransferAbortPolicy
            | Self::TransferSingleShotThreshold
            | Self::TransferCheckpointDir => "transfer",
            Self::StoreRoot => "store",
            Self::LoggingLevel | Self::LoggingFile => "logging",
        }
    }

    /// Key name within the section.
    pub fn key_name(&self) -> &'static str {
        match self {
            Self::TransferPartSize => "part_size",
            Self::TransferConcurrency => "concurrency",
            Self::TransferMaxAttempts => "max_attempts",
            Self::TransferRetryDelayMs => "retry_delay_ms",
            Self::TransferAbortPolicy => "abort_policy",
            Self::TransferSingleShotThreshold => "single_shot_threshold",
            Self::TransferCheckpointDir => "checkpoint_dir",
            Self::StoreRoot => "root",
            Self::LoggingLevel => "level",
            Self::LoggingFile => "file",
        }
    }

    /// Full `section.key` name.
    pub fn name(&self) -> String {
        format!("{}.{}", self.section(), self.key_name())
    }

    /// Current value as a string (empty when unset).
    pub fn get(&self, config: &ConfigFile) -> String {
        let path_str = |p: &Option<PathBuf>| {
            p.as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_default()
        };
        match self {
            Self::TransferPartSize => format_size(config.transfer.part_size),
            Self::TransferConcurrency => config.transfer.concurrency.to_string(),
            Self::TransferMaxAttempts => config.transfer.max_attempts.to_string(),
            Self::TransferRetryDelayMs => config.transfer.retry_delay_ms.to_string(),
            Self::TransferAbortPolicy => config.transfer.abort_policy.as_str().to_string(),
            Self::TransferSingleShotThreshold => {
                format_size(config.transfer.single_shot_threshold)
            }
            Self::TransferCheckpointDir => path_str(&config.transfer.checkpoint_dir),
            Self::StoreRoot => path_str(&config.store.root),
            Self::LoggingLevel => config.logging.level.clone(),
            Self::LoggingFile => path_str(&config.logging.file),
        }
    }

    /// Parse and store `value`.
    pub fn set(&self, config: &mut ConfigFile, value: &str) -> Result<(), ConfigError> {
        let invalid = |reason: &str| ConfigError::InvalidValue {
            key: self.name(),
            value: value.to_string(),
            reason: reason.to_string(),
        };
        let optional_path = |v: &str| {
            let v = v.trim();
            (!v.is_empty()).then(|| PathBuf::from(v))
        };

        match self {
            Self::TransferPartSize => {
                let size = parse_size(value).ok_or_else(|| invalid("expected a size"))?;
                if size == 0 {
                    return Err(invalid("must be greater than zero"));
                }
                config.transfer.part_size = size;
            }
            Self::TransferConcurrency => {
                let n: usize = value
                    .trim()
                    .parse()
                    .map_err(|_| invalid("expected a whole number"))?;
                if n == 0 {
                    return Err(invalid("must be at least 1"));
                }
                config.transfer.concurrency = n;
            }
            Self::TransferMaxAttempts => {
                let n: u32 = value
                    .trim()
                    .parse()
                    .map_err(|_| invalid("expected a whole number"))?;
                if n == 0 {
                    return Err(invalid("must be at least 1"));
                }
                config.transfer.max_attempts = n;
            }
            Self::TransferRetryDelayMs => {
                config.transfer.retry_delay_ms = value
                    .trim()
                    .parse()
                    .map_err(|_| invalid("expected milliseconds"))?;
            }
            Self::TransferAbortPolicy => {
                config.transfer.abort_policy = AbortPolicy::from_config_str(value)
                    .ok_or_else(|| invalid("expected 'retain' or 'discard'"))?;
            }
            Self::TransferSingleShotThreshold => {
                config.transfer.single_shot_threshold =
                    parse_size(value).ok_or_else(|| invalid("expected a size"))?;
            }
            Self::TransferCheckpointDir => config.transfer.checkpoint_dir = optional_path(value),
            Self::StoreRoot => config.store.root = optional_path(value),
            Self::LoggingLevel => {
                let level = value.trim().to_lowercase();
                if level.is_empty() {
                    return Err(invalid("must not be empty"));
                }
                config.logging.level = level;
            }
            Self::LoggingFile => config.logging.file = optional_path(value),
        }
        Ok(())
    }
}

impl fmt::Display for ConfigKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.section(), self.key_name())
    }
}

impl FromStr for ConfigKey {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase();
        Self::all()
            .iter()
            .copied()
            .find(|k| k.name() == wanted)
            .ok_or_else(|| ConfigError::UnknownKey(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_gives_defaults() {
        let temp = TempDir::new().unwrap();
        let config = ConfigFile::load_from(&temp.path().join("absent.ini")).unwrap();
        assert_eq!(config, ConfigFile::default());
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("nested").join("config.ini");

        let mut config = ConfigFile::default();
        config.transfer.part_size = 8 * 1024 * 1024;
        config.transfer.concurrency = 6;
        config.transfer.abort_policy = AbortPolicy::Discard;
        config.store.root = Some(PathBuf::from("/srv/blobs"));
        config.logging.level = "debug".to_string();

        config.save_to(&path).unwrap();
        let loaded = ConfigFile::load_from(&path).unwrap();

        assert_eq!(loaded, config);
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("part_size=8MiB") || text.contains("part_size = 8MiB"));
    }

    #[test]
    fn test_load_rejects_bad_value() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.ini");
        std::fs::write(&path, "[transfer]\nconcurrency = many\n").unwrap();

        let err = ConfigFile::load_from(&path).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
        assert!(err.to_string().contains("transfer.concurrency"));
    }

    #[test]
    fn test_key_parse_and_display() {
        let key: ConfigKey = "transfer.part_size".parse().unwrap();
        assert_eq!(key, ConfigKey::TransferPartSize);
        assert_eq!(key.to_string(), "transfer.part_size");
        assert!("transfer.nope".parse::<ConfigKey>().is_err());
    }

    #[test]
    fn test_key_set_get() {
        let mut config = ConfigFile::default();

        ConfigKey::TransferPartSize.set(&mut config, "16M").unwrap();
        assert_eq!(ConfigKey::TransferPartSize.get(&config), "16MiB");

        ConfigKey::StoreRoot.set(&mut config, "/data").unwrap();
        assert_eq!(ConfigKey::StoreRoot.get(&config), "/data");
        ConfigKey::StoreRoot.set(&mut config, "").unwrap();
        assert_eq!(config.store.root, None);

        assert!(ConfigKey::TransferPartSize.set(&mut config, "0").is_err());
        assert!(ConfigKey::TransferConcurrency.set(&mut config, "0").is_err());
        assert!(ConfigKey::TransferAbortPolicy.set(&mut config, "later").is_err());
    }

    #[test]
    fn test_to_transfer_config() {
        let mut config = ConfigFile::default();
        config.transfer.max_attempts = 4;
        config.transfer.retry_delay_ms = 0;
        config.transfer.checkpoint_dir = Some(PathBuf::from("/tmp/cps"));

        let runtime = config.to_transfer_config();
        assert_eq!(runtime.retry, RetryPolicy::fixed(4, Duration::ZERO));
        assert_eq!(runtime.checkpoint_dir, PathBuf::from("/tmp/cps"));

        config.transfer.max_attempts = 1;
        assert_eq!(config.to_transfer_config().retry, RetryPolicy::None);
    }
}
