//! Configuration for transfers.
//!
//! [`TransferConfig`] is the runtime configuration handed to the transfer
//! engine. [`ConfigFile`] is its persisted INI form, plus store and logging
//! settings used by the command-line front end.

mod file;
mod size;

pub use file::{config_file_path, ConfigError, ConfigFile, ConfigKey};
pub use size::{format_size, parse_size};

use std::path::PathBuf;

use crate::error::{TransferError, TransferResult};
use crate::retry::RetryPolicy;

/// Default part size (1 MiB).
pub const DEFAULT_PART_SIZE: u64 = 1024 * 1024;

/// Default number of parts in flight per session.
pub const DEFAULT_CONCURRENCY: usize = 3;

/// What an aborted upload leaves behind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AbortPolicy {
    /// Keep the checkpoint and the store-side upload so a later run can
    /// resume from the committed parts.
    #[default]
    RetainCheckpoint,
    /// Abort the upload on the store and delete the checkpoint.
    Discard,
}

impl AbortPolicy {
    /// Name used in the config file.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RetainCheckpoint => "retain",
            Self::Discard => "discard",
        }
    }

    /// Parse the config file name.
    pub fn from_config_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "retain" => Some(Self::RetainCheckpoint),
            "discard" => Some(Self::Discard),
            _ => None,
        }
    }
}

/// Runtime configuration for upload and download sessions.
#[derive(Debug, Clone)]
pub struct TransferConfig {
    /// Size of every part except possibly the last.
    pub part_size: u64,

    /// Maximum parts in flight at once. 1 runs parts one after another.
    pub concurrency: usize,

    /// Retry behaviour for transient part failures.
    pub retry: RetryPolicy,

    /// What an aborted upload does with its checkpoint.
    pub abort_policy: AbortPolicy,

    /// Objects smaller than this are uploaded with a single put.
    ///
    /// 0 disables the single-shot path, so every upload is multipart.
    pub single_shot_threshold: u64,

    /// Directory holding checkpoint records.
    pub checkpoint_dir: PathBuf,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            part_size: DEFAULT_PART_SIZE,
            concurrency: DEFAULT_CONCURRENCY,
            retry: RetryPolicy::default(),
            abort_policy: AbortPolicy::default(),
            single_shot_threshold: 0,
            checkpoint_dir: default_checkpoint_dir(),
        }
    }
}

impl TransferConfig {
    /// Configuration with checkpoints stored under `checkpoint_dir`.
    pub fn new(checkpoint_dir: PathBuf) -> Self {
        Self {
            checkpoint_dir,
            ..Default::default()
        }
    }

    /// Set the part size.
    pub fn with_part_size(mut self, part_size: u64) -> Self {
        self.part_size = part_size;
        self
    }

    /// Set the number of parts in flight.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    /// Set the retry policy.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Set the abort policy.
    pub fn with_abort_policy(mut self, policy: AbortPolicy) -> Self {
        self.abort_policy = policy;
        self
    }

    /// Set the single-shot threshold.
    pub fn with_single_shot_threshold(mut self, threshold: u64) -> Self {
        self.single_shot_threshold = threshold;
        self
    }

    /// Check the configuration before starting a session.
    pub fn validate(&self) -> TransferResult<()> {
        if self.part_size == 0 {
            return Err(TransferError::InvalidConfig(
                "part size must be greater than zero".to_string(),
            ));
        }
        if self.concurrency == 0 {
            return Err(TransferError::InvalidConfig(
                "concurrency must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Default checkpoint directory (`<data dir>/partlift/checkpoints`).
pub fn default_checkpoint_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("partlift")
        .join("checkpoints")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = TransferConfig::default();
        assert_eq!(config.part_size, DEFAULT_PART_SIZE);
        assert_eq!(config.concurrency, DEFAULT_CONCURRENCY);
        assert_eq!(config.abort_policy, AbortPolicy::RetainCheckpoint);
        assert_eq!(config.single_shot_threshold, 0);
        assert!(config.checkpoint_dir.ends_with("partlift/checkpoints"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder() {
        let config = TransferConfig::new(PathBuf::from("/tmp/cp"))
            .with_part_size(5 * 1024 * 1024)
            .with_concurrency(8)
            .with_retry(RetryPolicy::None)
            .with_abort_policy(AbortPolicy::Discard)
            .with_single_shot_threshold(1024);

        assert_eq!(config.checkpoint_dir, PathBuf::from("/tmp/cp"));
        assert_eq!(config.part_size, 5 * 1024 * 1024);
        assert_eq!(config.concurrency, 8);
        assert_eq!(config.retry, RetryPolicy::None);
        assert_eq!(config.abort_policy, AbortPolicy::Discard);
        assert_eq!(config.single_shot_threshold, 1024);
    }

    #[test]
    fn test_validate_rejects_zero_values() {
        let zero_part = TransferConfig::default().with_part_size(0);
        assert!(matches!(
            zero_part.validate(),
            Err(TransferError::InvalidConfig(_))
        ));

        let zero_workers = TransferConfig::default().with_concurrency(0);
        assert!(zero_workers.validate().is_err());
    }

    #[test]
    fn test_abort_policy_names() {
        for policy in [AbortPolicy::RetainCheckpoint, AbortPolicy::Discard] {
            assert_eq!(AbortPolicy::from_config_str(policy.as_str()), Some(policy));
        }
        assert_eq!(AbortPolicy::from_config_str(" Discard "), Some(AbortPolicy::Discard));
        assert_eq!(AbortPolicy::from_config_str("maybe"), None);
    }
}
