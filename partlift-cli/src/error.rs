//! CLI error type.

use partlift::config::ConfigError;
use partlift::logging::LoggingError;
use partlift::{StoreError, TransferError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error("{0}")]
    Config(String),

    #[error(transparent)]
    ConfigFile(#[from] ConfigError),

    #[error("failed to open store: {0}")]
    Store(#[from] StoreError),

    #[error(transparent)]
    Transfer(#[from] TransferError),

    #[error("failed to initialize logging: {0}")]
    Logging(#[from] LoggingError),
}

impl CliError {
    /// Hint printed after the error message, if any.
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            CliError::Transfer(TransferError::Incomplete(_)) => {
                Some("Committed parts were checkpointed. Run the same command again to resume.")
            }
            CliError::Transfer(TransferError::NotFound { .. }) => {
                Some("Check the object key, or list stored objects under the store root.")
            }
            _ => None,
        }
    }
}
