//! partlift - resumable multipart transfers for object stores
//!
//! Large objects move in fixed-size parts, several at a time. Every
//! committed part is checkpointed on disk, so an interrupted upload or
//! download picks up where it stopped instead of starting over.
//!
//! The building blocks, leaves first:
//!
//! - [`plan()`]: part layout for a size and part length
//! - [`RetryPolicy`]: bounded retries for transient part failures
//! - [`TransferWorkerPool`]: bounded concurrency with one aggregation point
//! - [`UploadSession`] / [`DownloadSession`]: the transfer state machines
//! - [`CheckpointManager`]: persisted progress
//! - [`Transfer`]: the facade most callers want
//!
//! Stores plug in through the [`ObjectStore`] trait; [`FsObjectStore`] and
//! [`MemoryObjectStore`] are bundled.

pub mod config;
pub mod error;
pub mod logging;
pub mod plan;
pub mod retry;
pub mod store;
pub mod transfer;

pub use config::{AbortPolicy, ConfigFile, ConfigKey, TransferConfig};
pub use error::{IncompleteTransfer, TransferError, TransferResult};
pub use logging::{init_logging, LoggingConfig, LoggingGuard};
pub use plan::{plan, PartDescriptor};
pub use retry::RetryPolicy;
pub use store::{FsObjectStore, MemoryObjectStore, ObjectInfo, ObjectStore, StoreError};
pub use transfer::{
    generate_object_key, CheckpointManager, Direction, DownloadSession, DownloadState, Flow,
    PartResult, PartStatus, Transfer, TransferReport, TransferSpec, TransferWorkerPool,
    UploadSession, UploadState,
};
