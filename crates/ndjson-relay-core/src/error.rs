//! Error types for the relay core.
//!
//! This module defines the central [`Error`] enum, which captures every
//! recoverable and reportable failure in the task lifecycle. Store-level
//! failures are wrapped from [`StoreError`] so callers can tell "the shared
//! store is unreachable" apart from protocol misuse.
//!
//! ## Error Cases
//! - `Store`: the shared store rejected or failed an operation.
//! - `MalformedRecord`: a task's metadata record could not be decoded.
//! - `Encode`: a producer's output value could not be serialized.
//! - `Handler`: a producer's task handler reported a failure.
//! - `ReservedValue`: a producer tried to emit a termination sentinel as data.
//! - `TaskGone`: a producer wrote to a task whose relay already tore it down.
//! - `InvalidConfig`: a configuration value failed validation.
//! - `ChannelError`: an internal communication failure between tasks.
//! - `ServiceShutdown`: work arrived while the service was shutting down.

use crate::store::StoreError;

pub type Result<T> = core::result::Result<T, Error>;

/// Unified error type for the relay core.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The shared store failed an operation.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// A metadata record exists but is not a valid task record.
    #[error("Malformed task record at {key}: {source}")]
    MalformedRecord {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    /// An output value could not be encoded as JSON.
    #[error("Failed to encode output line: {0}")]
    Encode(#[from] serde_json::Error),

    /// A producer's task handler failed.
    #[error("Task handler failed: {reason}")]
    Handler { reason: String },

    /// A termination sentinel was passed where output data was expected.
    #[error("Reserved value cannot be emitted as output: {0}")]
    ReservedValue(String),

    /// The task's metadata record vanished while a producer was writing.
    #[error("Task {key} is gone, output discarded")]
    TaskGone { key: String },

    /// A configuration value was rejected.
    #[error("Invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    /// Internal channel send/receive failure (e.g., closed channel).
    #[error("Channel error: {context}")]
    ChannelError { context: String },

    /// The service is in the process of shutting down.
    #[error("Service is shutting down")]
    ServiceShutdown,
}

impl Error {
    /// Returns `true` if the error means the shared store could not be
    /// reached, as opposed to a problem with the request itself.
    pub const fn is_store_unavailable(&self) -> bool {
        matches!(self, Self::Store(_))
    }
}
