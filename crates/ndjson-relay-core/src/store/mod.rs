//! Shared store abstraction.
//!
//! The relay never talks to a producer directly. Both sides meet in a store
//! that offers five primitives: string values with expiry, existence checks,
//! ordered lists with append/pop, publish/subscribe, and a liveness ping.
//! [`SharedStore`] captures exactly that surface so any backend offering it is
//! substitutable.
//!
//! ## Backends
//!
//! - [`memory::MemoryStore`] - in-process store used by tests and benches.
//! - [`redis::RedisStore`] - production backend (feature `redis`).
//!
//! Backends are dumb key-value adapters. Key naming, record encoding and the
//! task lifecycle live in [`crate::task`].

pub mod memory;
#[cfg(feature = "redis")]
pub mod redis;
pub mod target;

use async_trait::async_trait;
use core::time::Duration;
use futures::stream::BoxStream;

pub use memory::MemoryStore;
#[cfg(feature = "redis")]
pub use redis::RedisStore;
pub use target::RedisTarget;

/// Stream of messages received on a subscribed channel.
pub type Subscription = BoxStream<'static, String>;

/// Errors raised by a [`SharedStore`] backend.
#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    /// The connection target could not be parsed.
    #[error("invalid store target `{target}`: {reason}")]
    InvalidTarget { target: String, reason: String },

    /// A list operation hit a plain value key, or the reverse.
    #[error("wrong kind of value at key {key}")]
    WrongType { key: String },

    /// An I/O or backend-specific failure (connection refused, timeout, ...).
    #[error("backend error: {message}")]
    Backend {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

/// The primitives the task lifecycle needs from a key-value/queue store.
///
/// Implementations must be cheap to share behind an `Arc` and safe to call
/// from many relay tasks at once.
#[async_trait]
pub trait SharedStore: Send + Sync + 'static {
    /// Round-trips a no-op command to prove the store is reachable.
    async fn ping(&self) -> Result<(), StoreError>;

    /// Writes `value` at `key`, expiring after `ttl`.
    async fn set_with_expiry(&self, key: &str, value: &str, ttl: Duration)
    -> Result<(), StoreError>;

    /// Reads the value at `key`, if present and unexpired.
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Returns `true` if `key` holds a value or a non-empty list.
    async fn exists(&self, key: &str) -> Result<bool, StoreError>;

    /// Deletes every key in `keys`. Absent keys are ignored; returns how many
    /// keys were actually removed.
    async fn delete(&self, keys: &[&str]) -> Result<usize, StoreError>;

    /// Appends `value` to the tail of the list at `key`, returning the new
    /// length.
    async fn push_back(&self, key: &str, value: &str) -> Result<usize, StoreError>;

    /// Removes and returns the head of the list at `key`. Never blocks.
    async fn pop_front(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Returns the length of the list at `key` (zero when absent).
    async fn list_len(&self, key: &str) -> Result<usize, StoreError>;

    /// Publishes `message` on `channel`, returning how many subscribers
    /// received it. Zero subscribers is not an error.
    async fn publish(&self, channel: &str, message: &str) -> Result<usize, StoreError>;

    /// Subscribes to `channel`. Only messages published after the call
    /// returns are delivered.
    async fn subscribe(&self, channel: &str) -> Result<Subscription, StoreError>;
}
