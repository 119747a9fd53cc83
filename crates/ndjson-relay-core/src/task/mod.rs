//! Task lifecycle: identity, the metadata record, registration and
//! announcement.
//!
//! A task is two store keys derived from one UUID. The metadata key holds a
//! JSON [`TaskRecord`] and doubles as the liveness signal; the output key is
//! a list the producer appends NDJSON lines to. [`TaskRegistry`] creates and
//! deletes them, handing out a [`TaskLease`] that guarantees the delete
//! happens. [`DispatchNotifier`] tells producers a task is waiting.

mod notifier;
mod registry;
mod types;

pub use notifier::{DEFAULT_CHANNEL, DispatchNotifier};
pub use registry::{DEFAULT_TASK_TTL, TaskLease, TaskRegistry};
pub use types::{
    DEFAULT_KEY_PREFIX, DEFAULT_LIST_PREFIX, KeyScheme, RequestHeaders, TaskKeys, TaskRecord,
};
