#![doc = include_str!("../README.md")]

pub mod error;
pub mod producer;
pub mod relay;
pub mod store;
pub mod task;

pub use error::{Error, Result};
pub use relay::{Completion, RelayConfig, RelayOutcome, RelayReport, Sentinels, StreamRelay};
pub use store::{SharedStore, StoreError};
pub use task::{
    DispatchNotifier, KeyScheme, RequestHeaders, TaskKeys, TaskLease, TaskRecord, TaskRegistry,
};
