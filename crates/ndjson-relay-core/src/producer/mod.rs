//! The producer side of the protocol.
//!
//! A producer may be written in any language. It must:
//!
//! 1. subscribe to the dispatch channel and treat each message as a metadata
//!    key;
//! 2. read the JSON record at that key, skipping it if the key is gone;
//! 3. append zero or more single-line JSON values to the record's
//!    `task_list`, in order;
//! 4. append exactly one termination sentinel when done, even after a
//!    failure.
//!
//! [`Producer`] implements these rules for Rust workers; a [`TaskHandler`]
//! only has to produce the lines.

mod contract;
mod runner;

pub use contract::{OutputSink, TaskHandler};
pub use runner::{ProcessOutcome, Producer};

#[cfg(test)]
mod tests;
