//! Round-robin pool of task workers.
//!
//! Announcements arrive on a single subscription, but a task can take
//! seconds to answer. [`manager::WorkerPool`] hands each announced metadata
//! key to the next worker over a bounded channel, so several tasks are served
//! at once while a burst of announcements applies backpressure to the
//! subscription reader.

pub mod manager;
pub mod request;
pub mod worker;

#[cfg(test)]
mod tests;
