//! The stream relay: a polling state machine that forwards a task's output
//! list to an HTTP client as newline-delimited JSON.
//!
//! ```text
//!            list empty, record present, not idle
//!               +----------------------+
//!               v                      |
//!   start -> POLLING --(queued > 0)--> DRAINING(n) --(n popped)--> POLLING
//!               |                      |
//!               | record gone,         | sentinel
//!               | list empty           v
//!               +------------------> DONE ------+
//!               |                               |
//!               | idle > max_idle_time          v
//!               +------------------> TIMED_OUT -> CLOSED (keys deleted)
//! ```
//!
//! A client disconnect or server shutdown jumps straight to CLOSED from any
//! state.

mod config;
mod coordinator;

pub use config::{
    DEFAULT_LINE_PAUSE, DEFAULT_MAX_IDLE_TIME, DEFAULT_POLL_INTERVAL, DEFAULT_SENTINELS,
    RelayConfig, Sentinels,
};
pub use coordinator::{Completion, RelayOutcome, RelayReport, StreamRelay, frame_line};
