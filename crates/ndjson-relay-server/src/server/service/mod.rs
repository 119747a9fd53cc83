//! Stream service implementation and relay coordination.
//!
//! This module owns the per-request lifecycle: registering a task, announcing
//! it to producers, and running the relay that streams its output back.
//!
//! ## Structure
//!
//! - [`handler`] - stream service entry point (`RelayService`).

pub mod handler;
