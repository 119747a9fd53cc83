//! Server-side components of ndjson-relay.
//!
//! ## Submodules
//!
//! - [`config`] - CLI/environment configuration and validation.
//! - [`error`] - HTTP error responses.
//! - [`routes`] - the axum router.
//! - [`service`] - task registration and relay coordination.
//! - [`telemetry`] - logging and optional OpenTelemetry export.
//!
//! These components are wired together in the server's `main.rs`.

pub mod config;
pub mod error;
pub mod routes;
pub mod service;
pub mod telemetry;
