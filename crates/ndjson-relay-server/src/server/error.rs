use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use ndjson_relay_core::Error;

/// Request-level failures and the HTTP responses they map to.
#[derive(thiserror::Error, Debug)]
pub enum ApiError {
    /// The shared store could not be reached or rejected the task.
    #[error("event-driver unavailable: {0}")]
    StoreUnavailable(#[source] Error),

    /// The server stopped accepting new streams.
    #[error("service shutting down")]
    ShuttingDown,
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        match err {
            Error::ServiceShutdown => Self::ShuttingDown,
            other => Self::StoreUnavailable(other),
        }
    }
}

impl ApiError {
    pub const fn status(&self) -> StatusCode {
        match self {
            Self::StoreUnavailable(_) => StatusCode::GATEWAY_TIMEOUT,
            Self::ShuttingDown => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    fn public_message(&self) -> &'static str {
        match self {
            Self::StoreUnavailable(_) => "event-driver unavailable",
            Self::ShuttingDown => "service shutting down",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match &self {
            Self::StoreUnavailable(e) => tracing::error!("Rejecting request: {e}"),
            Self::ShuttingDown => tracing::debug!("Rejecting request during shutdown"),
        }

        let body = format!("{{\"error\": \"{}\"}}\n", self.public_message());
        (
            self.status(),
            [(header::CONTENT_TYPE, "application/json")],
            body,
        )
            .into_response()
    }
}
