use crate::server::{error::ApiError, service::handler::RelayService};
use axum::{
    Router,
    body::{Body, Bytes},
    extract::State,
    http::{HeaderMap, HeaderName, Method, StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use core::convert::Infallible;
use futures::StreamExt;
use ndjson_relay_core::RequestHeaders;
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

pub const X_TASK_UUID: HeaderName = HeaderName::from_static("x-task-uuid");
pub const X_TASK_KEY: HeaderName = HeaderName::from_static("x-task-key");
pub const X_TASK_LIST: HeaderName = HeaderName::from_static("x-task-list");
const X_ACCEL_BUFFERING: HeaderName = HeaderName::from_static("x-accel-buffering");

pub const NDJSON_CONTENT_TYPE: &str = "application/x-ndjson";

/// Builds the HTTP surface: `GET /ping` plus a catch-all that opens a stream
/// for any other path.
pub fn router(service: RelayService) -> Router {
    Router::new()
        .route("/ping", get(ping))
        .fallback(stream)
        .with_state(service)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(
                    CorsLayer::new()
                        .allow_origin(Any)
                        .allow_methods(Any)
                        .allow_headers(Any)
                        .expose_headers([X_TASK_UUID, X_TASK_KEY, X_TASK_LIST]),
                ),
        )
}

async fn ping(State(service): State<RelayService>) -> Response {
    match service.ping().await {
        Ok(()) => (StatusCode::OK, "pong\n").into_response(),
        Err(e) => {
            tracing::warn!("Store ping failed: {e}");
            (StatusCode::INTERNAL_SERVER_ERROR, "Redis connection failed\n").into_response()
        }
    }
}

async fn stream(
    State(service): State<RelayService>,
    method: Method,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    if !matches!(
        method,
        Method::GET | Method::POST | Method::PUT | Method::DELETE | Method::PATCH
    ) {
        return Ok(StatusCode::METHOD_NOT_ALLOWED.into_response());
    }

    let body = match String::from_utf8(body.to_vec()) {
        Ok(body) => body,
        Err(e) => {
            tracing::warn!("Request body is not UTF-8, forwarding it empty: {e}");
            String::new()
        }
    };

    let opened = service.open_stream(request_headers(&headers), body).await?;
    let keys = opened.keys;
    tracing::debug!(task = %keys.id, "Stream opened");

    let response_headers = [
        (header::CONTENT_TYPE, NDJSON_CONTENT_TYPE.to_string()),
        (header::CACHE_CONTROL, "no-cache".to_string()),
        (X_ACCEL_BUFFERING, "no".to_string()),
        (X_TASK_UUID, keys.id),
        (X_TASK_KEY, keys.metadata_key),
        (X_TASK_LIST, keys.output_key),
    ];
    let body = Body::from_stream(opened.body.map(Ok::<_, Infallible>));
    Ok((response_headers, body).into_response())
}

/// Copies request headers in arrival order. Values that are not valid UTF-8
/// are decoded lossily.
fn request_headers(headers: &HeaderMap) -> RequestHeaders {
    headers
        .iter()
        .map(|(name, value)| {
            (
                name.as_str().to_string(),
                String::from_utf8_lossy(value.as_bytes()).into_owned(),
            )
        })
        .collect()
}
