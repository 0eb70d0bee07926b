//! axum surface for the relay.
//!
//! Every path and method lands in one fallback handler that converts the
//! request into a [`RelayRequest`]. Bodies that are not valid UTF-8 are
//! passed on base64-encoded.

use super::{RelayHandler, RelayRequest, RelayResponse};
use axum::{
    body::Bytes,
    extract::State,
    http::{header, HeaderMap, Method, StatusCode, Uri},
    response::{IntoResponse, Response},
    Router,
};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use std::sync::Arc;
use tracing::debug;

/// Build the axum app around `handler`.
pub fn app(handler: RelayHandler) -> Router {
    Router::new()
        .fallback(relay_entry)
        .with_state(Arc::new(handler))
}

async fn relay_entry(
    State(handler): State<Arc<RelayHandler>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let request = to_relay_request(&method, &uri, &headers, body);
    debug!(method = %request.method, path = %request.path, "Relay request");
    into_http(handler.handle(request).await)
}

fn to_relay_request(method: &Method, uri: &Uri, headers: &HeaderMap, body: Bytes) -> RelayRequest {
    let mut request = RelayRequest::new(method.as_str(), uri.path());

    for (name, value) in headers {
        // Non-visible-ASCII header values are dropped
        if let Ok(value) = value.to_str() {
            request.headers.insert(name.as_str().to_string(), value.to_string());
        }
    }

    if let Some(query) = uri.query() {
        request.query = url::form_urlencoded::parse(query.as_bytes())
            .into_owned()
            .collect();
    }

    if !body.is_empty() {
        match String::from_utf8(body.to_vec()) {
            Ok(text) => request.body = Some(text),
            Err(_) => {
                request.body = Some(STANDARD.encode(&body));
                request.is_base64_encoded = true;
            }
        }
    }

    request
}

fn into_http(response: RelayResponse) -> Response {
    let status = StatusCode::from_u16(response.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (
        status,
        [(header::CONTENT_TYPE, response.content_type)],
        response.body,
    )
        .into_response()
}
