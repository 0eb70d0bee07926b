//! Request body decoding.
//!
//! | Content-Type       | Result                                         |
//! |--------------------|------------------------------------------------|
//! | form-encoded       | key -> list of values; JSON if no pairs parse  |
//! | JSON media type    | parsed value, `{}` when malformed              |
//! | anything else      | `{"body": <text>}`                             |
//!
//! Base64 bodies are decoded first. Bytes that are not UTF-8 are replaced,
//! not rejected.

use super::RelayRequest;
use crate::media::{is_form_content_type, is_json_content_type};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde_json::{json, Map, Value};
use std::borrow::Cow;
use tracing::warn;

/// Decode the request body into a JSON value.
pub fn decode_body(request: &RelayRequest) -> Value {
    let text = body_text(request);
    let content_type = request.header("content-type").unwrap_or("text/plain");

    if is_form_content_type(content_type) {
        let form = parse_form(&text);
        if !form.is_empty() {
            return Value::Object(form);
        }
        return parse_json_or_empty(&text);
    }

    if is_json_content_type(&content_type.to_ascii_lowercase()) {
        return parse_json_or_empty(&text);
    }

    json!({ "body": text })
}

/// The raw body as text, base64-decoded when flagged.
pub fn body_text(request: &RelayRequest) -> Cow<'_, str> {
    let Some(body) = request.body.as_deref() else {
        return Cow::Borrowed("");
    };

    if !request.is_base64_encoded {
        return Cow::Borrowed(body);
    }

    match STANDARD.decode(body.trim()) {
        Ok(bytes) => Cow::Owned(String::from_utf8_lossy(&bytes).into_owned()),
        Err(e) => {
            warn!(error = %e, "Body flagged as base64 but failed to decode, treating as empty");
            Cow::Borrowed("")
        }
    }
}

/// Pairs with empty values are dropped; repeated keys accumulate.
fn parse_form(text: &str) -> Map<String, Value> {
    let mut form = Map::new();

    for (key, value) in url::form_urlencoded::parse(text.as_bytes()) {
        if value.is_empty() {
            continue;
        }
        let entry = form
            .entry(key.into_owned())
            .or_insert_with(|| Value::Array(Vec::new()));
        if let Value::Array(values) = entry {
            values.push(Value::String(value.into_owned()));
        }
    }

    form
}

fn parse_json_or_empty(text: &str) -> Value {
    if text.trim().is_empty() {
        return Value::Object(Map::new());
    }
    serde_json::from_str(text).unwrap_or_else(|e| {
        warn!(error = %e, "Malformed JSON body, using empty object");
        Value::Object(Map::new())
    })
}
