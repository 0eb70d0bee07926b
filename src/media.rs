//! Media type helpers shared by the webhook sink and the relay.

use regex::Regex;
use std::sync::OnceLock;

/// Form media type, compared against the part before any `;` parameters
pub const FORM_URLENCODED: &str = "application/x-www-form-urlencoded";

/// Returns true if `content_type` names a JSON media type
/// (`application/json`, `application/vnd.api+json`, with or without
/// parameters).
pub fn is_json_content_type(content_type: &str) -> bool {
    static JSON_PATTERN: OnceLock<Regex> = OnceLock::new();
    JSON_PATTERN
        .get_or_init(|| {
            Regex::new(r"^application/(vnd\.api\+)?json.*$").expect("static regex is valid")
        })
        .is_match(content_type)
}

/// Returns true if `content_type` is form-encoded, ignoring parameters and case
pub fn is_form_content_type(content_type: &str) -> bool {
    content_type
        .split(';')
        .next()
        .map(|media| media.trim().eq_ignore_ascii_case(FORM_URLENCODED))
        .unwrap_or(false)
}
