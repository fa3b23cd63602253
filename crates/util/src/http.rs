//! # HTTP Utilities
//!
//! Small helpers shared by the HTTP agent and the CLI for inspecting response
//! bodies and content types.

use reqwest::StatusCode;
use serde_json::Value;

/// Parse response text as JSON, returning `None` when the body is not JSON.
///
/// # Example
/// ```rust
/// use courier_util::http::parse_response_json;
///
/// let json = parse_response_json(r#"{"name": "myapp"}"#);
/// assert!(json.is_some());
///
/// let json = parse_response_json("invalid json");
/// assert!(json.is_none());
/// ```
pub fn parse_response_json(text: &str) -> Option<Value> {
    serde_json::from_str::<Value>(text).ok()
}

/// Canonical reason phrase for a status code, e.g. `Not Found` for 404.
pub fn status_reason(status_code: u16) -> Option<&'static str> {
    StatusCode::from_u16(status_code).ok().and_then(|status| status.canonical_reason())
}

/// True for `application/json` and `+json` media types.
pub fn is_json_content_type(content_type: &str) -> bool {
    let media_type = content_type.split(';').next().unwrap_or_default().trim().to_ascii_lowercase();
    media_type == "application/json" || media_type.ends_with("+json")
}

/// Collapse whitespace and truncate a body to roughly `limit` bytes for logging.
pub fn body_preview(text: &str, limit: usize) -> String {
    if text.trim().is_empty() {
        return "<empty>".to_string();
    }

    let mut preview = String::new();
    for ch in text.chars() {
        if preview.len() >= limit {
            preview.push_str("...");
            break;
        }
        match ch {
            '\n' | '\r' | '\t' => {
                if !preview.ends_with(' ') {
                    preview.push(' ');
                }
            }
            _ => preview.push(ch),
        }
    }

    preview.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_content_types() {
        assert!(is_json_content_type("application/json"));
        assert!(is_json_content_type("application/json; charset=utf-8"));
        assert!(is_json_content_type("application/problem+json"));
        assert!(!is_json_content_type("text/html"));
    }

    #[test]
    fn preview_collapses_and_truncates() {
        assert_eq!(body_preview("  \n ", 10), "<empty>");
        assert_eq!(body_preview("a\n\nb", 10), "a b");
        assert_eq!(body_preview("abcdefghij", 4), "abcd...");
    }

    #[test]
    fn reason_phrases() {
        assert_eq!(status_reason(404), Some("Not Found"));
        assert_eq!(status_reason(0), None);
    }
}
