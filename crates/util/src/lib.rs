//! Utility helpers shared by the Courier crates.

use once_cell::sync::Lazy;
use regex::Regex;

pub mod http;
pub mod path_processing;
pub mod settings;

pub use path_processing::expand_tilde;
pub use settings::{EngineSettings, SettingsError};

/// Header names whose values are always masked in logs and previews.
const SENSITIVE_HEADERS: &[&str] = &[
    "authorization",
    "proxy-authorization",
    "cookie",
    "set-cookie",
    "x-api-key",
    "api-key",
    "x-auth-token",
];

static SENSITIVE_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(?i)(authorization: )([\w\-\.=:/+ ]+)",
        r"(?i)([A-Z0-9_]*?(KEY|TOKEN|SECRET|PASSWORD)=)([^\s&]+)",
        r"(?i)((access_token|api_key|apikey|token)=)([^\s&]+)",
    ]
    .iter()
    .filter_map(|pattern| Regex::new(pattern).ok())
    .collect()
});

/// Redacts values that look like secrets in a string.
pub fn redact_sensitive(input: &str) -> String {
    let mut redacted = input.to_string();
    for re in SENSITIVE_PATTERNS.iter() {
        redacted = re
            .replace_all(&redacted, |caps: &regex::Captures| {
                let prefix = caps.get(1).map(|m| m.as_str()).unwrap_or("");
                format!("{}<redacted>", prefix)
            })
            .to_string();
    }
    redacted
}

/// Redacts a header value when the header name is known to carry credentials;
/// otherwise falls back to pattern-based redaction of the value.
pub fn redact_header_value(name: &str, value: &str) -> String {
    if SENSITIVE_HEADERS.iter().any(|header| header.eq_ignore_ascii_case(name.trim())) {
        return "<redacted>".to_string();
    }
    redact_sensitive(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redacts_authorization_lines() {
        let redacted = redact_sensitive("Authorization: Bearer abc.def");
        assert_eq!(redacted, "Authorization: <redacted>");
    }

    #[test]
    fn redacts_query_tokens() {
        let redacted = redact_sensitive("https://api.x/ping?api_key=s3cr3t&page=2");
        assert_eq!(redacted, "https://api.x/ping?api_key=<redacted>&page=2");
    }

    #[test]
    fn redacts_known_headers_by_name() {
        assert_eq!(redact_header_value("X-API-Key", "abc"), "<redacted>");
        assert_eq!(redact_header_value("Accept", "application/json"), "application/json");
    }
}
