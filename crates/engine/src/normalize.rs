//! Request normalization.
//!
//! Turns a variable-resolved [`RequestTemplate`] plus previously derived state
//! into the exact [`RequestPayload`] a transport agent receives. Nothing here
//! performs I/O; the function is a pure transformation.

use courier_types::{AuthKind, DerivedRequest, KeyValue, PayloadBody, RequestBody, RequestPayload, RequestTemplate};
use indexmap::IndexMap;
use thiserror::Error;
use url::{Url, form_urlencoded};

const CONTENT_TYPE: &str = "Content-Type";
const JSON_CONTENT_TYPE: &str = "application/json";
const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum NormalizeError {
    #[error("invalid request url '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },
}

/// Build the transport payload for `resolved`.
///
/// - disabled rows and rows with a blank key are dropped
/// - enabled query rows are appended to the URL
/// - a URL without a scheme is sent over `http://`
/// - derived auth headers are merged unless auth is disabled; a header set
///   explicitly on the template wins (names compare case-insensitively)
/// - the body is serialized and `Content-Type` is set when the template
///   does not set one
pub fn normalize(resolved: &RequestTemplate, prior: &DerivedRequest, request_id: &str) -> Result<RequestPayload, NormalizeError> {
    let url = build_url(&resolved.url, &resolved.query)?;

    let mut headers: IndexMap<String, String> = IndexMap::new();
    for row in resolved.headers.iter().filter(|row| row.is_active()) {
        headers.insert(row.key.trim().to_string(), row.value.clone());
    }

    if resolved.auth.kind != AuthKind::None {
        for (name, value) in &prior.auth_headers {
            if !has_header(&headers, name) {
                headers.insert(name.clone(), value.clone());
            }
        }
    }

    let body = resolved.body.as_ref().map(serialize_body);
    if let Some(content_type) = body.as_ref().and_then(|body| body.content_type.as_deref())
        && !has_header(&headers, CONTENT_TYPE)
    {
        headers.insert(CONTENT_TYPE.to_string(), content_type.to_string());
    }

    Ok(RequestPayload {
        request_id: request_id.to_string(),
        method: resolved.method,
        url: url.to_string(),
        headers,
        body,
    })
}

fn build_url(raw: &str, query: &[KeyValue]) -> Result<Url, NormalizeError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(NormalizeError::InvalidUrl {
            url: raw.to_string(),
            reason: "url is empty".into(),
        });
    }

    let candidate = if trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("http://{trimmed}")
    };
    let mut url = Url::parse(&candidate).map_err(|error| NormalizeError::InvalidUrl {
        url: raw.to_string(),
        reason: error.to_string(),
    })?;

    let mut rows = query.iter().filter(|row| row.is_active()).peekable();
    if rows.peek().is_some() {
        let mut pairs = url.query_pairs_mut();
        for row in rows {
            pairs.append_pair(row.key.trim(), &row.value);
        }
    }
    Ok(url)
}

fn serialize_body(body: &RequestBody) -> PayloadBody {
    match body {
        RequestBody::Raw { content_type, text } => PayloadBody {
            content_type: content_type.clone(),
            content: text.clone(),
        },
        RequestBody::Json { value } => PayloadBody {
            content_type: Some(JSON_CONTENT_TYPE.to_string()),
            content: value.to_string(),
        },
        RequestBody::UrlEncoded { fields } => {
            let mut serializer = form_urlencoded::Serializer::new(String::new());
            for field in fields.iter().filter(|field| field.is_active()) {
                serializer.append_pair(field.key.trim(), &field.value);
            }
            PayloadBody {
                content_type: Some(FORM_CONTENT_TYPE.to_string()),
                content: serializer.finish(),
            }
        }
    }
}

fn has_header(headers: &IndexMap<String, String>, name: &str) -> bool {
    headers.keys().any(|key| key.eq_ignore_ascii_case(name))
}
