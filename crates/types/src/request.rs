//! Request templates as authored by the user, plus the transport-ready payload
//! derived from them.

use std::fmt;
use std::str::FromStr;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// HTTP method of a request template.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    #[default]
    Get,
    Post,
    Put,
    Patch,
    Delete,
    Head,
    Options,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
            HttpMethod::Head => "HEAD",
            HttpMethod::Options => "OPTIONS",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HttpMethod {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_uppercase().as_str() {
            "GET" => Ok(HttpMethod::Get),
            "POST" => Ok(HttpMethod::Post),
            "PUT" => Ok(HttpMethod::Put),
            "PATCH" => Ok(HttpMethod::Patch),
            "DELETE" => Ok(HttpMethod::Delete),
            "HEAD" => Ok(HttpMethod::Head),
            "OPTIONS" => Ok(HttpMethod::Options),
            other => Err(format!("unsupported method: {other}")),
        }
    }
}

/// A single row of a header or query table.
///
/// Rows can be toggled off in the editor without deleting them; disabled rows
/// are carried through variable resolution but never reach the transport.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyValue {
    pub key: String,
    #[serde(default)]
    pub value: String,
    #[serde(default, skip_serializing_if = "is_false")]
    pub disabled: bool,
}

impl KeyValue {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            disabled: false,
        }
    }

    /// True when the row should be sent: enabled and with a non-blank key.
    pub fn is_active(&self) -> bool {
        !self.disabled && !self.key.trim().is_empty()
    }
}

fn is_false(value: &bool) -> bool {
    !*value
}

/// Request body as edited by the user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RequestBody {
    /// Free-form text sent as-is.
    Raw {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        content_type: Option<String>,
        text: String,
    },
    /// Structured JSON; every string inside is eligible for variable substitution.
    Json { value: Value },
    /// `application/x-www-form-urlencoded` rows.
    UrlEncoded { fields: Vec<KeyValue> },
}

/// Authentication scheme selected on the request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthKind {
    #[default]
    None,
    Bearer,
    Basic,
    ApiKey,
    Digest,
    #[serde(rename = "oauth1")]
    OAuth1,
    #[serde(rename = "oauth2")]
    OAuth2,
    Inherit,
}

/// Auth descriptor: the selected scheme plus its user-editable parameters.
///
/// Header material for a scheme is computed elsewhere and handed to the
/// pipeline through [`DerivedRequest`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuthDescriptor {
    #[serde(default)]
    pub kind: AuthKind,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub params: IndexMap<String, String>,
}

/// Script sources attached to a request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestScripts {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pre: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub post: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test: Option<String>,
}

impl RequestScripts {
    pub fn pre(&self) -> Option<&str> {
        declared(self.pre.as_deref())
    }

    pub fn post(&self) -> Option<&str> {
        declared(self.post.as_deref())
    }

    pub fn test(&self) -> Option<&str> {
        declared(self.test.as_deref())
    }
}

/// Blank scripts count as absent.
fn declared(source: Option<&str>) -> Option<&str> {
    source.filter(|text| !text.trim().is_empty())
}

/// Stable identity of a request inside its collection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestReference {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collection_id: Option<String>,
}

/// User-authored request template.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RequestTemplate {
    #[serde(default)]
    pub method: HttpMethod,
    pub url: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub headers: Vec<KeyValue>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub query: Vec<KeyValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<RequestBody>,
    #[serde(default)]
    pub auth: AuthDescriptor,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scripts: Option<RequestScripts>,
    #[serde(default, rename = "__ref")]
    pub reference: RequestReference,
}

impl RequestTemplate {
    /// Identifier used to address this request at the transport agent.
    pub fn ref_id(&self) -> &str {
        &self.reference.id
    }

    pub fn pre_script(&self) -> Option<&str> {
        self.scripts.as_ref().and_then(RequestScripts::pre)
    }

    pub fn post_script(&self) -> Option<&str> {
        self.scripts.as_ref().and_then(RequestScripts::post)
    }

    pub fn test_script(&self) -> Option<&str> {
        self.scripts.as_ref().and_then(RequestScripts::test)
    }

    /// Shallow-merges a script-supplied patch. Fields the patch omits keep
    /// their current value.
    pub fn apply_patch(&mut self, patch: RequestPatch) {
        let RequestPatch {
            method,
            url,
            headers,
            query,
            body,
            auth,
        } = patch;
        if let Some(method) = method {
            self.method = method;
        }
        if let Some(url) = url {
            self.url = url;
        }
        if let Some(headers) = headers {
            self.headers = headers;
        }
        if let Some(query) = query {
            self.query = query;
        }
        if let Some(body) = body {
            self.body = Some(body);
        }
        if let Some(auth) = auth {
            self.auth = auth;
        }
    }
}

/// Partial request returned by a pre-request script.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RequestPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<HttpMethod>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers: Option<Vec<KeyValue>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<Vec<KeyValue>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<RequestBody>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<AuthDescriptor>,
}

/// Derived, non-template state carried between runs, e.g. auth headers
/// generated for the current auth descriptor.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DerivedRequest {
    #[serde(default)]
    pub auth_headers: IndexMap<String, String>,
}

/// Body bytes ready for the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayloadBody {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    pub content: String,
}

/// Exact request handed to the transport agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestPayload {
    pub request_id: String,
    pub method: HttpMethod,
    pub url: String,
    pub headers: IndexMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<PayloadBody>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn patch_keeps_fields_it_omits() {
        let mut request = RequestTemplate {
            method: HttpMethod::Post,
            url: "https://api.x/ping".into(),
            headers: vec![KeyValue::new("Accept", "application/json")],
            ..Default::default()
        };

        request.apply_patch(RequestPatch {
            url: Some("https://api.y/ping".into()),
            ..Default::default()
        });

        assert_eq!(request.url, "https://api.y/ping");
        assert_eq!(request.method, HttpMethod::Post);
        assert_eq!(request.headers.len(), 1);
    }

    #[test]
    fn blank_scripts_are_not_declared() {
        let request = RequestTemplate {
            url: "/".into(),
            scripts: Some(RequestScripts {
                pre: Some("   ".into()),
                post: None,
                test: Some("expect(1)".into()),
            }),
            ..Default::default()
        };
        assert!(request.pre_script().is_none());
        assert!(request.post_script().is_none());
        assert_eq!(request.test_script(), Some("expect(1)"));
    }

    #[test]
    fn template_deserializes_from_yaml() {
        let yaml = r#"
method: POST
url: "{{base}}/users"
headers:
  - key: Accept
    value: application/json
  - key: X-Debug
    value: "1"
    disabled: true
body:
  type: json
  value:
    name: "{{user}}"
auth:
  kind: bearer
  params:
    token: "{{token}}"
scripts:
  test: "expect(response.code).toBe(201)"
__ref:
  id: req-1
  collectionId: col-1
"#;
        let request: RequestTemplate = serde_yaml::from_str(yaml).expect("parse template");
        assert_eq!(request.method, HttpMethod::Post);
        assert_eq!(request.ref_id(), "req-1");
        assert_eq!(request.reference.collection_id.as_deref(), Some("col-1"));
        assert!(request.headers[1].disabled);
        assert_eq!(request.auth.kind, AuthKind::Bearer);
        assert!(matches!(request.body, Some(RequestBody::Json { .. })));
    }

    #[test]
    fn method_parses_case_insensitively() {
        assert_eq!("patch".parse::<HttpMethod>(), Ok(HttpMethod::Patch));
        assert!("BREW".parse::<HttpMethod>().is_err());
    }
}
