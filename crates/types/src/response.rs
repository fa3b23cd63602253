//! Response shapes produced by the execution pipeline.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Outcome of a single assertion inside a test script.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestAssertion {
    pub name: String,
    pub passed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Result reported by a test script.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestScriptResult {
    #[serde(default)]
    pub tests: Vec<TestAssertion>,
}

impl TestScriptResult {
    pub fn passed(&self) -> usize {
        self.tests.iter().filter(|test| test.passed).count()
    }

    pub fn failed(&self) -> usize {
        self.tests.len() - self.passed()
    }
}

/// Result returned by a transport agent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransportResponse {
    pub status_code: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_text: Option<String>,
    #[serde(default)]
    pub headers: IndexMap<String, String>,
    #[serde(default)]
    pub body: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_script_result: Option<TestScriptResult>,
}

impl TransportResponse {
    pub fn new(status_code: u16, body: impl Into<String>) -> Self {
        Self {
            status_code,
            body: body.into(),
            ..Default::default()
        }
    }

    /// Shallow-merges a script-supplied patch into this response.
    pub fn apply_patch(&mut self, patch: ResponsePatch) {
        let ResponsePatch {
            status_code,
            status_text,
            headers,
            body,
        } = patch;
        if let Some(status_code) = status_code {
            self.status_code = status_code;
        }
        if let Some(status_text) = status_text {
            self.status_text = Some(status_text);
        }
        if let Some(headers) = headers {
            self.headers = headers;
        }
        if let Some(body) = body {
            self.body = body;
        }
    }
}

/// Partial response returned by a post-response script.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponsePatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers: Option<IndexMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
}

/// Pre-call placeholder: `{ "statusCode": 0 }`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BaselineResponse {
    pub status_code: u16,
}

/// Failure that did not produce a transport result.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    pub error: Value,
    pub status_code: u16,
}

/// The single response slot exposed to callers. Exactly one of a transport
/// result or an error is populated; `Baseline` marks a run that has not yet
/// produced either.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ExecutionResponse {
    Baseline(BaselineResponse),
    Transport(TransportResponse),
    /// A transport rejection carrying `statusCode`, kept exactly as the agent
    /// reported it.
    Rejected(Value),
    Error(ErrorResponse),
}

impl Default for ExecutionResponse {
    fn default() -> Self {
        Self::baseline()
    }
}

impl ExecutionResponse {
    pub fn baseline() -> Self {
        ExecutionResponse::Baseline(BaselineResponse { status_code: 0 })
    }

    /// Error response with `statusCode: 0`.
    pub fn error(error: impl Into<Value>) -> Self {
        ExecutionResponse::Error(ErrorResponse {
            error: error.into(),
            status_code: 0,
        })
    }

    pub fn status_code(&self) -> u16 {
        match self {
            ExecutionResponse::Baseline(baseline) => baseline.status_code,
            ExecutionResponse::Transport(response) => response.status_code,
            ExecutionResponse::Rejected(value) => value
                .get("statusCode")
                .and_then(Value::as_u64)
                .and_then(|code| u16::try_from(code).ok())
                .unwrap_or(0),
            ExecutionResponse::Error(error) => error.status_code,
        }
    }

    pub fn transport(&self) -> Option<&TransportResponse> {
        match self {
            ExecutionResponse::Transport(response) => Some(response),
            _ => None,
        }
    }

    /// The error carried by the slot, including an `error` field on a raw rejection.
    pub fn error_value(&self) -> Option<&Value> {
        match self {
            ExecutionResponse::Error(error) => Some(&error.error),
            ExecutionResponse::Rejected(value) => value.get("error"),
            _ => None,
        }
    }

    pub fn is_baseline(&self) -> bool {
        matches!(self, ExecutionResponse::Baseline(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn baseline_serializes_as_status_zero() {
        let value = serde_json::to_value(ExecutionResponse::baseline()).unwrap();
        assert_eq!(value, json!({"statusCode": 0}));
    }

    #[test]
    fn error_serializes_with_status_zero() {
        let value = serde_json::to_value(ExecutionResponse::error("timeout")).unwrap();
        assert_eq!(value, json!({"error": "timeout", "statusCode": 0}));
    }

    #[test]
    fn rejection_serializes_verbatim() {
        let raw = json!({"statusCode": 0, "error": "ECONNREFUSED"});
        let response = ExecutionResponse::Rejected(raw.clone());
        assert_eq!(serde_json::to_value(&response).unwrap(), raw);
        assert_eq!(response.status_code(), 0);
        assert_eq!(response.error_value(), Some(&json!("ECONNREFUSED")));
        assert!(response.transport().is_none());

        let not_found = ExecutionResponse::Rejected(json!({"statusCode": 404, "body": {"detail": "missing"}}));
        assert_eq!(not_found.status_code(), 404);
        assert!(not_found.error_value().is_none());
    }

    #[test]
    fn response_patch_merges_shallowly() {
        let mut response = TransportResponse::new(200, "ok");
        response.headers.insert("content-type".into(), "text/plain".into());

        response.apply_patch(ResponsePatch {
            body: Some("patched".into()),
            ..Default::default()
        });

        assert_eq!(response.status_code, 200);
        assert_eq!(response.body, "patched");
        assert_eq!(response.headers.len(), 1);
    }

    #[test]
    fn test_result_counts() {
        let result = TestScriptResult {
            tests: vec![
                TestAssertion {
                    name: "status is 200".into(),
                    passed: true,
                    message: None,
                },
                TestAssertion {
                    name: "has id".into(),
                    passed: false,
                    message: Some("id missing".into()),
                },
            ],
        };
        assert_eq!(result.passed(), 1);
        assert_eq!(result.failed(), 1);
    }
}
