//! Execution runtime state and agent identifiers.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::{
    request::RequestPatch,
    response::{ResponsePatch, TestScriptResult},
    variables::EnvironmentPatch,
};

/// Transport context that executes a request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentKind {
    /// Native desktop agent with direct socket access.
    #[default]
    Desktop,
    /// Browser extension agent.
    Extension,
    /// Cloud relay used when the browser cannot reach the target directly.
    Proxy,
    /// Plain in-browser fetch, subject to CORS.
    Web,
}

impl AgentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentKind::Desktop => "desktop",
            AgentKind::Extension => "extension",
            AgentKind::Proxy => "proxy",
            AgentKind::Web => "web",
        }
    }
}

impl fmt::Display for AgentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AgentKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "desktop" => Ok(AgentKind::Desktop),
            "extension" => Ok(AgentKind::Extension),
            "proxy" => Ok(AgentKind::Proxy),
            "web" => Ok(AgentKind::Web),
            other => Err(format!("unknown agent '{other}'; expected desktop, extension, proxy or web")),
        }
    }
}

/// Snapshot of a pipeline's lifecycle flag.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionRuntime {
    pub is_running: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_request_id: Option<String>,
}

/// What a pre-request script hands back.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PreScriptOutcome {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request: Option<RequestPatch>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment: Option<EnvironmentPatch>,
}

/// What a post-response script hands back.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PostScriptOutcome {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<ResponsePatch>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment: Option<EnvironmentPatch>,
}

/// What a test script hands back. `None` means the script produced no report.
pub type TestScriptOutcome = Option<TestScriptResult>;
