//! Script hook orchestration.
//!
//! User scripts run at three checkpoints around dispatch:
//!
//! - **pre**: before variables are applied; may patch the request and the environment
//! - **post**: after dispatch; may patch the transport response and the environment
//! - **test**: last; may attach a [`TestScriptResult`] to the response
//!
//! The sandbox that actually evaluates script code is an external capability
//! behind [`ScriptRunner`]. [`ScriptHooks`] decides when each hook runs and
//! folds the returned patches back into the pipeline state.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use courier_types::{
    PostScriptOutcome, PreScriptOutcome, RequestTemplate, TestScriptOutcome, TestScriptResult, TransportResponse,
    VariablePrecedence, VariableScope, Variables,
};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};

use crate::variables::{apply_environment_patch, merge_scope};

pub mod noop;
pub mod process;

pub use noop::NoopScriptRunner;
pub use process::ProcessScriptRunner;

/// Checkpoint at which a script runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ScriptHook {
    Pre,
    Post,
    Test,
}

impl fmt::Display for ScriptHook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ScriptHook::Pre => "pre-request",
            ScriptHook::Post => "post-response",
            ScriptHook::Test => "test",
        })
    }
}

/// Failure raised by a script hook.
#[derive(Debug, Error)]
pub enum ScriptError {
    #[error("{hook} script failed: {message}")]
    Failed { hook: ScriptHook, message: String },

    #[error("{hook} script returned invalid output: {source}")]
    InvalidOutput {
        hook: ScriptHook,
        #[source]
        source: serde_json::Error,
    },

    #[error("{hook} script interpreter I/O error: {source}")]
    Io {
        hook: ScriptHook,
        #[source]
        source: std::io::Error,
    },

    #[error("{hook} script timed out after {timeout_ms}ms")]
    Timeout { hook: ScriptHook, timeout_ms: u64 },
}

impl ScriptError {
    /// Create a script failure error.
    pub fn failed(hook: ScriptHook, message: impl Into<String>) -> Self {
        Self::Failed {
            hook,
            message: message.into(),
        }
    }

    pub fn hook(&self) -> ScriptHook {
        match self {
            ScriptError::Failed { hook, .. }
            | ScriptError::InvalidOutput { hook, .. }
            | ScriptError::Io { hook, .. }
            | ScriptError::Timeout { hook, .. } => *hook,
        }
    }
}

/// Scripting capability. Implementations evaluate user script source and
/// report the patches the script produced.
#[async_trait]
pub trait ScriptRunner: Send + Sync {
    /// Run a pre-request script against a snapshot of the working request.
    async fn run_pre_script(
        &self,
        script: &str,
        request: &RequestTemplate,
        variables: &Variables,
    ) -> Result<PreScriptOutcome, ScriptError>;

    /// Run a post-response script against the transport result.
    async fn run_post_script(
        &self,
        script: &str,
        response: &TransportResponse,
        variables: &Variables,
    ) -> Result<PostScriptOutcome, ScriptError>;

    /// Run a test script; `Ok(None)` means the script produced no report.
    async fn run_test_script(
        &self,
        script: &str,
        request: &RequestTemplate,
        response: &TransportResponse,
        variables: &Variables,
    ) -> Result<TestScriptOutcome, ScriptError>;
}

/// Runs the hooks declared on a request in their fixed order and merges the
/// results into the pipeline's working state.
#[derive(Clone)]
pub struct ScriptHooks {
    runner: Arc<dyn ScriptRunner>,
    precedence: VariablePrecedence,
}

impl ScriptHooks {
    pub fn new(runner: Arc<dyn ScriptRunner>, precedence: VariablePrecedence) -> Self {
        Self { runner, precedence }
    }

    pub fn with_precedence(mut self, precedence: VariablePrecedence) -> Self {
        self.precedence = precedence;
        self
    }

    pub fn precedence(&self) -> VariablePrecedence {
        self.precedence
    }

    /// Runs the pre-request script when one is declared. A request patch is
    /// shallow-merged into `request`; an environment patch is layered onto `scope`.
    pub async fn run_pre_script(&self, request: &mut RequestTemplate, scope: &mut VariableScope) -> Result<(), ScriptError> {
        let Some(script) = request.pre_script() else {
            return Ok(());
        };
        let merged = merge_scope(scope, self.precedence);
        debug!(request_id = %request.ref_id(), "running pre-request script");
        let outcome = self.runner.run_pre_script(script, request, &merged).await?;

        if let Some(patch) = outcome.request {
            request.apply_patch(patch);
        }
        if let Some(environment) = outcome.environment {
            apply_environment_patch(scope, environment, self.precedence);
        }
        Ok(())
    }

    /// Runs the post-response script declared on `request`, if any.
    pub async fn run_post_script(
        &self,
        request: &RequestTemplate,
        response: &mut TransportResponse,
        scope: &mut VariableScope,
    ) -> Result<(), ScriptError> {
        let Some(script) = request.post_script() else {
            return Ok(());
        };
        let merged = merge_scope(scope, self.precedence);
        debug!(request_id = %request.ref_id(), status = response.status_code, "running post-response script");
        let outcome = self.runner.run_post_script(script, response, &merged).await?;

        if let Some(patch) = outcome.response {
            response.apply_patch(patch);
        }
        if let Some(environment) = outcome.environment {
            apply_environment_patch(scope, environment, self.precedence);
        }
        Ok(())
    }

    /// Runs the test script and attaches its report to `response`.
    ///
    /// Failures are logged and discarded: assertions never break request
    /// execution, and a failed run leaves `test_script_result` unset.
    pub async fn run_test_script(&self, request: &RequestTemplate, response: &mut TransportResponse, scope: &VariableScope) {
        match self.try_run_test_script(request, response, scope).await {
            Ok(Some(result)) => {
                debug!(passed = result.passed(), failed = result.failed(), "test script finished");
                response.test_script_result = Some(result);
            }
            Ok(None) => {}
            Err(error) => {
                warn!(request_id = %request.ref_id(), error = %error, "test script failed; ignoring");
            }
        }
    }

    async fn try_run_test_script(
        &self,
        request: &RequestTemplate,
        response: &TransportResponse,
        scope: &VariableScope,
    ) -> Result<Option<TestScriptResult>, ScriptError> {
        let Some(script) = request.test_script() else {
            return Ok(None);
        };
        let merged = merge_scope(scope, self.precedence);
        self.runner.run_test_script(script, request, response, &merged).await
    }
}
