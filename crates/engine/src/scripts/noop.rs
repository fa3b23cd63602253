use async_trait::async_trait;
use courier_types::{
    PostScriptOutcome, PreScriptOutcome, RequestTemplate, TestScriptOutcome, TransportResponse, Variables,
};
use tracing::warn;

use super::{ScriptError, ScriptRunner};

/// Runner used when no interpreter is configured. Every hook is skipped with
/// a warning and reports no changes.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopScriptRunner;

#[async_trait]
impl ScriptRunner for NoopScriptRunner {
    async fn run_pre_script(
        &self,
        _script: &str,
        request: &RequestTemplate,
        _variables: &Variables,
    ) -> Result<PreScriptOutcome, ScriptError> {
        warn!(request_id = %request.ref_id(), "no script interpreter configured; skipping pre-request script");
        Ok(PreScriptOutcome::default())
    }

    async fn run_post_script(
        &self,
        _script: &str,
        _response: &TransportResponse,
        _variables: &Variables,
    ) -> Result<PostScriptOutcome, ScriptError> {
        warn!("no script interpreter configured; skipping post-response script");
        Ok(PostScriptOutcome::default())
    }

    async fn run_test_script(
        &self,
        _script: &str,
        request: &RequestTemplate,
        _response: &TransportResponse,
        _variables: &Variables,
    ) -> Result<TestScriptOutcome, ScriptError> {
        warn!(request_id = %request.ref_id(), "no script interpreter configured; skipping test script");
        Ok(None)
    }
}
