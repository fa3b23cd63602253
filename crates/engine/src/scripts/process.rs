//! Script runner that delegates to an external interpreter process.
//!
//! Each hook invocation spawns the configured interpreter, writes a JSON
//! envelope to its stdin and reads a JSON outcome from its stdout:
//!
//! ```json
//! { "hook": "pre", "script": "...", "request": { ... }, "variables": { ... } }
//! ```
//!
//! An empty stdout is treated as "no changes". A non-zero exit status fails
//! the hook with the interpreter's stderr as the message.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use courier_types::{
    PostScriptOutcome, PreScriptOutcome, RequestTemplate, TestScriptOutcome, TransportResponse, Variables,
};
use courier_util::EngineSettings;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tracing::debug;

use super::{ScriptError, ScriptHook, ScriptRunner};

/// Cap on captured stdout/stderr per stream (4 MiB).
const MAX_OUTPUT_BYTES: u64 = 4 * 1024 * 1024;

#[derive(Serialize)]
struct ScriptEnvelope<'a> {
    hook: ScriptHook,
    script: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    request: Option<&'a RequestTemplate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response: Option<&'a TransportResponse>,
    variables: &'a Variables,
}

/// Runs scripts through `program args...` with a per-invocation timeout.
#[derive(Debug, Clone)]
pub struct ProcessScriptRunner {
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl ProcessScriptRunner {
    pub fn new(program: impl Into<String>, args: Vec<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            args,
            timeout,
        }
    }

    /// Build a runner from the configured interpreter argv. Returns `None`
    /// when no interpreter is configured.
    pub fn from_settings(settings: &EngineSettings) -> Option<Self> {
        let (program, args) = settings.script_interpreter.as_ref()?.split_first()?;
        Some(Self::new(program.clone(), args.to_vec(), settings.script_timeout()))
    }

    async fn invoke<T>(&self, envelope: ScriptEnvelope<'_>) -> Result<T, ScriptError>
    where
        T: DeserializeOwned + Default,
    {
        let hook = envelope.hook;
        let input = serde_json::to_vec(&envelope).map_err(|source| ScriptError::failed(hook, source.to_string()))?;

        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!(program = %self.program, %hook, "spawning script interpreter");
        let mut child = command.spawn().map_err(|source| ScriptError::Io { hook, source })?;

        // Feed stdin from its own task so a chatty interpreter cannot block on a full stdout pipe.
        if let Some(mut stdin) = child.stdin.take() {
            tokio::spawn(async move {
                let _ = stdin.write_all(&input).await;
            });
        }
        let stdout_task = tokio::spawn(read_stream(child.stdout.take()));
        let stderr_task = tokio::spawn(read_stream(child.stderr.take()));

        let status = match tokio::time::timeout(self.timeout, child.wait()).await {
            Ok(Ok(status)) => status,
            Ok(Err(source)) => return Err(ScriptError::Io { hook, source }),
            Err(_) => {
                return Err(ScriptError::Timeout {
                    hook,
                    timeout_ms: self.timeout.as_millis() as u64,
                });
            }
        };

        let stdout = stdout_task.await.unwrap_or_default();
        let stderr = stderr_task.await.unwrap_or_default();

        if !status.success() {
            let stderr = String::from_utf8_lossy(&stderr);
            let message = match stderr.trim() {
                "" => format!("interpreter exited with {status}"),
                text => text.to_string(),
            };
            return Err(ScriptError::Failed { hook, message });
        }

        let stdout = String::from_utf8_lossy(&stdout);
        let trimmed = stdout.trim();
        if trimmed.is_empty() {
            return Ok(T::default());
        }
        serde_json::from_str(trimmed).map_err(|source| ScriptError::InvalidOutput { hook, source })
    }
}

#[async_trait]
impl ScriptRunner for ProcessScriptRunner {
    async fn run_pre_script(
        &self,
        script: &str,
        request: &RequestTemplate,
        variables: &Variables,
    ) -> Result<PreScriptOutcome, ScriptError> {
        self.invoke(ScriptEnvelope {
            hook: ScriptHook::Pre,
            script,
            request: Some(request),
            response: None,
            variables,
        })
        .await
    }

    async fn run_post_script(
        &self,
        script: &str,
        response: &TransportResponse,
        variables: &Variables,
    ) -> Result<PostScriptOutcome, ScriptError> {
        self.invoke(ScriptEnvelope {
            hook: ScriptHook::Post,
            script,
            request: None,
            response: Some(response),
            variables,
        })
        .await
    }

    async fn run_test_script(
        &self,
        script: &str,
        request: &RequestTemplate,
        response: &TransportResponse,
        variables: &Variables,
    ) -> Result<TestScriptOutcome, ScriptError> {
        self.invoke(ScriptEnvelope {
            hook: ScriptHook::Test,
            script,
            request: Some(request),
            response: Some(response),
            variables,
        })
        .await
    }
}

async fn read_stream<R: AsyncRead + Unpin>(handle: Option<R>) -> Vec<u8> {
    let mut buf = Vec::new();
    if let Some(handle) = handle {
        let _ = handle.take(MAX_OUTPUT_BYTES).read_to_end(&mut buf).await;
    }
    buf
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn shell(script: &str, timeout: Duration) -> ProcessScriptRunner {
        ProcessScriptRunner::new("sh", vec!["-c".into(), script.into()], timeout)
    }

    fn request() -> RequestTemplate {
        RequestTemplate {
            url: "{{base}}/ping".into(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn parses_outcome_from_stdout() {
        let runner = shell(
            r#"cat >/dev/null; echo '{"environment":{"variables":{"base":"https://api.y"}}}'"#,
            Duration::from_secs(5),
        );

        let outcome = runner
            .run_pre_script("ignored", &request(), &Variables::new())
            .await
            .unwrap();

        assert!(outcome.request.is_none());
        assert_eq!(outcome.environment.unwrap().variables["base"], "https://api.y");
    }

    #[tokio::test]
    async fn envelope_reaches_interpreter() {
        // Echo the hook name back as a response body patch.
        let runner = shell(
            r#"hook=$(cat | sed -n 's/.*"hook":"\([a-z]*\)".*/\1/p'); echo "{\"response\":{\"body\":\"$hook\"}}""#,
            Duration::from_secs(5),
        );

        let outcome = runner
            .run_post_script("ignored", &TransportResponse::new(200, ""), &Variables::new())
            .await
            .unwrap();

        assert_eq!(outcome.response.unwrap().body.as_deref(), Some("post"));
    }

    #[tokio::test]
    async fn empty_stdout_means_no_changes() {
        let runner = shell("cat >/dev/null", Duration::from_secs(5));
        let outcome = runner
            .run_test_script("ignored", &request(), &TransportResponse::new(200, ""), &Variables::new())
            .await
            .unwrap();
        assert!(outcome.is_none());
    }

    #[tokio::test]
    async fn non_zero_exit_reports_stderr() {
        let runner = shell("cat >/dev/null; echo 'boom' >&2; exit 3", Duration::from_secs(5));
        let error = runner
            .run_pre_script("ignored", &request(), &Variables::new())
            .await
            .unwrap_err();

        match error {
            ScriptError::Failed { hook, message } => {
                assert_eq!(hook, ScriptHook::Pre);
                assert_eq!(message, "boom");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn malformed_output_is_rejected() {
        let runner = shell("cat >/dev/null; echo 'not json'", Duration::from_secs(5));
        let error = runner
            .run_pre_script("ignored", &request(), &Variables::new())
            .await
            .unwrap_err();
        assert!(matches!(error, ScriptError::InvalidOutput { .. }));
    }

    #[tokio::test]
    async fn slow_interpreter_times_out() {
        let runner = shell("sleep 5", Duration::from_millis(100));
        let error = runner
            .run_pre_script("ignored", &request(), &Variables::new())
            .await
            .unwrap_err();
        assert!(matches!(error, ScriptError::Timeout { timeout_ms: 100, .. }));
    }

    #[test]
    fn settings_without_interpreter_yield_none() {
        assert!(ProcessScriptRunner::from_settings(&EngineSettings::default()).is_none());

        let settings = EngineSettings {
            script_interpreter: Some(vec!["node".into(), "hooks.js".into()]),
            ..Default::default()
        };
        let runner = ProcessScriptRunner::from_settings(&settings).unwrap();
        assert_eq!(runner.program, "node");
        assert_eq!(runner.args, vec!["hooks.js".to_string()]);
    }
}
