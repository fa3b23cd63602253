//! Execution pipeline: runs one request through scripts, variable
//! resolution, normalization and dispatch, and owns the running/idle state.
//!
//! - At most one run is in flight per [`ExecutionPipeline`]
//! - Calling [`ExecutionPipeline::execute`] while a run is in flight cancels it
//! - Every run is tagged with a generation; a run retired by a cancel never
//!   writes the response slot or the runtime flag
//! - The state mutex is never held across an `.await`
//! - A run or cancel whose future is dropped (or whose collaborator panics)
//!   still returns the pipeline to Idle for its own generation

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use anyhow::{Context, Result};
use courier_types::{
    AgentKind, DerivedRequest, ExecutionResponse, ExecutionRuntime, RequestTemplate, TransportResponse, VariablePrecedence,
    VariableScope,
};
use courier_util::EngineSettings;
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::dispatch::{DispatchError, Dispatcher, HttpDispatcher};
use crate::normalize::normalize;
use crate::scripts::{NoopScriptRunner, ProcessScriptRunner, ScriptHooks, ScriptRunner};
use crate::variables::{apply_variables, merge_scope};

pub mod outcome;
pub use outcome::{ExecutionError, classify};

/// How a call to [`ExecutionPipeline::execute`] ended.
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    /// The run finished, successfully or with an error, and its response was
    /// committed. `variables` carries the scope with every script patch applied.
    Completed {
        response: ExecutionResponse,
        variables: VariableScope,
    },
    /// The call found a run in flight and cancelled it instead of running.
    Cancelled { request_id: String },
    /// The run was retired by a cancel before it finished; nothing was committed.
    Superseded,
}

/// Notifications emitted to an optional subscriber.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionEvent {
    RunStarted { request_id: String },
    RunCancelled { request_id: String },
    /// Sent exactly once per completed run, before [`ExecutionEvent::RunCompleted`].
    VariablesChanged { request_id: String, variables: VariableScope },
    RunCompleted { request_id: String, response: ExecutionResponse },
}

#[derive(Debug, Clone)]
struct ActiveRun {
    generation: u64,
    request_id: String,
    cancellation: CancellationToken,
}

#[derive(Debug, Default)]
struct PipelineState {
    runtime: ExecutionRuntime,
    response: ExecutionResponse,
    derived: DerivedRequest,
    generation: u64,
    active: Option<ActiveRun>,
}

enum Entry {
    Run { run: ActiveRun, derived: DerivedRequest },
    Cancel(ActiveRun),
}

/// Coordinates a single request's execution lifecycle.
pub struct ExecutionPipeline {
    dispatcher: Arc<dyn Dispatcher>,
    hooks: ScriptHooks,
    state: Mutex<PipelineState>,
    events: Option<UnboundedSender<ExecutionEvent>>,
}

impl ExecutionPipeline {
    pub fn new(dispatcher: Arc<dyn Dispatcher>, scripts: Arc<dyn ScriptRunner>) -> Self {
        Self {
            dispatcher,
            hooks: ScriptHooks::new(scripts, VariablePrecedence::default()),
            state: Mutex::new(PipelineState::default()),
            events: None,
        }
    }

    /// Build a pipeline backed by the HTTP agent and, when configured, the
    /// external script interpreter.
    pub fn from_settings(settings: &EngineSettings) -> Result<Self> {
        let dispatcher = HttpDispatcher::new(settings).context("build http client")?;
        let scripts: Arc<dyn ScriptRunner> = match ProcessScriptRunner::from_settings(settings) {
            Some(runner) => Arc::new(runner),
            None => Arc::new(NoopScriptRunner),
        };
        Ok(Self::new(Arc::new(dispatcher), scripts).with_precedence(settings.variable_precedence))
    }

    pub fn with_precedence(mut self, precedence: VariablePrecedence) -> Self {
        self.hooks = self.hooks.with_precedence(precedence);
        self
    }

    pub fn with_event_sender(mut self, sender: UnboundedSender<ExecutionEvent>) -> Self {
        self.events = Some(sender);
        self
    }

    /// Snapshot of the running flag.
    pub fn runtime(&self) -> ExecutionRuntime {
        self.lock_state().runtime.clone()
    }

    /// Snapshot of the response slot.
    pub fn response(&self) -> ExecutionResponse {
        self.lock_state().response.clone()
    }

    /// Replace the derived state (e.g. computed auth headers) used by the next run.
    pub fn set_derived_request(&self, derived: DerivedRequest) {
        self.lock_state().derived = derived;
    }

    /// Run `request`, or cancel the in-flight run if there is one.
    ///
    /// `request` is cloned; the caller's template is never mutated. The
    /// returned outcome carries the final variable scope for completed runs.
    pub async fn execute(&self, request: &RequestTemplate, variables: VariableScope, agent: AgentKind) -> RunOutcome {
        match self.enter(request.ref_id()) {
            Entry::Cancel(active) => self.cancel_active(active, agent).await,
            Entry::Run { run, derived } => self.run(run, derived, request.clone(), variables).await,
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, PipelineState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: ExecutionEvent) {
        if let Some(sender) = &self.events
            && sender.send(event).is_err()
        {
            debug!("execution event receiver dropped");
        }
    }

    /// Idle -> Running, or Running -> cancel request.
    fn enter(&self, request_id: &str) -> Entry {
        let mut state = self.lock_state();
        // Retire the active generation so its late completion is discarded.
        state.generation += 1;

        if let Some(active) = state.active.take() {
            active.cancellation.cancel();
            return Entry::Cancel(active);
        }

        let run = ActiveRun {
            generation: state.generation,
            request_id: request_id.to_string(),
            cancellation: CancellationToken::new(),
        };
        state.active = Some(run.clone());
        state.runtime = ExecutionRuntime {
            is_running: true,
            active_request_id: Some(run.request_id.clone()),
        };
        state.response = ExecutionResponse::baseline();
        Entry::Run {
            run,
            derived: state.derived.clone(),
        }
    }

    async fn cancel_active(&self, active: ActiveRun, agent: AgentKind) -> RunOutcome {
        let settle = SettleGuard::cancel(&self.state);
        info!(request_id = %active.request_id, %agent, "request in flight; cancelling");
        if let Err(error) = self.dispatcher.cancel(&active.request_id, agent).await {
            warn!(request_id = %active.request_id, error = %error, "transport cancel failed; ignoring");
        }

        drop(settle);
        self.emit(ExecutionEvent::RunCancelled {
            request_id: active.request_id.clone(),
        });
        RunOutcome::Cancelled {
            request_id: active.request_id,
        }
    }

    async fn run(&self, run: ActiveRun, derived: DerivedRequest, mut request: RequestTemplate, mut scope: VariableScope) -> RunOutcome {
        let _settle = SettleGuard::run(&self.state, &run);
        debug!(request_id = %run.request_id, generation = run.generation, "run started");
        self.emit(ExecutionEvent::RunStarted {
            request_id: run.request_id.clone(),
        });

        let result = self.run_stages(&run, &derived, &mut request, &mut scope).await;
        if let Err(error) = &result {
            debug!(request_id = %run.request_id, error = %error, "run failed");
        }
        let response = classify(result);

        if !self.commit(&run, &response) {
            debug!(request_id = %run.request_id, generation = run.generation, "run superseded; discarding result");
            return RunOutcome::Superseded;
        }

        info!(request_id = %run.request_id, status = response.status_code(), "run completed");
        self.emit(ExecutionEvent::VariablesChanged {
            request_id: run.request_id.clone(),
            variables: scope.clone(),
        });
        self.emit(ExecutionEvent::RunCompleted {
            request_id: run.request_id,
            response: response.clone(),
        });
        RunOutcome::Completed {
            response,
            variables: scope,
        }
    }

    /// Pre-script, resolve, normalize, dispatch, post-script, test-script.
    async fn run_stages(
        &self,
        run: &ActiveRun,
        derived: &DerivedRequest,
        request: &mut RequestTemplate,
        scope: &mut VariableScope,
    ) -> Result<TransportResponse, ExecutionError> {
        self.hooks.run_pre_script(request, scope).await?;
        checkpoint(run)?;

        let merged = merge_scope(scope, self.hooks.precedence());
        let resolved = apply_variables(request, &merged);
        let payload = normalize(&resolved, derived, &run.request_id)?;

        let mut response = self.dispatcher.execute(payload, run.cancellation.clone()).await?;
        checkpoint(run)?;

        self.hooks.run_post_script(&resolved, &mut response, scope).await?;
        checkpoint(run)?;

        self.hooks.run_test_script(&resolved, &mut response, scope).await;
        Ok(response)
    }

    /// Write the final response and return to Idle, unless `run` was retired.
    fn commit(&self, run: &ActiveRun, response: &ExecutionResponse) -> bool {
        let mut state = self.lock_state();
        let current = state
            .active
            .as_ref()
            .is_some_and(|active| active.generation == run.generation);
        if !current {
            return false;
        }
        state.active = None;
        state.runtime = ExecutionRuntime::default();
        state.response = response.clone();
        true
    }
}

/// Returns the pipeline to Idle when dropped, however the owning future ends.
///
/// A run guard only clears state that still belongs to its generation, so a
/// completed or superseded run leaves a newer run untouched. A cancel guard
/// only clears the runtime flag when no new run has started since.
struct SettleGuard<'a> {
    state: &'a Mutex<PipelineState>,
    generation: Option<u64>,
}

impl<'a> SettleGuard<'a> {
    fn run(state: &'a Mutex<PipelineState>, run: &ActiveRun) -> Self {
        Self {
            state,
            generation: Some(run.generation),
        }
    }

    fn cancel(state: &'a Mutex<PipelineState>) -> Self {
        Self { state, generation: None }
    }
}

impl Drop for SettleGuard<'_> {
    fn drop(&mut self) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        match self.generation {
            Some(generation) => {
                let owned = state.active.as_ref().is_some_and(|active| active.generation == generation);
                if owned && let Some(active) = state.active.take() {
                    debug!(request_id = %active.request_id, generation, "run abandoned; returning to idle");
                    active.cancellation.cancel();
                    state.runtime = ExecutionRuntime::default();
                }
            }
            None => {
                if state.active.is_none() {
                    state.runtime = ExecutionRuntime::default();
                }
            }
        }
    }
}

fn checkpoint(run: &ActiveRun) -> Result<(), ExecutionError> {
    if run.cancellation.is_cancelled() {
        return Err(DispatchError::Cancelled.into());
    }
    Ok(())
}
