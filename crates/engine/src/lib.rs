//! # Courier Engine
//!
//! The Courier engine runs a single user-authored HTTP request through its
//! full lifecycle: scripts, variable resolution, normalization, dispatch and
//! response classification.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use courier_engine::{ExecutionPipeline, RunOutcome, load_request_file, load_variables_file};
//! use courier_types::{AgentKind, VariableScope};
//! use courier_util::EngineSettings;
//!
//! # async fn run() -> anyhow::Result<()> {
//! let request = load_request_file("ping.yaml")?;
//! let scope = VariableScope::new(load_variables_file("workspace.yaml")?, Default::default());
//!
//! let pipeline = ExecutionPipeline::from_settings(&EngineSettings::load()?)?;
//! if let RunOutcome::Completed { response, .. } = pipeline.execute(&request, scope, AgentKind::Desktop).await {
//!     println!("{}", serde_json::to_string_pretty(&response)?);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - **`variables`**: scoped variable merge and `{{ name }}` substitution
//! - **`scripts`**: pre/post/test hook orchestration over a [`ScriptRunner`]
//! - **`normalize`**: resolved template to transport payload
//! - **`dispatch`**: the [`Dispatcher`] transport contract and the HTTP agent
//! - **`executor`**: the single-flight [`ExecutionPipeline`] and outcome classification

use std::{fs, path::Path};

use anyhow::{Context, Result};
use courier_types::{RequestTemplate, Variables};

pub mod dispatch;
pub mod executor;
pub mod normalize;
pub mod scripts;
pub mod variables;

// Re-export commonly used types for convenience
pub use dispatch::{DispatchError, Dispatcher, HttpDispatcher};
pub use executor::{ExecutionError, ExecutionEvent, ExecutionPipeline, RunOutcome};
pub use normalize::{NormalizeError, normalize};
pub use scripts::{NoopScriptRunner, ProcessScriptRunner, ScriptError, ScriptHook, ScriptHooks, ScriptRunner};
pub use variables::{apply_environment_patch, apply_variables, merge, merge_scope};

/// Loads a request template from a YAML or JSON file.
///
/// When the file does not carry a `__ref.id`, the file stem is used so that
/// every loaded request has a stable identifier.
///
/// # Errors
///
/// Returns an error if the file cannot be read or does not describe a
/// request template.
pub fn load_request_file(file_path: impl AsRef<Path>) -> Result<RequestTemplate> {
    let file_path = file_path.as_ref();
    let content = fs::read_to_string(file_path).with_context(|| format!("Failed to read request file: {}", file_path.display()))?;

    let mut request: RequestTemplate =
        serde_yaml::from_str(&content).with_context(|| format!("Failed to parse request file: {}", file_path.display()))?;

    if request.reference.id.trim().is_empty() {
        request.reference.id = file_path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| "request".to_string());
    }
    Ok(request)
}

/// Loads a flat variable map from a YAML or JSON file. An empty file yields
/// an empty map.
pub fn load_variables_file(file_path: impl AsRef<Path>) -> Result<Variables> {
    let file_path = file_path.as_ref();
    let content =
        fs::read_to_string(file_path).with_context(|| format!("Failed to read variables file: {}", file_path.display()))?;
    if content.trim().is_empty() {
        return Ok(Variables::new());
    }
    serde_yaml::from_str(&content).with_context(|| format!("Failed to parse variables file: {}", file_path.display()))
}

/// Writes a variable map back to disk. Files ending in `.json` are written as
/// pretty JSON, everything else as YAML.
pub fn save_variables_file(file_path: impl AsRef<Path>, variables: &Variables) -> Result<()> {
    let file_path = file_path.as_ref();
    let is_json = file_path
        .extension()
        .is_some_and(|extension| extension.eq_ignore_ascii_case("json"));
    let content = if is_json {
        serde_json::to_string_pretty(variables)?
    } else {
        serde_yaml::to_string(variables)?
    };
    fs::write(file_path, content).with_context(|| format!("Failed to write variables file: {}", file_path.display()))
}
