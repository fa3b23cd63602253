//! Transport boundary.
//!
//! A [`Dispatcher`] performs the network call for a normalized
//! [`RequestPayload`] and can be asked to abort an in-flight call. The
//! pipeline hands every dispatch a [`CancellationToken`]; implementations
//! should stop work and return [`DispatchError::Cancelled`] once it fires.

use async_trait::async_trait;
use courier_types::{AgentKind, RequestPayload, TransportResponse};
use serde_json::Value;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

pub mod http;

pub use http::HttpDispatcher;

/// Rejection returned by a transport agent.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum DispatchError {
    /// The agent rejected the call with an object carrying `statusCode`.
    /// The object is surfaced to the caller verbatim, extra fields included.
    #[error("transport rejected the request: {0}")]
    Transport(Value),
    /// Failure described only by a message, e.g. `"timeout"`.
    #[error("{0}")]
    Message(String),
    #[error("cancelled")]
    Cancelled,
    /// Rejection of a shape the engine does not recognize.
    #[error("unrecognized transport error: {0}")]
    Unknown(Value),
}

impl DispatchError {
    pub fn message(message: impl Into<String>) -> Self {
        DispatchError::Message(message.into())
    }

    /// Classify a loosely-typed rejection reported by an out-of-process agent.
    ///
    /// Objects with a numeric `statusCode` are transport responses, objects
    /// with a string `message` are message errors, anything else is unknown.
    pub fn from_value(value: Value) -> Self {
        if value.get("statusCode").is_some_and(Value::is_u64) {
            return DispatchError::Transport(value);
        }
        if let Some(message) = value.get("message").and_then(Value::as_str) {
            return DispatchError::Message(message.to_string());
        }
        DispatchError::Unknown(value)
    }
}

/// Transport agent contract.
#[async_trait]
pub trait Dispatcher: Send + Sync {
    /// Send `payload` and wait for the agent's response.
    async fn execute(&self, payload: RequestPayload, cancellation: CancellationToken) -> Result<TransportResponse, DispatchError>;

    /// Ask the agent to abort the call identified by `request_id`. Best effort:
    /// the pipeline logs a failure and carries on.
    async fn cancel(&self, request_id: &str, agent: AgentKind) -> Result<(), DispatchError>;
}
