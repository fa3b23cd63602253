//! Shared data model for the Courier request engine.
//!
//! These types are consumed by the engine, the transport agents, and the CLI.
//! They are plain data: all behaviour that involves ordering, variables, or
//! I/O lives in `courier-engine`.

pub mod request;
pub mod response;
pub mod runtime;
pub mod variables;

pub use request::{
    AuthDescriptor, AuthKind, DerivedRequest, HttpMethod, KeyValue, PayloadBody, RequestBody, RequestPatch, RequestPayload,
    RequestReference, RequestScripts, RequestTemplate,
};
pub use response::{
    BaselineResponse, ErrorResponse, ExecutionResponse, ResponsePatch, TestAssertion, TestScriptResult, TransportResponse,
};
pub use runtime::{AgentKind, ExecutionRuntime, PostScriptOutcome, PreScriptOutcome, TestScriptOutcome};
pub use variables::{EnvironmentPatch, VariableLayer, VariablePrecedence, VariableScope, Variables};
