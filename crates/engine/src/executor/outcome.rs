//! Classification of a finished run into the single response slot.

use courier_types::{ExecutionResponse, TransportResponse};
use thiserror::Error;

use crate::dispatch::DispatchError;
use crate::normalize::NormalizeError;
use crate::scripts::ScriptError;

/// Any stage failure that ends a run early.
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
    #[error(transparent)]
    Script(#[from] ScriptError),
    #[error(transparent)]
    Normalize(#[from] NormalizeError),
}

/// Fold a run result into an [`ExecutionResponse`].
///
/// Transport rejections that carry a status code are surfaced verbatim.
/// Opaque rejections keep their raw value. Everything else becomes
/// `{ error: <message>, statusCode: 0 }`.
pub fn classify(result: Result<TransportResponse, ExecutionError>) -> ExecutionResponse {
    match result {
        Ok(response) => ExecutionResponse::Transport(response),
        Err(ExecutionError::Dispatch(DispatchError::Transport(raw))) => ExecutionResponse::Rejected(raw),
        Err(ExecutionError::Dispatch(DispatchError::Unknown(value))) => ExecutionResponse::error(value),
        Err(error) => ExecutionResponse::error(error.to_string()),
    }
}
