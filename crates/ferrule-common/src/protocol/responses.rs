//! Ferrule Response Types

use serde::{Deserialize, Serialize};

use super::error::FerruleError;
use super::status::Status;
use super::RequestId;

/// RPC method result (JSON value)
pub type RpcResult = serde_json::Value;

/// A response sent back from a provider, or synthesized locally on timeout
/// or connection loss.
///
/// # Fields
///
/// - `id`: correlation id of the request this answers
/// - `status`: [`Status::Ok`] on success, otherwise the failure class
/// - `result`: the method's return value (present on success)
/// - `error`: human readable failure description (present on failure)
///
/// # Example
///
/// ```
/// use ferrule_common::protocol::{Response, Status};
/// use serde_json::json;
///
/// let ok = Response::success(7, json!(42));
/// assert!(ok.status.is_ok());
///
/// let busy = Response::error(7, Status::ServerBusy, "worker queues full");
/// assert!(busy.into_result(0).is_err());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Response {
    pub id: RequestId,
    pub status: Status,
    pub result: Option<RpcResult>,
    pub error: Option<String>,
}

impl Response {
    pub fn success(id: RequestId, result: RpcResult) -> Self {
        Response {
            id,
            status: Status::Ok,
            result: Some(result),
            error: None,
        }
    }

    pub fn error(id: RequestId, status: Status, error: impl Into<String>) -> Self {
        Response {
            id,
            status,
            result: None,
            error: Some(error.into()),
        }
    }

    /// Converts into the caller-facing outcome.
    ///
    /// `timeout_ms` is reported in timeout errors.
    pub fn into_result(self, timeout_ms: u64) -> Result<RpcResult, FerruleError> {
        if self.status.is_ok() {
            Ok(self.result.unwrap_or(serde_json::Value::Null))
        } else {
            let message = self.error.unwrap_or_else(|| "Unknown error".to_string());
            Err(self.status.into_error(message, timeout_ms))
        }
    }
}
