use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;

use super::directory::Directory;

pub type RequestId = u64;
pub type MethodName = String;
pub type RpcArgs = Vec<serde_json::Value>;

static REQUEST_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Request {
    /// Correlation id. The frame header's id is authoritative on the wire.
    pub id: RequestId,
    pub directory: Directory,
    pub method: MethodName,
    pub args: RpcArgs,
    pub timeout_ms: Option<u64>,
}

impl Request {
    pub fn new(directory: Directory, method: impl Into<String>, args: RpcArgs) -> Self {
        Request {
            id: next_request_id(),
            directory,
            method: method.into(),
            args,
            timeout_ms: None,
        }
    }

    pub fn with_timeout(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    /// Same call with a fresh correlation id, for re-dispatching after a failure.
    pub fn renewed(&self) -> Self {
        Request {
            id: next_request_id(),
            ..self.clone()
        }
    }
}

/// Returns a process-unique correlation id.
pub fn next_request_id() -> RequestId {
    let timestamp = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0);

    let counter = REQUEST_ID_COUNTER.fetch_add(1, Ordering::Relaxed);

    // Upper 32 bits from the clock keep ids distinct across restarts, the
    // lower 32 from the counter keep them distinct within this process.
    (timestamp & 0xFFFF_FFFF_0000_0000) | (counter & 0xFFFF_FFFF)
}
