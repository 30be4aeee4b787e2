//! Response status codes carried in the header's status byte.

use serde::{Deserialize, Serialize};

use super::error::{FerruleError, TimeoutKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum Status {
    Ok,
    ClientTimeout,
    ServerTimeout,
    BadRequest,
    ServiceNotFound,
    ServerError,
    ServerBusy,
    ServiceExpectedError,
    ServiceUnexpectedError,
    AppFlowControl,
    ProviderFlowControl,
    DeserializationFail,
}

impl Status {
    pub const fn code(self) -> u8 {
        match self {
            Status::Ok => 0x20,
            Status::ClientTimeout => 0x1e,
            Status::ServerTimeout => 0x1f,
            Status::BadRequest => 0x28,
            Status::ServiceNotFound => 0x2c,
            Status::ServerError => 0x50,
            Status::ServerBusy => 0x51,
            Status::ServiceExpectedError => 0x52,
            Status::ServiceUnexpectedError => 0x53,
            Status::AppFlowControl => 0x54,
            Status::ProviderFlowControl => 0x55,
            Status::DeserializationFail => 0x56,
        }
    }

    pub const fn from_code(code: u8) -> Option<Status> {
        Some(match code {
            0x20 => Status::Ok,
            0x1e => Status::ClientTimeout,
            0x1f => Status::ServerTimeout,
            0x28 => Status::BadRequest,
            0x2c => Status::ServiceNotFound,
            0x50 => Status::ServerError,
            0x51 => Status::ServerBusy,
            0x52 => Status::ServiceExpectedError,
            0x53 => Status::ServiceUnexpectedError,
            0x54 => Status::AppFlowControl,
            0x55 => Status::ProviderFlowControl,
            0x56 => Status::DeserializationFail,
            _ => return None,
        })
    }

    pub fn is_ok(self) -> bool {
        self == Status::Ok
    }

    /// Maps a non-OK status to the caller-facing error.
    ///
    /// `timeout_ms` is only used for the two timeout statuses.
    pub fn into_error(self, message: impl Into<String>, timeout_ms: u64) -> FerruleError {
        let message = message.into();
        match self {
            Status::ClientTimeout => FerruleError::Timeout {
                kind: TimeoutKind::Client,
                millis: timeout_ms,
            },
            Status::ServerTimeout => FerruleError::Timeout {
                kind: TimeoutKind::Server,
                millis: timeout_ms,
            },
            Status::ServiceExpectedError => FerruleError::Business {
                message,
                expected: true,
            },
            Status::ServiceUnexpectedError => FerruleError::Business {
                message,
                expected: false,
            },
            status => FerruleError::Remote { status, message },
        }
    }
}

impl From<Status> for u8 {
    fn from(status: Status) -> u8 {
        status.code()
    }
}

impl TryFrom<u8> for Status {
    type Error = String;

    fn try_from(code: u8) -> std::result::Result<Self, Self::Error> {
        Status::from_code(code).ok_or_else(|| format!("unknown status code 0x{:02x}", code))
    }
}
