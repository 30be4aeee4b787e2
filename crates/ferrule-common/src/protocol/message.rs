//! Wire-level message envelope.
//!
//! ```text
//! 0      2      3        4                  12           16
//! +------+------+--------+------------------+------------+-----------+
//! |magic | sign | status | correlation id   | body len   | body ...  |
//! | u16  |  u8  |   u8   |       u64        |    u32     |           |
//! +------+------+--------+------------------+------------+-----------+
//! ```
//!
//! All integers are big-endian. `sign = (serializer << 4) | message_code`.

use std::fmt;

use bytes::Bytes;

use super::error::{FerruleError, Result};
use super::status::Status;

pub const MAGIC: u16 = 0xBABE;

pub const HEADER_SIZE: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageCode {
    Request,
    Response,
    PublishService,
    PublishCancelService,
    SubscribeService,
    OfflineNotice,
    Ack,
    Heartbeat,
}

impl MessageCode {
    pub const fn code(self) -> u8 {
        match self {
            MessageCode::Request => 0x01,
            MessageCode::Response => 0x02,
            MessageCode::PublishService => 0x03,
            MessageCode::PublishCancelService => 0x04,
            MessageCode::SubscribeService => 0x05,
            MessageCode::OfflineNotice => 0x06,
            MessageCode::Ack => 0x07,
            MessageCode::Heartbeat => 0x0f,
        }
    }

    pub fn from_code(code: u8) -> Result<Self> {
        Ok(match code {
            0x01 => MessageCode::Request,
            0x02 => MessageCode::Response,
            0x03 => MessageCode::PublishService,
            0x04 => MessageCode::PublishCancelService,
            0x05 => MessageCode::SubscribeService,
            0x06 => MessageCode::OfflineNotice,
            0x07 => MessageCode::Ack,
            0x0f => MessageCode::Heartbeat,
            other => {
                return Err(FerruleError::Protocol(format!(
                    "unknown message code 0x{:x}",
                    other
                )))
            }
        })
    }
}

/// Serializer tag stored in the high nibble of the sign byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SerializerType {
    #[default]
    Json,
}

impl SerializerType {
    pub const fn code(self) -> u8 {
        match self {
            SerializerType::Json => 0x01,
        }
    }

    pub fn from_code(code: u8) -> Result<Self> {
        match code {
            0x01 => Ok(SerializerType::Json),
            other => Err(FerruleError::Protocol(format!(
                "unknown serializer type 0x{:x}",
                other
            ))),
        }
    }
}

/// Packs the sign byte.
pub const fn sign(serializer: SerializerType, code: MessageCode) -> u8 {
    (serializer.code() << 4) | (code.code() & 0x0f)
}

/// Splits the sign byte into `(serializer, message code)`.
pub fn unsign(sign: u8) -> Result<(SerializerType, MessageCode)> {
    let code = MessageCode::from_code(sign & 0x0f)?;
    // Heartbeats carry no body, so their serializer nibble is not checked.
    if code == MessageCode::Heartbeat {
        return Ok((SerializerType::default(), code));
    }
    Ok((SerializerType::from_code(sign >> 4)?, code))
}

/// One decoded frame: header fields plus the still-serialized body.
#[derive(Clone, PartialEq, Eq)]
pub struct WireMessage {
    pub code: MessageCode,
    pub serializer: SerializerType,
    /// Raw status byte. Zero on requests; see [`Status`] for responses.
    pub status: u8,
    pub id: u64,
    pub body: Bytes,
}

impl WireMessage {
    pub fn new(code: MessageCode, serializer: SerializerType, id: u64, body: impl Into<Bytes>) -> Self {
        Self {
            code,
            serializer,
            status: 0,
            id,
            body: body.into(),
        }
    }

    pub fn heartbeat() -> Self {
        Self::new(MessageCode::Heartbeat, SerializerType::default(), 0, Bytes::new())
    }

    pub fn with_status(mut self, status: Status) -> Self {
        self.status = status.code();
        self
    }

    pub fn sign(&self) -> u8 {
        sign(self.serializer, self.code)
    }

    /// Total encoded size including the header.
    pub fn encoded_len(&self) -> usize {
        HEADER_SIZE + self.body.len()
    }
}

impl fmt::Debug for WireMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WireMessage")
            .field("code", &self.code)
            .field("serializer", &self.serializer)
            .field("status", &format_args!("0x{:02x}", self.status))
            .field("id", &self.id)
            .field("body_len", &self.body.len())
            .finish()
    }
}
