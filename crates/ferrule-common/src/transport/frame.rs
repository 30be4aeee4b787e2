//! Frame encoder and resumable frame decoder.
//!
//! The decoder is a checkpointing state machine:
//!
//! ```text
//! MAGIC -> SIGN -> STATUS -> ID -> BODY_SIZE -> BODY -> MAGIC ...
//!                                      |
//!                                      +-- HEARTBEAT (len 0) -> MAGIC
//! ```
//!
//! Each state consumes its field only once all of its bytes are buffered, so
//! input may be split at any byte boundary: `decode` returns `Ok(None)` and
//! resumes at the same state when more bytes arrive.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::protocol::error::{FerruleError, Result};
use crate::protocol::message::{unsign, MessageCode, SerializerType, WireMessage, HEADER_SIZE, MAGIC};

/// Default upper bound for a single body (100 MB).
pub const DEFAULT_MAX_BODY_SIZE: usize = 100 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Magic,
    Sign,
    Status,
    Id,
    BodySize,
    Body,
}

/// Streaming decoder for one connection's inbound bytes.
#[derive(Debug)]
pub struct FrameDecoder {
    state: State,
    max_body_size: usize,
    code: MessageCode,
    serializer: SerializerType,
    status: u8,
    id: u64,
    body_size: usize,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::with_max_body_size(DEFAULT_MAX_BODY_SIZE)
    }

    pub fn with_max_body_size(max_body_size: usize) -> Self {
        Self {
            state: State::Magic,
            max_body_size,
            code: MessageCode::Heartbeat,
            serializer: SerializerType::default(),
            status: 0,
            id: 0,
            body_size: 0,
        }
    }

    /// Whether the decoder sits between frames (no partial frame consumed).
    pub fn is_idle(&self) -> bool {
        self.state == State::Magic
    }

    /// Decodes the next complete frame from `src`.
    ///
    /// Returns `Ok(None)` when more bytes are needed. An `Err` is a protocol
    /// violation; the connection must be closed and the decoder discarded.
    pub fn decode(&mut self, src: &mut BytesMut) -> Result<Option<WireMessage>> {
        loop {
            match self.state {
                State::Magic => {
                    if src.len() < 2 {
                        return Ok(None);
                    }
                    let magic = u16::from_be_bytes([src[0], src[1]]);
                    if magic != MAGIC {
                        return Err(FerruleError::Protocol(format!(
                            "bad magic 0x{:04x}",
                            magic
                        )));
                    }
                    src.advance(2);
                    self.state = State::Sign;
                }
                State::Sign => {
                    if src.is_empty() {
                        return Ok(None);
                    }
                    let (serializer, code) = unsign(src.get_u8())?;
                    self.serializer = serializer;
                    self.code = code;
                    self.state = State::Status;
                }
                State::Status => {
                    if src.is_empty() {
                        return Ok(None);
                    }
                    self.status = src.get_u8();
                    self.state = State::Id;
                }
                State::Id => {
                    if src.len() < 8 {
                        return Ok(None);
                    }
                    self.id = src.get_u64();
                    self.state = State::BodySize;
                }
                State::BodySize => {
                    if src.len() < 4 {
                        return Ok(None);
                    }
                    let body_size = src.get_u32() as usize;
                    if self.code == MessageCode::Heartbeat {
                        if body_size != 0 {
                            return Err(FerruleError::Protocol(format!(
                                "heartbeat with body length {}",
                                body_size
                            )));
                        }
                        self.state = State::Magic;
                        return Ok(Some(self.emit(Bytes::new())));
                    }
                    if body_size > self.max_body_size {
                        return Err(FerruleError::Protocol(format!(
                            "body too large: {} bytes (max {} bytes)",
                            body_size, self.max_body_size
                        )));
                    }
                    self.body_size = body_size;
                    self.state = State::Body;
                }
                State::Body => {
                    if src.len() < self.body_size {
                        src.reserve(self.body_size - src.len());
                        return Ok(None);
                    }
                    let body = src.split_to(self.body_size).freeze();
                    self.state = State::Magic;
                    return Ok(Some(self.emit(body)));
                }
            }
        }
    }

    fn emit(&self, body: Bytes) -> WireMessage {
        WireMessage {
            code: self.code,
            serializer: self.serializer,
            status: self.status,
            id: self.id,
            body,
        }
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Appends the bit-exact encoding of `message` to `dst`.
pub fn encode_frame(message: &WireMessage, dst: &mut BytesMut) -> Result<()> {
    let body_len = u32::try_from(message.body.len()).map_err(|_| {
        FerruleError::Protocol(format!("body too large: {} bytes", message.body.len()))
    })?;

    dst.reserve(HEADER_SIZE + message.body.len());
    dst.put_u16(MAGIC);
    dst.put_u8(message.sign());
    dst.put_u8(message.status);
    dst.put_u64(message.id);
    dst.put_u32(body_len);
    dst.put_slice(&message.body);
    Ok(())
}
