//! Ferrule Transport Layer
//!
//! # Wire Format
//!
//! Every frame starts with a fixed 16-byte header (see
//! [`protocol::message`](crate::protocol::message)) followed by `body len`
//! bytes of serialized body. Bodies above `max_body_size` (100 MB by default)
//! are rejected to prevent memory exhaustion.
//!
//! # Components
//!
//! - **[`FrameDecoder`]** / **[`encode_frame`]**: resumable framing state machine
//! - **[`Codec`]** / **[`JsonCodec`]**: request/response bodies
//! - **[`Channel`]**: one connection, with a queue-fed writer task and a
//!   decoding reader task
//! - **[`TcpConnector`]**: opens client channels
//! - **[`TcpAcceptor`]**: accepts server channels

pub mod channel;
pub mod codec;
pub mod frame;
pub mod tcp;
pub mod tcp_server;

pub use channel::{Channel, ChannelConfig, FrameHandler};
pub use codec::{Codec, JsonCodec};
pub use frame::{encode_frame, FrameDecoder, DEFAULT_MAX_BODY_SIZE};
pub use tcp::TcpConnector;
pub use tcp_server::TcpAcceptor;
