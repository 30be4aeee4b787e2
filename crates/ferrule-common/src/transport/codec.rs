use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::protocol::error::{FerruleError, Result};
use crate::protocol::message::{MessageCode, SerializerType, WireMessage};
use crate::protocol::{Request, Response, Status};

/// Body codec selected by the serializer nibble of the sign byte.
///
/// Only JSON ships today; the enum is the extension point for other formats.
///
/// # Example
///
/// ```
/// use ferrule_common::protocol::{Directory, Request};
/// use ferrule_common::transport::Codec;
/// use serde_json::json;
///
/// let codec = Codec::new();
/// let request = Request::new(Directory::of("Calc"), "add", vec![json!(1), json!(2)]);
///
/// let frame = codec.encode_request(&request).unwrap();
/// let decoded = Codec::decode_request(&frame).unwrap();
/// assert_eq!(decoded, request);
/// ```
#[derive(Debug, Clone, Copy)]
pub enum Codec {
    Json(JsonCodec),
}

impl Codec {
    pub fn new() -> Self {
        Codec::Json(JsonCodec)
    }

    pub fn for_type(serializer: SerializerType) -> Self {
        match serializer {
            SerializerType::Json => Codec::Json(JsonCodec),
        }
    }

    pub fn serializer_type(&self) -> SerializerType {
        match self {
            Codec::Json(_) => SerializerType::Json,
        }
    }

    pub fn encode<T: Serialize>(&self, value: &T) -> Result<Bytes> {
        match self {
            Codec::Json(_) => JsonCodec::encode(value),
        }
    }

    pub fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T> {
        match self {
            Codec::Json(_) => JsonCodec::decode(data),
        }
    }

    /// Wraps a request into a REQUEST frame keyed by the request id.
    pub fn encode_request(&self, request: &Request) -> Result<WireMessage> {
        let body = self.encode(request)?;
        Ok(WireMessage::new(
            MessageCode::Request,
            self.serializer_type(),
            request.id,
            body,
        ))
    }

    /// Decodes a REQUEST frame with the serializer named in its header.
    pub fn decode_request(message: &WireMessage) -> Result<Request> {
        expect_code(message, MessageCode::Request)?;
        let mut request: Request = Codec::for_type(message.serializer).decode(&message.body)?;
        request.id = message.id;
        Ok(request)
    }

    /// Wraps a response into a RESPONSE frame carrying its status byte.
    pub fn encode_response(&self, response: &Response) -> Result<WireMessage> {
        let body = self.encode(response)?;
        Ok(WireMessage::new(
            MessageCode::Response,
            self.serializer_type(),
            response.id,
            body,
        )
        .with_status(response.status))
    }

    /// Decodes a RESPONSE frame. Header id and status win over the body's.
    pub fn decode_response(message: &WireMessage) -> Result<Response> {
        expect_code(message, MessageCode::Response)?;
        let status = Status::from_code(message.status).ok_or_else(|| {
            FerruleError::Protocol(format!("unknown status code 0x{:02x}", message.status))
        })?;
        let mut response: Response = Codec::for_type(message.serializer).decode(&message.body)?;
        response.id = message.id;
        response.status = status;
        Ok(response)
    }
}

impl Default for Codec {
    fn default() -> Self {
        Self::new()
    }
}

fn expect_code(message: &WireMessage, expected: MessageCode) -> Result<()> {
    if message.code != expected {
        return Err(FerruleError::Protocol(format!(
            "expected {:?} frame, got {:?}",
            expected, message.code
        )));
    }
    Ok(())
}

/// JSON body codec.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl JsonCodec {
    pub fn encode<T: Serialize>(value: &T) -> Result<Bytes> {
        Ok(Bytes::from(serde_json::to_vec(value)?))
    }

    pub fn decode<T: DeserializeOwned>(data: &[u8]) -> Result<T> {
        Ok(serde_json::from_slice(data)?)
    }
}
