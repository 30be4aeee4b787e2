use serde::{Deserialize, Serialize};

use ferrule_common::protocol::{Address, Directory, FerruleError, MessageCode, Result, WireMessage};
use ferrule_common::transport::Codec;

/// What a provider publishes about itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterMeta {
    pub address: Address,
    pub directory: Directory,
    pub weight: u32,
    /// Window over which consumers ramp the weight up after connecting.
    #[serde(default)]
    pub warm_up_ms: u64,
    /// Connections a consumer should open to this address.
    pub connection_count: u32,
}

impl RegisterMeta {
    pub fn new(address: Address, directory: Directory) -> Self {
        Self {
            address,
            directory,
            weight: 50,
            warm_up_ms: 0,
            connection_count: 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Payload {
    Publish(RegisterMeta),
    PublishCancel(RegisterMeta),
    Subscribe(Directory),
    Offline(Address),
    Ack { sequence: u64 },
}

impl Payload {
    pub fn code(&self) -> MessageCode {
        match self {
            Payload::Publish(_) => MessageCode::PublishService,
            Payload::PublishCancel(_) => MessageCode::PublishCancelService,
            Payload::Subscribe(_) => MessageCode::SubscribeService,
            Payload::Offline(_) => MessageCode::OfflineNotice,
            Payload::Ack { .. } => MessageCode::Ack,
        }
    }

    /// Directory the version of this payload applies to, if versioned.
    pub fn directory(&self) -> Option<&Directory> {
        match self {
            Payload::Publish(meta) | Payload::PublishCancel(meta) => Some(&meta.directory),
            Payload::Subscribe(directory) => Some(directory),
            Payload::Offline(_) | Payload::Ack { .. } => None,
        }
    }
}

/// One registry exchange. The frame's correlation id carries `sequence`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryMessage {
    #[serde(skip)]
    pub sequence: u64,
    /// Per-directory monotonic counter; receivers drop anything not newer
    /// than what they applied.
    pub version: u64,
    pub payload: Payload,
}

impl RegistryMessage {
    pub fn new(sequence: u64, version: u64, payload: Payload) -> Self {
        Self {
            sequence,
            version,
            payload,
        }
    }

    pub fn ack(sequence: u64) -> Self {
        Self::new(sequence, 0, Payload::Ack { sequence })
    }

    pub fn to_wire(&self, codec: &Codec) -> Result<WireMessage> {
        let body = codec.encode(self)?;
        Ok(WireMessage::new(
            self.payload.code(),
            codec.serializer_type(),
            self.sequence,
            body,
        ))
    }

    pub fn from_wire(message: &WireMessage) -> Result<Self> {
        let mut decoded: RegistryMessage = Codec::for_type(message.serializer).decode(&message.body)?;
        if decoded.payload.code() != message.code {
            return Err(FerruleError::Protocol(format!(
                "frame code {:?} does not match {:?} payload",
                message.code,
                decoded.payload.code()
            )));
        }
        decoded.sequence = message.id;
        Ok(decoded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta() -> RegisterMeta {
        RegisterMeta::new(Address::new("10.0.0.7", 18090), Directory::of("Calculator"))
    }

    #[test]
    fn test_wire_codes() {
        let codec = Codec::new();
        let cases = [
            (Payload::Publish(meta()), MessageCode::PublishService),
            (Payload::PublishCancel(meta()), MessageCode::PublishCancelService),
            (Payload::Subscribe(Directory::of("Calculator")), MessageCode::SubscribeService),
            (Payload::Offline(Address::new("10.0.0.7", 18090)), MessageCode::OfflineNotice),
            (Payload::Ack { sequence: 3 }, MessageCode::Ack),
        ];
        for (payload, code) in cases {
            let message = RegistryMessage::new(11, 2, payload);
            let wire = message.to_wire(&codec).unwrap();
            assert_eq!(wire.code, code);
            assert_eq!(wire.id, 11);
            assert_eq!(RegistryMessage::from_wire(&wire).unwrap(), message);
        }
    }

    #[test]
    fn test_mismatched_code_is_protocol_error() {
        let codec = Codec::new();
        let mut wire = RegistryMessage::ack(5).to_wire(&codec).unwrap();
        wire.code = MessageCode::PublishService;
        assert!(matches!(RegistryMessage::from_wire(&wire), Err(FerruleError::Protocol(_))));
    }

    #[test]
    fn test_warm_up_defaults_when_absent() {
        let json = r#"{"address":{"host":"h","port":1},"directory":{"group":"Default","service":"S","version":"1.0.0"},"weight":5,"connection_count":2}"#;
        let meta: RegisterMeta = serde_json::from_str(json).unwrap();
        assert_eq!(meta.warm_up_ms, 0);
        assert_eq!(meta.connection_count, 2);
    }
}
