//! Binary wire encoding for sync frames.
//!
//! Frames are CBOR maps with small fixed integer keys. Integer keys 0-23
//! encode as single bytes, and a decoder skips keys it does not know, so
//! fields can be added without breaking older peers. Reserved component
//! and message-type values are rejected rather than guessed at.

use bytes::Bytes;
use ciborium::value::Value;

use crate::component::ComponentId;
use crate::error::WireError;
use crate::message::{MessageBatch, MessageType, SyncMessage};
use crate::node::{NodeId, NODE_ID_LEN};

/// Field keys, fixed for the life of the protocol.
mod keys {
    pub mod message {
        pub const ORIGIN: u64 = 0;
        pub const COMPONENT: u64 = 1;
        pub const TYPE: u64 = 2;
        pub const VERSION: u64 = 3;
        pub const PAYLOAD: u64 = 4;
    }
    pub mod batch {
        pub const MESSAGES: u64 = 0;
    }
}

/// Encode a batch to frame bytes.
pub fn encode_batch(batch: &MessageBatch) -> Result<Vec<u8>, WireError> {
    let messages = batch.messages.iter().map(message_to_value).collect();
    let frame = Value::Map(vec![(
        Value::Integer(keys::batch::MESSAGES.into()),
        Value::Array(messages),
    )]);

    let mut buf = Vec::new();
    ciborium::ser::into_writer(&frame, &mut buf).map_err(|e| WireError::Encode(e.to_string()))?;
    Ok(buf)
}

/// Decode a batch from frame bytes.
pub fn decode_batch(bytes: &[u8]) -> Result<MessageBatch, WireError> {
    let frame: Value =
        ciborium::de::from_reader(bytes).map_err(|e| WireError::Decode(e.to_string()))?;
    let entries = match frame {
        Value::Map(entries) => entries,
        _ => return Err(WireError::Decode("frame is not a map".into())),
    };

    let mut messages = None;
    for (key, value) in &entries {
        match integer_key(key) {
            Some(keys::batch::MESSAGES) => match value {
                Value::Array(items) => {
                    let decoded: Result<Vec<_>, _> =
                        items.iter().map(message_from_value).collect();
                    messages = Some(decoded?);
                }
                _ => return Err(WireError::InvalidField("messages")),
            },
            // Unknown keys are skipped for forward compatibility.
            _ => {}
        }
    }

    Ok(MessageBatch {
        messages: messages.ok_or(WireError::MissingField("messages"))?,
    })
}

fn message_to_value(message: &SyncMessage) -> Value {
    Value::Map(vec![
        (
            Value::Integer(keys::message::ORIGIN.into()),
            Value::Bytes(message.origin().as_bytes().to_vec()),
        ),
        (
            Value::Integer(keys::message::COMPONENT.into()),
            Value::Integer(u64::from(message.component().as_u32()).into()),
        ),
        (
            Value::Integer(keys::message::TYPE.into()),
            Value::Integer(u64::from(message.message_type().as_u32()).into()),
        ),
        (
            Value::Integer(keys::message::VERSION.into()),
            Value::Integer(message.version().into()),
        ),
        (
            Value::Integer(keys::message::PAYLOAD.into()),
            Value::Bytes(message.payload().to_vec()),
        ),
    ])
}

fn message_from_value(value: &Value) -> Result<SyncMessage, WireError> {
    let entries = match value {
        Value::Map(entries) => entries,
        _ => return Err(WireError::Decode("message is not a map".into())),
    };

    let mut origin = None;
    let mut component = None;
    let mut message_type = None;
    let mut version = None;
    let mut payload = None;

    for (key, value) in entries {
        match integer_key(key) {
            Some(keys::message::ORIGIN) => {
                let bytes = value.as_bytes().ok_or(WireError::InvalidField("origin"))?;
                let id = NodeId::try_from(bytes.as_slice()).map_err(|_| {
                    WireError::InvalidOriginLength {
                        expected: NODE_ID_LEN,
                        got: bytes.len(),
                    }
                })?;
                origin = Some(id);
            }
            Some(keys::message::COMPONENT) => {
                let raw = integer_field(value, "component")?;
                component =
                    Some(ComponentId::from_u32(raw).ok_or(WireError::UnknownComponent(raw))?);
            }
            Some(keys::message::TYPE) => {
                let raw = integer_field(value, "type")?;
                message_type =
                    Some(MessageType::from_u32(raw).ok_or(WireError::ReservedMessageType(raw))?);
            }
            Some(keys::message::VERSION) => {
                version = Some(u64_field(value, "version")?);
            }
            Some(keys::message::PAYLOAD) => {
                let bytes = value.as_bytes().ok_or(WireError::InvalidField("payload"))?;
                payload = Some(Bytes::copy_from_slice(bytes));
            }
            // Unknown keys are skipped for forward compatibility.
            _ => {}
        }
    }

    let origin = origin.ok_or(WireError::MissingField("origin"))?;
    let component = component.ok_or(WireError::MissingField("component"))?;
    let message_type = message_type.ok_or(WireError::MissingField("type"))?;
    let version = version.ok_or(WireError::MissingField("version"))?;
    let payload = payload.ok_or(WireError::MissingField("payload"))?;

    Ok(match message_type {
        MessageType::Snapshot => SyncMessage::snapshot(origin, component, version, payload),
        MessageType::Aggregate => SyncMessage::aggregate(origin, component, version, payload),
    })
}

fn integer_key(value: &Value) -> Option<u64> {
    match value {
        Value::Integer(i) => u64::try_from(*i).ok(),
        _ => None,
    }
}

fn u64_field(value: &Value, field: &'static str) -> Result<u64, WireError> {
    match value {
        Value::Integer(i) => u64::try_from(*i).map_err(|_| WireError::InvalidField(field)),
        _ => Err(WireError::InvalidField(field)),
    }
}

fn integer_field(value: &Value, field: &'static str) -> Result<u32, WireError> {
    let raw = u64_field(value, field)?;
    u32::try_from(raw).map_err(|_| WireError::InvalidField(field))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_batch() -> MessageBatch {
        let a = NodeId::from_bytes([0xaa; NODE_ID_LEN]);
        let b = NodeId::from_bytes([0xbb; NODE_ID_LEN]);
        MessageBatch::from(vec![
            SyncMessage::snapshot(a, ComponentId::Resources, 7, &b"cpu=8"[..]),
            SyncMessage::aggregate(b, ComponentId::Commands, 0, &b"drain"[..]),
        ])
    }

    #[test]
    fn test_batch_roundtrip() {
        let batch = sample_batch();
        let bytes = encode_batch(&batch).unwrap();
        let decoded = decode_batch(&bytes).unwrap();
        assert_eq!(decoded, batch);
    }

    #[test]
    fn test_empty_batch_roundtrip() {
        let batch = MessageBatch::default();
        let decoded = decode_batch(&encode_batch(&batch).unwrap()).unwrap();
        assert!(decoded.is_empty());
    }

    #[test]
    fn test_unknown_fields_are_skipped() {
        // A frame written by a newer peer: extra keys at both levels.
        let origin = NodeId::from_bytes([1; NODE_ID_LEN]);
        let message = Value::Map(vec![
            (Value::Integer(0u64.into()), Value::Bytes(origin.0.to_vec())),
            (Value::Integer(1u64.into()), Value::Integer(0u64.into())),
            (Value::Integer(2u64.into()), Value::Integer(0u64.into())),
            (Value::Integer(3u64.into()), Value::Integer(9u64.into())),
            (Value::Integer(4u64.into()), Value::Bytes(b"x".to_vec())),
            (Value::Integer(99u64.into()), Value::Text("future".into())),
        ]);
        let frame = Value::Map(vec![
            (Value::Integer(0u64.into()), Value::Array(vec![message])),
            (Value::Integer(42u64.into()), Value::Integer(1u64.into())),
        ]);
        let mut bytes = Vec::new();
        ciborium::ser::into_writer(&frame, &mut bytes).unwrap();

        let decoded = decode_batch(&bytes).unwrap();
        assert_eq!(decoded.len(), 1);
        assert_eq!(decoded.messages[0].origin(), origin);
        assert_eq!(decoded.messages[0].version(), 9);
    }

    #[test]
    fn test_reserved_message_type_rejected() {
        let origin = NodeId::from_bytes([1; NODE_ID_LEN]);
        let message = Value::Map(vec![
            (Value::Integer(0u64.into()), Value::Bytes(origin.0.to_vec())),
            (Value::Integer(1u64.into()), Value::Integer(0u64.into())),
            (Value::Integer(2u64.into()), Value::Integer(7u64.into())),
            (Value::Integer(3u64.into()), Value::Integer(1u64.into())),
            (Value::Integer(4u64.into()), Value::Bytes(Vec::new())),
        ]);
        let frame = Value::Map(vec![(
            Value::Integer(0u64.into()),
            Value::Array(vec![message]),
        )]);
        let mut bytes = Vec::new();
        ciborium::ser::into_writer(&frame, &mut bytes).unwrap();

        match decode_batch(&bytes) {
            Err(WireError::ReservedMessageType(7)) => {}
            other => panic!("expected reserved type error, got {:?}", other),
        }
    }

    #[test]
    fn test_missing_field_rejected() {
        // No version field.
        let origin = NodeId::from_bytes([1; NODE_ID_LEN]);
        let message = Value::Map(vec![
            (Value::Integer(0u64.into()), Value::Bytes(origin.0.to_vec())),
            (Value::Integer(1u64.into()), Value::Integer(0u64.into())),
            (Value::Integer(2u64.into()), Value::Integer(0u64.into())),
            (Value::Integer(4u64.into()), Value::Bytes(Vec::new())),
        ]);
        let frame = Value::Map(vec![(
            Value::Integer(0u64.into()),
            Value::Array(vec![message]),
        )]);
        let mut bytes = Vec::new();
        ciborium::ser::into_writer(&frame, &mut bytes).unwrap();

        match decode_batch(&bytes) {
            Err(WireError::MissingField("version")) => {}
            other => panic!("expected missing field error, got {:?}", other),
        }
    }

    #[test]
    fn test_wrong_origin_length_rejected() {
        let message = Value::Map(vec![
            (Value::Integer(0u64.into()), Value::Bytes(vec![1, 2, 3])),
            (Value::Integer(1u64.into()), Value::Integer(0u64.into())),
            (Value::Integer(2u64.into()), Value::Integer(0u64.into())),
            (Value::Integer(3u64.into()), Value::Integer(1u64.into())),
            (Value::Integer(4u64.into()), Value::Bytes(Vec::new())),
        ]);
        let frame = Value::Map(vec![(
            Value::Integer(0u64.into()),
            Value::Array(vec![message]),
        )]);
        let mut bytes = Vec::new();
        ciborium::ser::into_writer(&frame, &mut bytes).unwrap();

        match decode_batch(&bytes) {
            Err(WireError::InvalidOriginLength { expected: 16, got: 3 }) => {}
            other => panic!("expected origin length error, got {:?}", other),
        }
    }
}
