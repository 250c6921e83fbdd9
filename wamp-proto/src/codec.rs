use crate::{Message, Result};
use bytes::Bytes;

/// Payload serialization seam between the message model and the wire.
///
/// The engine only ever sees [`Message`] values and opaque bytes, so
/// binary formats can be plugged in without touching session logic.
pub trait Codec: Send + Sync {
    fn encode(&self, message: &Message) -> Result<Bytes>;
    fn decode(&self, bytes: &[u8]) -> Result<Message>;
}

/// The JSON codec every WAMP peer must support.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn encode(&self, message: &Message) -> Result<Bytes> {
        let raw = serde_json::to_vec(&serde_json::Value::Array(message.to_wire()))?;
        Ok(Bytes::from(raw))
    }

    fn decode(&self, bytes: &[u8]) -> Result<Message> {
        let raw: Vec<serde_json::Value> = serde_json::from_slice(bytes)?;
        Message::from_wire(raw)
    }
}
