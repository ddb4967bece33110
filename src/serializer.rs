//! Packet wire format.
//!
//! The connection hands packets to a [`PacketSerializer`] before publishing
//! and runs every inbound payload through it before dispatch. JSON via
//! serde_json is the default.

use std::marker::PhantomData;
use std::sync::Arc;

use crate::{Packet, PacketBody, Result};

/// Converts packets to and from their text wire form.
pub trait PacketSerializer<B: PacketBody>: Send + Sync {
    /// Encode a packet.
    fn serialize(&self, packet: &Packet<B>) -> Result<String>;

    /// Decode a packet. Malformed input yields `Error::Serialization`.
    fn deserialize(&self, payload: &str) -> Result<Packet<B>>;
}

/// Shared serializer pointer.
pub type SerializerPtr<B> = Arc<dyn PacketSerializer<B>>;

/// JSON serializer backed by serde_json.
pub struct JsonSerializer<B> {
    _body: PhantomData<fn() -> B>,
}

impl<B> JsonSerializer<B> {
    pub fn new() -> Self {
        Self { _body: PhantomData }
    }
}

impl<B> Default for JsonSerializer<B> {
    fn default() -> Self {
        Self::new()
    }
}

impl<B: PacketBody> PacketSerializer<B> for JsonSerializer<B> {
    fn serialize(&self, packet: &Packet<B>) -> Result<String> {
        Ok(serde_json::to_string(packet)?)
    }

    fn deserialize(&self, payload: &str) -> Result<Packet<B>> {
        Ok(serde_json::from_str(payload)?)
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use crate::packet::tests::Sample;
    use crate::{Channel, CorrelationId, Error};

    #[test]
    fn test_fire_and_forget_wire_form() {
        // ---
        let serializer = JsonSerializer::<Sample>::new();
        let text = serializer.serialize(&Packet::new(Sample::Ping)).unwrap();
        assert_eq!(text, r#"{"body":{"type":"Ping"}}"#);
    }

    #[test]
    fn test_request_keeps_routing_data() {
        // ---
        let serializer = JsonSerializer::<Sample>::new();
        let id = CorrelationId::from("id-1");
        let packet = Packet::new(Sample::Echo {
            payload: "x".into(),
        })
        .into_request(id.clone(), Channel::from("responses/n1"));

        let decoded = serializer
            .deserialize(&serializer.serialize(&packet).unwrap())
            .unwrap();

        assert_eq!(decoded, packet);
        assert_eq!(decoded.correlation_id(), Some(&id));
        assert_eq!(decoded.reply_to().map(Channel::as_str), Some("responses/n1"));
    }

    #[test]
    fn test_malformed_input_is_serialization_error() {
        // ---
        let serializer = JsonSerializer::<Sample>::new();
        let err = serializer.deserialize("{not json").unwrap_err();
        assert!(matches!(err, Error::Serialization(_)));

        let err = serializer
            .deserialize(r#"{"body":{"type":"Unknown"}}"#)
            .unwrap_err();
        assert!(matches!(err, Error::Serialization(_)));
    }
}
