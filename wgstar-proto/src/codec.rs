use crate::{crypto, Message, MessageRegistry, ProtocolError, Result, SessionKey};
use serde_json::Value;
use tracing::{debug, error};

/// Converts typed messages to and from their encrypted wire representation.
///
/// Encode serializes to the canonical JSON form and seals it under the
/// session key; decode opens the payload and reconstructs the message
/// through the registry, so the two ends may run different protocol
/// versions without the channel falling over.
pub struct MessageCodec {
    key: SessionKey,
    registry: MessageRegistry,
}

impl MessageCodec {
    pub fn new(key: SessionKey, registry: MessageRegistry) -> Self {
        Self { key, registry }
    }

    /// Serializes and encrypts a message.
    pub fn encode(&self, message: &Message) -> Result<Vec<u8>> {
        let plaintext = serde_json::to_vec(message).map_err(|e| {
            error!("failed to serialize {}: {}", message.message_type(), e);
            e
        })?;

        debug!(
            "encoding {} ({} plaintext bytes)",
            message.message_type(),
            plaintext.len()
        );

        crypto::seal(&self.key, &plaintext)
    }

    /// Decrypts and reconstructs a message.
    ///
    /// [`ProtocolError::AuthenticationFailed`] means the channel itself is
    /// suspect (wrong key, tampering); [`ProtocolError::UnknownMessageType`]
    /// and [`ProtocolError::Construction`] mean an authenticated peer speaks
    /// a different protocol version.
    pub fn decode(&self, sealed: &[u8]) -> Result<Message> {
        let plaintext = crypto::open(&self.key, sealed)?;

        let value: Value = serde_json::from_slice(&plaintext)?;
        let fields = value
            .as_object()
            .ok_or_else(|| ProtocolError::Malformed("payload is not an object".to_string()))?;
        let message_type = fields
            .get("message_type")
            .and_then(Value::as_str)
            .ok_or_else(|| ProtocolError::Malformed("missing `message_type`".to_string()))?;

        debug!("decoding {}", message_type);

        self.registry.construct(message_type, fields)
    }
}
