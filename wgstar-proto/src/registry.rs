use crate::{Message, ProtocolError, Result};
use serde_json::{Map, Value};
use std::collections::HashMap;

/// Builds one concrete message variant from a decoded field map.
///
/// Required fields that are missing or mistyped produce
/// [`ProtocolError::Construction`]; extra unknown fields are ignored so that
/// newer peers can add fields without breaking older ones.
pub type Constructor = fn(&Map<String, Value>) -> Result<Message>;

/// The authoritative list of message variants this endpoint understands.
///
/// Built once at startup and passed explicitly to the codec; decode looks up
/// the constructor by the `message_type` discriminator.
pub struct MessageRegistry {
    constructors: HashMap<&'static str, Constructor>,
}

impl MessageRegistry {
    pub fn new() -> Self {
        Self {
            constructors: HashMap::new(),
        }
    }

    /// Registry with every built-in variant registered.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register("request_ip_address", ip_address_request_from_fields);
        registry.register("hold_ip_address", ip_address_hold_request_from_fields);
        registry.register("ip_address_response", ip_address_response_from_fields);
        registry.register("error_response", error_response_from_fields);
        registry.register("ack", acknowledge_response_from_fields);
        registry
    }

    /// Adds a variant.
    ///
    /// # Panics
    ///
    /// Panics if `message_type` is already registered. Duplicate
    /// discriminators are a programming error and must surface at startup,
    /// not at decode time.
    pub fn register(&mut self, message_type: &'static str, constructor: Constructor) {
        let previous = self.constructors.insert(message_type, constructor);
        assert!(
            previous.is_none(),
            "duplicate message type registered: {}",
            message_type
        );
    }

    /// Looks up the constructor for a discriminator.
    ///
    /// Returns `None` for unknown types; peers on different protocol
    /// versions make this an expected runtime condition.
    pub fn resolve(&self, message_type: &str) -> Option<Constructor> {
        self.constructors.get(message_type).copied()
    }

    /// Builds a message from its discriminator and decoded field map.
    pub fn construct(&self, message_type: &str, fields: &Map<String, Value>) -> Result<Message> {
        let constructor = self
            .resolve(message_type)
            .ok_or_else(|| ProtocolError::UnknownMessageType(message_type.to_string()))?;
        constructor(fields)
    }
}

impl Default for MessageRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

fn require_str(
    fields: &Map<String, Value>,
    message_type: &'static str,
    key: &'static str,
) -> Result<String> {
    fields
        .get(key)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| ProtocolError::Construction {
            message_type: message_type.to_string(),
            reason: format!("missing or non-string field `{}`", key),
        })
}

fn require_error_code(fields: &Map<String, Value>, message_type: &'static str) -> Result<u16> {
    fields
        .get("error_code")
        .and_then(Value::as_u64)
        .and_then(|value| u16::try_from(value).ok())
        .ok_or_else(|| ProtocolError::Construction {
            message_type: message_type.to_string(),
            reason: "missing or out-of-range field `error_code`".to_string(),
        })
}

fn ip_address_request_from_fields(fields: &Map<String, Value>) -> Result<Message> {
    Ok(Message::IpAddressRequest {
        public_key: require_str(fields, "request_ip_address", "public_key")?,
    })
}

fn ip_address_hold_request_from_fields(fields: &Map<String, Value>) -> Result<Message> {
    Ok(Message::IpAddressHoldRequest {
        ip_address: require_str(fields, "hold_ip_address", "ip_address")?,
    })
}

fn ip_address_response_from_fields(fields: &Map<String, Value>) -> Result<Message> {
    Ok(Message::IpAddressResponse {
        server_public_key: require_str(fields, "ip_address_response", "server_public_key")?,
        peer_address: require_str(fields, "ip_address_response", "peer_address")?,
        peer_allowed_ips: require_str(fields, "ip_address_response", "peer_allowed_ips")?,
    })
}

fn error_response_from_fields(fields: &Map<String, Value>) -> Result<Message> {
    Ok(Message::ErrorResponse {
        error_code: require_error_code(fields, "error_response")?.into(),
        message: require_str(fields, "error_response", "message")?,
    })
}

fn acknowledge_response_from_fields(_fields: &Map<String, Value>) -> Result<Message> {
    Ok(Message::AcknowledgeResponse)
}
