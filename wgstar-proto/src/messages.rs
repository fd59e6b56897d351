use serde::{Deserialize, Serialize};

/// All message variants the protocol understands.
///
/// The wire form is a JSON object tagged by `message_type`; field order is
/// the declaration order here, so encoding is deterministic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "message_type")]
pub enum Message {
    /// Client asks the server for an address, identified by its public key
    #[serde(rename = "request_ip_address")]
    IpAddressRequest { public_key: String },

    /// Client asks the server to pin an address so it is never allocated
    #[serde(rename = "hold_ip_address")]
    IpAddressHoldRequest { ip_address: String },

    /// Server grants an address inside the network
    #[serde(rename = "ip_address_response")]
    IpAddressResponse {
        server_public_key: String,
        peer_address: String,
        peer_allowed_ips: String,
    },

    /// Server reports an authenticated-but-failed request
    #[serde(rename = "error_response")]
    ErrorResponse { error_code: ErrorCode, message: String },

    /// Server confirms a request that carries no response data
    #[serde(rename = "ack")]
    AcknowledgeResponse,
}

impl Message {
    /// The wire discriminator for this variant.
    pub fn message_type(&self) -> &'static str {
        match self {
            Message::IpAddressRequest { .. } => "request_ip_address",
            Message::IpAddressHoldRequest { .. } => "hold_ip_address",
            Message::IpAddressResponse { .. } => "ip_address_response",
            Message::ErrorResponse { .. } => "error_response",
            Message::AcknowledgeResponse => "ack",
        }
    }

    pub fn request_ip_address(public_key: impl Into<String>) -> Self {
        Message::IpAddressRequest {
            public_key: public_key.into(),
        }
    }

    pub fn hold_ip_address(ip_address: impl Into<String>) -> Self {
        Message::IpAddressHoldRequest {
            ip_address: ip_address.into(),
        }
    }

    pub fn ip_address_response(
        server_public_key: impl Into<String>,
        peer_address: impl Into<String>,
        peer_allowed_ips: impl Into<String>,
    ) -> Self {
        Message::IpAddressResponse {
            server_public_key: server_public_key.into(),
            peer_address: peer_address.into(),
            peer_allowed_ips: peer_allowed_ips.into(),
        }
    }

    pub fn error(error_code: ErrorCode, message: impl Into<String>) -> Self {
        Message::ErrorResponse {
            error_code,
            message: message.into(),
        }
    }

    pub fn ack() -> Self {
        Message::AcknowledgeResponse
    }
}

/// Protocol-level failure classes.
///
/// Wire values are stable across versions; a code this build does not know
/// is carried through as [`ErrorCode::Unrecognized`] instead of being
/// rejected, so older clients can still interpret errors from newer servers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u16", from = "u16")]
pub enum ErrorCode {
    NetworkIsFull,
    InvalidAddress,
    ConfigReloadFailure,
    UnrecognizedMessage,
    MalformedMessage,
    Internal,
    Unrecognized(u16),
}

impl From<ErrorCode> for u16 {
    fn from(code: ErrorCode) -> u16 {
        match code {
            ErrorCode::NetworkIsFull => 1,
            ErrorCode::InvalidAddress => 2,
            ErrorCode::ConfigReloadFailure => 3,
            ErrorCode::UnrecognizedMessage => 4,
            ErrorCode::MalformedMessage => 5,
            ErrorCode::Internal => 6,
            ErrorCode::Unrecognized(value) => value,
        }
    }
}

impl From<u16> for ErrorCode {
    fn from(value: u16) -> ErrorCode {
        match value {
            1 => ErrorCode::NetworkIsFull,
            2 => ErrorCode::InvalidAddress,
            3 => ErrorCode::ConfigReloadFailure,
            4 => ErrorCode::UnrecognizedMessage,
            5 => ErrorCode::MalformedMessage,
            6 => ErrorCode::Internal,
            other => ErrorCode::Unrecognized(other),
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorCode::NetworkIsFull => write!(f, "network_is_full"),
            ErrorCode::InvalidAddress => write!(f, "invalid_address"),
            ErrorCode::ConfigReloadFailure => write!(f, "config_reload_failure"),
            ErrorCode::UnrecognizedMessage => write!(f, "unrecognized_message"),
            ErrorCode::MalformedMessage => write!(f, "malformed_message"),
            ErrorCode::Internal => write!(f, "internal"),
            ErrorCode::Unrecognized(value) => write!(f, "unrecognized_code_{}", value),
        }
    }
}
