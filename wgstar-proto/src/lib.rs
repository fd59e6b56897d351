pub mod codec;
pub mod crypto;
pub mod framing;
pub mod messages;
pub mod registry;

pub use codec::*;
pub use crypto::*;
pub use framing::*;
pub use messages::*;
pub use registry::*;

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Frame too large: {0} bytes (max: {1})")]
    FrameTooLarge(usize, usize),

    #[error("Authentication failed: frame rejected")]
    AuthenticationFailed,

    #[error("Unknown message type: {0}")]
    UnknownMessageType(String),

    #[error("Cannot construct {message_type}: {reason}")]
    Construction {
        message_type: String,
        reason: String,
    },

    #[error("Malformed message: {0}")]
    Malformed(String),

    #[error("Invalid key: {0}")]
    InvalidKey(String),

    #[error("Cipher failure: {0}")]
    Crypto(&'static str),

    #[error("Connection closed by peer")]
    ConnectionClosed,

    #[error("Credentials rejected by server")]
    CredentialsRejected,

    #[error("Server error ({error_code}): {message}")]
    Server {
        error_code: messages::ErrorCode,
        message: String,
    },

    #[error("Unexpected message: {0}")]
    UnexpectedMessage(String),
}

pub type Result<T> = std::result::Result<T, ProtocolError>;
