use tokio::io::{AsyncRead, AsyncWrite};
use tokio::time::{timeout, Duration};
use tracing::{debug, info, warn};
use wgstar_proto::{framing, FrameRead, Message, MessageCodec, ProtocolError, Result};

/// One granted address assignment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressAssignment {
    pub server_public_key: String,
    pub peer_address: String,
    pub peer_allowed_ips: String,
}

/// Client side of one session: strictly alternating request/response
/// exchanges over a connected stream.
pub struct StarClient {
    codec: MessageCodec,
    read_timeout: Duration,
    write_timeout: Duration,
}

impl StarClient {
    pub fn new(codec: MessageCodec, read_timeout_secs: u64, write_timeout_secs: u64) -> Self {
        Self {
            codec,
            read_timeout: Duration::from_secs(read_timeout_secs),
            write_timeout: Duration::from_secs(write_timeout_secs),
        }
    }

    /// Requests an address for `public_key`.
    pub async fn request_address<S>(
        &self,
        stream: &mut S,
        public_key: &str,
    ) -> Result<AddressAssignment>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let response = self
            .roundtrip(stream, &Message::request_ip_address(public_key))
            .await?;

        match response {
            Message::IpAddressResponse {
                server_public_key,
                peer_address,
                peer_allowed_ips,
            } => {
                info!("assigned {} (allowed ips: {})", peer_address, peer_allowed_ips);
                Ok(AddressAssignment {
                    server_public_key,
                    peer_address,
                    peer_allowed_ips,
                })
            }
            Message::ErrorResponse {
                error_code,
                message,
            } => Err(ProtocolError::Server {
                error_code,
                message,
            }),
            other => Err(ProtocolError::UnexpectedMessage(
                other.message_type().to_string(),
            )),
        }
    }

    /// Asks the server to pin `ip_address` so it is never allocated.
    pub async fn hold_address<S>(&self, stream: &mut S, ip_address: &str) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let response = self
            .roundtrip(stream, &Message::hold_ip_address(ip_address))
            .await?;

        match response {
            Message::AcknowledgeResponse => {
                info!("server holds {}", ip_address);
                Ok(())
            }
            Message::ErrorResponse {
                error_code,
                message,
            } => Err(ProtocolError::Server {
                error_code,
                message,
            }),
            other => Err(ProtocolError::UnexpectedMessage(
                other.message_type().to_string(),
            )),
        }
    }

    async fn roundtrip<S>(&self, stream: &mut S, request: &Message) -> Result<Message>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let payload = self.codec.encode(request)?;
        debug!("sending {}", request.message_type());

        timeout(self.write_timeout, framing::write_frame(stream, &payload))
            .await
            .map_err(|_| {
                ProtocolError::Io(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    "write timeout",
                ))
            })??;

        let frame = timeout(self.read_timeout, framing::read_frame(stream))
            .await
            .map_err(|_| {
                ProtocolError::Io(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    "read timeout",
                ))
            })??;

        match frame {
            FrameRead::InvalidMarker => {
                warn!("server rejected our credentials");
                Err(ProtocolError::CredentialsRejected)
            }
            FrameRead::Payload(payload) => self.codec.decode(&payload),
        }
    }
}
