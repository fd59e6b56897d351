use crate::device::DeviceConfigurator;
use crate::pool::{AddressPool, PoolError};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::time::{timeout, Duration};
use tracing::{debug, error, info, warn};
use wgstar_proto::{framing, ErrorCode, FrameRead, Message, MessageCodec, ProtocolError};

/// The per-connection request/response loop.
///
/// Each accepted connection runs one strictly alternating exchange: read a
/// frame, decode it, handle it, write the response, repeat. The next request
/// frame is not read until the previous response has been sent.
pub struct ConnectionHandler {
    codec: MessageCodec,
    pool: AddressPool,
    device: Arc<dyn DeviceConfigurator>,
    server_public_key: String,
    read_timeout: Duration,
    write_timeout: Duration,
}

impl ConnectionHandler {
    pub fn new(
        codec: MessageCodec,
        pool: AddressPool,
        device: Arc<dyn DeviceConfigurator>,
        server_public_key: String,
        read_timeout_secs: u64,
        write_timeout_secs: u64,
    ) -> Self {
        Self {
            codec,
            pool,
            device,
            server_public_key,
            read_timeout: Duration::from_secs(read_timeout_secs),
            write_timeout: Duration::from_secs(write_timeout_secs),
        }
    }

    /// Drives a client connection until it closes or a fatal protocol error
    /// occurs.
    pub async fn handle<S>(&self, mut stream: S, remote_addr: String)
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        info!("connection from {}", remote_addr);

        loop {
            let frame = match self.read_frame(&mut stream).await {
                Ok(FrameRead::Payload(payload)) => payload,
                Ok(FrameRead::InvalidMarker) => {
                    warn!("unexpected rejection marker from {}", remote_addr);
                    break;
                }
                Err(ProtocolError::ConnectionClosed) => {
                    debug!("connection {} closed by peer", remote_addr);
                    break;
                }
                Err(e) => {
                    warn!("read error on {}: {}", remote_addr, e);
                    break;
                }
            };

            let request = match self.codec.decode(&frame) {
                Ok(message) => message,
                Err(ProtocolError::AuthenticationFailed) => {
                    warn!("rejecting frame from {}: authentication failed", remote_addr);
                    let _ = self.send_invalid_marker(&mut stream).await;
                    break;
                }
                Err(ProtocolError::UnknownMessageType(tag)) => {
                    warn!("unknown message type `{}` from {}", tag, remote_addr);
                    let response = Message::error(
                        ErrorCode::UnrecognizedMessage,
                        format!("unrecognized message type: {}", tag),
                    );
                    if self.write_message(&mut stream, &response).await.is_err() {
                        break;
                    }
                    continue;
                }
                Err(e) => {
                    if matches!(
                        e,
                        ProtocolError::Construction { .. }
                            | ProtocolError::Malformed(_)
                            | ProtocolError::Json(_)
                    ) {
                        warn!("malformed message from {}: {}", remote_addr, e);
                        let response =
                            Message::error(ErrorCode::MalformedMessage, "malformed message");
                        if self.write_message(&mut stream, &response).await.is_err() {
                            break;
                        }
                        continue;
                    }
                    error!("decode failure on {}: {}", remote_addr, e);
                    break;
                }
            };

            debug!("handling {} from {}", request.message_type(), remote_addr);
            let response = self.dispatch(request, &remote_addr).await;

            if let Err(e) = self.write_message(&mut stream, &response).await {
                warn!("write error on {}: {}", remote_addr, e);
                break;
            }
        }

        info!("connection {} finished", remote_addr);
    }

    /// Maps a decoded request to its response. Failures never escape this
    /// boundary; they become `error_response` messages, with full detail
    /// kept in the server log.
    async fn dispatch(&self, request: Message, remote_addr: &str) -> Message {
        match request {
            Message::IpAddressRequest { public_key } => {
                self.grant_address(&public_key, remote_addr).await
            }
            Message::IpAddressHoldRequest { ip_address } => {
                self.hold_address(&ip_address, remote_addr).await
            }
            other => {
                warn!(
                    "unexpected {} from {}",
                    other.message_type(),
                    remote_addr
                );
                Message::error(
                    ErrorCode::UnrecognizedMessage,
                    format!("unexpected message: {}", other.message_type()),
                )
            }
        }
    }

    async fn grant_address(&self, public_key: &str, remote_addr: &str) -> Message {
        let address = match self.pool.allocate(public_key).await {
            Ok(address) => address,
            Err(PoolError::Exhausted) => {
                warn!("pool exhausted, refusing {} from {}", public_key, remote_addr);
                return Message::error(ErrorCode::NetworkIsFull, "no addresses available");
            }
            Err(e) => {
                error!(
                    "allocation failed for {} from {}: {}",
                    public_key, remote_addr, e
                );
                return Message::error(ErrorCode::Internal, "internal server error");
            }
        };

        if let Err(e) = self.device.apply_peer(public_key, address) {
            error!("failed to apply peer {} ({}): {}", public_key, address, e);
            return Message::error(
                ErrorCode::ConfigReloadFailure,
                "failed to apply peer configuration",
            );
        }

        Message::ip_address_response(
            self.server_public_key.clone(),
            address.to_string(),
            self.pool.allowed_ips(),
        )
    }

    async fn hold_address(&self, ip_address: &str, remote_addr: &str) -> Message {
        match self.pool.hold(ip_address).await {
            Ok(address) => {
                debug!("held {} for {}", address, remote_addr);
                Message::ack()
            }
            Err(PoolError::InvalidAddress(reason)) => {
                warn!(
                    "refusing hold of `{}` from {}: {}",
                    ip_address, remote_addr, reason
                );
                Message::error(ErrorCode::InvalidAddress, reason)
            }
            Err(e) => {
                error!("hold of `{}` from {} failed: {}", ip_address, remote_addr, e);
                Message::error(ErrorCode::Internal, "internal server error")
            }
        }
    }

    async fn read_frame<S>(&self, stream: &mut S) -> Result<FrameRead, ProtocolError>
    where
        S: AsyncRead + Unpin,
    {
        timeout(self.read_timeout, framing::read_frame(stream))
            .await
            .map_err(|_| {
                ProtocolError::Io(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    "read timeout",
                ))
            })?
    }

    async fn write_message<S>(&self, stream: &mut S, message: &Message) -> Result<(), ProtocolError>
    where
        S: AsyncWrite + Unpin,
    {
        let payload = self.codec.encode(message)?;
        timeout(self.write_timeout, framing::write_frame(stream, &payload))
            .await
            .map_err(|_| {
                ProtocolError::Io(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    "write timeout",
                ))
            })?
    }

    async fn send_invalid_marker<S>(&self, stream: &mut S) -> Result<(), ProtocolError>
    where
        S: AsyncWrite + Unpin,
    {
        timeout(self.write_timeout, framing::send_invalid_marker(stream))
            .await
            .map_err(|_| {
                ProtocolError::Io(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    "write timeout",
                ))
            })?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::LogOnlyDevice;
    use std::net::Ipv4Addr;
    use wgstar_proto::{crypto, MessageRegistry, SessionKey};

    struct FailingDevice;

    impl DeviceConfigurator for FailingDevice {
        fn apply_peer(&self, _public_key: &str, _address: Ipv4Addr) -> Result<(), String> {
            Err("wg syncconf failed".to_string())
        }
    }

    fn test_key(fill: u8) -> SessionKey {
        SessionKey::from_bytes([fill; crypto::KEY_SIZE])
    }

    fn test_codec(fill: u8) -> MessageCodec {
        MessageCodec::new(test_key(fill), MessageRegistry::with_defaults())
    }

    fn spawn_handler(prefix: u8, device: Arc<dyn DeviceConfigurator>) -> tokio::io::DuplexStream {
        let pool = AddressPool::new(
            Ipv4Addr::new(10, 33, 0, 0),
            prefix,
            std::time::Duration::ZERO,
        )
        .unwrap();

        spawn_handler_with_pool(pool, device)
    }

    fn spawn_handler_with_pool(
        pool: AddressPool,
        device: Arc<dyn DeviceConfigurator>,
    ) -> tokio::io::DuplexStream {
        let handler = Arc::new(ConnectionHandler::new(
            test_codec(7),
            pool,
            device,
            "server-pk".to_string(),
            5,
            5,
        ));

        let (client_io, server_io) = tokio::io::duplex(4096);
        tokio::spawn(async move {
            handler.handle(server_io, "test-peer".to_string()).await;
        });

        client_io
    }

    async fn roundtrip(
        stream: &mut tokio::io::DuplexStream,
        codec: &MessageCodec,
        request: &Message,
    ) -> Message {
        let payload = codec.encode(request).unwrap();
        framing::write_frame(stream, &payload).await.unwrap();

        match framing::read_frame(stream).await.unwrap() {
            FrameRead::Payload(response) => codec.decode(&response).unwrap(),
            FrameRead::InvalidMarker => panic!("unexpected rejection marker"),
        }
    }

    #[tokio::test]
    async fn test_address_request_is_granted() {
        let mut stream = spawn_handler(24, Arc::new(LogOnlyDevice));
        let codec = test_codec(7);

        let response = roundtrip(&mut stream, &codec, &Message::request_ip_address("abc123")).await;

        assert_eq!(
            response,
            Message::ip_address_response("server-pk", "10.33.0.2", "10.33.0.0/24")
        );
    }

    #[tokio::test]
    async fn test_repeat_request_gets_same_address() {
        let mut stream = spawn_handler(24, Arc::new(LogOnlyDevice));
        let codec = test_codec(7);

        let first = roundtrip(&mut stream, &codec, &Message::request_ip_address("abc123")).await;
        let second = roundtrip(&mut stream, &codec, &Message::request_ip_address("abc123")).await;

        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_hold_request_is_acknowledged() {
        let mut stream = spawn_handler(24, Arc::new(LogOnlyDevice));
        let codec = test_codec(7);

        let response = roundtrip(&mut stream, &codec, &Message::hold_ip_address("10.33.0.9")).await;
        assert_eq!(response, Message::ack());

        // The held address is skipped by the allocator
        let granted = roundtrip(&mut stream, &codec, &Message::request_ip_address("pk")).await;
        assert_eq!(
            granted,
            Message::ip_address_response("server-pk", "10.33.0.2", "10.33.0.0/24")
        );
    }

    #[tokio::test]
    async fn test_exhausted_pool_reports_network_full() {
        let pool =
            AddressPool::new(Ipv4Addr::new(10, 33, 0, 0), 30, std::time::Duration::ZERO).unwrap();
        let mut stream = spawn_handler_with_pool(pool, Arc::new(LogOnlyDevice));
        let codec = test_codec(7);

        let first = roundtrip(&mut stream, &codec, &Message::request_ip_address("pk-1")).await;
        assert!(matches!(first, Message::IpAddressResponse { .. }));

        let second = roundtrip(&mut stream, &codec, &Message::request_ip_address("pk-2")).await;
        match second {
            Message::ErrorResponse { error_code, .. } => {
                assert_eq!(error_code, ErrorCode::NetworkIsFull);
            }
            other => panic!("expected error_response, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_invalid_hold_reports_invalid_address() {
        let mut stream = spawn_handler(24, Arc::new(LogOnlyDevice));
        let codec = test_codec(7);

        let response =
            roundtrip(&mut stream, &codec, &Message::hold_ip_address("192.168.1.1")).await;

        match response {
            Message::ErrorResponse { error_code, .. } => {
                assert_eq!(error_code, ErrorCode::InvalidAddress);
            }
            other => panic!("expected error_response, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_stale_key_receives_invalid_marker() {
        let mut stream = spawn_handler(24, Arc::new(LogOnlyDevice));
        let stale_codec = test_codec(9);

        let payload = stale_codec
            .encode(&Message::request_ip_address("abc123"))
            .unwrap();
        framing::write_frame(&mut stream, &payload).await.unwrap();

        let frame = framing::read_frame(&mut stream).await.unwrap();
        assert_eq!(frame, FrameRead::InvalidMarker);

        // The server closes the connection after rejecting
        let next = framing::read_frame(&mut stream).await;
        assert!(matches!(next, Err(ProtocolError::ConnectionClosed)));
    }

    #[tokio::test]
    async fn test_unknown_type_gets_error_and_session_survives() {
        let mut stream = spawn_handler(24, Arc::new(LogOnlyDevice));
        let codec = test_codec(7);

        let payload = serde_json::to_vec(&serde_json::json!({ "message_type": "peer_gossip" }))
            .unwrap();
        let sealed = crypto::seal(&test_key(7), &payload).unwrap();
        framing::write_frame(&mut stream, &sealed).await.unwrap();

        let response = match framing::read_frame(&mut stream).await.unwrap() {
            FrameRead::Payload(response) => codec.decode(&response).unwrap(),
            FrameRead::InvalidMarker => panic!("unknown type must not look like a key failure"),
        };
        match response {
            Message::ErrorResponse { error_code, .. } => {
                assert_eq!(error_code, ErrorCode::UnrecognizedMessage);
            }
            other => panic!("expected error_response, got {:?}", other),
        }

        // Session still serves requests afterwards
        let granted = roundtrip(&mut stream, &codec, &Message::request_ip_address("pk")).await;
        assert!(matches!(granted, Message::IpAddressResponse { .. }));
    }

    #[tokio::test]
    async fn test_missing_field_gets_malformed_error() {
        let mut stream = spawn_handler(24, Arc::new(LogOnlyDevice));
        let codec = test_codec(7);

        let payload =
            serde_json::to_vec(&serde_json::json!({ "message_type": "request_ip_address" }))
                .unwrap();
        let sealed = crypto::seal(&test_key(7), &payload).unwrap();
        framing::write_frame(&mut stream, &sealed).await.unwrap();

        let response = match framing::read_frame(&mut stream).await.unwrap() {
            FrameRead::Payload(response) => codec.decode(&response).unwrap(),
            FrameRead::InvalidMarker => panic!("construction failure must not look like a key failure"),
        };

        match response {
            Message::ErrorResponse { error_code, .. } => {
                assert_eq!(error_code, ErrorCode::MalformedMessage);
            }
            other => panic!("expected error_response, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_response_message_from_client_is_rejected_in_band() {
        let mut stream = spawn_handler(24, Arc::new(LogOnlyDevice));
        let codec = test_codec(7);

        let response = roundtrip(&mut stream, &codec, &Message::ack()).await;

        match response {
            Message::ErrorResponse { error_code, .. } => {
                assert_eq!(error_code, ErrorCode::UnrecognizedMessage);
            }
            other => panic!("expected error_response, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_device_failure_reports_config_reload_failure() {
        let mut stream = spawn_handler(24, Arc::new(FailingDevice));
        let codec = test_codec(7);

        let response = roundtrip(&mut stream, &codec, &Message::request_ip_address("pk")).await;

        match response {
            Message::ErrorResponse { error_code, message } => {
                assert_eq!(error_code, ErrorCode::ConfigReloadFailure);
                // The raw device error stays in the server log
                assert!(!message.contains("syncconf"));
            }
            other => panic!("expected error_response, got {:?}", other),
        }
    }
}
