mod config;
mod device;
mod handler;
mod pool;

use crate::config::ServerConfig;
use crate::device::LogOnlyDevice;
use crate::handler::ConnectionHandler;
use crate::pool::AddressPool;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use wgstar_proto::{MessageCodec, MessageRegistry};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    let config = load_config()?;

    // Initialize logging
    init_logging(&config);

    info!("wgstar server v{} starting...", env!("CARGO_PKG_VERSION"));

    // Resolve the session key
    let key = config.security.session_key()?;

    // Build the address pool
    let subnet: Ipv4Addr = config
        .network
        .subnet_addr
        .parse()
        .map_err(|_| anyhow::anyhow!("invalid network.subnet_addr: {}", config.network.subnet_addr))?;
    let pool = AddressPool::new(
        subnet,
        config.network.subnet_prefix,
        Duration::from_secs(config.network.lease_ttl_secs),
    )?;

    info!(
        "managing {} (server address {})",
        pool.allowed_ips(),
        pool.server_address()
    );

    // Create connection handler
    let handler = Arc::new(ConnectionHandler::new(
        MessageCodec::new(key, MessageRegistry::with_defaults()),
        pool,
        Arc::new(LogOnlyDevice),
        config.network.server_public_key.clone(),
        config.limits.read_timeout_secs,
        config.limits.write_timeout_secs,
    ));

    // Create connection limit semaphore
    let connection_semaphore = Arc::new(Semaphore::new(config.limits.max_conns));

    // Bind to listen address
    let listen_addr = format!("{}:{}", config.server.listen_addr, config.server.listen_port);
    let listener = TcpListener::bind(&listen_addr).await?;

    info!("Listening on {}", listen_addr);
    info!("Maximum concurrent connections: {}", config.limits.max_conns);

    // Accept connections
    loop {
        // Acquire connection slot
        let permit = connection_semaphore.clone().acquire_owned().await?;

        // Accept connection
        let (stream, remote_addr) = match listener.accept().await {
            Ok(conn) => conn,
            Err(e) => {
                error!("Failed to accept connection: {}", e);
                continue;
            }
        };

        let remote_addr_str = remote_addr.to_string();
        let handler = handler.clone();

        // Spawn connection handler
        tokio::spawn(async move {
            handler.handle(stream, remote_addr_str).await;
            drop(permit); // Release connection slot
        });
    }
}

fn load_config() -> anyhow::Result<ServerConfig> {
    // Try to load from /etc/wgstar/server.toml first (production)
    if let Ok(config) = ServerConfig::from_file("/etc/wgstar/server.toml") {
        info!("Loaded config from /etc/wgstar/server.toml");
        return Ok(config);
    }

    // Try configs/server.toml (development)
    if let Ok(config) = ServerConfig::from_file("configs/server.toml") {
        info!("Loaded config from configs/server.toml");
        return Ok(config);
    }

    // Try ./server.toml (current directory)
    if let Ok(config) = ServerConfig::from_file("server.toml") {
        info!("Loaded config from server.toml");
        return Ok(config);
    }

    // Use default config as last resort
    warn!("No config file found, using default configuration");
    warn!("IMPORTANT: Change the session key in production!");
    Ok(ServerConfig::default_config())
}

fn init_logging(config: &ServerConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.log_level));

    if config.logging.json_logs {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .init();
    }
}
