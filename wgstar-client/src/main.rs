mod client;
mod config;

use crate::client::StarClient;
use crate::config::ClientConfig;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::Duration;
use tracing::{error, info, warn};
use wgstar_proto::{MessageCodec, MessageRegistry};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    init_logging();

    info!("wgstar client v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config = load_config()?;

    // Resolve the session key
    let key = config.security.session_key()?;

    // Connect to the coordination server
    let server_addr = format!("{}:{}", config.client.server_addr, config.client.server_port);
    info!("Connecting to {}...", server_addr);

    let mut stream = match tokio::time::timeout(
        Duration::from_secs(config.timeouts.connect_timeout_secs),
        TcpStream::connect(&server_addr),
    )
    .await
    {
        Ok(Ok(stream)) => stream,
        Ok(Err(e)) => {
            error!("Failed to connect: {}", e);
            return Err(e.into());
        }
        Err(_) => {
            error!("Connection timeout");
            return Err(anyhow::anyhow!("Connection timeout"));
        }
    };

    info!("Connected to {}", server_addr);

    let client = StarClient::new(
        MessageCodec::new(key, MessageRegistry::with_defaults()),
        config.timeouts.read_timeout_secs,
        config.timeouts.write_timeout_secs,
    );

    println!("\nwgstar client connected.");
    println!("Available commands: REQUEST, HOLD <ip>, quit");
    println!("Type a command and press Enter:\n");

    // Interactive command loop
    let stdin = tokio::io::stdin();
    let mut reader = BufReader::new(stdin);
    let mut line = String::new();

    loop {
        print!("> ");
        // Manually flush stdout since print! doesn't auto-flush
        use std::io::Write;
        std::io::stdout().flush()?;

        line.clear();
        match reader.read_line(&mut line).await {
            Ok(0) => break, // EOF
            Ok(_) => {}
            Err(e) => {
                error!("Failed to read input: {}", e);
                break;
            }
        }

        let input = line.trim();

        if input.is_empty() {
            continue;
        }

        if input == "quit" || input == "exit" {
            info!("Exiting...");
            break;
        }

        // Parse command
        let parts: Vec<&str> = input.splitn(2, ' ').collect();
        let cmd = parts[0].to_uppercase();
        let arg = if parts.len() > 1 { parts[1].trim() } else { "" };

        match cmd.as_str() {
            "REQUEST" => {
                match client
                    .request_address(&mut stream, &config.client.public_key)
                    .await
                {
                    Ok(assignment) => {
                        println!("[OK] address:      {}", assignment.peer_address);
                        println!("     allowed ips:  {}", assignment.peer_allowed_ips);
                        println!("     server key:   {}", assignment.server_public_key);
                    }
                    Err(e) => {
                        warn!("Request failed: {}", e);
                        println!("[ERROR] {}", e);
                    }
                }
            }
            "HOLD" => {
                if arg.is_empty() {
                    println!("Error: HOLD requires an IP address argument");
                    continue;
                }
                match client.hold_address(&mut stream, arg).await {
                    Ok(()) => println!("[OK] {} held", arg),
                    Err(e) => {
                        warn!("Hold failed: {}", e);
                        println!("[ERROR] {}", e);
                    }
                }
            }
            _ => {
                println!("Unknown command: {}", cmd);
            }
        }
    }

    Ok(())
}

fn load_config() -> anyhow::Result<ClientConfig> {
    // Try configs/client.toml (development)
    if let Ok(config) = ClientConfig::from_file("configs/client.toml") {
        info!("Loaded config from configs/client.toml");
        return Ok(config);
    }

    // Try ./client.toml (current directory)
    if let Ok(config) = ClientConfig::from_file("client.toml") {
        info!("Loaded config from client.toml");
        return Ok(config);
    }

    // Use default config as last resort
    warn!("No config file found, using default configuration");
    warn!("IMPORTANT: Change the session key in production!");
    Ok(ClientConfig::default_config())
}

fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();
}
