use serde::{Deserialize, Serialize};
use std::path::Path;
use wgstar_proto::SessionKey;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    pub server: ServerSettings,
    pub security: SecuritySettings,
    pub network: NetworkSettings,
    pub limits: LimitsSettings,
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerSettings {
    pub listen_addr: String,
    pub listen_port: u16,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SecuritySettings {
    /// Pre-shared session key (hex-encoded, 32 bytes)
    #[serde(default)]
    pub key: Option<String>,
    /// Passphrase alternative; the key is derived via SHA-256
    #[serde(default)]
    pub passphrase: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NetworkSettings {
    /// The server's own WireGuard public key, echoed in address grants
    pub server_public_key: String,
    /// Network address of the managed subnet, e.g. "10.33.0.0"
    #[serde(default = "default_subnet_addr")]
    pub subnet_addr: String,
    /// Prefix length of the managed subnet
    #[serde(default = "default_subnet_prefix")]
    pub subnet_prefix: u8,
    /// How long an address lease survives without renewal (0 = forever)
    #[serde(default = "default_lease_ttl")]
    pub lease_ttl_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LimitsSettings {
    /// Maximum concurrent connections
    #[serde(default = "default_max_conns")]
    pub max_conns: usize,
    /// Read timeout in seconds
    #[serde(default = "default_read_timeout")]
    pub read_timeout_secs: u64,
    /// Write timeout in seconds
    #[serde(default = "default_write_timeout")]
    pub write_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingSettings {
    /// Log level: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Output logs as JSON
    #[serde(default)]
    pub json_logs: bool,
}

fn default_subnet_addr() -> String {
    "10.33.0.0".to_string()
}

fn default_subnet_prefix() -> u8 {
    24
}

fn default_lease_ttl() -> u64 {
    86400 // 1 day
}

fn default_max_conns() -> usize {
    100
}

fn default_read_timeout() -> u64 {
    30
}

fn default_write_timeout() -> u64 {
    30
}

fn default_log_level() -> String {
    "info".to_string()
}

impl SecuritySettings {
    /// Resolves the configured session key, preferring the hex key over the
    /// passphrase.
    pub fn session_key(&self) -> anyhow::Result<SessionKey> {
        if let Some(key) = self.key.as_deref().filter(|k| !k.is_empty()) {
            return Ok(SessionKey::from_hex(key)?);
        }
        if let Some(passphrase) = self.passphrase.as_deref().filter(|p| !p.is_empty()) {
            return Ok(SessionKey::from_passphrase(passphrase));
        }
        anyhow::bail!("no session key configured: set security.key (hex) or security.passphrase")
    }
}

impl ServerConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: ServerConfig = toml::from_str(&contents)?;
        Ok(config)
    }

    pub fn default_config() -> Self {
        Self {
            server: ServerSettings {
                listen_addr: "127.0.0.1".to_string(),
                listen_port: 5060,
            },
            security: SecuritySettings {
                key: None,
                passphrase: Some("change-me-in-production".to_string()),
            },
            network: NetworkSettings {
                server_public_key: "set-server-public-key".to_string(),
                subnet_addr: default_subnet_addr(),
                subnet_prefix: default_subnet_prefix(),
                lease_ttl_secs: default_lease_ttl(),
            },
            limits: LimitsSettings {
                max_conns: default_max_conns(),
                read_timeout_secs: default_read_timeout(),
                write_timeout_secs: default_write_timeout(),
            },
            logging: LoggingSettings {
                log_level: default_log_level(),
                json_logs: false,
            },
        }
    }
}
