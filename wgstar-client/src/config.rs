use serde::{Deserialize, Serialize};
use std::path::Path;
use wgstar_proto::SessionKey;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ClientConfig {
    pub client: ClientSettings,
    pub security: SecuritySettings,
    pub timeouts: TimeoutSettings,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ClientSettings {
    /// This peer's WireGuard public key, sent with address requests
    pub public_key: String,
    pub server_addr: String,
    pub server_port: u16,
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
pub struct TimeoutSettings {
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_read_timeout")]
    pub read_timeout_secs: u64,
    #[serde(default = "default_write_timeout")]
    pub write_timeout_secs: u64,
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_read_timeout() -> u64 {
    30
}

fn default_write_timeout() -> u64 {
    30
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

impl ClientConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: ClientConfig = toml::from_str(&contents)?;
        Ok(config)
    }

    pub fn default_config() -> Self {
        Self {
            client: ClientSettings {
                public_key: "set-peer-public-key".to_string(),
                server_addr: "127.0.0.1".to_string(),
                server_port: 5060,
            },
            security: SecuritySettings {
                key: None,
                passphrase: Some("change-me-in-production".to_string()),
            },
            timeouts: TimeoutSettings {
                connect_timeout_secs: default_connect_timeout(),
                read_timeout_secs: default_read_timeout(),
                write_timeout_secs: default_write_timeout(),
            },
        }
    }
}
