use std::net::Ipv4Addr;
use tracing::info;

/// Applies granted leases to the local WireGuard interface.
///
/// The interface plumbing lives outside this crate; the dispatcher only
/// needs a call that can succeed or fail. A failed apply is reported to the
/// peer as `config_reload_failure`.
pub trait DeviceConfigurator: Send + Sync {
    fn apply_peer(&self, public_key: &str, address: Ipv4Addr) -> Result<(), String>;
}

/// Records the peer mapping in the log without touching an interface.
pub struct LogOnlyDevice;

impl DeviceConfigurator for LogOnlyDevice {
    fn apply_peer(&self, public_key: &str, address: Ipv4Addr) -> Result<(), String> {
        info!("peer {} mapped to {}", public_key, address);
        Ok(())
    }
}
