use std::collections::{HashMap, HashSet};
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, warn};

#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error("address pool exhausted")]
    Exhausted,

    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("invalid subnet: {0}")]
    InvalidSubnet(String),
}

/// One granted address, keyed by the peer's public key.
#[derive(Debug, Clone)]
struct Lease {
    address: Ipv4Addr,
    renewed_at: Instant,
}

/// The address-allocation table shared by all sessions.
///
/// The first host address belongs to the server; peers are allocated from
/// the second host upward. All mutation happens under one write lock so
/// concurrent sessions never race on allocation state.
#[derive(Clone)]
pub struct AddressPool {
    subnet: Ipv4Addr,
    prefix: u8,
    lease_ttl: Duration,
    state: Arc<RwLock<PoolState>>,
}

#[derive(Default)]
struct PoolState {
    leases: HashMap<String, Lease>,
    held: HashSet<Ipv4Addr>,
}

impl AddressPool {
    pub fn new(subnet: Ipv4Addr, prefix: u8, lease_ttl: Duration) -> Result<Self, PoolError> {
        if !(1..=30).contains(&prefix) {
            return Err(PoolError::InvalidSubnet(format!(
                "prefix /{} leaves no assignable addresses",
                prefix
            )));
        }

        let mask = u32::MAX << (32 - prefix);
        if u32::from(subnet) & !mask != 0 {
            return Err(PoolError::InvalidSubnet(format!(
                "{}/{} has host bits set",
                subnet, prefix
            )));
        }

        Ok(Self {
            subnet,
            prefix,
            lease_ttl,
            state: Arc::new(RwLock::new(PoolState::default())),
        })
    }

    fn mask(&self) -> u32 {
        u32::MAX << (32 - self.prefix)
    }

    fn broadcast(&self) -> u32 {
        u32::from(self.subnet) | !self.mask()
    }

    /// The address the server itself occupies (first host).
    pub fn server_address(&self) -> Ipv4Addr {
        Ipv4Addr::from(u32::from(self.subnet) + 1)
    }

    /// The managed subnet in CIDR notation.
    pub fn allowed_ips(&self) -> String {
        format!("{}/{}", self.subnet, self.prefix)
    }

    fn contains(&self, address: Ipv4Addr) -> bool {
        u32::from(address) & self.mask() == u32::from(self.subnet)
    }

    /// Grants an address to `public_key`.
    ///
    /// A peer that already holds a live lease gets the same address back and
    /// its lease renewed, so reconnecting clients keep their assignment.
    pub async fn allocate(&self, public_key: &str) -> Result<Ipv4Addr, PoolError> {
        let now = Instant::now();
        let mut state = self.state.write().await;

        if self.lease_ttl > Duration::ZERO {
            let ttl = self.lease_ttl;
            state
                .leases
                .retain(|_, lease| now.duration_since(lease.renewed_at) < ttl);
        }

        if let Some(lease) = state.leases.get_mut(public_key) {
            lease.renewed_at = now;
            debug!("renewed lease {} for {}", lease.address, public_key);
            return Ok(lease.address);
        }

        let in_use: HashSet<Ipv4Addr> = state.leases.values().map(|l| l.address).collect();
        let first = u32::from(self.subnet) + 2;
        let broadcast = self.broadcast();

        for candidate in first..broadcast {
            let address = Ipv4Addr::from(candidate);
            if state.held.contains(&address) || in_use.contains(&address) {
                continue;
            }

            state.leases.insert(
                public_key.to_string(),
                Lease {
                    address,
                    renewed_at: now,
                },
            );
            debug!("leased {} to {}", address, public_key);
            return Ok(address);
        }

        warn!("address pool {} exhausted", self.allowed_ips());
        Err(PoolError::Exhausted)
    }

    /// Pins an address so the allocator never grants it.
    ///
    /// Used by peers that manage their own static address. Idempotent.
    pub async fn hold(&self, ip_address: &str) -> Result<Ipv4Addr, PoolError> {
        let address: Ipv4Addr = ip_address.parse().map_err(|_| {
            PoolError::InvalidAddress(format!("cannot parse `{}` as an IPv4 address", ip_address))
        })?;

        if !self.contains(address) {
            return Err(PoolError::InvalidAddress(format!(
                "{} is outside {}",
                address,
                self.allowed_ips()
            )));
        }

        let value = u32::from(address);
        if value <= u32::from(self.server_address()) || value == self.broadcast() {
            return Err(PoolError::InvalidAddress(format!(
                "{} is reserved",
                address
            )));
        }

        let mut state = self.state.write().await;
        state.held.insert(address);
        debug!("holding {}", address);
        Ok(address)
    }

    /// Number of live leases, for status logging.
    pub async fn active_leases(&self) -> usize {
        self.state.read().await.leases.len()
    }
}
