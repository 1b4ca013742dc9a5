//! Network reachability.
//!
//! Decides how a viewer reaches this host:
//! - LAN: find the address of the interface that routes outward and pair it
//!   with the service port.
//! - Hotspot: create a self-hosted access point with a random SSID and
//!   passphrase, then serve on the host's address inside it.
//!
//! A created path is wrapped in `ProvisionedNetwork`, which tears the access
//! point down exactly once, on `release()` or on drop.

pub mod hosted;

use serde::Deserialize;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, SocketAddrV4, UdpSocket};
use std::sync::Arc;

use rand::seq::SliceRandom;

use crate::StreamError;
pub use hosted::{
    platform_hosted_network, CommandOutput, CommandRunner, HostedNetwork, NetshHostedNetwork,
    NmcliHostedNetwork, SystemCommandRunner, UnsupportedHostedNetwork,
};

/// Address used only to pick the outward interface. Nothing is sent to it.
pub const DEFAULT_PROBE_ADDR: SocketAddr =
    SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::new(8, 8, 8, 8), 80));
pub const DEFAULT_SSID_PREFIX: &str = "WebCam_";

const SSID_SUFFIX_LEN: usize = 4;
const PASSPHRASE_LEN: usize = 10;
const TOKEN_CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkMode {
    Lan,
    Hotspot,
}

impl fmt::Display for NetworkMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NetworkMode::Lan => write!(f, "lan"),
            NetworkMode::Hotspot => write!(f, "hotspot"),
        }
    }
}

impl std::str::FromStr for NetworkMode {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "lan" => Ok(NetworkMode::Lan),
            "hotspot" => Ok(NetworkMode::Hotspot),
            other => Err(anyhow::anyhow!(
                "unknown network mode '{}'; expected lan or hotspot",
                other
            )),
        }
    }
}

/// How viewers reach the stream for one session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NetworkPath {
    Lan {
        address: IpAddr,
        port: u16,
    },
    Hotspot {
        ssid: String,
        passphrase: String,
        address: IpAddr,
        port: u16,
    },
}

impl NetworkPath {
    pub fn address(&self) -> IpAddr {
        match self {
            NetworkPath::Lan { address, .. } | NetworkPath::Hotspot { address, .. } => *address,
        }
    }

    pub fn port(&self) -> u16 {
        match self {
            NetworkPath::Lan { port, .. } | NetworkPath::Hotspot { port, .. } => *port,
        }
    }

    pub fn mode(&self) -> NetworkMode {
        match self {
            NetworkPath::Lan { .. } => NetworkMode::Lan,
            NetworkPath::Hotspot { .. } => NetworkMode::Hotspot,
        }
    }

    fn set_port(&mut self, new_port: u16) {
        match self {
            NetworkPath::Lan { port, .. } | NetworkPath::Hotspot { port, .. } => *port = new_port,
        }
    }
}

pub struct NetworkProvisioner {
    hosted: Arc<dyn HostedNetwork>,
    probe_addr: SocketAddr,
    ssid_prefix: String,
}

impl NetworkProvisioner {
    pub fn new(hosted: Arc<dyn HostedNetwork>) -> Self {
        Self {
            hosted,
            probe_addr: DEFAULT_PROBE_ADDR,
            ssid_prefix: DEFAULT_SSID_PREFIX.to_string(),
        }
    }

    /// Provisioner for this platform's hosted-network back-end.
    pub fn for_platform() -> Self {
        Self::new(platform_hosted_network())
    }

    pub fn with_probe_addr(mut self, probe_addr: SocketAddr) -> Self {
        self.probe_addr = probe_addr;
        self
    }

    pub fn with_ssid_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.ssid_prefix = prefix.into();
        self
    }

    /// Whether `resolve(Hotspot, ..)` can work here. Runs the platform probe.
    pub fn hotspot_supported(&self) -> bool {
        self.hosted.is_supported()
    }

    /// Resolve or create the network path for a session.
    pub fn resolve(&self, mode: NetworkMode, port: u16) -> Result<ProvisionedNetwork, StreamError> {
        match mode {
            NetworkMode::Lan => {
                let address = self.lan_address();
                log::info!("network: LAN address {}", address);
                Ok(ProvisionedNetwork {
                    path: NetworkPath::Lan { address, port },
                    hosted: None,
                    released: false,
                })
            }
            NetworkMode::Hotspot => self.create_hotspot(port),
        }
    }

    /// Outward-facing local address, or loopback if there is none.
    pub fn lan_address(&self) -> IpAddr {
        match outward_address(self.probe_addr) {
            Ok(address) => address,
            Err(err) => {
                log::warn!("network: {}; falling back to loopback", err);
                IpAddr::V4(Ipv4Addr::LOCALHOST)
            }
        }
    }

    fn create_hotspot(&self, port: u16) -> Result<ProvisionedNetwork, StreamError> {
        if !self.hosted.is_supported() {
            return Err(StreamError::HotspotUnsupported);
        }
        let ssid = format!("{}{}", self.ssid_prefix, random_token(SSID_SUFFIX_LEN));
        let passphrase = random_token(PASSPHRASE_LEN);

        self.hosted.create(&ssid, &passphrase)?;
        if let Err(err) = self.hosted.start() {
            // Configured but not started: undo whatever the tool left behind.
            if let Err(stop_err) = self.hosted.stop() {
                log::debug!("network: hotspot rollback: {}", stop_err);
            }
            return Err(err);
        }

        let address = self.hosted.host_address();
        log::info!("network: hotspot {} up, host address {}", ssid, address);
        Ok(ProvisionedNetwork {
            path: NetworkPath::Hotspot {
                ssid,
                passphrase,
                address,
                port,
            },
            hosted: Some(self.hosted.clone()),
            released: false,
        })
    }
}

/// A network path held for a session.
pub struct ProvisionedNetwork {
    path: NetworkPath,
    hosted: Option<Arc<dyn HostedNetwork>>,
    released: bool,
}

impl ProvisionedNetwork {
    pub fn path(&self) -> &NetworkPath {
        &self.path
    }

    /// Record the port actually bound (when the configured port was 0).
    pub fn bind_port(&mut self, port: u16) {
        self.path.set_port(port);
    }

    pub fn is_released(&self) -> bool {
        self.released
    }

    /// Tear down anything this path created. Only the first call acts.
    pub fn release(&mut self) -> Result<(), StreamError> {
        if self.released {
            return Ok(());
        }
        self.released = true;
        let Some(hosted) = self.hosted.take() else {
            return Ok(());
        };
        log::info!("network: stopping hotspot");
        hosted.stop()
    }
}

impl Drop for ProvisionedNetwork {
    fn drop(&mut self) {
        if let Err(err) = self.release() {
            log::error!("network: hotspot teardown failed: {}", err);
        }
    }
}

/// Local address of the interface that would route to `probe`.
///
/// Connecting a UDP socket only selects a route; no packet leaves the host,
/// so `probe` does not need to be reachable.
pub fn outward_address(probe: SocketAddr) -> Result<IpAddr, StreamError> {
    let bind: SocketAddr = if probe.is_ipv4() {
        SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0))
    } else {
        SocketAddr::from((std::net::Ipv6Addr::UNSPECIFIED, 0))
    };
    let socket = UdpSocket::bind(bind)
        .map_err(|err| StreamError::NetworkUnresolvable(format!("bind probe socket: {err}")))?;
    socket
        .connect(probe)
        .map_err(|err| StreamError::NetworkUnresolvable(format!("route to {probe}: {err}")))?;
    let local = socket
        .local_addr()
        .map_err(|err| StreamError::NetworkUnresolvable(err.to_string()))?;
    if local.ip().is_unspecified() {
        return Err(StreamError::NetworkUnresolvable(
            "no interface routes outward".into(),
        ));
    }
    Ok(local.ip())
}

fn random_token(len: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..len)
        .filter_map(|_| TOKEN_CHARSET.choose(&mut rng))
        .map(|b| *b as char)
        .collect()
}
