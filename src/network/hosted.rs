//! Self-hosted access point control.
//!
//! Hosted networks are created by shelling out to the platform's network
//! tool. Every back-end sits behind `HostedNetwork`, and every command goes
//! through a `CommandRunner` so tests can script the tool's output.
//!
//! - Windows: `netsh wlan ... hostednetwork`
//! - Linux: NetworkManager `nmcli device wifi hotspot`
//! - Anything else: `UnsupportedHostedNetwork`

use std::io;
use std::net::{IpAddr, Ipv4Addr};
use std::process::Command;
use std::sync::{Arc, Mutex};

use crate::StreamError;

/// Address Windows Internet Connection Sharing gives the hosted adapter.
pub const NETSH_GATEWAY: Ipv4Addr = Ipv4Addr::new(192, 168, 137, 1);
/// Address NetworkManager gives the host in `shared` mode.
pub const NMCLI_GATEWAY: Ipv4Addr = Ipv4Addr::new(10, 42, 0, 1);

const NMCLI_CONNECTION: &str = "webcast-hotspot";

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

/// Synchronous command boundary.
pub trait CommandRunner: Send + Sync {
    fn run(&self, program: &str, args: &[&str]) -> io::Result<CommandOutput>;
}

pub struct SystemCommandRunner;

impl CommandRunner for SystemCommandRunner {
    fn run(&self, program: &str, args: &[&str]) -> io::Result<CommandOutput> {
        let output = Command::new(program).args(args).output()?;
        Ok(CommandOutput {
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// Capability-checked access point control.
///
/// Callers must check `is_supported` before `create`. `stop` must be safe to
/// call on an access point that was only partly brought up.
pub trait HostedNetwork: Send + Sync {
    fn is_supported(&self) -> bool;

    /// Configure the access point name and WPA passphrase.
    fn create(&self, ssid: &str, passphrase: &str) -> Result<(), StreamError>;

    /// Bring the configured access point up.
    fn start(&self) -> Result<(), StreamError>;

    fn stop(&self) -> Result<(), StreamError>;

    /// The host's address on the hosted network.
    fn host_address(&self) -> IpAddr;
}

/// The hosted-network back-end for the platform this binary was built for.
pub fn platform_hosted_network() -> Arc<dyn HostedNetwork> {
    #[cfg(windows)]
    {
        Arc::new(NetshHostedNetwork::new(SystemCommandRunner))
    }
    #[cfg(target_os = "linux")]
    {
        Arc::new(NmcliHostedNetwork::new(SystemCommandRunner))
    }
    #[cfg(not(any(windows, target_os = "linux")))]
    {
        Arc::new(UnsupportedHostedNetwork)
    }
}

fn run_checked<R: CommandRunner>(
    runner: &R,
    program: &str,
    args: &[&str],
) -> Result<CommandOutput, String> {
    let output = runner
        .run(program, args)
        .map_err(|err| format!("{} {}: {}", program, args.join(" "), err))?;
    if !output.success {
        let detail = if output.stderr.trim().is_empty() {
            output.stdout.trim()
        } else {
            output.stderr.trim()
        };
        return Err(format!("{} {} failed: {}", program, args.join(" "), detail));
    }
    Ok(output)
}

// ----------------------------------------------------------------------------
// Windows: netsh
// ----------------------------------------------------------------------------

pub struct NetshHostedNetwork<R: CommandRunner> {
    runner: R,
}

impl<R: CommandRunner> NetshHostedNetwork<R> {
    pub fn new(runner: R) -> Self {
        Self { runner }
    }
}

impl<R: CommandRunner> HostedNetwork for NetshHostedNetwork<R> {
    fn is_supported(&self) -> bool {
        let output = match run_checked(&self.runner, "netsh", &["wlan", "show", "drivers"]) {
            Ok(output) => output,
            Err(err) => {
                log::debug!("hosted network probe failed: {}", err);
                return false;
            }
        };
        output
            .stdout
            .lines()
            .find(|line| line.contains("Hosted network supported"))
            .map(|line| line.contains("Yes"))
            .unwrap_or(false)
    }

    fn create(&self, ssid: &str, passphrase: &str) -> Result<(), StreamError> {
        let ssid_arg = format!("ssid={ssid}");
        let key_arg = format!("key={passphrase}");
        run_checked(
            &self.runner,
            "netsh",
            &["wlan", "set", "hostednetwork", "mode=allow", &ssid_arg, &key_arg],
        )
        .map(|_| ())
        .map_err(StreamError::HotspotCreateFailed)
    }

    fn start(&self) -> Result<(), StreamError> {
        run_checked(&self.runner, "netsh", &["wlan", "start", "hostednetwork"])
            .map(|_| ())
            .map_err(StreamError::HotspotCreateFailed)
    }

    fn stop(&self) -> Result<(), StreamError> {
        run_checked(&self.runner, "netsh", &["wlan", "stop", "hostednetwork"])
            .map(|_| ())
            .map_err(StreamError::HotspotTeardownFailed)
    }

    fn host_address(&self) -> IpAddr {
        IpAddr::V4(NETSH_GATEWAY)
    }
}

// ----------------------------------------------------------------------------
// Linux: NetworkManager
// ----------------------------------------------------------------------------

/// `nmcli` brings the hotspot up in one command, so `create` only records
/// the credentials and `start` does the work.
pub struct NmcliHostedNetwork<R: CommandRunner> {
    runner: R,
    interface: Mutex<Option<String>>,
    credentials: Mutex<Option<(String, String)>>,
}

impl<R: CommandRunner> NmcliHostedNetwork<R> {
    pub fn new(runner: R) -> Self {
        Self {
            runner,
            interface: Mutex::new(None),
            credentials: Mutex::new(None),
        }
    }

    fn wifi_interfaces(&self) -> Vec<String> {
        let Ok(output) = run_checked(&self.runner, "nmcli", &["-t", "-f", "DEVICE,TYPE", "device"])
        else {
            return Vec::new();
        };
        output
            .stdout
            .lines()
            .filter_map(|line| line.split_once(':'))
            .filter(|(_, kind)| kind.trim() == "wifi")
            .map(|(device, _)| device.to_string())
            .collect()
    }

    fn supports_ap(&self, interface: &str) -> bool {
        run_checked(
            &self.runner,
            "nmcli",
            &["-t", "-f", "WIFI-PROPERTIES.AP", "device", "show", interface],
        )
        .map(|output| {
            output
                .stdout
                .lines()
                .any(|line| line.trim() == "WIFI-PROPERTIES.AP:yes")
        })
        .unwrap_or(false)
    }
}

impl<R: CommandRunner> HostedNetwork for NmcliHostedNetwork<R> {
    fn is_supported(&self) -> bool {
        let capable = self
            .wifi_interfaces()
            .into_iter()
            .find(|interface| self.supports_ap(interface));
        let supported = capable.is_some();
        *self.interface.lock().unwrap_or_else(|p| p.into_inner()) = capable;
        supported
    }

    fn create(&self, ssid: &str, passphrase: &str) -> Result<(), StreamError> {
        *self.credentials.lock().unwrap_or_else(|p| p.into_inner()) =
            Some((ssid.to_string(), passphrase.to_string()));
        Ok(())
    }

    fn start(&self) -> Result<(), StreamError> {
        let interface = self
            .interface
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
            .ok_or_else(|| {
                StreamError::HotspotCreateFailed("no access-point capable Wi-Fi device".into())
            })?;
        let (ssid, passphrase) = self
            .credentials
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
            .ok_or_else(|| StreamError::HotspotCreateFailed("hotspot not configured".into()))?;
        run_checked(
            &self.runner,
            "nmcli",
            &[
                "device",
                "wifi",
                "hotspot",
                "ifname",
                &interface,
                "con-name",
                NMCLI_CONNECTION,
                "ssid",
                &ssid,
                "password",
                &passphrase,
            ],
        )
        .map(|_| ())
        .map_err(StreamError::HotspotCreateFailed)
    }

    fn stop(&self) -> Result<(), StreamError> {
        let down = run_checked(
            &self.runner,
            "nmcli",
            &["connection", "down", "id", NMCLI_CONNECTION],
        );
        if let Err(err) = run_checked(
            &self.runner,
            "nmcli",
            &["connection", "delete", "id", NMCLI_CONNECTION],
        ) {
            log::debug!("hotspot profile cleanup: {}", err);
        }
        down.map(|_| ()).map_err(StreamError::HotspotTeardownFailed)
    }

    fn host_address(&self) -> IpAddr {
        IpAddr::V4(NMCLI_GATEWAY)
    }
}

// ----------------------------------------------------------------------------
// Unsupported platforms
// ----------------------------------------------------------------------------

pub struct UnsupportedHostedNetwork;

impl HostedNetwork for UnsupportedHostedNetwork {
    fn is_supported(&self) -> bool {
        false
    }

    fn create(&self, _ssid: &str, _passphrase: &str) -> Result<(), StreamError> {
        Err(StreamError::HotspotUnsupported)
    }

    fn start(&self) -> Result<(), StreamError> {
        Err(StreamError::HotspotUnsupported)
    }

    fn stop(&self) -> Result<(), StreamError> {
        Ok(())
    }

    fn host_address(&self) -> IpAddr {
        IpAddr::V4(Ipv4Addr::LOCALHOST)
    }
}
