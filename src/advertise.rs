//! Connection payloads.
//!
//! Turns a `NetworkPath` into the text a QR renderer encodes:
//! - LAN: the stream URL.
//! - Hotspot: a `WIFI:` join string so phones can join the access point
//!   straight from the camera app, plus the URL to open once joined.
//!
//! Everything here is a pure function of its input.

use std::fmt;
use std::net::IpAddr;

use crate::network::NetworkPath;

/// Wi-Fi credentials a viewer needs to join a hosted network.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WifiCredentials {
    pub ssid: String,
    pub passphrase: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConnectionPayload {
    /// What to encode in the scannable code.
    pub scan: String,
    /// Stream URL, for display and for viewers already on the network.
    pub url: String,
    /// Set for hosted networks.
    pub credentials: Option<WifiCredentials>,
}

impl ConnectionPayload {
    /// Text telling a person how to connect.
    pub fn instructions(&self) -> String {
        match &self.credentials {
            Some(creds) => format!(
                "SSID: {}\nPassword: {}\nVisit:\n{}",
                creds.ssid, creds.passphrase, self.url
            ),
            None => format!("Connect to same Wi-Fi\nOpen in browser:\n{}", self.url),
        }
    }
}

impl fmt::Display for ConnectionPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.scan)
    }
}

/// Build the payload for `path`, pointing at `endpoint` (no leading slash
/// needed).
pub fn build_payload(path: &NetworkPath, endpoint: &str) -> ConnectionPayload {
    let url = stream_url(path.address(), path.port(), endpoint);
    match path {
        NetworkPath::Lan { .. } => ConnectionPayload {
            scan: url.clone(),
            url,
            credentials: None,
        },
        NetworkPath::Hotspot {
            ssid, passphrase, ..
        } => ConnectionPayload {
            scan: wifi_join_string(ssid, passphrase),
            url,
            credentials: Some(WifiCredentials {
                ssid: ssid.clone(),
                passphrase: passphrase.clone(),
            }),
        },
    }
}

pub fn stream_url(address: IpAddr, port: u16, endpoint: &str) -> String {
    let endpoint = endpoint.trim_start_matches('/');
    match address {
        IpAddr::V4(v4) => format!("http://{v4}:{port}/{endpoint}"),
        IpAddr::V6(v6) => format!("http://[{v6}]:{port}/{endpoint}"),
    }
}

/// `WIFI:T:WPA;S:<ssid>;P:<passphrase>;;` with reserved characters escaped.
pub fn wifi_join_string(ssid: &str, passphrase: &str) -> String {
    format!(
        "WIFI:T:WPA;S:{};P:{};;",
        escape_wifi_field(ssid),
        escape_wifi_field(passphrase)
    )
}

fn escape_wifi_field(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '\\' | ';' | ',' | ':' | '"') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}
