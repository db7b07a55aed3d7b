use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::net::IpAddr;
use chrono::{DateTime, Utc};
use serde::{Serialize, Deserialize};

/// Discovery protocol a device answered on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Protocol {
    #[serde(rename = "SSDP")]
    Ssdp,
    #[serde(rename = "MDNS")]
    Mdns,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Ssdp => f.write_str("SSDP"),
            Protocol::Mdns => f.write_str("MDNS"),
        }
    }
}

/// Network address of a device, with the port when the protocol reports one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceAddress {
    pub ip: IpAddr,
    pub port: Option<u16>,
}

impl DeviceAddress {
    pub fn new(ip: IpAddr, port: Option<u16>) -> Self {
        Self { ip, port }
    }
}

impl fmt::Display for DeviceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.ip, self.port) {
            (ip, None) => write!(f, "{}", ip),
            (IpAddr::V4(ip), Some(port)) => write!(f, "{}:{}", ip, port),
            (IpAddr::V6(ip), Some(port)) => write!(f, "[{}]:{}", ip, port),
        }
    }
}

/// A device in the discovery directory.
/// This is the canonical data model produced by the daemon and served by its API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    /// Stable key: the SSDP USN uuid or the mDNS service-instance name
    pub identity: String,

    /// Best known address, e.g. 10.0.0.5:80
    pub address: Option<DeviceAddress>,

    /// Human readable name, may be empty
    pub friendly_name: String,

    /// SSDP device type URN or mDNS service type, may be empty
    pub device_type: String,

    /// Protocols this device has answered on
    pub discovered_via: BTreeSet<Protocol>,

    /// SSDP headers or mDNS TXT pairs, verbatim
    pub raw_metadata: BTreeMap<String, String>,

    /// First time this device was seen
    pub first_seen: DateTime<Utc>,

    /// Last time this device was seen
    pub last_seen: DateTime<Utc>,

    /// Carried over from an earlier round without being seen in the latest one
    #[serde(default)]
    pub stale: bool,
}

impl Device {
    /// A device seen once, at `seen`, via a single protocol.
    pub fn new(identity: impl Into<String>, protocol: Protocol, seen: DateTime<Utc>) -> Self {
        Self {
            identity: identity.into(),
            address: None,
            friendly_name: String::new(),
            device_type: String::new(),
            discovered_via: BTreeSet::from([protocol]),
            raw_metadata: BTreeMap::new(),
            first_seen: seen,
            last_seen: seen,
            stale: false,
        }
    }
}

/// An immutable, published view of the directory.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Snapshot {
    /// Incremented on every publish; 0 means nothing has been published yet
    pub version: u64,

    pub published_at: Option<DateTime<Utc>>,

    /// SHA-256 over the stable device fields, hex encoded
    pub hash: String,

    /// Devices ordered by identity
    pub devices: Vec<Device>,

    /// Identities merged into another device -> that device's identity
    #[serde(default)]
    pub aliases: BTreeMap<String, String>,
}

impl Snapshot {
    /// Looks a device up by its identity or by any identity merged into it.
    pub fn device(&self, identity: &str) -> Option<&Device> {
        let canonical = self.aliases.get(identity).map_or(identity, String::as_str);
        self.devices
            .binary_search_by(|d| d.identity.as_str().cmp(canonical))
            .ok()
            .map(|idx| &self.devices[idx])
    }
}
