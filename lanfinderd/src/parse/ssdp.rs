use std::collections::{BTreeMap, HashMap};
use std::net::IpAddr;
use shared::types::{Device, DeviceAddress, Protocol};
use url::{Host, Url};
use crate::error::ParseError;
use crate::probe::RawResponse;

const REQUIRED_HEADERS: [&str; 4] = ["LOCATION", "USN", "ST", "SERVER"];

/// Parses one M-SEARCH response into a device.
pub fn parse(raw: &RawResponse) -> Result<Device, ParseError> {
    let text = String::from_utf8_lossy(&raw.payload);
    let mut lines = text.lines();

    let status = lines.next().unwrap_or_default().trim();
    let mut parts = status.split_whitespace();
    let is_ok = matches!(
        (parts.next(), parts.next()),
        (Some(version), Some("200")) if version.starts_with("HTTP/1.")
    );
    if !is_ok {
        return Err(ParseError::NotAResponse(status.chars().take(64).collect()));
    }

    let mut raw_metadata = BTreeMap::new();
    let mut headers: HashMap<String, String> = HashMap::new();
    for line in lines {
        if line.trim().is_empty() {
            break;
        }
        if let Some((name, value)) = line.split_once(':') {
            let name = name.trim();
            let value = value.trim();
            headers.insert(name.to_ascii_uppercase(), value.to_string());
            raw_metadata.insert(name.to_string(), value.to_string());
        }
    }

    for required in REQUIRED_HEADERS {
        if headers.get(required).map_or(true, |v| v.is_empty()) {
            return Err(ParseError::MissingHeader(required));
        }
    }

    let identity = usn_identity(&headers["USN"]);
    if identity.is_empty() {
        return Err(ParseError::MissingHeader("USN"));
    }

    let search_target = &headers["ST"];
    let mut device = Device::new(identity, Protocol::Ssdp, raw.received_at);
    device.address = Some(location_address(&headers["LOCATION"], raw.sender.ip()));
    device.friendly_name = headers["SERVER"].clone();
    if search_target.contains(":device:") {
        device.device_type = search_target.clone();
    }
    device.raw_metadata = raw_metadata;

    Ok(device)
}

/// `uuid:123::upnp:rootdevice` -> `123`
pub fn usn_identity(usn: &str) -> String {
    let usn = usn.trim();
    let usn = usn
        .get(..5)
        .filter(|prefix| prefix.eq_ignore_ascii_case("uuid:"))
        .map_or(usn, |_| &usn[5..]);
    let uuid = usn.split("::").next().unwrap_or_default();
    uuid.trim().to_string()
}

/// Host of the description URL when it is an IP literal, the sender otherwise.
fn location_address(location: &str, sender: IpAddr) -> DeviceAddress {
    match Url::parse(location) {
        Ok(url) => {
            let ip = match url.host() {
                Some(Host::Ipv4(ip)) => IpAddr::V4(ip),
                Some(Host::Ipv6(ip)) => IpAddr::V6(ip),
                _ => sender,
            };
            DeviceAddress::new(ip, url.port_or_known_default())
        }
        Err(e) => {
            tracing::debug!("Unparseable LOCATION {:?}: {}", location, e);
            DeviceAddress::new(sender, None)
        }
    }
}
