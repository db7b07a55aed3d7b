//! Normalizes raw protocol payloads into [`Device`] records.

pub mod dns;
pub mod mdns;
pub mod ssdp;

use shared::types::{Device, Protocol};
use crate::error::ParseError;
use crate::probe::RawResponse;

/// Parses one response. SSDP yields exactly one device, mDNS one per instance.
pub fn parse(protocol: Protocol, raw: &RawResponse) -> Result<Vec<Device>, ParseError> {
    match protocol {
        Protocol::Ssdp => ssdp::parse(raw).map(|device| vec![device]),
        Protocol::Mdns => mdns::parse(raw),
    }
}
