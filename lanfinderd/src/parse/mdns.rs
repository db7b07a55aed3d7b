use std::collections::HashSet;
use std::net::IpAddr;
use shared::protocol::MDNS_META_QUERY;
use shared::types::{Device, DeviceAddress, Protocol};
use crate::error::ParseError;
use crate::probe::RawResponse;
use super::dns::{Message, Name, RecordData};

/// Parses one mDNS packet into a device per service instance it describes.
///
/// Queries and address-only answers produce no devices.
pub fn parse(raw: &RawResponse) -> Result<Vec<Device>, ParseError> {
    let msg = Message::decode(&raw.payload)?;
    if msg.skipped > 0 || msg.truncated {
        tracing::debug!(
            "mDNS packet from {}: {} records kept, {} skipped, truncated: {}",
            raw.sender,
            msg.records.len(),
            msg.skipped,
            msg.truncated
        );
    }
    Ok(devices_from_message(&msg, raw))
}

fn devices_from_message(msg: &Message, raw: &RawResponse) -> Vec<Device> {
    if !msg.is_response() {
        return Vec::new();
    }

    instances(msg)
        .into_iter()
        .map(|instance| instance_device(msg, &instance, raw))
        .collect()
}

/// Service instance names in record order: PTR targets and SRV owners.
///
/// Goodbye records (TTL 0) announce a departure and never describe a live instance.
fn instances(msg: &Message) -> Vec<Name> {
    let meta = meta_query_key();
    let mut seen = HashSet::new();
    let mut instances = Vec::new();

    for record in msg.records.iter().filter(|r| r.ttl > 0) {
        let instance = match &record.data {
            RecordData::Ptr(target) if record.name.key() != meta => target,
            RecordData::Srv { .. } => &record.name,
            _ => continue,
        };
        // an instance needs at least "<name>.<service>.<proto>"
        if instance.labels().len() >= 3 && seen.insert(instance.key()) {
            instances.push(instance.clone());
        }
    }

    instances
}

fn instance_device(msg: &Message, instance: &Name, raw: &RawResponse) -> Device {
    let key = instance.key();
    let mut device = Device::new(key.clone(), Protocol::Mdns, raw.received_at);
    device.friendly_name = instance.labels()[0].clone();
    device.device_type = instance.parent().to_string();

    let srv = msg.records.iter().find_map(|r| match &r.data {
        RecordData::Srv { port, target, .. } if r.ttl > 0 && r.name.key() == key => Some((*port, target)),
        _ => None,
    });

    let ip = srv
        .and_then(|(_, target)| host_address(msg, target))
        .unwrap_or_else(|| raw.sender.ip());
    device.address = Some(DeviceAddress::new(ip, srv.map(|(port, _)| port)));

    if let Some((_, target)) = srv {
        device.raw_metadata.insert("host".to_string(), target.to_string());
    }
    for record in msg.records.iter().filter(|r| r.name.key() == key) {
        if let RecordData::Txt(entries) = &record.data {
            for (k, v) in entries {
                device.raw_metadata.insert(k.clone(), v.clone());
            }
        }
    }

    device
}

/// First IPv4 address of `host`, falling back to its first IPv6 address.
fn host_address(msg: &Message, host: &Name) -> Option<IpAddr> {
    let key = host.key();
    let mut v6 = None;

    for record in msg.records.iter().filter(|r| r.name.key() == key) {
        match record.data {
            RecordData::A(ip) => return Some(IpAddr::V4(ip)),
            RecordData::Aaaa(ip) if v6.is_none() => v6 = Some(IpAddr::V6(ip)),
            _ => {}
        }
    }

    v6
}

/// Service types advertised in answers to the DNS-SD meta query.
pub fn advertised_service_types(payload: &[u8]) -> Vec<Name> {
    let Ok(msg) = Message::decode(payload) else {
        return Vec::new();
    };
    if !msg.is_response() {
        return Vec::new();
    }

    let meta = meta_query_key();
    msg.records
        .into_iter()
        .filter_map(|r| match r.data {
            RecordData::Ptr(target) if r.ttl > 0 && r.name.key() == meta => Some(target),
            _ => None,
        })
        .collect()
}

fn meta_query_key() -> String {
    MDNS_META_QUERY.to_ascii_lowercase()
}
