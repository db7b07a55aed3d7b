use std::collections::{BTreeMap, BTreeSet};
use serde::Serialize;
use sha2::{Sha256, Digest};
use shared::types::{Device, DeviceAddress, Protocol};

/// Only stable fields are hashed: timestamps and staleness change on every
/// round without representing a change in what is on the network.
#[derive(Serialize)]
struct HashView<'a> {
    identity: &'a str,
    address: &'a Option<DeviceAddress>,
    friendly_name: &'a str,
    device_type: &'a str,
    discovered_via: &'a BTreeSet<Protocol>,
    raw_metadata: &'a BTreeMap<String, String>,
}

/// Computes a SHA-256 hash of the device list.
/// Devices are sorted by identity for deterministic output.
pub fn compute_hash(devices: &[Device]) -> String {
    let mut indices: Vec<usize> = (0..devices.len()).collect();
    indices.sort_by(|&a, &b| devices[a].identity.cmp(&devices[b].identity));

    let views: Vec<HashView<'_>> = indices
        .iter()
        .map(|&i| {
            let d = &devices[i];
            HashView {
                identity: &d.identity,
                address: &d.address,
                friendly_name: &d.friendly_name,
                device_type: &d.device_type,
                discovered_via: &d.discovered_via,
                raw_metadata: &d.raw_metadata,
            }
        })
        .collect();

    let mut hasher = Sha256::new();
    match serde_json::to_vec(&views) {
        Ok(json) => hasher.update(&json),
        Err(e) => tracing::error!("Failed to serialize devices for hashing: {}", e),
    }
    hex::encode(hasher.finalize())
}
