//! Cross-protocol device directory.
//!
//! Records are keyed by identity. A record whose identity is unknown but whose
//! IP matches a device only seen via the other protocol is folded into that
//! device, and its identity is remembered as an alias for later rounds.

pub mod hash;

use std::collections::{BTreeMap, HashMap, HashSet};
use chrono::{DateTime, Duration, Utc};
use shared::types::Device;
use crate::config::{RetentionConfig, RetentionKind};

/// What happens to devices that were not seen in the latest round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetentionPolicy {
    /// Drop them immediately
    HardReset,
    /// Keep them, marked stale, until `after` has passed since they were last seen
    Expire { after: Duration },
}

impl From<&RetentionConfig> for RetentionPolicy {
    fn from(config: &RetentionConfig) -> Self {
        match config.policy {
            RetentionKind::HardReset => RetentionPolicy::HardReset,
            RetentionKind::Expire => RetentionPolicy::Expire {
                after: i64::try_from(config.expire_after_secs)
                    .ok()
                    .and_then(Duration::try_seconds)
                    .unwrap_or(Duration::MAX),
            },
        }
    }
}

/// Merges `incoming` into `existing`.
///
/// Known non-empty fields are never lost, `last_seen` never regresses and
/// `discovered_via` is the union. Merging the same record twice is a no-op.
pub fn merge(existing: Option<&Device>, incoming: Device) -> Device {
    let Some(existing) = existing else {
        return Device { stale: false, ..incoming };
    };

    let incoming_newer = incoming.last_seen >= existing.last_seen;
    let mut merged = existing.clone();

    merged.discovered_via.extend(incoming.discovered_via.iter().copied());

    if merged.friendly_name.is_empty() {
        merged.friendly_name = incoming.friendly_name;
    }
    if merged.device_type.is_empty() {
        merged.device_type = incoming.device_type;
    }
    if incoming.address.is_some() && (incoming_newer || merged.address.is_none()) {
        merged.address = incoming.address;
    }
    for (key, value) in incoming.raw_metadata {
        if incoming_newer || !merged.raw_metadata.contains_key(&key) {
            merged.raw_metadata.insert(key, value);
        }
    }

    merged.first_seen = merged.first_seen.min(incoming.first_seen);
    merged.last_seen = merged.last_seen.max(incoming.last_seen);
    merged.stale = false;
    merged
}

/// The directory, updated one round at a time.
pub struct Aggregator {
    policy: RetentionPolicy,
    devices: BTreeMap<String, Device>,
    /// Identities folded into another device -> that device's identity
    aliases: HashMap<String, String>,
    /// Canonical identities seen in the current round
    seen: HashSet<String>,
}

impl Aggregator {
    pub fn new(policy: RetentionPolicy) -> Self {
        Self {
            policy,
            devices: BTreeMap::new(),
            aliases: HashMap::new(),
            seen: HashSet::new(),
        }
    }

    /// Merges one parsed record into the directory; returns its canonical identity.
    pub fn ingest(&mut self, incoming: Device) -> String {
        let canonical = match self.resolve(&incoming) {
            Some(canonical) => canonical,
            None => match self.correlate(&incoming) {
                Some(canonical) => {
                    tracing::debug!(
                        "Correlated {} with {} by address",
                        incoming.identity,
                        canonical
                    );
                    self.aliases.insert(incoming.identity.clone(), canonical.clone());
                    canonical
                }
                None => {
                    tracing::debug!("New device {}", incoming.identity);
                    incoming.identity.clone()
                }
            },
        };

        let merged = merge(self.devices.get(&canonical), incoming);
        self.devices.insert(canonical.clone(), merged);
        self.seen.insert(canonical.clone());
        canonical
    }

    fn resolve(&self, incoming: &Device) -> Option<String> {
        if self.devices.contains_key(&incoming.identity) {
            return Some(incoming.identity.clone());
        }
        self.aliases
            .get(&incoming.identity)
            .filter(|canonical| self.devices.contains_key(*canonical))
            .cloned()
    }

    /// Smallest identity with the same IP that has not answered on the incoming protocol.
    ///
    /// Stale devices are never candidates: their address may since have been
    /// handed to another host.
    fn correlate(&self, incoming: &Device) -> Option<String> {
        let ip = incoming.address?.ip;
        self.devices
            .values()
            .find(|d| {
                (!d.stale || self.seen.contains(&d.identity))
                    && d.address.map(|a| a.ip) == Some(ip)
                    && d.discovered_via.is_disjoint(&incoming.discovered_via)
            })
            .map(|d| d.identity.clone())
    }

    /// Applies the retention policy and returns the directory ordered by identity.
    pub fn finish_round(&mut self, now: DateTime<Utc>) -> Vec<Device> {
        let seen = std::mem::take(&mut self.seen);
        let policy = self.policy;

        self.devices.retain(|identity, device| {
            if seen.contains(identity) {
                device.stale = false;
                return true;
            }
            let keep = match policy {
                RetentionPolicy::HardReset => false,
                RetentionPolicy::Expire { after } => now - device.last_seen <= after,
            };
            if keep {
                device.stale = true;
            } else {
                tracing::debug!("Expiring device {}", identity);
            }
            keep
        });
        self.aliases
            .retain(|_, canonical| self.devices.contains_key(canonical));

        self.devices.values().cloned().collect()
    }

    /// Merged identities and the device each resolves to.
    pub fn aliases(&self) -> BTreeMap<String, String> {
        self.aliases
            .iter()
            .map(|(alias, canonical)| (alias.clone(), canonical.clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}

/// Presentation order: ascending IP (IPv4 first), devices without an address last.
pub fn order_by_address(devices: &mut [Device]) {
    devices.sort_by(|a, b| {
        let key = |d: &Device| (d.address.is_none(), d.address.map(|addr| addr.ip));
        key(a).cmp(&key(b)).then_with(|| a.identity.cmp(&b.identity))
    });
}
