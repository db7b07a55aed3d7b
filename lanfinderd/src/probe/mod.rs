//! Multicast probes.
//!
//! Each probe owns its socket for exactly one call to [`Probe::discover`] and
//! collects datagrams until a fixed deadline. Sockets are dropped (and multicast
//! memberships left) on every exit path, including when the future is dropped.

pub mod mdns;
pub mod ssdp;

use std::collections::HashSet;
use std::io;
use std::net::SocketAddr;
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use shared::types::Protocol;
use tokio::net::UdpSocket;
use tokio::time::{timeout_at, Duration, Instant};
use crate::error::ProbeError;

pub use mdns::MdnsProbe;
pub use ssdp::SsdpProbe;

/// Large enough for any mDNS packet we accept (RFC 6762 caps at 9000)
pub(crate) const RECV_BUFFER_SIZE: usize = 9000;

/// One datagram received during a round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawResponse {
    pub sender: SocketAddr,
    pub payload: Vec<u8>,
    pub received_at: DateTime<Utc>,
}

impl RawResponse {
    pub fn new(sender: SocketAddr, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            sender,
            payload: payload.into(),
            received_at: Utc::now(),
        }
    }
}

/// A source of raw discovery responses, bounded by a timeout.
pub trait Probe: Send + Sync {
    fn protocol(&self) -> Protocol;

    fn discover(&self, timeout: Duration) -> BoxFuture<'_, Result<Vec<RawResponse>, ProbeError>>;
}

/// Receive one datagram, or `None` once `deadline` has passed.
pub(crate) async fn recv_until(
    socket: &UdpSocket,
    buf: &mut [u8],
    deadline: Instant,
) -> io::Result<Option<(usize, SocketAddr)>> {
    match timeout_at(deadline, socket.recv_from(buf)).await {
        Ok(result) => result.map(Some),
        Err(_) => Ok(None),
    }
}

/// Keeps the distinct (sender, payload) pairs of one round, in arrival order.
pub(crate) struct Collector {
    protocol: Protocol,
    seen: HashSet<(SocketAddr, Vec<u8>)>,
    responses: Vec<RawResponse>,
}

impl Collector {
    pub(crate) fn new(protocol: Protocol) -> Self {
        Self {
            protocol,
            seen: HashSet::new(),
            responses: Vec::new(),
        }
    }

    /// Stores the datagram and returns it, or `None` if it is a repeat.
    pub(crate) fn accept(&mut self, sender: SocketAddr, payload: &[u8]) -> Option<&RawResponse> {
        if !self.seen.insert((sender, payload.to_vec())) {
            tracing::trace!("{} duplicate datagram from {}", self.protocol, sender);
            return None;
        }
        tracing::trace!("{} received {} bytes from {}", self.protocol, payload.len(), sender);
        self.responses.push(RawResponse::new(sender, payload));
        self.responses.last()
    }

    pub(crate) fn len(&self) -> usize {
        self.responses.len()
    }

    pub(crate) fn into_responses(self) -> Vec<RawResponse> {
        self.responses
    }
}

/// Roughly 30 years, what tokio itself treats as "never"
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

pub(crate) fn deadline_after(timeout: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(timeout).unwrap_or_else(|| now + FAR_FUTURE)
}
