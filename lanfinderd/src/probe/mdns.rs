use std::collections::HashSet;
use std::io;
use std::net::{Ipv4Addr, SocketAddr};
use futures::future::BoxFuture;
use shared::protocol::{MDNS_GROUP, MDNS_META_QUERY, MDNS_PORT};
use shared::types::Protocol;
use socket2::{Domain, Socket, Type};
use tokio::net::UdpSocket;
use tokio::time::Duration;
use crate::config::DiscoveryConfig;
use crate::error::ProbeError;
use crate::parse::dns::{encode_query, Name};
use crate::parse::mdns::advertised_service_types;
use super::{deadline_after, recv_until, Collector, Probe, RawResponse, RECV_BUFFER_SIZE};

/// Questions per query datagram, keeps queries well under a 1500 byte MTU
const QUESTIONS_PER_PACKET: usize = 16;

/// Joins the mDNS group for one window, optionally querying, and collects packets.
pub struct MdnsProbe {
    interface: Ipv4Addr,
    query: bool,
    service_types: Vec<Name>,
}

impl MdnsProbe {
    pub fn new(config: &DiscoveryConfig) -> Self {
        let service_types = config
            .service_types
            .iter()
            .filter_map(|s| {
                let name = Name::parse(s);
                if name.is_none() {
                    tracing::warn!("Ignoring invalid mDNS service type {:?}", s);
                }
                name
            })
            .collect();

        Self {
            interface: config.interface,
            query: config.mdns_query,
            service_types,
        }
    }

    async fn listen(&self, timeout: Duration) -> Result<Vec<RawResponse>, ProbeError> {
        let deadline = deadline_after(timeout);
        let group = SocketAddr::from((MDNS_GROUP, MDNS_PORT));

        let membership = Membership::join(self.interface).map_err(|error| ProbeError::NetworkUnavailable {
            protocol: Protocol::Mdns,
            error,
        })?;
        let socket = &membership.socket;

        let mut queried: HashSet<String> = HashSet::new();
        if self.query {
            let mut names = Vec::with_capacity(self.service_types.len() + 1);
            names.extend(Name::parse(MDNS_META_QUERY));
            names.extend(self.service_types.iter().cloned());
            names.retain(|n| queried.insert(n.key()));

            for packet in query_packets(&names) {
                socket
                    .send_to(&packet, group)
                    .await
                    .map_err(|error| ProbeError::SendFailure {
                        protocol: Protocol::Mdns,
                        error,
                    })?;
            }
            tracing::info!("Sent mDNS queries for {} service types", names.len());
        }

        let mut collector = Collector::new(Protocol::Mdns);
        let mut buf = vec![0u8; RECV_BUFFER_SIZE];

        loop {
            match recv_until(socket, &mut buf, deadline).await {
                Ok(Some((len, sender))) => {
                    let follow_up = match collector.accept(sender, &buf[..len]) {
                        Some(response) if self.query => new_service_types(&response.payload, &mut queried),
                        _ => Vec::new(),
                    };
                    if follow_up.is_empty() {
                        continue;
                    }
                    tracing::debug!("Browsing {} newly advertised service types", follow_up.len());
                    for packet in query_packets(&follow_up) {
                        if let Err(e) = socket.send_to(&packet, group).await {
                            tracing::warn!("mDNS follow-up query failed: {}", e);
                        }
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!(
                        "mDNS receive error, keeping {} responses: {}",
                        collector.len(),
                        e
                    );
                    break;
                }
            }
        }

        Ok(collector.into_responses())
    }
}

impl Probe for MdnsProbe {
    fn protocol(&self) -> Protocol {
        Protocol::Mdns
    }

    fn discover(&self, timeout: Duration) -> BoxFuture<'_, Result<Vec<RawResponse>, ProbeError>> {
        Box::pin(self.listen(timeout))
    }
}

/// Service types from a meta-query answer that have not been queried yet.
fn new_service_types(payload: &[u8], queried: &mut HashSet<String>) -> Vec<Name> {
    advertised_service_types(payload)
        .into_iter()
        .filter(|name| queried.insert(name.key()))
        .collect()
}

fn query_packets(names: &[Name]) -> Vec<Vec<u8>> {
    names
        .chunks(QUESTIONS_PER_PACKET)
        .filter_map(|chunk| match encode_query(chunk) {
            Ok(packet) => Some(packet),
            Err(e) => {
                tracing::warn!("Failed to encode mDNS query: {}", e);
                None
            }
        })
        .collect()
}

/// Socket bound to the mDNS port with group membership; leaves the group on drop.
struct Membership {
    socket: UdpSocket,
    interface: Ipv4Addr,
}

impl Membership {
    fn join(interface: Ipv4Addr) -> io::Result<Self> {
        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(socket2::Protocol::UDP))?;

        // share the port with any system responder
        socket.set_reuse_address(true)?;
        #[cfg(unix)]
        socket.set_reuse_port(true)?;

        let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, MDNS_PORT));
        socket.bind(&addr.into())?;

        socket.join_multicast_v4(&MDNS_GROUP, &interface)?;
        if !interface.is_unspecified() {
            socket.set_multicast_if_v4(&interface)?;
        }
        socket.set_multicast_ttl_v4(255)?;
        socket.set_multicast_loop_v4(true)?;

        socket.set_nonblocking(true)?;

        let socket = UdpSocket::from_std(socket.into())?;
        tracing::debug!("Joined {} on {}", MDNS_GROUP, interface);
        Ok(Self { socket, interface })
    }
}

impl Drop for Membership {
    fn drop(&mut self) {
        if let Err(e) = self.socket.leave_multicast_v4(MDNS_GROUP, self.interface) {
            tracing::debug!("Leaving {} failed: {}", MDNS_GROUP, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse::dns::build::ResponseBuilder;
    use crate::parse::dns::Message;

    fn names(count: usize) -> Vec<Name> {
        (0..count)
            .map(|i| Name::parse(&format!("_svc{}._tcp.local", i)).unwrap())
            .collect()
    }

    #[test]
    fn test_queries_are_chunked() {
        let packets = query_packets(&names(40));

        assert_eq!(packets.len(), 3);
        let counts: Vec<usize> = packets
            .iter()
            .map(|p| Message::decode(p).unwrap().questions.len())
            .collect();
        assert_eq!(counts, vec![16, 16, 8]);
        assert!(packets.iter().all(|p| p.len() < 1500));
    }

    #[test]
    fn test_default_service_types_fit_the_mtu() {
        let probe = MdnsProbe::new(&DiscoveryConfig::default());

        assert_eq!(probe.service_types.len(), shared::protocol::DEFAULT_SERVICE_TYPES.len());
        assert!(query_packets(&probe.service_types).iter().all(|p| p.len() < 1500));
    }

    #[test]
    fn test_invalid_service_types_are_dropped() {
        let config = DiscoveryConfig {
            service_types: vec!["_ipp._tcp.local".to_string(), "bad..name".to_string()],
            ..DiscoveryConfig::default()
        };

        let probe = MdnsProbe::new(&config);
        assert_eq!(probe.service_types, vec![Name::parse("_ipp._tcp.local").unwrap()]);
    }

    #[test]
    fn test_follow_up_only_for_new_types() {
        let mut queried = HashSet::from(["_http._tcp.local".to_string()]);
        let payload = ResponseBuilder::new()
            .ptr("_services._dns-sd._udp.local", "_http._tcp.local")
            .ptr("_services._dns-sd._udp.local", "_Hue._tcp.local")
            .build();

        let first = new_service_types(&payload, &mut queried);
        let second = new_service_types(&payload, &mut queried);

        assert_eq!(first, vec![Name::parse("_Hue._tcp.local").unwrap()]);
        assert!(second.is_empty());
    }
}
