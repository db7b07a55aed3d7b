use std::io;
use std::net::{Ipv4Addr, SocketAddr};
use futures::future::BoxFuture;
use shared::protocol::{SSDP_GROUP, SSDP_PORT};
use shared::types::Protocol;
use socket2::{Domain, Socket, Type};
use tokio::net::UdpSocket;
use tokio::time::Duration;
use crate::config::DiscoveryConfig;
use crate::error::ProbeError;
use super::{deadline_after, recv_until, Collector, Probe, RawResponse, RECV_BUFFER_SIZE};

/// UPnP recommends a TTL of 2 for discovery traffic
const SSDP_TTL: u32 = 2;

/// Active SSDP search: one M-SEARCH, then collect unicast replies until the deadline.
pub struct SsdpProbe {
    interface: Ipv4Addr,
    search_target: String,
    mx: u8,
}

impl SsdpProbe {
    pub fn new(config: &DiscoveryConfig) -> Self {
        Self {
            interface: config.interface,
            search_target: config.search_target.clone(),
            mx: config.mx,
        }
    }

    async fn search(&self, timeout: Duration) -> Result<Vec<RawResponse>, ProbeError> {
        let deadline = deadline_after(timeout);

        let socket = open_socket(self.interface).map_err(|error| ProbeError::NetworkUnavailable {
            protocol: Protocol::Ssdp,
            error,
        })?;

        let request = m_search(&self.search_target, effective_mx(self.mx, timeout));
        socket
            .send_to(request.as_bytes(), (SSDP_GROUP, SSDP_PORT))
            .await
            .map_err(|error| ProbeError::SendFailure {
                protocol: Protocol::Ssdp,
                error,
            })?;

        tracing::info!("Sent SSDP discovery request for {}", self.search_target);

        let mut collector = Collector::new(Protocol::Ssdp);
        let mut buf = vec![0u8; RECV_BUFFER_SIZE];

        loop {
            match recv_until(&socket, &mut buf, deadline).await {
                Ok(Some((len, sender))) => {
                    if collector.accept(sender, &buf[..len]).is_some() {
                        tracing::debug!("SSDP response from {}", sender);
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!(
                        "SSDP receive error, keeping {} responses: {}",
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

impl Probe for SsdpProbe {
    fn protocol(&self) -> Protocol {
        Protocol::Ssdp
    }

    fn discover(&self, timeout: Duration) -> BoxFuture<'_, Result<Vec<RawResponse>, ProbeError>> {
        Box::pin(self.search(timeout))
    }
}

/// Builds the M-SEARCH request datagram.
pub fn m_search(search_target: &str, mx: u8) -> String {
    format!(
        "M-SEARCH * HTTP/1.1\r\n\
         HOST: {}:{}\r\n\
         MAN: \"ssdp:discover\"\r\n\
         MX: {}\r\n\
         ST: {}\r\n\
         \r\n",
        SSDP_GROUP, SSDP_PORT, mx, search_target
    )
}

/// Responders delay up to MX seconds, so MX must fit inside the window.
fn effective_mx(mx: u8, timeout: Duration) -> u8 {
    let window = timeout.as_secs().clamp(1, u8::MAX as u64) as u8;
    mx.clamp(1, window)
}

fn open_socket(interface: Ipv4Addr) -> io::Result<UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(socket2::Protocol::UDP))?;

    socket.set_reuse_address(true)?;
    if !interface.is_unspecified() {
        socket.set_multicast_if_v4(&interface)?;
    }
    socket.set_multicast_ttl_v4(SSDP_TTL)?;

    let addr = SocketAddr::from((interface, 0));
    socket.bind(&addr.into())?;

    socket.set_nonblocking(true)?;

    UdpSocket::from_std(socket.into())
}
