use std::net::Ipv4Addr;

/// SSDP multicast group and port
pub const SSDP_GROUP: Ipv4Addr = Ipv4Addr::new(239, 255, 255, 250);
pub const SSDP_PORT: u16 = 1900;

/// Search target that asks every SSDP responder to answer
pub const SSDP_SEARCH_ALL: &str = "ssdp:all";

/// mDNS multicast group and port
pub const MDNS_GROUP: Ipv4Addr = Ipv4Addr::new(224, 0, 0, 251);
pub const MDNS_PORT: u16 = 5353;

/// DNS-SD meta-query type that enumerates the service types on the link
pub const MDNS_META_QUERY: &str = "_services._dns-sd._udp.local";

/// Service types browsed when no list is configured
pub const DEFAULT_SERVICE_TYPES: &[&str] = &[
    "_afpovertcp._tcp.local",
    "_airdrop._tcp.local",
    "_airplay._tcp.local",
    "_airport._tcp.local",
    "_androidtvremote._tcp.local",
    "_axis-video._tcp.local",
    "_bose._tcp.local",
    "_companion-link._tcp.local",
    "_cups._sub._ipps._tcp.local",
    "_daap._tcp.local",
    "_device-info._tcp.local",
    "_epson-scanner._tcp.local",
    "_ftp._tcp.local",
    "_googlecast._tcp.local",
    "_googlezone._tcp.local",
    "_hap._tcp.local",
    "_homekit._tcp.local",
    "_http._tcp.local",
    "_https._tcp.local",
    "_hue._tcp.local",
    "_ipp._tcp.local",
    "_ipps._tcp.local",
    "_matter._tcp.local",
    "_mqtt._tcp.local",
    "_nfs._tcp.local",
    "_nut._tcp.local",
    "_pdl-datastream._tcp.local",
    "_philipshue._tcp.local",
    "_printer._tcp.local",
    "_raop._tcp.local",
    "_remote-login._tcp.local",
    "_rfb._tcp.local",
    "_roku._tcp.local",
    "_rsp._tcp.local",
    "_scanner._tcp.local",
    "_sftp-ssh._tcp.local",
    "_shelly._tcp.local",
    "_sleep-proxy._udp.local",
    "_smb._tcp.local",
    "_sonos._tcp.local",
    "_spotify-connect._tcp.local",
    "_ssh._tcp.local",
    "_telnet._tcp.local",
    "_webdav._tcp.local",
    "_webdavs._tcp.local",
    "_workstation._tcp.local",
];
