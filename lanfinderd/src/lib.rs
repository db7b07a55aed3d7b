//! LAN device discovery over SSDP and mDNS.
//!
//! Probes run concurrently each round, their responses are parsed into
//! [`shared::types::Device`] records, merged by the aggregator and published as
//! an immutable [`shared::types::Snapshot`] through [`scheduler::Discovery`].

pub mod aggregator;
pub mod api;
pub mod config;
pub mod error;
pub mod parse;
pub mod probe;
pub mod scheduler;
