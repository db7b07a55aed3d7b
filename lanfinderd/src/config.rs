use std::net::Ipv4Addr;
use std::path::Path;
use std::time::Duration;
use serde::Deserialize;
use anyhow::{Context, Result};
use shared::protocol::{DEFAULT_SERVICE_TYPES, SSDP_SEARCH_ALL};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub discovery: DiscoveryConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
    #[serde(default)]
    pub retention: RetentionConfig,
    #[serde(default)]
    pub api: ApiConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DiscoveryConfig {
    /// Local IPv4 address of the interface to probe on; 0.0.0.0 lets the OS choose
    #[serde(default = "default_interface")]
    pub interface: Ipv4Addr,
    #[serde(default = "default_timeout_ms")]
    pub ssdp_timeout_ms: u64,
    #[serde(default = "default_timeout_ms")]
    pub mdns_timeout_ms: u64,
    #[serde(default = "default_search_target")]
    pub search_target: String,
    #[serde(default = "default_mx")]
    pub mx: u8,
    /// Send PTR queries instead of only listening for announcements
    #[serde(default = "default_true")]
    pub mdns_query: bool,
    #[serde(default = "default_service_types")]
    pub service_types: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ScheduleMode {
    Continuous,
    OnDemand,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScheduleConfig {
    #[serde(default = "default_mode")]
    pub mode: ScheduleMode,
    #[serde(default = "default_interval")]
    pub interval_secs: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RetentionKind {
    Expire,
    HardReset,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RetentionConfig {
    #[serde(default = "default_retention")]
    pub policy: RetentionKind,
    #[serde(default = "default_expire_after")]
    pub expire_after_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_listen")]
    pub listen: String,
}

fn default_interface() -> Ipv4Addr {
    Ipv4Addr::UNSPECIFIED
}

fn default_timeout_ms() -> u64 {
    5000
}

fn default_search_target() -> String {
    SSDP_SEARCH_ALL.to_string()
}

fn default_mx() -> u8 {
    3
}

fn default_true() -> bool {
    true
}

fn default_service_types() -> Vec<String> {
    DEFAULT_SERVICE_TYPES.iter().map(|s| s.to_string()).collect()
}

fn default_mode() -> ScheduleMode {
    ScheduleMode::Continuous
}

fn default_interval() -> u64 {
    60
}

fn default_retention() -> RetentionKind {
    RetentionKind::Expire
}

fn default_expire_after() -> u64 {
    300
}

fn default_listen() -> String {
    "0.0.0.0:8080".to_string()
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            interface: default_interface(),
            ssdp_timeout_ms: default_timeout_ms(),
            mdns_timeout_ms: default_timeout_ms(),
            search_target: default_search_target(),
            mx: default_mx(),
            mdns_query: default_true(),
            service_types: default_service_types(),
        }
    }
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            mode: default_mode(),
            interval_secs: default_interval(),
        }
    }
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            policy: default_retention(),
            expire_after_secs: default_expire_after(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
        }
    }
}

impl DiscoveryConfig {
    pub fn ssdp_timeout(&self) -> Duration {
        Duration::from_millis(self.ssdp_timeout_ms)
    }

    pub fn mdns_timeout(&self) -> Duration {
        Duration::from_millis(self.mdns_timeout_ms)
    }
}

impl ScheduleConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Load the file if it exists, otherwise fall back to defaults
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            Self::load(path)
        } else {
            tracing::info!("No config at {}, using defaults", path.display());
            Ok(Self::default())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_gives_defaults() {
        let config: Config = toml::from_str("").unwrap();

        assert_eq!(config.discovery.interface, Ipv4Addr::UNSPECIFIED);
        assert_eq!(config.discovery.search_target, "ssdp:all");
        assert_eq!(config.discovery.mx, 3);
        assert_eq!(config.discovery.service_types.len(), DEFAULT_SERVICE_TYPES.len());
        assert_eq!(config.schedule.mode, ScheduleMode::Continuous);
        assert_eq!(config.retention.policy, RetentionKind::Expire);
        assert_eq!(config.api.listen, "0.0.0.0:8080");
    }

    #[test]
    fn test_parse_sections() {
        let config: Config = toml::from_str(
            r#"
            [discovery]
            interface = "192.168.1.20"
            ssdp_timeout_ms = 2000
            mdns_timeout_ms = 3500
            search_target = "upnp:rootdevice"
            service_types = ["_ipp._tcp.local"]

            [schedule]
            mode = "on-demand"

            [retention]
            policy = "hard-reset"
            "#,
        )
        .unwrap();

        assert_eq!(config.discovery.interface, Ipv4Addr::new(192, 168, 1, 20));
        assert_eq!(config.discovery.ssdp_timeout(), Duration::from_secs(2));
        assert_eq!(config.discovery.mdns_timeout(), Duration::from_millis(3500));
        assert_eq!(config.discovery.search_target, "upnp:rootdevice");
        assert_eq!(config.discovery.service_types, vec!["_ipp._tcp.local".to_string()]);
        assert!(config.discovery.mdns_query);
        assert_eq!(config.schedule.mode, ScheduleMode::OnDemand);
        assert_eq!(config.schedule.interval_secs, 60);
        assert_eq!(config.retention.policy, RetentionKind::HardReset);
        assert_eq!(config.retention.expire_after_secs, 300);
    }

    #[test]
    fn test_missing_file_falls_back() {
        let config = Config::load_or_default("/nonexistent/lanfinderd.toml").unwrap();
        assert_eq!(config.discovery.ssdp_timeout(), Duration::from_secs(5));
    }
}
