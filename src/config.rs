use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Knobs for one discovery run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// Max probes in flight at once.
    pub concurrency: usize,
    pub probe_timeout_ms: u64,
    /// Sweep each interface's real subnet instead of the /24 around its address.
    pub scan_whole_subnet: bool,
    /// Upper bound on hosts taken from any single subnet.
    pub max_hosts_per_subnet: usize,
    /// Explicit CIDRs to sweep. Interface detection is skipped when non-empty.
    pub cidrs: Vec<String>,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            concurrency: 32,
            probe_timeout_ms: 1500,
            scan_whole_subnet: false,
            max_hosts_per_subnet: 1024,
            cidrs: Vec::new(),
        }
    }
}

impl DiscoveryConfig {
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms.max(50))
    }
}

/// Cadence of the torrent-list watcher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatcherConfig {
    /// Delay before the first poll, giving a freshly started server time to come up.
    pub grace_ms: u64,
    /// Sleep after a detected change.
    pub fast_ms: u64,
    /// Sleep while nothing changes.
    pub slow_ms: u64,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            grace_ms: 5_000,
            fast_ms: 1_000,
            slow_ms: 5_000,
        }
    }
}

impl WatcherConfig {
    pub fn grace(&self) -> Duration {
        Duration::from_millis(self.grace_ms)
    }

    pub fn fast(&self) -> Duration {
        Duration::from_millis(self.fast_ms)
    }

    pub fn slow(&self) -> Duration {
        Duration::from_millis(self.slow_ms)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub discovery: DiscoveryConfig,
    pub watcher: WatcherConfig,
}

impl AppConfig {
    pub fn from_json_str(s: &str) -> Result<Self> {
        serde_json::from_str(s).context("failed to parse config JSON")
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        Self::from_json_str(&content).with_context(|| format!("in {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_object_yields_defaults() {
        let cfg = AppConfig::from_json_str("{}").unwrap();
        assert_eq!(cfg, AppConfig::default());
        assert_eq!(cfg.discovery.concurrency, 32);
        assert_eq!(cfg.watcher.slow(), Duration::from_secs(5));
    }

    #[test]
    fn partial_sections_merge_with_defaults() {
        let cfg = AppConfig::from_json_str(
            r#"{"discovery":{"scan_whole_subnet":true,"cidrs":["10.0.0.0/28"]},"watcher":{"fast_ms":250}}"#,
        )
        .unwrap();
        assert!(cfg.discovery.scan_whole_subnet);
        assert_eq!(cfg.discovery.cidrs, vec!["10.0.0.0/28".to_string()]);
        assert_eq!(cfg.discovery.probe_timeout_ms, 1500);
        assert_eq!(cfg.watcher.fast(), Duration::from_millis(250));
        assert_eq!(cfg.watcher.grace_ms, 5_000);
    }

    #[test]
    fn probe_timeout_has_floor() {
        let cfg = DiscoveryConfig {
            probe_timeout_ms: 1,
            ..Default::default()
        };
        assert_eq!(cfg.probe_timeout(), Duration::from_millis(50));
    }

    #[test]
    fn missing_file_errors() {
        let path = std::env::temp_dir().join("torrserve-finder-missing-config.json");
        assert!(AppConfig::load(path).is_err());
    }
}
