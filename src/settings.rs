use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::path::PathBuf;
use std::sync::{PoisonError, RwLock};
use tracing::warn;

use crate::hosts::{HostAddr, LOCAL_HOST};

/// Persistent client settings.
pub trait SettingsStore: Send + Sync {
    /// Address of the server currently in use.
    fn host(&self) -> String;
    fn set_host(&self, host: &str) -> Result<()>;
    /// Hosts the user has selected before.
    fn hosts(&self) -> Vec<String>;
    fn set_hosts(&self, hosts: &[String]) -> Result<()>;
    /// Remembered chooser action code, 0 when none.
    fn chooser_action(&self) -> i32;
    fn set_chooser_action(&self, action: i32) -> Result<()>;
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct Settings {
    pub host: String,
    pub hosts: Vec<String>,
    pub chooser_action: i32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            host: LOCAL_HOST.to_string(),
            hosts: Vec::new(),
            chooser_action: 0,
        }
    }
}

/// Saved hosts as normalized addresses. Entries that no longer parse are skipped.
pub fn saved_hosts(store: &dyn SettingsStore) -> Vec<HostAddr> {
    store
        .hosts()
        .iter()
        .filter_map(|h| match HostAddr::parse(h) {
            Ok(addr) => Some(addr),
            Err(e) => {
                warn!(host = %h, error = %e, "ignoring unparsable saved host");
                None
            }
        })
        .collect()
}

/// Settings kept in memory only.
#[derive(Debug, Default)]
pub struct MemorySettings {
    inner: RwLock<Settings>,
}

impl MemorySettings {
    pub fn new(settings: Settings) -> Self {
        Self {
            inner: RwLock::new(settings),
        }
    }

    pub fn snapshot(&self) -> Settings {
        self.inner.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn update(&self, f: impl FnOnce(&mut Settings)) -> Result<()> {
        f(&mut self.inner.write().unwrap_or_else(PoisonError::into_inner));
        Ok(())
    }
}

impl SettingsStore for MemorySettings {
    fn host(&self) -> String {
        self.snapshot().host
    }

    fn set_host(&self, host: &str) -> Result<()> {
        self.update(|s| s.host = host.to_string())
    }

    fn hosts(&self) -> Vec<String> {
        self.snapshot().hosts
    }

    fn set_hosts(&self, hosts: &[String]) -> Result<()> {
        self.update(|s| s.hosts = hosts.to_vec())
    }

    fn chooser_action(&self) -> i32 {
        self.snapshot().chooser_action
    }

    fn set_chooser_action(&self, action: i32) -> Result<()> {
        self.update(|s| s.chooser_action = action)
    }
}

/// Settings persisted as pretty JSON, rewritten on every change.
#[derive(Debug)]
pub struct JsonFileSettings {
    path: PathBuf,
    inner: MemorySettings,
}

impl JsonFileSettings {
    /// Open the settings file, starting from defaults when it does not exist yet.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let settings = if path.exists() {
            let content = fs::read_to_string(&path)
                .with_context(|| format!("failed to read settings: {}", path.display()))?;
            serde_json::from_str(&content)
                .with_context(|| format!("failed to parse settings: {}", path.display()))?
        } else {
            Settings::default()
        };
        Ok(Self {
            path,
            inner: MemorySettings::new(settings),
        })
    }

    fn persist(&self) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let file = File::create(&self.path)
            .with_context(|| format!("failed to write settings: {}", self.path.display()))?;
        serde_json::to_writer_pretty(file, &self.inner.snapshot())?;
        Ok(())
    }
}

impl SettingsStore for JsonFileSettings {
    fn host(&self) -> String {
        self.inner.host()
    }

    fn set_host(&self, host: &str) -> Result<()> {
        self.inner.set_host(host)?;
        self.persist()
    }

    fn hosts(&self) -> Vec<String> {
        self.inner.hosts()
    }

    fn set_hosts(&self, hosts: &[String]) -> Result<()> {
        self.inner.set_hosts(hosts)?;
        self.persist()
    }

    fn chooser_action(&self) -> i32 {
        self.inner.chooser_action()
    }

    fn set_chooser_action(&self, action: i32) -> Result<()> {
        self.inner.set_chooser_action(action)?;
        self.persist()
    }
}
