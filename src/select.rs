use thiserror::Error;
use tracing::{info, warn};

use crate::api::{ApiClient, ApiError};
use crate::hosts::{HostAddr, HostError};
use crate::probe::LEGACY_VERSION_PREFIX;
use crate::settings::SettingsStore;

#[derive(Debug, Error)]
pub enum SelectError {
    #[error(transparent)]
    InvalidHost(#[from] HostError),
    #[error("server at {host} runs version {version}, which is no longer supported")]
    UnsupportedServer { host: HostAddr, version: String },
    #[error("server at {host} did not answer: {source}")]
    Unreachable {
        host: HostAddr,
        #[source]
        source: ApiError,
    },
    #[error("failed to save settings: {0}")]
    Settings(#[from] anyhow::Error),
}

/// Result of a successful host commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    pub host: HostAddr,
    pub version: String,
    /// The server speaks the legacy protocol but was accepted because it is local.
    pub legacy: bool,
}

/// Make `input` the current server.
///
/// The address is normalized and stored, then asked for its version. A legacy
/// server is rejected unless it runs on this device; on rejection or when the
/// server does not answer, the previous host is restored. Accepted hosts are
/// appended to the saved list once.
pub async fn commit_host<C: ApiClient>(
    input: &str,
    settings: &dyn SettingsStore,
    api: &C,
) -> Result<Selection, SelectError> {
    let host = HostAddr::parse(input)?;
    let old_host = settings.host();
    settings.set_host(host.as_str())?;

    let version = match api.echo(&host).await {
        Ok(v) => v,
        Err(source) => {
            settings.set_host(&old_host)?;
            return Err(SelectError::Unreachable { host, source });
        }
    };

    let legacy = version.starts_with(LEGACY_VERSION_PREFIX);
    if legacy {
        if !host.is_local() {
            settings.set_host(&old_host)?;
            return Err(SelectError::UnsupportedServer { host, version });
        }
        warn!(%host, %version, "using legacy local server");
    }

    let mut hosts = settings.hosts();
    if !hosts.iter().any(|h| HostAddr::parse(h).is_ok_and(|saved| saved == host)) {
        hosts.push(host.as_str().to_string());
        settings.set_hosts(&hosts)?;
    }
    info!(%host, %version, "server selected");
    Ok(Selection {
        host,
        version,
        legacy,
    })
}
