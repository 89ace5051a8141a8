use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio::time;
use tracing::trace;

use crate::hosts::HostAddr;

/// Version prefix of the server generation this client no longer speaks.
pub const LEGACY_VERSION_PREFIX: &str = "1.1.";

const MAX_VERSION_LEN: usize = 128;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProbeError {
    #[error("unreachable: {0}")]
    Unreachable(String),
    #[error("timed out")]
    Timeout,
    #[error("unsupported server version `{version}`")]
    ProtocolMismatch { version: String },
}

/// Single bounded reachability and version check against one host.
pub trait HostProbe: Send + Sync + 'static {
    fn probe(
        &self,
        host: &HostAddr,
        timeout: Duration,
    ) -> impl Future<Output = Result<String, ProbeError>> + Send;
}

/// Decide whether an echo body is a version this client can talk to.
pub fn classify_version(body: &str) -> Result<String, ProbeError> {
    let version = body.trim();
    if version.is_empty() || version.len() > MAX_VERSION_LEN || version.starts_with(LEGACY_VERSION_PREFIX) {
        return Err(ProbeError::ProtocolMismatch {
            version: version.chars().take(MAX_VERSION_LEN).collect(),
        });
    }
    Ok(version.to_string())
}

/// Probes `GET {host}/echo` over HTTP.
#[derive(Debug, Clone, Default)]
pub struct HttpProbe {
    client: reqwest::Client,
}

impl HttpProbe {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl HostProbe for HttpProbe {
    async fn probe(&self, host: &HostAddr, timeout: Duration) -> Result<String, ProbeError> {
        let url = host.endpoint("echo");
        let request = async {
            let resp = self
                .client
                .get(&url)
                .timeout(timeout)
                .send()
                .await?;
            let status = resp.status();
            let body = resp.text().await?;
            Ok::<_, reqwest::Error>((status, body))
        };

        // The outer timeout also bounds DNS and body reads.
        let (status, body) = match time::timeout(timeout, request).await {
            Err(_) => return Err(ProbeError::Timeout),
            Ok(Err(e)) if e.is_timeout() => return Err(ProbeError::Timeout),
            Ok(Err(e)) => return Err(ProbeError::Unreachable(e.to_string())),
            Ok(Ok(v)) => v,
        };
        trace!(%host, %status, "echo answered");

        if !status.is_success() {
            return Err(ProbeError::Unreachable(format!("HTTP {}", status.as_u16())));
        }
        classify_version(&body)
    }
}
