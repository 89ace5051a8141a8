use serde::de::DeserializeOwned;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use crate::hosts::{HostAddr, HostError};
use crate::settings::SettingsStore;
use crate::types::{AddTorrentOptions, Torrent, TorrentResult};

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{url} answered HTTP {status}")]
    Status { url: String, status: u16 },
    #[error("configured host is invalid: {0}")]
    Host(#[from] HostError),
}

/// Client side of the TorrServe HTTP API.
///
/// Calls other than `echo`/`remote_echo` go to the host currently configured
/// in the settings store.
pub trait ApiClient: Send + Sync + 'static {
    /// Version string reported by `host`.
    fn echo(&self, host: &HostAddr) -> impl Future<Output = Result<String, ApiError>> + Send;

    /// Like [`ApiClient::echo`], but an empty string on any failure.
    fn remote_echo(&self, host: &HostAddr) -> impl Future<Output = String> + Send {
        async move {
            match self.echo(host).await {
                Ok(v) => v,
                Err(e) => {
                    debug!(%host, error = %e, "remote echo failed");
                    String::new()
                }
            }
        }
    }

    fn list_torrents(&self) -> impl Future<Output = Result<Vec<Torrent>, ApiError>> + Send;

    fn search_torrents(
        &self,
        query: &str,
    ) -> impl Future<Output = Result<Vec<TorrentResult>, ApiError>> + Send;

    fn add_torrent(
        &self,
        opts: &AddTorrentOptions,
    ) -> impl Future<Output = Result<Option<Torrent>, ApiError>> + Send;
}

#[derive(Debug, Serialize)]
struct TorrentsRequest<'a> {
    action: &'a str,
    #[serde(skip_serializing_if = "is_empty")]
    hash: &'a str,
    #[serde(skip_serializing_if = "is_empty")]
    link: &'a str,
    #[serde(skip_serializing_if = "is_empty")]
    title: &'a str,
    #[serde(skip_serializing_if = "is_empty")]
    poster: &'a str,
    #[serde(skip_serializing_if = "is_empty")]
    data: &'a str,
    #[serde(skip_serializing_if = "is_false")]
    save_to_db: bool,
}

fn is_empty(s: &&str) -> bool {
    s.is_empty()
}

fn is_false(b: &bool) -> bool {
    !*b
}

impl<'a> TorrentsRequest<'a> {
    fn new(action: &'a str) -> Self {
        Self {
            action,
            hash: "",
            link: "",
            title: "",
            poster: "",
            data: "",
            save_to_db: false,
        }
    }
}

/// reqwest-backed [`ApiClient`].
#[derive(Clone)]
pub struct TorrServerApi {
    client: reqwest::Client,
    settings: Arc<dyn SettingsStore>,
    timeout: Duration,
}

impl TorrServerApi {
    pub fn new(client: reqwest::Client, settings: Arc<dyn SettingsStore>, timeout: Duration) -> Self {
        Self {
            client,
            settings,
            timeout,
        }
    }

    fn current_host(&self) -> Result<HostAddr, ApiError> {
        Ok(HostAddr::parse(&self.settings.host())?)
    }

    async fn send(&self, req: reqwest::RequestBuilder, url: &str) -> Result<reqwest::Response, ApiError> {
        let resp = req
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|source| ApiError::Request {
                url: url.to_string(),
                source,
            })?;
        let status = resp.status();
        if !status.is_success() {
            return Err(ApiError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        Ok(resp)
    }

    async fn json<T: DeserializeOwned>(&self, req: reqwest::RequestBuilder, url: &str) -> Result<T, ApiError> {
        self.send(req, url)
            .await?
            .json::<T>()
            .await
            .map_err(|source| ApiError::Request {
                url: url.to_string(),
                source,
            })
    }

    async fn post_torrents<T: DeserializeOwned>(&self, body: &TorrentsRequest<'_>) -> Result<T, ApiError> {
        let url = self.current_host()?.endpoint("torrents");
        debug!(action = body.action, %url, "torrents request");
        self.json(self.client.post(&url).json(body), &url).await
    }
}

impl ApiClient for TorrServerApi {
    async fn echo(&self, host: &HostAddr) -> Result<String, ApiError> {
        let url = host.endpoint("echo");
        let body = self
            .send(self.client.get(&url), &url)
            .await?
            .text()
            .await
            .map_err(|source| ApiError::Request {
                url: url.clone(),
                source,
            })?;
        Ok(body.trim().to_string())
    }

    async fn list_torrents(&self) -> Result<Vec<Torrent>, ApiError> {
        self.post_torrents(&TorrentsRequest::new("list")).await
    }

    async fn search_torrents(&self, query: &str) -> Result<Vec<TorrentResult>, ApiError> {
        let url = self.current_host()?.endpoint("search/");
        let req = self.client.get(&url).query(&[("query", query)]);
        self.json(req, &url).await
    }

    async fn add_torrent(&self, opts: &AddTorrentOptions) -> Result<Option<Torrent>, ApiError> {
        if !opts.source.is_empty() {
            let mut body = TorrentsRequest::new("get");
            body.hash = &opts.source;
            return self.post_torrents(&body).await;
        }
        let body = TorrentsRequest {
            link: &opts.link,
            title: &opts.title,
            poster: &opts.poster,
            data: &opts.save_path,
            save_to_db: opts.auto_start,
            ..TorrentsRequest::new("add")
        };
        self.post_torrents(&body).await
    }
}
