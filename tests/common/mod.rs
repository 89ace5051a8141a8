#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use torrserve_finder::api::{ApiClient, ApiError};
use torrserve_finder::hosts::HostAddr;
use torrserve_finder::probe::{HostProbe, ProbeError};
use torrserve_finder::sink::{DiscoveryEvent, ResultSink};
use torrserve_finder::types::{AddTorrentOptions, ServerCandidate, Torrent, TorrentResult};

/// Probe answering from a fixed table; unknown hosts are unreachable.
#[derive(Default)]
pub struct FakeProbe {
    answers: HashMap<HostAddr, Result<String, ProbeError>>,
    delay: Duration,
    in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
    pub calls: AtomicUsize,
}

impl FakeProbe {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn answer(mut self, host: &str, result: Result<&str, ProbeError>) -> Self {
        self.answers
            .insert(HostAddr::parse(host).unwrap(), result.map(str::to_string));
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

impl HostProbe for FakeProbe {
    async fn probe(&self, host: &HostAddr, _timeout: Duration) -> Result<String, ProbeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.answers
            .get(host)
            .cloned()
            .unwrap_or_else(|| Err(ProbeError::Unreachable("connection refused".into())))
    }
}

/// Sink that keeps every event it receives.
#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<DiscoveryEvent>>,
}

impl RecordingSink {
    pub fn events(&self) -> Vec<DiscoveryEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn progress_count(&self) -> usize {
        self.events()
            .iter()
            .filter(|e| matches!(e, DiscoveryEvent::Progress(_)))
            .count()
    }

    pub fn found(&self) -> Vec<ServerCandidate> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                DiscoveryEvent::ServerFound(c) => Some(c),
                _ => None,
            })
            .collect()
    }

    pub fn finished_count(&self) -> usize {
        self.events()
            .iter()
            .filter(|e| matches!(e, DiscoveryEvent::Finished))
            .count()
    }
}

impl ResultSink for RecordingSink {
    fn on_progress(&self, status: &str) {
        self.events
            .lock()
            .unwrap()
            .push(DiscoveryEvent::Progress(status.to_string()));
    }

    fn on_server_found(&self, candidate: &ServerCandidate) {
        self.events
            .lock()
            .unwrap()
            .push(DiscoveryEvent::ServerFound(candidate.clone()));
    }

    fn on_finished(&self) {
        self.events.lock().unwrap().push(DiscoveryEvent::Finished);
    }
}

#[derive(Default)]
struct FakeApiInner {
    versions: Mutex<HashMap<HostAddr, String>>,
    list: Mutex<Option<Vec<Torrent>>>,
    list_calls: AtomicUsize,
    search: Mutex<HashMap<String, (Duration, Vec<TorrentResult>)>>,
    added: Mutex<Vec<AddTorrentOptions>>,
}

/// In-memory API client. Cloning shares state so tests can change answers
/// while a watcher or search session holds its own copy.
#[derive(Clone, Default)]
pub struct FakeApi {
    inner: Arc<FakeApiInner>,
}

impl FakeApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_version(self, host: &str, version: &str) -> Self {
        self.inner
            .versions
            .lock()
            .unwrap()
            .insert(HostAddr::parse(host).unwrap(), version.to_string());
        self
    }

    pub fn set_list(&self, list: Vec<Torrent>) {
        *self.inner.list.lock().unwrap() = Some(list);
    }

    /// Make list fetches fail until the next `set_list`.
    pub fn fail_list(&self) {
        *self.inner.list.lock().unwrap() = None;
    }

    pub fn list_calls(&self) -> usize {
        self.inner.list_calls.load(Ordering::SeqCst)
    }

    pub fn set_search(&self, query: &str, delay: Duration, results: Vec<TorrentResult>) {
        self.inner
            .search
            .lock()
            .unwrap()
            .insert(query.to_string(), (delay, results));
    }

    pub fn added(&self) -> Vec<AddTorrentOptions> {
        self.inner.added.lock().unwrap().clone()
    }
}

fn unavailable(url: &str) -> ApiError {
    ApiError::Status {
        url: url.to_string(),
        status: 503,
    }
}

impl ApiClient for FakeApi {
    async fn echo(&self, host: &HostAddr) -> Result<String, ApiError> {
        let version = self.inner.versions.lock().unwrap().get(host).cloned();
        version.ok_or_else(|| unavailable(&host.endpoint("echo")))
    }

    async fn list_torrents(&self) -> Result<Vec<Torrent>, ApiError> {
        self.inner.list_calls.fetch_add(1, Ordering::SeqCst);
        let list = self.inner.list.lock().unwrap().clone();
        list.ok_or_else(|| unavailable("torrents"))
    }

    async fn search_torrents(&self, query: &str) -> Result<Vec<TorrentResult>, ApiError> {
        let entry = self.inner.search.lock().unwrap().get(query).cloned();
        match entry {
            Some((delay, results)) => {
                tokio::time::sleep(delay).await;
                Ok(results)
            }
            None => Ok(Vec::new()),
        }
    }

    async fn add_torrent(&self, opts: &AddTorrentOptions) -> Result<Option<Torrent>, ApiError> {
        self.inner.added.lock().unwrap().push(opts.clone());
        Ok(Some(Torrent {
            hash: "abc".into(),
            title: opts.title.clone(),
            ..Default::default()
        }))
    }
}

pub fn torr(hash: &str, title: &str, poster: &str) -> Torrent {
    Torrent {
        hash: hash.into(),
        title: title.into(),
        poster: poster.into(),
        ..Default::default()
    }
}

pub fn result(title: &str) -> TorrentResult {
    TorrentResult {
        title: title.into(),
        magnet: format!("magnet:?xt=urn:btih:{title}"),
        ..Default::default()
    }
}
