//! Keeps the cards of the running torrents fresh.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{debug, info};

use crate::api::ApiClient;
use crate::config::WatcherConfig;
use crate::types::{Card, Torrent};

/// Receives a full set of cards every time the torrent list changes.
pub trait CardPublisher: Send + Sync + 'static {
    fn publish(&self, cards: &[Card]);
}

impl<F> CardPublisher for F
where
    F: Fn(&[Card]) + Send + Sync + 'static,
{
    fn publish(&self, cards: &[Card]) {
        self(cards)
    }
}

/// Positional comparison on `(hash, title, poster)`.
///
/// A reordered but otherwise identical list counts as a change.
pub fn equal_torrs(a: &[Torrent], b: &[Torrent]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.snapshot() == y.snapshot())
}

struct WatcherState<C> {
    client: C,
    publisher: Arc<dyn CardPublisher>,
    config: WatcherConfig,
    running: AtomicBool,
    generation: AtomicU64,
}

impl<C> WatcherState<C> {
    fn should_run(&self, generation: u64) -> bool {
        self.running.load(Ordering::SeqCst) && self.generation.load(Ordering::SeqCst) == generation
    }

    fn publish(&self, torrents: &[Torrent]) {
        let cards: Vec<Card> = torrents.iter().map(Card::from).collect();
        debug!(cards = cards.len(), "publishing cards");
        self.publisher.publish(&cards);
    }
}

/// Background poller of the current server's torrent list.
///
/// `start` while polling is a no-op. `stop` takes effect once the loop's
/// current sleep ends, so the stop latency is at most one sleep interval.
pub struct LiveServerWatcher<C> {
    state: Arc<WatcherState<C>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl<C: ApiClient> LiveServerWatcher<C> {
    pub fn new(client: C, publisher: Arc<dyn CardPublisher>, config: WatcherConfig) -> Self {
        Self {
            state: Arc::new(WatcherState {
                client,
                publisher,
                config,
                running: AtomicBool::new(false),
                generation: AtomicU64::new(0),
            }),
            task: Mutex::new(None),
        }
    }

    /// Start polling. Returns `false` if the watcher was already running.
    pub fn start(&self) -> bool {
        if self.state.running.swap(true, Ordering::SeqCst) {
            return false;
        }
        let generation = self.state.generation.fetch_add(1, Ordering::SeqCst) + 1;
        info!(generation, "torrent watcher started");
        let handle = tokio::spawn(poll_loop(self.state.clone(), generation));
        // A previous loop that has not noticed its stop yet exits on its own.
        *self.task.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
        true
    }

    pub fn stop(&self) {
        if self.state.running.swap(false, Ordering::SeqCst) {
            info!("torrent watcher stopping");
        }
    }

    pub fn is_running(&self) -> bool {
        self.state.running.load(Ordering::SeqCst)
    }

    /// Stop and tear down the polling task without waiting out its sleep.
    pub async fn shutdown(&self) {
        self.stop();
        let handle = self.task.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(handle) = handle {
            handle.abort();
            let _ = handle.await;
        }
    }
}

impl<C> Drop for LiveServerWatcher<C> {
    fn drop(&mut self) {
        self.state.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.task.lock().unwrap_or_else(PoisonError::into_inner).take() {
            handle.abort();
        }
    }
}

async fn fetch<C: ApiClient>(client: &C) -> Vec<Torrent> {
    match client.list_torrents().await {
        Ok(list) => list,
        Err(e) => {
            debug!(error = %e, "torrent list fetch failed; treating as empty");
            Vec::new()
        }
    }
}

async fn poll_loop<C: ApiClient>(state: Arc<WatcherState<C>>, generation: u64) {
    time::sleep(state.config.grace()).await;
    if !state.should_run(generation) {
        return;
    }

    let mut last = fetch(&state.client).await;
    state.publish(&last);

    while state.should_run(generation) {
        let torrents = fetch(&state.client).await;
        if !equal_torrs(&last, &torrents) {
            last = torrents;
            state.publish(&last);
            time::sleep(state.config.fast()).await;
        } else {
            time::sleep(state.config.slow()).await;
        }
    }
    debug!(generation, "torrent watcher loop exited");
}
