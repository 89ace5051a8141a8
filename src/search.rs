use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::api::ApiClient;
use crate::types::TorrentResult;

/// Shortest query worth sending while the user is still typing.
pub const MIN_QUERY_LEN: usize = 3;

#[derive(Debug, Clone, PartialEq)]
pub enum SearchOutcome {
    Results {
        query: String,
        results: Vec<TorrentResult>,
    },
    /// Only reported for submitted queries; an empty incremental result is silent.
    NoResults { query: String },
    Failed { query: String, error: String },
}

/// Runs at most one torrent search at a time; a newer query aborts the older one.
///
/// Every launch or cancel bumps the session generation. A job only delivers
/// its outcome while its generation is still the latest, checked under the
/// same lock that bumps it, so an aborted job that already got its answer
/// stays silent.
pub struct SearchSession<C> {
    client: Arc<C>,
    tx: mpsc::UnboundedSender<SearchOutcome>,
    latest: Arc<Mutex<u64>>,
    job: Mutex<Option<JoinHandle<()>>>,
}

/// Send `outcome` if `generation` is still the latest one.
fn deliver(
    latest: &Mutex<u64>,
    generation: u64,
    tx: &mpsc::UnboundedSender<SearchOutcome>,
    outcome: SearchOutcome,
) -> bool {
    let latest = latest.lock().unwrap_or_else(PoisonError::into_inner);
    if *latest != generation {
        debug!(generation, latest = *latest, "dropping superseded search outcome");
        return false;
    }
    tx.send(outcome).is_ok()
}

impl<C: ApiClient> SearchSession<C> {
    pub fn new(client: Arc<C>) -> (Self, mpsc::UnboundedReceiver<SearchOutcome>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let session = Self {
            client,
            tx,
            latest: Arc::new(Mutex::new(0)),
            job: Mutex::new(None),
        };
        (session, rx)
    }

    /// Search as the user types. Queries shorter than [`MIN_QUERY_LEN`] are ignored.
    pub fn submit(&self, query: &str) -> bool {
        let query = query.trim();
        if query.chars().count() < MIN_QUERY_LEN {
            return false;
        }
        self.launch(query, false);
        true
    }

    /// Search for an explicitly submitted query of any non-zero length.
    pub fn submit_final(&self, query: &str) -> bool {
        let query = query.trim();
        if query.is_empty() {
            return false;
        }
        self.launch(query, true);
        true
    }

    pub fn cancel(&self) {
        let mut job = self.job.lock().unwrap_or_else(PoisonError::into_inner);
        retire(&mut job, &self.latest);
    }

    fn launch(&self, query: &str, submitted: bool) {
        let client = self.client.clone();
        let tx = self.tx.clone();
        let latest = self.latest.clone();
        let query = query.to_string();

        let mut job = self.job.lock().unwrap_or_else(PoisonError::into_inner);
        let generation = retire(&mut job, &self.latest);
        *job = Some(tokio::spawn(async move {
            debug!(%query, submitted, "searching torrents");
            let outcome = match client.search_torrents(&query).await {
                Ok(results) if !results.is_empty() => Some(SearchOutcome::Results { query, results }),
                Ok(_) if submitted => Some(SearchOutcome::NoResults { query }),
                Ok(_) => None,
                Err(e) => Some(SearchOutcome::Failed {
                    query,
                    error: e.to_string(),
                }),
            };
            if let Some(outcome) = outcome {
                deliver(&latest, generation, &tx, outcome);
            }
        }));
    }
}

/// Abort the current job and bump the generation; returns the new generation.
fn retire(job: &mut Option<JoinHandle<()>>, latest: &Mutex<u64>) -> u64 {
    if let Some(prev) = job.take() {
        prev.abort();
    }
    let mut latest = latest.lock().unwrap_or_else(PoisonError::into_inner);
    *latest += 1;
    *latest
}

impl<C> Drop for SearchSession<C> {
    fn drop(&mut self) {
        let mut job = self.job.lock().unwrap_or_else(PoisonError::into_inner);
        retire(&mut job, &self.latest);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(query: &str) -> SearchOutcome {
        SearchOutcome::NoResults { query: query.into() }
    }

    #[test]
    fn stale_generation_is_not_delivered() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let latest = Mutex::new(0);
        let mut job = None;

        let first = retire(&mut job, &latest);
        let second = retire(&mut job, &latest);
        assert_eq!(second, first + 1);

        assert!(!deliver(&latest, first, &tx, outcome("old")));
        assert!(deliver(&latest, second, &tx, outcome("new")));
        assert_eq!(rx.try_recv().unwrap(), outcome("new"));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn cancel_silences_the_current_generation() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let latest = Mutex::new(0);
        let mut job = None;

        let running = retire(&mut job, &latest);
        retire(&mut job, &latest);
        assert!(!deliver(&latest, running, &tx, outcome("late")));
        assert!(rx.try_recv().is_err());
    }
}
