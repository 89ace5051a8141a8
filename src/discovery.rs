//! Concurrent discovery of TorrServe instances.
//!
//! A [`DiscoveryCoordinator`] owns at most one active run. Each run is
//! identified by a generation number; starting a new run or cancelling
//! retires the current generation, and every event a run wants to publish is
//! checked against the active generation under the same lock that retires
//! it. Once [`DiscoveryCoordinator::find`] or [`DiscoveryCoordinator::cancel`]
//! returns, the retired run can no longer reach its sink.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use ::time::{format_description::well_known, OffsetDateTime};
use tokio::sync::Semaphore;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::DiscoveryConfig;
use crate::netdetect::SubnetScanner;
use crate::probe::{HostProbe, ProbeError};
use crate::sink::ResultSink;
use crate::types::{Candidate, DiscoveryState, ServerCandidate};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Running,
    Finished,
}

/// Identifies a started discovery run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunInfo {
    pub generation: u64,
    /// Number of candidates the run will probe.
    pub total: u64,
}

struct Run {
    generation: u64,
    sink: Arc<dyn ResultSink>,
    cancel: CancellationToken,
}

struct Slot {
    generation: u64,
    phase: Phase,
    active: Option<Arc<Run>>,
    task: Option<JoinHandle<DiscoveryState>>,
}

struct Shared {
    slot: Mutex<Slot>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Hand the sink to `f` if `run` is still the active generation.
    fn emit(&self, run: &Run, f: impl FnOnce(&dyn ResultSink)) -> bool {
        let slot = self.lock();
        match &slot.active {
            Some(active) if active.generation == run.generation => {
                f(run.sink.as_ref());
                true
            }
            _ => false,
        }
    }

    fn finish(&self, run: &Run) {
        let mut slot = self.lock();
        if slot.active.as_ref().map(|a| a.generation) == Some(run.generation) {
            slot.active = None;
            slot.phase = Phase::Finished;
            run.sink.on_finished();
        }
    }
}

/// Retire the active run: cancel its token and deliver its terminal event.
fn retire(slot: &mut Slot) {
    if let Some(run) = slot.active.take() {
        debug!(generation = run.generation, "retiring discovery run");
        run.cancel.cancel();
        run.sink.on_finished();
        slot.phase = Phase::Finished;
    }
}

/// Orchestrates concurrent probing of discovery candidates.
pub struct DiscoveryCoordinator<P> {
    probe: Arc<P>,
    config: DiscoveryConfig,
    shared: Arc<Shared>,
}

impl<P: HostProbe> DiscoveryCoordinator<P> {
    pub fn new(probe: P, config: DiscoveryConfig) -> Self {
        Self::with_shared_probe(Arc::new(probe), config)
    }

    pub fn with_shared_probe(probe: Arc<P>, config: DiscoveryConfig) -> Self {
        Self {
            probe,
            config,
            shared: Arc::new(Shared {
                slot: Mutex::new(Slot {
                    generation: 0,
                    phase: Phase::Idle,
                    active: None,
                    task: None,
                }),
            }),
        }
    }

    pub fn config(&self) -> &DiscoveryConfig {
        &self.config
    }

    /// Start a discovery run over the scanner's candidates.
    ///
    /// A run still in flight is cancelled first and receives its
    /// `on_finished` before this returns. Must be called from within a tokio
    /// runtime.
    pub fn find(&self, scanner: &SubnetScanner, sink: Arc<dyn ResultSink>) -> RunInfo {
        let candidates: Vec<Candidate> = scanner.candidates().collect();
        let total = candidates.len() as u64;

        let mut slot = self.shared.lock();
        retire(&mut slot);
        slot.generation += 1;
        let run = Arc::new(Run {
            generation: slot.generation,
            sink,
            cancel: CancellationToken::new(),
        });
        slot.active = Some(run.clone());
        slot.phase = Phase::Running;

        info!(generation = run.generation, candidates = candidates.len(), "discovery started");
        let task = tokio::spawn(run_discovery(
            self.probe.clone(),
            candidates,
            self.config.clone(),
            run,
            self.shared.clone(),
        ));
        slot.task = Some(task);
        RunInfo {
            generation: slot.generation,
            total,
        }
    }

    /// Cancel the active run, if any. Its sink gets `on_finished` once.
    pub fn cancel(&self) {
        let mut slot = self.shared.lock();
        retire(&mut slot);
    }

    pub fn phase(&self) -> Phase {
        self.shared.lock().phase
    }

    pub fn is_running(&self) -> bool {
        self.phase() == Phase::Running
    }

    /// Generation of the most recent `find()`, 0 before the first one.
    pub fn generation(&self) -> u64 {
        self.shared.lock().generation
    }

    /// Wait for the most recently started run task to exit and return its
    /// final state. Returns `None` when there is nothing to wait for.
    pub async fn wait(&self) -> Option<DiscoveryState> {
        let task = self.shared.lock().task.take()?;
        task.await.ok()
    }
}

impl<P> Drop for DiscoveryCoordinator<P> {
    fn drop(&mut self) {
        let mut slot = self.shared.lock();
        retire(&mut slot);
        if let Some(task) = slot.task.take() {
            task.abort();
        }
    }
}

type ProbeOutcome = Option<(Result<String, ProbeError>, Duration)>;

async fn run_discovery<P: HostProbe>(
    probe: Arc<P>,
    candidates: Vec<Candidate>,
    config: DiscoveryConfig,
    run: Arc<Run>,
    shared: Arc<Shared>,
) -> DiscoveryState {
    let total = candidates.len() as u64;
    let timeout = config.probe_timeout();
    let sem = Arc::new(Semaphore::new(config.concurrency.clamp(1, 1024)));
    let mut set = JoinSet::new();

    for candidate in candidates {
        let sem = sem.clone();
        let probe = probe.clone();
        let cancel = run.cancel.clone();
        set.spawn(async move {
            let outcome: ProbeOutcome = match sem.acquire_owned().await {
                Ok(_permit) if !cancel.is_cancelled() => {
                    let start = Instant::now();
                    let result = probe.probe(&candidate.address, timeout).await;
                    Some((result, start.elapsed()))
                }
                _ => None,
            };
            (candidate, outcome)
        });
    }

    let mut state = DiscoveryState {
        in_flight: true,
        total_count: total,
        ..Default::default()
    };
    let mut seen = HashSet::new();

    loop {
        let joined = tokio::select! {
            _ = run.cancel.cancelled() => break,
            next = set.join_next() => match next {
                Some(joined) => joined,
                None => break,
            },
        };
        state.scanned_count += 1;

        let (detail, found) = match joined {
            Ok((candidate, Some((result, latency)))) => evaluate(candidate, result, latency),
            Ok((candidate, None)) => (format!("{}: skipped", candidate.address), None),
            Err(e) => (format!("probe task failed: {e}"), None),
        };
        let found = found.filter(|c| seen.insert(c.address.clone()));
        if let Some(c) = &found {
            state.found.push(c.clone());
        }

        let status = format!("{}/{} hosts checked ({detail})", state.scanned_count, total);
        let delivered = shared.emit(&run, |sink| {
            if let Some(c) = &found {
                sink.on_server_found(c);
            }
            sink.on_progress(&status);
        });
        if !delivered {
            break;
        }
    }

    state.in_flight = false;
    if run.cancel.is_cancelled() {
        // In-flight probes finish on their own; nobody listens to them anymore.
        set.detach_all();
        debug!(generation = run.generation, scanned = state.scanned_count, "discovery run superseded");
        return state;
    }

    shared.finish(&run);
    info!(
        generation = run.generation,
        found = state.found.len(),
        scanned = state.scanned_count,
        "discovery finished"
    );
    state
}

/// Turn one probe result into a status detail and, when usable, a server entry.
///
/// A legacy server is only listed when it runs on this device.
fn evaluate(
    candidate: Candidate,
    result: Result<String, ProbeError>,
    latency: Duration,
) -> (String, Option<ServerCandidate>) {
    match result {
        Ok(version) => (
            format!("{}: {version}", candidate.address),
            Some(server_candidate(candidate, version, latency)),
        ),
        Err(ProbeError::ProtocolMismatch { version }) if candidate.address.is_local() => (
            format!("{}: legacy version {version}", candidate.address),
            Some(server_candidate(candidate, version, latency)),
        ),
        Err(e) => (format!("{}: {e}", candidate.address), None),
    }
}

fn server_candidate(candidate: Candidate, version: String, latency: Duration) -> ServerCandidate {
    let label = if version.is_empty() {
        candidate.source.label().to_string()
    } else {
        format!("{} · {version}", candidate.source.label())
    };
    ServerCandidate {
        address: candidate.address,
        label,
        version,
        source: candidate.source,
        latency_ms: latency.as_millis() as u64,
        timestamp: now_iso_like(),
    }
}

fn now_iso_like() -> String {
    OffsetDateTime::now_utc()
        .format(&well_known::Rfc3339)
        .unwrap_or_else(|_| String::from("1970-01-01T00:00:00Z"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hosts::HostAddr;
    use crate::types::CandidateSource;

    fn candidate(addr: &str, source: CandidateSource) -> Candidate {
        Candidate {
            address: HostAddr::parse(addr).unwrap(),
            source,
        }
    }

    #[test]
    fn label_includes_version() {
        let (detail, found) = evaluate(
            candidate("10.0.0.5", CandidateSource::Subnet),
            Ok("MatriX.135".into()),
            Duration::from_millis(12),
        );
        let found = found.unwrap();
        assert_eq!(found.label, "Network server · MatriX.135");
        assert_eq!(found.latency_ms, 12);
        assert_eq!(detail, "http://10.0.0.5:8090: MatriX.135");
    }

    #[test]
    fn legacy_remote_server_is_not_listed() {
        let (detail, found) = evaluate(
            candidate("10.0.0.5", CandidateSource::Saved),
            Err(ProbeError::ProtocolMismatch {
                version: "1.1.77".into(),
            }),
            Duration::ZERO,
        );
        assert!(found.is_none());
        assert!(detail.contains("unsupported server version"));
    }

    #[test]
    fn legacy_local_server_is_listed() {
        let (_, found) = evaluate(
            candidate("127.0.0.1", CandidateSource::Local),
            Err(ProbeError::ProtocolMismatch {
                version: "1.1.77".into(),
            }),
            Duration::ZERO,
        );
        assert_eq!(found.unwrap().label, "Local server · 1.1.77");
    }
}
