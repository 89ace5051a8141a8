use tokio::sync::mpsc;

use crate::types::ServerCandidate;

/// Receives the events of a discovery run.
///
/// Calls may arrive on any thread. Within one run `on_finished` is the last
/// call. Implementations must return quickly and must not call back into the
/// coordinator that is notifying them.
pub trait ResultSink: Send + Sync {
    fn on_progress(&self, status: &str);
    fn on_server_found(&self, candidate: &ServerCandidate);
    fn on_finished(&self);
}

/// Discovery event forwarded by [`ChannelSink`].
#[derive(Debug, Clone, PartialEq)]
pub enum DiscoveryEvent {
    Progress(String),
    ServerFound(ServerCandidate),
    Finished,
}

/// Forwards events into an unbounded channel so a consumer task can process
/// them on its own schedule.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<DiscoveryEvent>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<DiscoveryEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl ResultSink for ChannelSink {
    fn on_progress(&self, status: &str) {
        let _ = self.tx.send(DiscoveryEvent::Progress(status.to_string()));
    }

    fn on_server_found(&self, candidate: &ServerCandidate) {
        let _ = self.tx.send(DiscoveryEvent::ServerFound(candidate.clone()));
    }

    fn on_finished(&self) {
        let _ = self.tx.send(DiscoveryEvent::Finished);
    }
}
