use serde::{Deserialize, Serialize};

use crate::hosts::HostAddr;

/// Where a discovery candidate address came from.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum CandidateSource {
    Local,
    Saved,
    Subnet,
}

impl CandidateSource {
    pub fn label(self) -> &'static str {
        match self {
            CandidateSource::Local => "Local server",
            CandidateSource::Saved => "Saved server",
            CandidateSource::Subnet => "Network server",
        }
    }
}

/// One address to probe, tagged with its origin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub address: HostAddr,
    pub source: CandidateSource,
}

/// One reachable server found during discovery.
///
/// Two candidates are equal when they point at the same address, whatever
/// label or version they were reported with.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ServerCandidate {
    pub address: HostAddr,
    pub label: String,
    pub version: String,
    pub source: CandidateSource,
    pub latency_ms: u64,
    pub timestamp: String,
}

impl PartialEq for ServerCandidate {
    fn eq(&self, other: &Self) -> bool {
        self.address == other.address
    }
}

impl Eq for ServerCandidate {}

/// Progress of a single discovery run.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct DiscoveryState {
    pub in_flight: bool,
    pub scanned_count: u64,
    pub total_count: u64,
    pub found: Vec<ServerCandidate>,
}

/// A torrent as reported by the server's `list` action.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct Torrent {
    pub hash: String,
    pub title: String,
    pub poster: String,
    pub data: String,
    pub category: String,
    pub timestamp: i64,
    pub name: String,
    pub stat: i32,
    pub stat_string: String,
    pub torrent_size: i64,
    pub download_speed: f64,
    pub upload_speed: f64,
    pub total_peers: i32,
    pub active_peers: i32,
}

impl Torrent {
    /// The fields a watcher compares to decide whether its cards are stale.
    pub fn snapshot(&self) -> (&str, &str, &str) {
        (&self.hash, &self.title, &self.poster)
    }

    pub fn magnet(&self) -> String {
        let mut link = format!("magnet:?xt=urn:btih:{}", self.hash);
        if !self.title.is_empty() {
            link.push_str("&dn=");
            link.push_str(&encode_component(&self.title));
        }
        link
    }
}

/// UI-facing summary of one active torrent.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Card {
    pub hash: String,
    pub title: String,
    pub poster: String,
    pub magnet: String,
}

impl From<&Torrent> for Card {
    fn from(t: &Torrent) -> Self {
        Self {
            hash: t.hash.clone(),
            title: t.title.clone(),
            poster: t.poster.clone(),
            magnet: t.magnet(),
        }
    }
}

/// One hit returned by the server's torrent search.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "PascalCase", default)]
pub struct TorrentResult {
    pub title: String,
    pub magnet: String,
    pub hash: String,
    pub size: String,
    pub peer: i64,
    pub seed: i64,
    pub categories: String,
    pub create_date: String,
}

/// Options for adding a torrent to the current server.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AddTorrentOptions {
    /// Hash of a torrent the server already knows. When set, the server's copy
    /// is returned instead of adding `link`.
    pub source: String,
    pub link: String,
    pub title: String,
    pub poster: String,
    pub save_path: String,
    pub auto_start: bool,
}

impl AddTorrentOptions {
    pub fn link(link: impl Into<String>) -> Self {
        Self {
            link: link.into(),
            auto_start: true,
            ..Default::default()
        }
    }
}

fn encode_component(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for b in s.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(b as char)
            }
            _ => out.push_str(&format!("%{b:02X}")),
        }
    }
    out
}
