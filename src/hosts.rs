use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::net::IpAddr;
use std::path::Path;
use thiserror::Error;

/// Port a TorrServe instance listens on unless told otherwise.
pub const DEFAULT_PORT: u16 = 8090;

/// Address of the server bundled with the device.
pub const LOCAL_HOST: &str = "http://127.0.0.1:8090";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum HostError {
    #[error("host address is empty")]
    Empty,
    #[error("unsupported scheme `{0}`, expected http or https")]
    UnsupportedScheme(String),
    #[error("host address has no host part")]
    MissingHost,
    #[error("invalid host address `{input}`: {reason}")]
    Invalid { input: String, reason: String },
}

/// A normalized server address of the form `scheme://host:port`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct HostAddr(String);

impl HostAddr {
    pub fn parse(input: &str) -> Result<Self, HostError> {
        normalize_host(input).map(HostAddr)
    }

    pub fn local() -> Self {
        HostAddr(LOCAL_HOST.to_string())
    }

    /// Address for an IP on the LAN, using the default port.
    pub fn from_ip(ip: IpAddr) -> Self {
        match ip {
            IpAddr::V4(v4) => HostAddr(format!("http://{v4}:{DEFAULT_PORT}")),
            IpAddr::V6(v6) => HostAddr(format!("http://[{v6}]:{DEFAULT_PORT}")),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Host part without scheme, port or brackets.
    pub fn hostname(&self) -> &str {
        let rest = self.0.split_once("://").map(|(_, r)| r).unwrap_or(&self.0);
        let authority = rest.split('/').next().unwrap_or(rest);
        let authority = authority.rsplit_once('@').map(|(_, a)| a).unwrap_or(authority);
        if let Some(stripped) = authority.strip_prefix('[') {
            return stripped.split(']').next().unwrap_or(stripped);
        }
        authority.split(':').next().unwrap_or(authority)
    }

    /// True when the address points back at this device.
    pub fn is_local(&self) -> bool {
        let host = self.hostname();
        if host.eq_ignore_ascii_case("localhost") {
            return true;
        }
        host.parse::<IpAddr>().map(|ip| ip.is_loopback()).unwrap_or(false)
    }

    /// Address without the scheme, as shown to users.
    pub fn display_name(&self) -> &str {
        self.0.strip_prefix("http://").unwrap_or(&self.0)
    }

    /// Absolute URL of an API endpoint on this host.
    pub fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.0, path.trim_start_matches('/'))
    }
}

impl fmt::Display for HostAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for HostAddr {
    type Error = HostError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        HostAddr::parse(&value)
    }
}

impl From<HostAddr> for String {
    fn from(value: HostAddr) -> Self {
        value.0
    }
}

/// Normalize user input into a `scheme://host:port` address.
///
/// - `http://` is prepended when no scheme is given.
/// - `:8090` is appended to plain `http` addresses without an explicit port.
///   `https` addresses without a port are left alone.
/// - Surrounding whitespace and trailing slashes are dropped.
pub fn normalize_host(input: &str) -> Result<String, HostError> {
    let trimmed = input.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        return Err(HostError::Empty);
    }

    let (scheme, rest) = match trimmed.split_once("://") {
        Some((s, r)) => {
            let s = s.to_ascii_lowercase();
            if s != "http" && s != "https" {
                return Err(HostError::UnsupportedScheme(s));
            }
            (s, r)
        }
        None => ("http".to_string(), trimmed),
    };

    let (authority, path) = match rest.find('/') {
        Some(idx) => rest.split_at(idx),
        None => (rest, ""),
    };
    // `host:` carries no port
    let authority = authority.strip_suffix(':').unwrap_or(authority);
    if authority.is_empty() {
        return Err(HostError::MissingHost);
    }

    let out = if scheme == "http" && !has_explicit_port(authority) {
        format!("{scheme}://{authority}:{DEFAULT_PORT}{path}")
    } else {
        format!("{scheme}://{authority}{path}")
    };

    let url = reqwest::Url::parse(&out).map_err(|e| HostError::Invalid {
        input: input.trim().to_string(),
        reason: e.to_string(),
    })?;
    if url.host_str().map(str::is_empty).unwrap_or(true) {
        return Err(HostError::MissingHost);
    }
    Ok(out)
}

fn has_explicit_port(authority: &str) -> bool {
    let authority = authority.rsplit_once('@').map(|(_, a)| a).unwrap_or(authority);
    let after_host = if authority.starts_with('[') {
        match authority.find(']') {
            Some(end) => &authority[end + 1..],
            None => return false,
        }
    } else {
        authority
    };
    after_host.contains(':')
}

/// Parse host-list content into normalized, deduplicated addresses.
///
/// One address per line; everything after `#` is ignored, blank lines are
/// skipped. The first occurrence of an address wins.
pub fn parse_hosts_str(s: &str) -> Result<Vec<HostAddr>> {
    let mut out = Vec::new();
    let mut seen = HashSet::new();

    for (idx, raw_line) in s.lines().enumerate() {
        let line_no = idx + 1;
        let line = raw_line.split('#').next().map(str::trim).unwrap_or("");
        if line.is_empty() {
            continue;
        }
        let host = HostAddr::parse(line)
            .with_context(|| format!("line {line_no}: invalid host: {line}"))?;
        if seen.insert(host.clone()) {
            out.push(host);
        }
    }

    Ok(out)
}

/// Load a host list from a file. Errors if the file cannot be read or parsed.
pub fn load_hosts_from_path(path: impl AsRef<Path>) -> Result<Vec<HostAddr>> {
    let content = fs::read_to_string(path.as_ref())
        .with_context(|| format!("failed to read hosts file: {}", path.as_ref().display()))?;
    parse_hosts_str(&content)
}
