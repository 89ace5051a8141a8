use anyhow::{Context, Result};
use if_addrs::{get_if_addrs, IfAddr};
use ipnet::{IpNet, Ipv4Net};
use std::collections::HashSet;
use std::net::{IpAddr, Ipv4Addr};
use tracing::{debug, warn};

use crate::config::DiscoveryConfig;
use crate::hosts::HostAddr;
use crate::types::{Candidate, CandidateSource};

/// An IPv4 address assigned to a non-loopback interface, with its prefix length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalV4 {
    pub ip: Ipv4Addr,
    pub prefix_len: u8,
}

/// List the non-loopback IPv4 addresses of this machine.
pub fn local_ipv4_addrs() -> Result<Vec<LocalV4>> {
    let mut out = Vec::new();
    for iface in get_if_addrs().context("failed to enumerate network interfaces")? {
        if iface.is_loopback() {
            continue;
        }
        if let IfAddr::V4(v4) = iface.addr {
            if v4.ip.is_loopback() {
                continue;
            }
            let prefix_len = ipnet::ipv4_mask_to_prefix(v4.netmask).unwrap_or(24);
            out.push(LocalV4 { ip: v4.ip, prefix_len });
        }
    }
    Ok(out)
}

/// Pick the networks to sweep for the given interface addresses.
///
/// With `whole_subnet == false` every address maps to its /24. Otherwise the
/// interface's own subnet is used, widened to /24 when smaller and shrunk
/// around the interface address until it holds at most `max_hosts` hosts.
pub fn sweep_networks(locals: &[LocalV4], whole_subnet: bool, max_hosts: usize) -> Vec<Ipv4Net> {
    let mut set = HashSet::<Ipv4Net>::new();
    for local in locals {
        let net = if whole_subnet && local.prefix_len < 24 {
            let mut prefix = local.prefix_len;
            while prefix < 24 && host_count(prefix) > max_hosts as u64 {
                prefix += 1;
            }
            match Ipv4Net::new(local.ip, prefix) {
                Ok(n) => n.trunc(),
                Err(_) => ipv4_to_default_cidr(local.ip),
            }
        } else {
            ipv4_to_default_cidr(local.ip)
        };
        set.insert(net);
    }
    let mut nets: Vec<Ipv4Net> = set.into_iter().collect();
    // Sort for stable output
    nets.sort_by_key(|n| (u32::from(n.network()), n.prefix_len()));
    nets
}

fn host_count(prefix: u8) -> u64 {
    (1u64 << (32 - u32::from(prefix))).saturating_sub(2)
}

/// Expand a CIDR into individual IP addresses suitable for host scanning.
///
/// For IPv4, excludes the network and broadcast addresses.
/// IPv6 is not scanned and returns an empty list.
pub fn expand_cidr_to_ips(cidr: IpNet) -> Vec<IpAddr> {
    match cidr {
        IpNet::V4(n4) => ipv4net_hosts(n4).map(IpAddr::V4).collect(),
        IpNet::V6(_) => Vec::new(),
    }
}

/// Helper: convert an IPv4 address into its default /24 network.
pub fn ipv4_to_default_cidr(ip: Ipv4Addr) -> Ipv4Net {
    let o = ip.octets();
    Ipv4Net::new(Ipv4Addr::new(o[0], o[1], o[2], 0), 24).expect("/24 is always valid")
}

fn ipv4net_hosts(net: Ipv4Net) -> impl Iterator<Item = Ipv4Addr> {
    // Inclusive numeric range minus network and broadcast.
    let start = u32::from(net.network());
    let end = u32::from(net.broadcast());
    let range = if end <= start.saturating_add(1) {
        0..0
    } else {
        start + 1..end
    };
    range.map(Ipv4Addr::from)
}

/// Produces the addresses a discovery run should probe.
///
/// Order is: the local server, saved hosts, then every host of each subnet.
/// An address is produced at most once.
#[derive(Debug, Clone, Default)]
pub struct SubnetScanner {
    saved: Vec<HostAddr>,
    networks: Vec<Ipv4Net>,
    max_hosts_per_subnet: usize,
}

impl SubnetScanner {
    pub fn new(saved: Vec<HostAddr>, networks: Vec<Ipv4Net>, max_hosts_per_subnet: usize) -> Self {
        Self {
            saved,
            networks,
            max_hosts_per_subnet,
        }
    }

    /// Resolve the networks to sweep from `config`, falling back to interface detection.
    ///
    /// Explicit CIDRs that fail to parse are an error. A failure to enumerate
    /// interfaces is not: the scanner then covers only local and saved hosts.
    pub fn detect(config: &DiscoveryConfig, saved: Vec<HostAddr>) -> Result<Self> {
        let networks = if !config.cidrs.is_empty() {
            parse_cidrs(&config.cidrs)?
        } else {
            match local_ipv4_addrs() {
                Ok(locals) => sweep_networks(
                    &locals,
                    config.scan_whole_subnet,
                    config.max_hosts_per_subnet,
                ),
                Err(e) => {
                    warn!(error = %e, "interface detection failed; scanning local and saved hosts only");
                    Vec::new()
                }
            }
        };
        debug!(?networks, saved = saved.len(), "subnet scanner ready");
        Ok(Self::new(saved, networks, config.max_hosts_per_subnet))
    }

    pub fn networks(&self) -> &[Ipv4Net] {
        &self.networks
    }

    pub fn candidates(&self) -> impl Iterator<Item = Candidate> + '_ {
        let local = std::iter::once(Candidate {
            address: HostAddr::local(),
            source: CandidateSource::Local,
        });
        let saved = self.saved.iter().map(|h| Candidate {
            address: h.clone(),
            source: CandidateSource::Saved,
        });
        let max = self.max_hosts_per_subnet;
        let subnet = self.networks.iter().flat_map(move |net| {
            ipv4net_hosts(*net).take(max).map(|ip| Candidate {
                address: HostAddr::from_ip(IpAddr::V4(ip)),
                source: CandidateSource::Subnet,
            })
        });

        let mut seen = HashSet::new();
        local
            .chain(saved)
            .chain(subnet)
            .filter(move |c| seen.insert(c.address.clone()))
    }
}

/// Parse CIDR strings into truncated IPv4 networks.
pub fn parse_cidrs(raw: &[String]) -> Result<Vec<Ipv4Net>> {
    raw.iter()
        .map(|s| {
            s.trim()
                .parse::<Ipv4Net>()
                .map(|n| n.trunc())
                .with_context(|| format!("invalid CIDR '{s}'"))
        })
        .collect()
}
