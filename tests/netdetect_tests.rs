use ipnet::Ipv4Net;
use std::net::Ipv4Addr;
use torrserve_finder::config::DiscoveryConfig;
use torrserve_finder::hosts::HostAddr;
use torrserve_finder::netdetect::{expand_cidr_to_ips, ipv4_to_default_cidr, parse_cidrs, SubnetScanner};
use torrserve_finder::types::CandidateSource;

#[test]
fn default_cidr_is_24() {
    let cidr = ipv4_to_default_cidr(Ipv4Addr::new(192, 168, 42, 99));
    assert_eq!(cidr.to_string(), "192.168.42.0/24");
}

#[test]
fn expand_excludes_network_and_broadcast() {
    let net = Ipv4Net::new(Ipv4Addr::new(10, 0, 0, 0), 30).unwrap();
    let ips = expand_cidr_to_ips(ipnet::IpNet::V4(net));
    let list: Vec<_> = ips
        .into_iter()
        .map(|ip| match ip {
            std::net::IpAddr::V4(v) => v,
            _ => unreachable!(),
        })
        .collect();
    assert_eq!(
        list,
        vec![Ipv4Addr::new(10, 0, 0, 1), Ipv4Addr::new(10, 0, 0, 2)]
    );
}

#[test]
fn candidates_are_local_then_saved_then_subnet() {
    let saved = vec![
        HostAddr::parse("nas.local").unwrap(),
        HostAddr::parse("10.0.0.2").unwrap(),
    ];
    let net: Ipv4Net = "10.0.0.0/29".parse().unwrap();
    let scanner = SubnetScanner::new(saved, vec![net], 1024);

    let list: Vec<_> = scanner
        .candidates()
        .map(|c| (c.address.as_str().to_string(), c.source))
        .collect();

    assert_eq!(list[0], ("http://127.0.0.1:8090".to_string(), CandidateSource::Local));
    assert_eq!(list[1], ("http://nas.local:8090".to_string(), CandidateSource::Saved));
    assert_eq!(list[2], ("http://10.0.0.2:8090".to_string(), CandidateSource::Saved));
    // .2 already came from the saved list
    let subnet: Vec<_> = list[3..].iter().map(|(a, _)| a.as_str()).collect();
    assert_eq!(
        subnet,
        vec![
            "http://10.0.0.1:8090",
            "http://10.0.0.3:8090",
            "http://10.0.0.4:8090",
            "http://10.0.0.5:8090",
            "http://10.0.0.6:8090",
        ]
    );
}

#[test]
fn saved_local_server_is_not_probed_twice() {
    let saved = vec![HostAddr::parse("127.0.0.1").unwrap()];
    let scanner = SubnetScanner::new(saved, Vec::new(), 1024);
    let list: Vec<_> = scanner.candidates().collect();
    assert_eq!(list.len(), 1);
    assert_eq!(list[0].source, CandidateSource::Local);
}

#[test]
fn hosts_per_subnet_are_capped() {
    let net: Ipv4Net = "10.0.0.0/24".parse().unwrap();
    let scanner = SubnetScanner::new(Vec::new(), vec![net], 16);
    assert_eq!(scanner.candidates().count(), 1 + 16);
}

#[test]
fn explicit_cidrs_skip_interface_detection() {
    let config = DiscoveryConfig {
        cidrs: vec!["192.168.5.77/30".into()],
        ..Default::default()
    };
    let scanner = SubnetScanner::detect(&config, Vec::new()).unwrap();
    assert_eq!(scanner.networks().len(), 1);
    assert_eq!(scanner.networks()[0].to_string(), "192.168.5.76/30");
}

#[test]
fn bad_cidr_is_an_error() {
    assert!(parse_cidrs(&["10.0.0.0/40".to_string()]).is_err());
    assert!(parse_cidrs(&["not-a-net".to_string()]).is_err());
}
