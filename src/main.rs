use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use ipnet::IpNet;
use tracing_subscriber::EnvFilter;

use torrserve_finder::api::{ApiClient, TorrServerApi};
use torrserve_finder::chooser::{self, ChooserAction};
use torrserve_finder::config::AppConfig;
use torrserve_finder::discovery::DiscoveryCoordinator;
use torrserve_finder::hosts::{self, HostAddr};
use torrserve_finder::netdetect::{self, SubnetScanner};
use torrserve_finder::probe::HttpProbe;
use torrserve_finder::search::{SearchOutcome, SearchSession};
use torrserve_finder::select;
use torrserve_finder::server::{self, AppState};
use torrserve_finder::settings::{self, JsonFileSettings, SettingsStore};
use torrserve_finder::sink::{ChannelSink, DiscoveryEvent};
use torrserve_finder::types::{AddTorrentOptions, Card, ServerCandidate};
use torrserve_finder::watcher::LiveServerWatcher;

/// torrserve-finder: find, select and watch TorrServe instances on the local network.
#[derive(Debug, Clone, Parser)]
#[command(name = "torrserve-finder", version, long_about = None)]
struct Cli {
    /// JSON config file with `discovery` and `watcher` sections.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Settings file holding the current and saved hosts.
    #[arg(long, global = true, default_value = "torrserve-settings.json")]
    settings: PathBuf,

    /// Probe timeout in milliseconds.
    #[arg(long = "timeout-ms", global = true)]
    timeout_ms: Option<u64>,

    /// Max concurrent probes.
    #[arg(long, global = true)]
    concurrency: Option<usize>,

    /// Sweep each interface's real subnet instead of its /24.
    #[arg(long = "whole-subnet", global = true, default_value_t = false)]
    whole_subnet: bool,

    /// CIDR to sweep instead of the detected local networks (repeatable).
    #[arg(long = "cidr", global = true)]
    cidrs: Vec<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Look for servers on this device, saved hosts and the local network.
    Find {
        /// Extra hosts to probe, one per line.
        #[arg(long = "hosts-file")]
        hosts_file: Option<PathBuf>,

        /// Write found servers as pretty JSON to this path.
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Make HOST the current server.
    Select { host: String },
    /// Print the cards of the current server's torrents whenever they change.
    Watch,
    /// Search torrents through the current server.
    Search { query: String },
    /// Add a torrent to the current server.
    Add {
        link: String,
        #[arg(long, default_value = "")]
        title: String,
        #[arg(long, default_value = "")]
        poster: String,
        #[arg(long = "save-path", default_value = "")]
        save_path: String,
        /// Hash of a torrent the server already has.
        #[arg(long, default_value = "")]
        source: String,
        /// Add without starting.
        #[arg(long = "no-start", default_value_t = false)]
        no_start: bool,
    },
    /// Resolve what to do with an opened torrent.
    Choose {
        /// Ignore the remembered action.
        #[arg(long, default_value_t = false)]
        force: bool,
        /// Action to take: play, add-and-play or add.
        #[arg(long)]
        action: Option<ChooserAction>,
        /// Remember the given action.
        #[arg(long, default_value_t = false)]
        remember: bool,
    },
    /// Start the embedded web UI.
    Serve {
        #[arg(long, default_value = "127.0.0.1:8080")]
        bind: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli)?;
    let settings: Arc<dyn SettingsStore> = Arc::new(JsonFileSettings::open(&cli.settings)?);
    let client = reqwest::Client::builder()
        .build()
        .context("failed to build HTTP client")?;
    let api = TorrServerApi::new(client.clone(), settings.clone(), Duration::from_secs(10));

    match cli.command.clone() {
        Command::Find { hosts_file, output } => {
            let mut saved = settings::saved_hosts(settings.as_ref());
            if let Some(path) = hosts_file.as_deref() {
                saved.extend(hosts::load_hosts_from_path(path)?);
            }
            let scanner = SubnetScanner::detect(&config.discovery, saved)?;
            print_configuration(&cli, &config, &scanner, settings.as_ref());

            let coordinator = DiscoveryCoordinator::new(HttpProbe::new(client), config.discovery.clone());
            let found = run_find(&coordinator, &scanner).await;
            print_results_table(&found);
            if let Some(path) = output.as_deref() {
                write_results_json(path, &found)?;
                println!("Wrote JSON results to {}", path.display());
            }
        }
        Command::Select { host } => {
            let sel = select::commit_host(&host, settings.as_ref(), &api).await?;
            if sel.legacy {
                println!("Warning: {} runs legacy version {}", sel.host, sel.version);
            }
            println!("Current server: {} ({})", sel.host.display_name(), sel.version);
        }
        Command::Watch => {
            println!("Watching {}", settings.host());
            let watcher = LiveServerWatcher::new(api, Arc::new(print_cards), config.watcher.clone());
            watcher.start();
            let _ = tokio::signal::ctrl_c().await;
            watcher.shutdown().await;
        }
        Command::Search { query } => {
            let (session, mut rx) = SearchSession::new(Arc::new(api));
            if !session.submit_final(&query) {
                bail!("search query is empty");
            }
            match rx.recv().await {
                Some(SearchOutcome::Results { results, .. }) => {
                    for r in results {
                        println!("{:<60}  {:>10}  S:{:<5} {}", r.title, r.size, r.seed, r.magnet);
                    }
                }
                Some(SearchOutcome::NoResults { query }) => println!("No torrents found for `{query}`"),
                Some(SearchOutcome::Failed { error, .. }) => bail!("search failed: {error}"),
                None => bail!("search was cancelled"),
            }
        }
        Command::Add {
            link,
            title,
            poster,
            save_path,
            source,
            no_start,
        } => {
            let opts = AddTorrentOptions {
                source,
                link,
                title,
                poster,
                save_path,
                auto_start: !no_start,
            };
            match api.add_torrent(&opts).await? {
                Some(t) => println!("Added: {} ({})", t.title, t.hash),
                None => bail!("server did not return the added torrent"),
            }
        }
        Command::Choose {
            force,
            action,
            remember,
        } => match (chooser::resolve(settings.as_ref(), force), action) {
            (Some(saved), _) => println!("{saved}"),
            (None, Some(action)) => {
                chooser::record(settings.as_ref(), action, remember)?;
                println!("{action}");
            }
            (None, None) => {
                let names: Vec<String> = ChooserAction::ALL.iter().map(ToString::to_string).collect();
                bail!("no remembered action; pass --action ({})", names.join(", "));
            }
        },
        Command::Serve { bind } => {
            let coordinator = Arc::new(DiscoveryCoordinator::new(
                HttpProbe::new(client),
                config.discovery.clone(),
            ));
            let state = AppState::new(coordinator, Arc::new(api), settings.clone());
            println!("UI server starting at http://{bind} (Ctrl+C to stop)");
            tokio::select! {
                res = server::spawn_server(&bind, state) => res?,
                _ = tokio::signal::ctrl_c() => {}
            }
        }
    }

    Ok(())
}

fn load_config(cli: &Cli) -> Result<AppConfig> {
    let mut config = match cli.config.as_deref() {
        Some(path) => AppConfig::load(path)?,
        None => AppConfig::default(),
    };
    if let Some(ms) = cli.timeout_ms {
        config.discovery.probe_timeout_ms = ms;
    }
    if let Some(n) = cli.concurrency {
        config.discovery.concurrency = n;
    }
    if cli.whole_subnet {
        config.discovery.scan_whole_subnet = true;
    }
    if !cli.cidrs.is_empty() {
        config.discovery.cidrs = cli.cidrs.clone();
    }
    Ok(config)
}

/// Drive one discovery run to completion, printing progress to stderr.
/// Ctrl-C cancels the run and returns what was found so far.
async fn run_find(
    coordinator: &DiscoveryCoordinator<HttpProbe>,
    scanner: &SubnetScanner,
) -> Vec<ServerCandidate> {
    let (sink, mut rx) = ChannelSink::new();
    coordinator.find(scanner, Arc::new(sink));

    let mut found = Vec::new();
    loop {
        tokio::select! {
            event = rx.recv() => match event {
                Some(DiscoveryEvent::Progress(status)) => eprint!("\r\x1b[2K{status}"),
                Some(DiscoveryEvent::ServerFound(c)) => found.push(c),
                Some(DiscoveryEvent::Finished) | None => break,
            },
            _ = tokio::signal::ctrl_c() => coordinator.cancel(),
        }
    }
    eprintln!();
    found
}

fn print_configuration(cli: &Cli, config: &AppConfig, scanner: &SubnetScanner, settings: &dyn SettingsStore) {
    println!("torrserve-finder configuration:");
    println!("  settings     : {}", cli.settings.display());
    println!("  concurrency  : {}", config.discovery.concurrency);
    println!("  timeout_ms   : {}", config.discovery.probe_timeout_ms);
    println!("  whole_subnet : {}", config.discovery.scan_whole_subnet);
    match netdetect::local_ipv4_addrs() {
        Ok(locals) => {
            let ips: Vec<String> = locals.iter().map(|l| l.ip.to_string()).collect();
            println!("  current IP   : {}", ips.join(", "));
        }
        Err(e) => eprintln!("Warning: failed to detect local addresses: {e}"),
    }
    for net in scanner.networks() {
        let hosts = netdetect::expand_cidr_to_ips(IpNet::V4(*net)).len();
        println!("  - {net} ({} hosts)", hosts.min(config.discovery.max_hosts_per_subnet));
    }
    if let Ok(host) = HostAddr::parse(&settings.host()) {
        println!("  connected to : {}", host.display_name());
    }
}

fn print_cards(cards: &[Card]) {
    println!("\n{} torrent(s):", cards.len());
    for c in cards {
        println!("  {:<40}  {}", c.hash, c.title);
    }
}

fn print_results_table(found: &[ServerCandidate]) {
    let mut addr_w = "address".len();
    let mut label_w = "label".len();
    for c in found {
        addr_w = addr_w.max(c.address.as_str().len());
        label_w = label_w.max(c.label.chars().count().min(50));
    }
    let lat_w = "latency_ms".len();

    println!("\nServers found: {}", found.len());
    println!(
        "{:<addr_w$}  {:<label_w$}  {:>lat_w$}",
        "address",
        "label",
        "latency_ms",
        addr_w = addr_w,
        label_w = label_w,
        lat_w = lat_w
    );
    println!(
        "{:-<addr_w$}  {:-<label_w$}  {:-<lat_w$}",
        "",
        "",
        "",
        addr_w = addr_w,
        label_w = label_w,
        lat_w = lat_w
    );
    for c in found {
        let label: String = c.label.chars().take(50).collect();
        println!(
            "{:<addr_w$}  {:<label_w$}  {:>lat_w$}",
            c.address.as_str(),
            label,
            c.latency_ms,
            addr_w = addr_w,
            label_w = label_w,
            lat_w = lat_w
        );
    }
}

fn write_results_json(path: &Path, found: &[ServerCandidate]) -> Result<()> {
    let file = File::create(path).with_context(|| format!("failed to create {}", path.display()))?;
    serde_json::to_writer_pretty(file, found)?;
    Ok(())
}
