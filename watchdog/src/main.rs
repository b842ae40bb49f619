use atlasnet_codec::Encode;
use atlasnet_core::tables::{NETWORK_TELEMETRY, SERVER_REGISTRY};
use atlasnet_core::NetworkTelemetryRow;
use atlasnet_discovery::RedisBulletin;
use atlasnet_health::HealthWarden;
use atlasnet_ident::{NodeIdentity, Role};
use atlasnet_interlink::Interlink;
use atlasnet_spatial::{GridHeuristic, Heuristic};
use clap::Parser;
use slog::{error, info, o, warn};
use std::path::PathBuf;
use std::process;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use watchdog::{Reconciler, WatchdogConfig};

/// AtlasNet watchdog: publishes the spatial partition and releases a dead
/// shard's bound claim (spec §4.6, §4.13).
#[derive(Parser, Debug)]
#[command(name = "watchdog", version)]
struct Cli {
    #[arg(long)]
    listen_port: Option<u16>,
    #[arg(long)]
    discovery_endpoint: Option<String>,
    #[arg(long)]
    log_level: Option<String>,
    #[arg(long)]
    config: Option<PathBuf>,
}

fn main() {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => WatchdogConfig::load(path),
        None => WatchdogConfig::default(),
    };
    if let Some(port) = cli.listen_port {
        config.network.listen_port = port;
    }
    if let Some(endpoint) = cli.discovery_endpoint.clone() {
        config.network.discovery_endpoint = endpoint;
    }

    let log = watchdog::logging::init(&config.logging, cli.log_level.as_deref());
    let self_identity = NodeIdentity::singleton(Role::Watchdog);
    info!(log, "starting watchdog"; "identity" => %self_identity);

    let bulletin = match RedisBulletin::connect(&config.network.discovery_endpoint, log.new(o!("component" => "bulletin"))) {
        Ok(b) => Arc::new(b),
        Err(e) => {
            error!(log, "discovery bulletin unreachable"; "error" => %e);
            process::exit(1);
        }
    };

    let listen_addr = format!("0.0.0.0:{}", config.network.listen_port);
    let mut interlink = match Interlink::new(&listen_addr, self_identity, &log) {
        Ok(i) => i,
        Err(e) => {
            error!(log, "failed to bind listen port"; "error" => %e);
            process::exit(1);
        }
    };

    if let Err(e) = bulletin.hset(SERVER_REGISTRY, &self_identity.canonical(), listen_addr.as_bytes()) {
        error!(log, "failed to register in discovery"; "error" => %e);
        process::exit(1);
    }

    let heuristic = Heuristic::Grid(GridHeuristic::new(config.grid.to_heuristic_config()));
    let reconciler = Reconciler::new(heuristic, &log);

    match reconciler.reconcile(bulletin.as_ref()) {
        Ok(published) if !published.is_empty() => info!(log, "published the initial bound partition"; "count" => published.len()),
        Ok(_) => {}
        Err(e) => error!(log, "initial reconcile failed"; "error" => %e),
    }

    let fail_log = log.new(o!("component" => "health-failure"));
    let failed_peers: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let failed_sink = Arc::clone(&failed_peers);
    let _warden = HealthWarden::spawn(
        Arc::clone(&bulletin),
        self_identity,
        config.health.clone(),
        move |peer| {
            warn!(fail_log, "peer expired"; "peer" => peer);
            failed_sink.lock().expect("failed peer queue mutex poisoned").push(peer.to_string());
        },
        &log,
    );

    let mut last_reconcile = Instant::now() - config.timing.reconcile_interval();

    loop {
        let now = Instant::now();
        interlink.tick(now);

        for identity in interlink.pending_verification() {
            match bulletin.hexists(SERVER_REGISTRY, &identity.canonical()) {
                Ok(true) => interlink.confirm_peer(identity),
                Ok(false) => {}
                Err(e) => warn!(log, "registry check failed while verifying a peer"; "error" => %e),
            }
        }

        for peer in failed_peers.lock().expect("failed peer queue mutex poisoned").drain(..) {
            if let Ok(identity) = peer.parse::<NodeIdentity>() {
                interlink.reject_peer(identity);
            }
            match reconciler.release_failed_shard_bound(bulletin.as_ref(), &peer) {
                Ok(true) => info!(log, "reclaimed a dead shard's bound"; "peer" => %peer),
                Ok(false) => {}
                Err(e) => warn!(log, "failed to release a dead shard's bound"; "error" => %e, "peer" => %peer),
            }
        }

        if now.duration_since(last_reconcile) >= config.timing.reconcile_interval() {
            last_reconcile = now;
            if let Err(e) = reconciler.reconcile(bulletin.as_ref()) {
                warn!(log, "periodic reconcile failed"; "error" => %e);
            }
            match bulletin.server_time_now() {
                Ok(now_ms) => {
                    let row = NetworkTelemetryRow {
                        identity: self_identity,
                        listen_addr: listen_addr.clone(),
                        last_seen_ms: now_ms,
                    };
                    if let Err(e) = bulletin.hset(NETWORK_TELEMETRY, &self_identity.canonical(), &row.encode_to_vec()) {
                        warn!(log, "failed to publish network telemetry"; "error" => %e);
                    }
                }
                Err(e) => warn!(log, "failed to read bulletin clock for network telemetry"; "error" => %e),
            }
        }

        std::thread::sleep(std::time::Duration::from_millis(50));
    }
}
