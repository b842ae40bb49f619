use atlasnet_core::tables::SERVER_REGISTRY;
use atlasnet_discovery::RedisBulletin;
use atlasnet_health::HealthWarden;
use atlasnet_ident::{NodeIdentity, Role};
use atlasnet_interlink::Interlink;
use cartograph::{take_snapshot, CartographConfig};
use clap::Parser;
use slog::{error, info, o, warn};
use std::path::PathBuf;
use std::process;
use std::sync::{Arc, Mutex};
use std::time::Instant;

/// AtlasNet cartograph: a read-only telemetry viewer over the discovery
/// bulletin (spec §4's Cartograph role).
#[derive(Parser, Debug)]
#[command(name = "cartograph", version)]
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
        Some(path) => CartographConfig::load(path),
        None => CartographConfig::default(),
    };
    if let Some(port) = cli.listen_port {
        config.network.listen_port = port;
    }
    if let Some(endpoint) = cli.discovery_endpoint.clone() {
        config.network.discovery_endpoint = endpoint;
    }

    let log = cartograph::logging::init(&config.logging, cli.log_level.as_deref());
    let self_identity = NodeIdentity::singleton(Role::Cartograph);
    info!(log, "starting cartograph"; "identity" => %self_identity);

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

    let mut last_poll = Instant::now() - config.timing.poll_interval();

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
        }

        if now.duration_since(last_poll) >= config.timing.poll_interval() {
            last_poll = now;
            match take_snapshot(bulletin.as_ref()) {
                Ok(snapshot) => {
                    info!(log, "cluster snapshot"; "nodes" => snapshot.nodes.len(), "entities" => snapshot.entities.len());
                    for node in &snapshot.nodes {
                        info!(log, "node";
                            "identity" => &node.identity,
                            "registered_addr" => node.registered_addr.as_deref().unwrap_or("?"),
                            "alive" => node.ping_expiry_ms.is_some(),
                        );
                    }
                }
                Err(e) => warn!(log, "failed to read cluster snapshot"; "error" => %e),
            }
        }

        std::thread::sleep(std::time::Duration::from_millis(50));
    }
}
