use atlasnet_core::tables::{CLIENT_PROXY_ASSIGNMENT, SERVER_REGISTRY};
use atlasnet_core::{ClientIntentCommandPacket, ServerStateCommandPacket};
use atlasnet_discovery::{Bulletin, RedisBulletin};
use atlasnet_health::HealthWarden;
use atlasnet_ident::{NodeIdentity, Role};
use atlasnet_interlink::{ClientTransferPacket, ConnectionChange, Interlink, Reliability};
use clap::Parser;
use proxy::{ClientRouter, ProxyConfig, RouteDecision, RouterOutcome};
use slog::{error, info, o, warn, Logger};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::process;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use uuid::Uuid;

/// AtlasNet proxy: fronts external game clients and routes their intents to
/// the shard that currently owns them (spec §4.11-§4.12).
#[derive(Parser, Debug)]
#[command(name = "proxy", version)]
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
        Some(path) => ProxyConfig::load(path),
        None => ProxyConfig::default(),
    };
    if let Some(port) = cli.listen_port {
        config.network.listen_port = port;
    }
    if let Some(endpoint) = cli.discovery_endpoint.clone() {
        config.network.discovery_endpoint = endpoint;
    }

    let log = proxy::logging::init(&config.logging, cli.log_level.as_deref());
    let self_identity = NodeIdentity::new(Role::Proxy, Uuid::new_v4());
    info!(log, "starting proxy"; "identity" => %self_identity);

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
    interlink.register::<ClientIntentCommandPacket>();
    interlink.register::<ServerStateCommandPacket>();
    interlink.register::<ClientTransferPacket>();

    if let Err(e) = bulletin.hset(SERVER_REGISTRY, &self_identity.canonical(), listen_addr.as_bytes()) {
        error!(log, "failed to register in discovery"; "error" => %e);
        process::exit(1);
    }

    let mut router = ClientRouter::new(&log);
    let round_robin = AtomicUsize::new(0);

    let inbound_intents: Arc<Mutex<Vec<(NodeIdentity, ClientIntentCommandPacket)>>> = Arc::new(Mutex::new(Vec::new()));
    let intent_sink = Arc::clone(&inbound_intents);
    let _intent_sub = interlink.subscribe::<ClientIntentCommandPacket, _>(move |packet, sender| {
        intent_sink.lock().expect("inbound intent queue mutex poisoned").push((sender, packet.clone()));
    });

    let inbound_state: Arc<Mutex<Vec<ServerStateCommandPacket>>> = Arc::new(Mutex::new(Vec::new()));
    let state_sink = Arc::clone(&inbound_state);
    let _state_sub = interlink.subscribe::<ServerStateCommandPacket, _>(move |packet, _sender| {
        state_sink.lock().expect("inbound server-state queue mutex poisoned").push(packet.clone());
    });

    let inbound_client_transfers: Arc<Mutex<Vec<(NodeIdentity, ClientTransferPacket)>>> = Arc::new(Mutex::new(Vec::new()));
    let transfer_sink = Arc::clone(&inbound_client_transfers);
    let _transfer_sub = interlink.subscribe::<ClientTransferPacket, _>(move |packet, sender| {
        transfer_sink.lock().expect("inbound client transfer queue mutex poisoned").push((sender, packet.clone()));
    });

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

    let mut last_assignment_publish = Instant::now() - config.timing.assignment_publish_interval();

    loop {
        let now = Instant::now();
        let changes = interlink.tick(now);

        for identity in interlink.pending_verification() {
            match bulletin.hexists(SERVER_REGISTRY, &identity.canonical()) {
                Ok(true) => interlink.confirm_peer(identity),
                Ok(false) => {}
                Err(e) => warn!(log, "registry check failed while verifying a peer"; "error" => %e),
            }
        }

        for change in changes {
            if let ConnectionChange::Connected(identity, _) = change {
                if identity.role == Role::GameClient && router.owning_shard(identity.uuid).is_none() {
                    bind_new_client(identity.uuid, &mut router, bulletin.as_ref(), &round_robin, &mut interlink, &log);
                }
            }
        }

        for peer in failed_peers.lock().expect("failed peer queue mutex poisoned").drain(..) {
            if let Ok(identity) = peer.parse::<NodeIdentity>() {
                router.cancel_transfers_with(identity);
                interlink.reject_peer(identity);
            }
        }

        for (sender, packet) in inbound_intents.lock().expect("inbound intent queue mutex poisoned").drain(..) {
            if sender.role != Role::GameClient {
                warn!(log, "client intent from a non-client peer, dropping"; "sender" => %sender);
                continue;
            }
            match router.route_intent(sender.uuid, packet.clone()) {
                RouteDecision::Forward(target) => {
                    ensure_peer_addressed(&mut interlink, bulletin.as_ref(), target, &log);
                    if let Err(e) = interlink.send(target, &packet, Reliability::ReliableNow) {
                        warn!(log, "failed to forward client intent"; "error" => %e, "target" => %target);
                    }
                }
                RouteDecision::Buffered => {}
                RouteDecision::Unbound => {
                    bind_new_client(sender.uuid, &mut router, bulletin.as_ref(), &round_robin, &mut interlink, &log);
                    if let RouteDecision::Forward(target) = router.route_intent(sender.uuid, packet.clone()) {
                        ensure_peer_addressed(&mut interlink, bulletin.as_ref(), target, &log);
                        if let Err(e) = interlink.send(target, &packet, Reliability::ReliableNow) {
                            warn!(log, "failed to forward client intent"; "error" => %e, "target" => %target);
                        }
                    }
                }
            }
        }

        for packet in inbound_state.lock().expect("inbound server-state queue mutex poisoned").drain(..) {
            let client_identity = NodeIdentity::new(Role::GameClient, packet.client_id);
            ensure_peer_addressed(&mut interlink, bulletin.as_ref(), client_identity, &log);
            if let Err(e) = interlink.send(client_identity, &packet, Reliability::ReliableNow) {
                warn!(log, "failed to deliver server-state to client"; "error" => %e, "client_id" => %packet.client_id);
            }
        }

        for (sender, packet) in inbound_client_transfers.lock().expect("inbound client transfer queue mutex poisoned").drain(..) {
            match router.handle_packet(sender, packet) {
                Some(RouterOutcome::Reply(target, reply)) => {
                    ensure_peer_addressed(&mut interlink, bulletin.as_ref(), target, &log);
                    if let Err(e) = interlink.send(target, &reply, Reliability::ReliableNow) {
                        warn!(log, "failed to send ProxyFreeze"; "error" => %e, "target" => %target);
                    }
                }
                Some(RouterOutcome::Activation(activation)) => {
                    ensure_peer_addressed(&mut interlink, bulletin.as_ref(), activation.target, &log);
                    for intent in &activation.flushed_intents {
                        if let Err(e) = interlink.send(activation.target, intent, Reliability::ReliableNow) {
                            warn!(log, "failed to flush buffered intent after activation"; "error" => %e, "target" => %activation.target);
                        }
                    }
                    if let Err(e) = interlink.send(activation.target, &activation.activate_packet, Reliability::ReliableNow) {
                        warn!(log, "failed to send ProxyTransferActivate"; "error" => %e, "target" => %activation.target);
                    }
                    let client_identity = NodeIdentity::new(Role::GameClient, activation.client_id).canonical();
                    if let Err(e) = bulletin.hset(CLIENT_PROXY_ASSIGNMENT, &client_identity, self_identity.canonical().as_bytes()) {
                        warn!(log, "failed to republish client proxy assignment"; "error" => %e);
                    }
                }
                None => {}
            }
        }

        if now.duration_since(last_assignment_publish) >= config.timing.assignment_publish_interval() {
            last_assignment_publish = now;
            for client_id in router.bound_client_ids() {
                let client_identity = NodeIdentity::new(Role::GameClient, client_id).canonical();
                if let Err(e) = bulletin.hset(CLIENT_PROXY_ASSIGNMENT, &client_identity, self_identity.canonical().as_bytes()) {
                    warn!(log, "failed to publish client proxy assignment"; "error" => %e, "client_id" => %client_id);
                }
            }
        }

        std::thread::sleep(std::time::Duration::from_millis(10));
    }
}

/// Picks a shard for a freshly seen client (round-robin over the registered
/// `Shard` entries) and binds it in the router plus `CLIENT_PROXY_ASSIGNMENT`
/// (spec §4's "assign them [to] a shard"). A client seen before any shard has
/// registered is left unbound — the next intent or connection retries.
fn bind_new_client(
    client_id: Uuid,
    router: &mut ClientRouter,
    bulletin: &dyn Bulletin,
    round_robin: &AtomicUsize,
    interlink: &mut Interlink,
    log: &Logger,
) {
    let registry = match bulletin.hgetall(SERVER_REGISTRY) {
        Ok(rows) => rows,
        Err(e) => {
            warn!(log, "failed to read server registry while assigning a client"; "error" => %e);
            return;
        }
    };

    let mut shards: Vec<NodeIdentity> = registry
        .keys()
        .filter_map(|canonical| canonical.parse::<NodeIdentity>().ok())
        .filter(|identity| identity.role == Role::Shard)
        .collect();
    shards.sort();

    if shards.is_empty() {
        warn!(log, "no shard registered yet, leaving client unbound"; "client_id" => %client_id);
        return;
    }

    let index = round_robin.fetch_add(1, Ordering::Relaxed) % shards.len();
    let shard = shards[index];
    router.bind_client(client_id, shard);
    ensure_peer_addressed(interlink, bulletin, shard, log);

    let client_identity = NodeIdentity::new(Role::GameClient, client_id).canonical();
    if let Err(e) = bulletin.hset(CLIENT_PROXY_ASSIGNMENT, &client_identity, interlink.self_identity().canonical().as_bytes()) {
        warn!(log, "failed to publish initial client proxy assignment"; "error" => %e, "client_id" => %client_id);
    }
    info!(log, "assigned a new client to a shard"; "client_id" => %client_id, "shard" => %shard);
}

/// Looks up `identity`'s listen address in the discovery registry and tells
/// `interlink` about it if this is the first time we've needed to reach it.
fn ensure_peer_addressed(interlink: &mut Interlink, bulletin: &dyn Bulletin, identity: NodeIdentity, log: &Logger) {
    if interlink.peer_state(identity).is_some() {
        return;
    }
    match bulletin.hget(SERVER_REGISTRY, &identity.canonical()) {
        Ok(Some(bytes)) => match std::str::from_utf8(&bytes).ok().and_then(|s| s.parse::<SocketAddr>().ok()) {
            Some(addr) => interlink.register_peer_address(identity, addr),
            None => warn!(log, "server registry entry is not a valid socket address"; "peer" => %identity),
        },
        Ok(None) => warn!(log, "peer has no discovery registry entry yet"; "peer" => %identity),
        Err(e) => warn!(log, "failed to resolve peer address from discovery"; "error" => %e, "peer" => %identity),
    }
}
