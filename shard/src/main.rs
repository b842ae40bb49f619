use atlasnet_codec::Encode;
use atlasnet_core::tables::{AUTHORITY_TELEMETRY, CLIENT_PROXY_ASSIGNMENT, NETWORK_TELEMETRY, SERVER_REGISTRY};
use atlasnet_core::{
    AuthorityTracker, ClientIntentCommandPacket, CommandHeader, CommandRegistry, Entity,
    NetworkTelemetryRow, ServerStateBus, ServerStateCommandPacket,
};
use atlasnet_discovery::{Bulletin, RedisBulletin};
use atlasnet_health::HealthWarden;
use atlasnet_ident::{NodeIdentity, Role};
use atlasnet_interlink::{ClientTransferPacket, EntityTransferPacket, Interlink, Reliability};
use atlasnet_spatial::Bound;
use clap::Parser;
use glam::Vec3;
use shard::{read_claimed_bounds, BoundLeaser, ClientTransferCoordinator, EntityLedger, OrbitSim, ShardConfig, TransferCoordinator};
use slog::{debug, error, info, o, warn, Logger};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::process;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use uuid::Uuid;

/// AtlasNet shard: owns one claimed spatial bound and the entities inside
/// it (spec §4.7-§4.10).
#[derive(Parser, Debug)]
#[command(name = "shard", version)]
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
        Some(path) => ShardConfig::load(path),
        None => ShardConfig::default(),
    };
    if let Some(port) = cli.listen_port {
        config.network.listen_port = port;
    }
    if let Some(endpoint) = cli.discovery_endpoint.clone() {
        config.network.discovery_endpoint = endpoint;
    }

    let log = shard::logging::init(&config.logging, cli.log_level.as_deref());
    let self_identity = NodeIdentity::new(Role::Shard, Uuid::new_v4());
    info!(log, "starting shard"; "identity" => %self_identity);

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
    interlink.register::<EntityTransferPacket>();
    interlink.register::<ClientTransferPacket>();
    interlink.register::<ClientIntentCommandPacket>();
    interlink.register::<ServerStateCommandPacket>();

    if let Err(e) = bulletin.hset(SERVER_REGISTRY, &self_identity.canonical(), listen_addr.as_bytes()) {
        error!(log, "failed to register in discovery"; "error" => %e);
        process::exit(1);
    }

    let mut leaser = BoundLeaser::new(self_identity, &log);
    let mut ledger = EntityLedger::new();
    let mut orbit_sim = config.debug.orbit_enabled.then(|| {
        info!(log, "debug orbit simulator enabled");
        OrbitSim::new(Uuid::new_v4(), Vec3::ZERO, config.debug.orbit_radius, config.debug.orbit_period_secs)
    });
    let mut coordinator = TransferCoordinator::new(self_identity, &log);
    let mut client_coordinator = ClientTransferCoordinator::new(self_identity, &log);
    let mut authority = AuthorityTracker::new(self_identity);
    let command_registry = CommandRegistry::new();
    let server_state_bus = ServerStateBus::new();

    let inbound_transfers: Arc<Mutex<Vec<(NodeIdentity, EntityTransferPacket)>>> = Arc::new(Mutex::new(Vec::new()));
    let inbound_sink = Arc::clone(&inbound_transfers);
    let _transfer_sub = interlink.subscribe::<EntityTransferPacket, _>(move |packet, sender| {
        inbound_sink.lock().expect("inbound transfer queue mutex poisoned").push((sender, packet.clone()));
    });

    let inbound_client_transfers: Arc<Mutex<Vec<(NodeIdentity, ClientTransferPacket)>>> = Arc::new(Mutex::new(Vec::new()));
    let client_inbound_sink = Arc::clone(&inbound_client_transfers);
    let _client_transfer_sub = interlink.subscribe::<ClientTransferPacket, _>(move |packet, sender| {
        client_inbound_sink.lock().expect("inbound client transfer queue mutex poisoned").push((sender, packet.clone()));
    });

    let inbound_intents: Arc<Mutex<Vec<(NodeIdentity, ClientIntentCommandPacket)>>> = Arc::new(Mutex::new(Vec::new()));
    let intent_sink = Arc::clone(&inbound_intents);
    let _intent_sub = interlink.subscribe::<ClientIntentCommandPacket, _>(move |packet, sender| {
        intent_sink.lock().expect("inbound intent queue mutex poisoned").push((sender, packet.clone()));
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

    let mut last_lease_attempt = Instant::now() - config.timing.lease_interval();
    let mut last_sweep = Instant::now() - config.timing.sweep_interval();
    let mut last_telemetry = Instant::now() - config.timing.telemetry_interval();

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
                coordinator.cancel_transfers_with(identity);
                client_coordinator.cancel_transfers_with(identity);
                interlink.reject_peer(identity);
            }
        }

        if !leaser.is_claimed() && now.duration_since(last_lease_attempt) >= config.timing.lease_interval() {
            last_lease_attempt = now;
            match leaser.try_claim(bulletin.as_ref()) {
                Ok(true) => info!(log, "bound claim succeeded"),
                Ok(false) => {}
                Err(e) => warn!(log, "bound claim attempt failed"; "error" => %e),
            }
        }

        for (sender, packet) in inbound_transfers.lock().expect("inbound transfer queue mutex poisoned").drain(..) {
            if let Some((target, reply)) = coordinator.handle_packet(sender, packet, &mut ledger) {
                ensure_peer_addressed(&mut interlink, bulletin.as_ref(), target, &log);
                if let Err(e) = interlink.send(target, &reply, Reliability::ReliableNow) {
                    warn!(log, "failed to send transfer reply"; "error" => %e, "target" => %target);
                }
            }
        }

        for (sender, packet) in inbound_client_transfers.lock().expect("inbound client transfer queue mutex poisoned").drain(..) {
            if let Some((target, reply)) = client_coordinator.handle_packet(sender, packet) {
                ensure_peer_addressed(&mut interlink, bulletin.as_ref(), target, &log);
                if let Err(e) = interlink.send(target, &reply, Reliability::ReliableNow) {
                    warn!(log, "failed to send client transfer reply"; "error" => %e, "target" => %target);
                }
            }
        }
        for entity in client_coordinator.take_adopted() {
            ledger.insert_new(entity);
        }

        for (sender, packet) in inbound_intents.lock().expect("inbound intent queue mutex poisoned").drain(..) {
            ledger.apply_client_packet_seq(packet.client_id, packet.packet_seq);
            let header = CommandHeader { sender, client_id: Some(packet.client_id) };
            if let Err(e) = command_registry.decode_and_dispatch(packet.command_id, &packet.body, header) {
                debug!(log, "no registered handler for a client intent's command_id"; "command_id" => e.command_id, "client_id" => %packet.client_id);
            }
        }

        if let Some(sim) = orbit_sim.as_mut() {
            if leaser.is_claimed() {
                sim.seed(&mut ledger);
                sim.step(now, &mut ledger);
            }
        }

        if let Some(bound) = leaser.current().copied() {
            if now.duration_since(last_sweep) >= config.timing.sweep_interval() {
                last_sweep = now;
                let candidates = ledger.sweep(&bound);
                if !candidates.is_empty() {
                    let (client_candidates, entity_candidates): (Vec<Uuid>, Vec<Uuid>) = candidates
                        .into_iter()
                        .partition(|id| ledger.get(*id).map(|e| e.is_client).unwrap_or(false));

                    match read_claimed_bounds(bulletin.as_ref()) {
                        Ok(claimed) => {
                            let outgoing = coordinator.begin_outbound(&mut ledger, &entity_candidates, &claimed);
                            for (target, packet) in outgoing {
                                if let EntityTransferPacket::Prepare { ref entity_ids, .. } = packet {
                                    for id in entity_ids {
                                        authority.mark_passing(*id, target);
                                    }
                                }
                                ensure_peer_addressed(&mut interlink, bulletin.as_ref(), target, &log);
                                if let Err(e) = interlink.send(target, &packet, Reliability::ReliableNow) {
                                    warn!(log, "failed to send transfer prepare"; "error" => %e, "target" => %target);
                                }
                            }

                            begin_client_transfers(
                                self_identity,
                                &client_candidates,
                                &claimed,
                                &mut ledger,
                                &mut client_coordinator,
                                &mut authority,
                                bulletin.as_ref(),
                                &mut interlink,
                                &log,
                            );
                        }
                        Err(e) => warn!(log, "failed to read claimed bounds"; "error" => %e),
                    }
                }
            }
        }

        for (target, packet) in client_coordinator.drain_ready_transfers(&mut ledger) {
            ensure_peer_addressed(&mut interlink, bulletin.as_ref(), target, &log);
            if let Err(e) = interlink.send(target, &packet, Reliability::ReliableNow) {
                warn!(log, "failed to send ShardDrained"; "error" => %e, "target" => %target);
            }
        }

        server_state_bus.flush(|packet: ServerStateCommandPacket| {
            let client_identity = NodeIdentity::new(Role::GameClient, packet.client_id).canonical();
            match bulletin.hget(CLIENT_PROXY_ASSIGNMENT, &client_identity) {
                Ok(Some(bytes)) => match std::str::from_utf8(&bytes).ok().and_then(|s| s.parse::<NodeIdentity>().ok()) {
                    Some(proxy) => {
                        ensure_peer_addressed(&mut interlink, bulletin.as_ref(), proxy, &log);
                        if let Err(e) = interlink.send(proxy, &packet, Reliability::ReliableNow) {
                            warn!(log, "failed to deliver server-state command to proxy"; "error" => %e, "proxy" => %proxy);
                        }
                    }
                    None => warn!(log, "client proxy assignment is not a valid node identity"; "client_id" => %packet.client_id),
                },
                Ok(None) => warn!(log, "server-state command for a client with no proxy assignment, dropping"; "client_id" => %packet.client_id),
                Err(e) => warn!(log, "failed to resolve client proxy assignment for server-state flush"; "error" => %e, "client_id" => %packet.client_id),
            }
        });

        authority.set_owned(ledger.snapshot_all());

        if now.duration_since(last_telemetry) >= config.timing.telemetry_interval() {
            last_telemetry = now;
            for row in authority.collect_telemetry_rows() {
                if let Err(e) = bulletin.hset(AUTHORITY_TELEMETRY, &row.entity_id.to_string(), &row.encode_to_vec()) {
                    warn!(log, "failed to publish authority telemetry"; "error" => %e);
                }
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

        std::thread::sleep(Duration::from_millis(10));
    }
}

/// Groups freshly out-of-bound client entities by `client_id`, resolves each
/// client's target shard (from `claimed_bounds`, same as the plain entity
/// path) and managing proxy (from the `CLIENT_PROXY_ASSIGNMENT` bulletin
/// table), and kicks off the six-phase hand-off (spec §4.11 stage 1) for
/// every group that resolves cleanly. A group that can't resolve a target or
/// a proxy is left in place — the next sweep will retry it, same policy as
/// an unmapped plain-entity transfer.
#[allow(clippy::too_many_arguments)]
fn begin_client_transfers(
    self_identity: NodeIdentity,
    candidates: &[Uuid],
    claimed_bounds: &[(NodeIdentity, Bound)],
    ledger: &mut EntityLedger,
    client_coordinator: &mut ClientTransferCoordinator,
    authority: &mut AuthorityTracker,
    bulletin: &dyn Bulletin,
    interlink: &mut Interlink,
    log: &Logger,
) {
    let mut groups: HashMap<Uuid, Vec<Uuid>> = HashMap::new();
    for &id in candidates {
        if let Some(entity) = ledger.get(id) {
            groups.entry(entity.client_id).or_default().push(id);
        }
    }

    for (client_id, entity_ids) in groups {
        let Some(&first_id) = entity_ids.first() else { continue };
        let Some(position) = ledger.get(first_id).map(|e| e.transform.position) else { continue };

        let target = claimed_bounds
            .iter()
            .find(|(_, bound)| bound.contains(position))
            .map(|(identity, _)| *identity);

        let target = match target {
            Some(identity) if identity != self_identity => identity,
            _ => {
                warn!(log, "client has no mapped destination bound, leaving it in place"; "client_id" => %client_id);
                for id in &entity_ids {
                    ledger.clear_in_transit(*id);
                }
                continue;
            }
        };

        let client_identity = NodeIdentity::new(Role::GameClient, client_id).canonical();
        let proxy = match bulletin.hget(CLIENT_PROXY_ASSIGNMENT, &client_identity) {
            Ok(Some(bytes)) => std::str::from_utf8(&bytes).ok().and_then(|s| s.parse::<NodeIdentity>().ok()),
            Ok(None) => None,
            Err(e) => {
                warn!(log, "failed to resolve client proxy assignment"; "error" => %e, "client_id" => %client_id);
                None
            }
        };
        let Some(proxy) = proxy else {
            warn!(log, "client has no resolvable proxy assignment, leaving it in place"; "client_id" => %client_id);
            for id in &entity_ids {
                ledger.clear_in_transit(*id);
            }
            continue;
        };

        let entities: Vec<Entity> = entity_ids.iter().filter_map(|id| ledger.get(*id).cloned()).collect();
        if entities.is_empty() {
            continue;
        }

        for id in &entity_ids {
            authority.mark_passing(*id, target);
        }

        let (_, prepare) = client_coordinator.begin_outbound(client_id, proxy, target, entities);
        ensure_peer_addressed(interlink, bulletin, target, log);
        if let Err(e) = interlink.send(target, &prepare, Reliability::ReliableNow) {
            warn!(log, "failed to send client ShardPrepare"; "error" => %e, "target" => %target);
        }
    }
}

/// Looks up `identity`'s listen address in the discovery registry and tells
/// `interlink` about it if this is the first time we've needed to reach it
/// (spec §4.4: `send` can only dial a peer once an address is registered).
/// A peer already known (dialed in, or previously resolved) is left alone.
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
