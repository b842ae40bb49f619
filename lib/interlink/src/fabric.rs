use crate::bus::PacketBus;
use crate::channel::ChannelId;
use crate::endpoint::{ConnectionChange, Endpoint};
use crate::error::TransportError;
use crate::packet::Packet;
use crate::registry::PacketRegistry;
use atlasnet_codec::Encode;
use atlasnet_ident::NodeIdentity;
use slog::{o, warn, Logger};
use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

/// A hint to the transport about how a send should be carried (spec §4.4).
/// Ordering is only preserved within one tier on the same connection; mixing
/// tiers for the same packet stream gives up that guarantee.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reliability {
    ImmediateOrDrop,
    UnreliableNow,
    UnreliableBatched,
    ReliableNow,
    ReliableBatched,
}

/// Where a peer sits in `Interlink`'s own bookkeeping, distinct from
/// `Endpoint`'s channel-level `ConnectionState`: a peer can be
/// `PreConnecting` before any socket exists at all (spec §4.4), which
/// `Connection` has no representation for since it is only ever constructed
/// once a transport handle is open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    PreConnecting,
    Connecting,
    Connected,
    Disconnecting,
    Closed,
    Error,
}

struct PeerEntry {
    state: PeerState,
    channel_id: Option<ChannelId>,
    address: Option<SocketAddr>,
    dial_attempts: u32,
    deferred: Vec<(u32, Vec<u8>, Reliability)>,
}

impl PeerEntry {
    fn addressed(address: SocketAddr) -> PeerEntry {
        PeerEntry {
            state: PeerState::PreConnecting,
            channel_id: None,
            address: Some(address),
            dial_attempts: 0,
            deferred: Vec::new(),
        }
    }

    fn unaddressed() -> PeerEntry {
        PeerEntry {
            state: PeerState::PreConnecting,
            channel_id: None,
            address: None,
            dial_attempts: 0,
            deferred: Vec::new(),
        }
    }
}

/// The peer-identity layer over `Endpoint` (spec §4.4): maps every send and
/// connectivity change onto a `NodeIdentity` instead of a bare channel id,
/// runs the dial/retry and deferred-send bookkeeping the spec's "Sending"
/// rules describe, and owns the process-wide packet registry and
/// subscription bus every inbound frame is routed through.
pub struct Interlink {
    endpoint: Endpoint,
    self_identity: NodeIdentity,
    bus: Arc<PacketBus>,
    registry: PacketRegistry,
    peers: HashMap<NodeIdentity, PeerEntry>,
    channel_owner: HashMap<ChannelId, NodeIdentity>,
    /// Internal-role peers seen over an *inbound* connection, not yet
    /// confirmed present in the discovery server registry (spec §4.4:
    /// "accepted only after a bounded retry window... fail after N
    /// attempts"). The registry lookup itself lives with the caller
    /// (shard/proxy, which hold a `Bulletin` handle) — `tick` only ages the
    /// counters and expires whoever the caller never confirmed.
    pending_verification: HashMap<NodeIdentity, u32>,
    log: Logger,
}

impl Interlink {
    const MAX_DIAL_ATTEMPTS: u32 = 8;
    const MAX_VERIFY_ATTEMPTS: u32 = 10;

    pub fn new(listen_addr: &str, self_identity: NodeIdentity, log: &Logger) -> io::Result<Interlink> {
        Ok(Interlink {
            endpoint: Endpoint::new(listen_addr, self_identity, log)?,
            self_identity,
            bus: Arc::new(PacketBus::new()),
            registry: PacketRegistry::new(),
            peers: HashMap::new(),
            channel_owner: HashMap::new(),
            pending_verification: HashMap::new(),
            log: log.new(o!("component" => "interlink")),
        })
    }

    pub fn self_identity(&self) -> NodeIdentity {
        self.self_identity
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.endpoint.local_addr()
    }

    pub fn bus(&self) -> &Arc<PacketBus> {
        &self.bus
    }

    pub fn register<T: Packet>(&mut self) {
        self.registry.register::<T>();
    }

    pub fn subscribe<T, F>(&self, cb: F) -> crate::bus::Subscription
    where
        T: Packet,
        F: Fn(&T, NodeIdentity) + Send + Sync + 'static,
    {
        self.bus.subscribe::<T, F>(cb)
    }

    /// Tells Interlink where `identity` can be dialed. Idempotent; calling
    /// it again (e.g. discovery reports a new address after a rebind) resets
    /// a peer that had failed back to `PreConnecting`.
    pub fn register_peer_address(&mut self, identity: NodeIdentity, address: SocketAddr) {
        match self.peers.get_mut(&identity) {
            Some(entry) => {
                entry.address = Some(address);
                if matches!(entry.state, PeerState::Closed | PeerState::Error) {
                    entry.state = PeerState::PreConnecting;
                    entry.channel_id = None;
                    entry.dial_attempts = 0;
                }
            }
            None => {
                self.peers.insert(identity, PeerEntry::addressed(address));
            }
        }
    }

    pub fn peer_state(&self, identity: NodeIdentity) -> Option<PeerState> {
        self.peers.get(&identity).map(|e| e.state)
    }

    pub fn is_connected(&self, identity: NodeIdentity) -> bool {
        self.peer_state(identity) == Some(PeerState::Connected)
    }

    /// Identities currently connected but whose registry membership the
    /// caller still needs to confirm (spec §4.4's internal-peer bounded
    /// retry). Call `confirm_peer` or `reject_peer` for each once the
    /// caller has consulted its discovery bulletin handle.
    pub fn pending_verification(&self) -> Vec<NodeIdentity> {
        self.pending_verification.keys().copied().collect()
    }

    pub fn confirm_peer(&mut self, identity: NodeIdentity) {
        self.pending_verification.remove(&identity);
    }

    /// Closes the connection to an internal peer that never turned up in the
    /// registry within the retry window, or that the caller otherwise wants
    /// to evict (e.g. a health-warden-detected expiry).
    pub fn reject_peer(&mut self, identity: NodeIdentity) {
        self.pending_verification.remove(&identity);
        self.close_peer(identity);
    }

    pub fn close_peer(&mut self, identity: NodeIdentity) {
        if let Some(entry) = self.peers.get_mut(&identity) {
            if let Some(channel_id) = entry.channel_id.take() {
                self.endpoint.close_channel(channel_id);
                self.channel_owner.remove(&channel_id);
            }
            entry.state = PeerState::Disconnecting;
        }
    }

    /// Queues `packet` for `target` (spec §4.4 "Sending"). `target` must
    /// have a registered address (via `register_peer_address`) or a prior
    /// inbound connection must already have identified it; otherwise there
    /// is nowhere to dial and this returns `PeerUnknown`.
    pub fn send<T: Packet>(&mut self, target: NodeIdentity, packet: &T, reliability: Reliability) -> Result<(), TransportError> {
        let type_id = T::type_id();
        let payload = packet.encode_to_vec();

        let entry = self.peers.get_mut(&target).ok_or(TransportError::PeerUnknown)?;
        match (entry.state, entry.channel_id) {
            (PeerState::Connected, Some(channel_id)) => {
                self.endpoint.push(channel_id, type_id, &payload);
            }
            _ => entry.deferred.push((type_id, payload, reliability)),
        }
        Ok(())
    }

    /// Drives one tick: advances pending dials, runs the transport's poll
    /// groups, ages unverified peers, and dispatches every inbound frame
    /// onto the bus. Returns the raw connectivity changes observed, mostly
    /// useful for logging/telemetry — `peer_state` already reflects them.
    pub fn tick(&mut self, now: Instant) -> Vec<ConnectionChange> {
        self.endpoint.sync(now);

        self.advance_dials();

        let changes = self.endpoint.changes();
        for change in &changes {
            self.apply_change(*change);
        }

        self.age_pending_verification();
        self.dispatch_inbound();

        changes
    }

    fn advance_dials(&mut self) {
        let candidates: Vec<(NodeIdentity, SocketAddr)> = self
            .peers
            .iter()
            .filter(|(_, e)| e.state == PeerState::PreConnecting)
            .filter_map(|(id, e)| e.address.map(|addr| (*id, addr)))
            .collect();

        for (identity, addr) in candidates {
            let entry = self.peers.get_mut(&identity).expect("identity came from self.peers");
            match self.endpoint.dial(addr) {
                Ok(channel_id) => {
                    entry.state = PeerState::Connecting;
                    entry.channel_id = Some(channel_id);
                    entry.dial_attempts += 1;
                }
                Err(e) => {
                    entry.dial_attempts += 1;
                    warn!(self.log, "dial failed"; "peer" => %identity, "addr" => %addr, "error" => %e, "attempt" => entry.dial_attempts);
                    if entry.dial_attempts >= Self::MAX_DIAL_ATTEMPTS {
                        entry.state = PeerState::Error;
                    }
                }
            }
        }
    }

    fn apply_change(&mut self, change: ConnectionChange) {
        match change {
            ConnectionChange::Connected(identity, channel_id) => {
                self.channel_owner.insert(channel_id, identity);
                let is_new = !self.peers.contains_key(&identity);
                let entry = self.peers.entry(identity).or_insert_with(PeerEntry::unaddressed);
                entry.state = PeerState::Connected;
                entry.channel_id = Some(channel_id);
                entry.dial_attempts = 0;

                for (type_id, payload, _reliability) in std::mem::take(&mut entry.deferred) {
                    self.endpoint.push(channel_id, type_id, &payload);
                }

                if is_new && identity.is_internal() {
                    self.pending_verification.insert(identity, 0);
                }
            }
            ConnectionChange::Disconnected(channel_id) => {
                if let Some(identity) = self.channel_owner.remove(&channel_id) {
                    self.pending_verification.remove(&identity);
                    if let Some(entry) = self.peers.get_mut(&identity) {
                        entry.state = PeerState::Closed;
                        entry.channel_id = None;
                    }
                }
            }
        }
    }

    fn age_pending_verification(&mut self) {
        for count in self.pending_verification.values_mut() {
            *count += 1;
        }

        let expired: Vec<NodeIdentity> = self
            .pending_verification
            .iter()
            .filter(|(_, &count)| count > Self::MAX_VERIFY_ATTEMPTS)
            .map(|(id, _)| *id)
            .collect();

        for identity in expired {
            warn!(self.log, "internal peer never confirmed against the registry"; "peer" => %identity);
            self.reject_peer(identity);
        }
    }

    fn dispatch_inbound(&mut self) {
        for (channel_id, type_id, payload) in self.endpoint.take_inbound() {
            let Some(sender) = self.channel_owner.get(&channel_id).copied() else {
                warn!(self.log, "inbound frame from an unowned channel"; "channel_id" => channel_id);
                continue;
            };

            if let Err(e) = self.registry.decode_and_dispatch(type_id, &payload, sender, &self.bus) {
                warn!(self.log, "failed to dispatch inbound frame"; "error" => %e, "sender" => %sender);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use atlasnet_codec::{CodecResult, Decode, Reader, Writer};
    use atlasnet_ident::Role;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;
    use std::thread;
    use std::time::Duration;
    use uuid::Uuid;

    #[derive(Debug)]
    struct Ping(u32);

    impl Encode for Ping {
        fn encode(&self, w: &mut Writer) {
            w.u32(self.0);
        }
    }

    impl Decode for Ping {
        fn decode(r: &mut Reader) -> CodecResult<Self> {
            Ok(Ping(r.u32()?))
        }
    }

    impl Packet for Ping {
        fn type_name() -> &'static str {
            "fabric-test-ping"
        }
    }

    fn log() -> Logger {
        Logger::root(slog::Discard, o!())
    }

    fn identity(role: Role) -> NodeIdentity {
        NodeIdentity::new(role, Uuid::new_v4())
    }

    fn pump(links: &mut [&mut Interlink], mut done: impl FnMut(&mut [&mut Interlink]) -> bool) {
        for _ in 0..200 {
            let now = Instant::now();
            for link in links.iter_mut() {
                link.tick(now);
            }
            if done(links) {
                return;
            }
            thread::sleep(Duration::from_millis(5));
        }
        panic!("pump exceeded retry budget without satisfying condition");
    }

    #[test]
    fn send_before_connect_is_deferred_then_flushed() {
        let server_id = identity(Role::Shard);
        let client_id = identity(Role::Proxy);

        let mut server = Interlink::new("127.0.0.1:0", server_id, &log()).unwrap();
        server.register::<Ping>();
        let server_addr = server.local_addr().unwrap();

        let mut client = Interlink::new("127.0.0.1:0", client_id, &log()).unwrap();
        client.register_peer_address(server_id, server_addr);

        assert_eq!(client.peer_state(server_id), Some(PeerState::PreConnecting));

        let seen = Arc::new(AtomicU32::new(0));
        let seen2 = Arc::clone(&seen);
        let _sub = server.subscribe::<Ping, _>(move |p, _sender| {
            seen2.store(p.0, Ordering::SeqCst);
        });

        client.send(server_id, &Ping(99), Reliability::ReliableNow).unwrap();

        pump(&mut [&mut server, &mut client], |_| seen.load(Ordering::SeqCst) == 99);

        assert_eq!(client.peer_state(server_id), Some(PeerState::Connected));
        assert!(server.is_connected(client_id));
    }

    #[test]
    fn send_to_unregistered_peer_is_rejected() {
        let mut link = Interlink::new("127.0.0.1:0", identity(Role::Shard), &log()).unwrap();
        let err = link.send(identity(Role::Proxy), &Ping(1), Reliability::ImmediateOrDrop).unwrap_err();
        assert!(matches!(err, TransportError::PeerUnknown));
    }

    #[test]
    fn inbound_internal_peer_starts_unverified_until_confirmed() {
        let server_id = identity(Role::Shard);
        let client_id = identity(Role::Watchdog);

        let mut server = Interlink::new("127.0.0.1:0", server_id, &log()).unwrap();
        let server_addr = server.local_addr().unwrap();
        let mut client = Interlink::new("127.0.0.1:0", client_id, &log()).unwrap();
        client.register_peer_address(server_id, server_addr);

        pump(&mut [&mut server, &mut client], |links| links[0].is_connected(client_id));

        assert_eq!(server.pending_verification(), vec![client_id]);
        server.confirm_peer(client_id);
        assert!(server.pending_verification().is_empty());
    }

    #[test]
    fn sender_identity_from_registered_address_round_trips() {
        let server_id = identity(Role::Shard);
        let client_id = identity(Role::Proxy);

        let mut server = Interlink::new("127.0.0.1:0", server_id, &log()).unwrap();
        server.register::<Ping>();
        let server_addr = server.local_addr().unwrap();
        let mut client = Interlink::new("127.0.0.1:0", client_id, &log()).unwrap();
        client.register_peer_address(server_id, server_addr);

        let seen_sender = Arc::new(Mutex::new(None));
        let seen2 = Arc::clone(&seen_sender);
        let _sub = server.subscribe::<Ping, _>(move |_p, sender| {
            *seen2.lock().unwrap() = Some(sender);
        });

        client.send(server_id, &Ping(1), Reliability::UnreliableNow).unwrap();
        pump(&mut [&mut server, &mut client], |_| seen_sender.lock().unwrap().is_some());

        assert_eq!(*seen_sender.lock().unwrap(), Some(client_id));
    }
}
