use crate::channel::{Channel, ChannelId, ChannelState};
use crate::connection::{Connection, ConnectionKind};
use crate::frame::{try_take_frame, write_frame};
use atlasnet_codec::Encode;
use atlasnet_ident::{NodeIdentity, Role};
use indexmap::IndexSet;
use mio::net::{TcpListener, TcpStream};
use slog::{debug, o, warn, Logger};
use std::io;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

/// Reserved type id for the handshake frame every inbound connection must
/// send before anything else. `fnv1a_32` never produces 0 for a non-empty
/// packet type name, so this can't collide with a real registered type.
pub const HANDSHAKE_TYPE_ID: u32 = 0;

/// A change in connectivity since the last `sync` (spec §4.4).
#[derive(Debug, Clone, Copy)]
pub enum ConnectionChange {
    Connected(NodeIdentity, ChannelId),
    Disconnected(ChannelId),
}

/// Owns the listening socket and every accepted connection's framing state,
/// grounded on `neutronium::net::endpoint::Endpoint`'s three-poll-group
/// design (server / handshake / live) and its housekeeping pass. The
/// identity handshake here is a single unencrypted frame carrying a
/// `NodeIdentity` rather than the teacher's token-decryption step, since
/// AtlasNet has no authenticator service to consult (see DESIGN.md).
pub struct Endpoint {
    server: TcpListener,

    server_poll: mio::Poll,
    handshake_poll: mio::Poll,
    live_poll: mio::Poll,
    events: mio::Events,

    channels: Vec<Channel>,
    connections: Vec<Connection>,
    free: Vec<ChannelId>,
    live: IndexSet<ChannelId>,
    handshaking: IndexSet<ChannelId>,

    changes: Vec<ConnectionChange>,
    pending_inbound: Vec<(ChannelId, u32, Vec<u8>)>,

    current_time: Instant,
    housekeeping_time: Instant,

    self_identity: NodeIdentity,
    log: Logger,
}

impl Endpoint {
    const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);
    const INGRESS_TIMEOUT: Duration = Duration::from_secs(30);
    const HOUSEKEEPING_INTERVAL: Duration = Duration::from_secs(3);
    const ZERO_TIME: Duration = Duration::from_secs(0);
    const SERVER_POLL_TOKEN: mio::Token = mio::Token(0);

    pub fn new(address: &str, self_identity: NodeIdentity, log: &Logger) -> io::Result<Endpoint> {
        let server_poll = mio::Poll::new()?;
        let server = TcpListener::bind(&address.parse::<SocketAddr>().map_err(|e| {
            io::Error::new(io::ErrorKind::InvalidInput, e)
        })?)?;

        server_poll.register(
            &server,
            Self::SERVER_POLL_TOKEN,
            mio::Ready::writable(),
            mio::PollOpt::edge(),
        )?;

        let now = Instant::now();

        Ok(Endpoint {
            server,
            server_poll,
            handshake_poll: mio::Poll::new()?,
            live_poll: mio::Poll::new()?,
            events: mio::Events::with_capacity(8192),
            channels: Vec::new(),
            connections: Vec::new(),
            free: Vec::new(),
            live: IndexSet::new(),
            handshaking: IndexSet::new(),
            changes: Vec::new(),
            pending_inbound: Vec::new(),
            current_time: now,
            housekeeping_time: now,
            self_identity,
            log: log.new(o!()),
        })
    }

    /// Encodes `self_identity` as the handshake frame body every connection
    /// — inbound or outbound — sends immediately upon opening (spec §4.4:
    /// "Peer identity is sent as a generic byte blob at connection
    /// establishment").
    fn handshake_payload(&self) -> Vec<u8> {
        self.self_identity.encode_to_vec()
    }

    /// Initiates an outbound connection to `addr`, tagging the local
    /// bookkeeping with `expected_peer` so callers can recognize which dial
    /// a later `ConnectionChange::Connected` resolves (spec §4.4 "Sending":
    /// dialing inserts a local entry before the transport handle exists).
    /// Returns the local channel id the caller should track.
    pub fn dial(&mut self, addr: SocketAddr) -> io::Result<ChannelId> {
        let stream = TcpStream::connect(&addr)?;

        let channel_id = match self.free.pop() {
            Some(id) => id,
            None => {
                let id = self.channels.len();
                self.channels.push(Channel::new(&self.log));
                self.connections.push(Connection::new(addr, ConnectionKind::Outbound, mio::Token(id)));
                id
            }
        };

        self.handshake_poll
            .register(&stream, mio::Token(channel_id), mio::Ready::readable() | mio::Ready::writable(), mio::PollOpt::edge())
            .expect("handshake registration failed");

        self.channels[channel_id].open(channel_id, stream, self.current_time);
        self.connections[channel_id] = Connection::new(addr, ConnectionKind::Outbound, mio::Token(channel_id));

        let payload = self.handshake_payload();
        self.channels[channel_id].queue_frame(HANDSHAKE_TYPE_ID, &payload);
        self.handshaking.insert(channel_id);

        debug!(self.log, "dialed peer"; "channel_id" => channel_id, "addr" => %addr);

        Ok(channel_id)
    }

    /// Queues a frame for `channel_id`'s next `sync` flush.
    pub fn push(&mut self, channel_id: ChannelId, type_id: u32, payload: &[u8]) {
        self.channels[channel_id].queue_frame(type_id, payload);
    }

    /// Drains every complete inbound frame received since the last call,
    /// as `(channel_id, type_id, payload)`.
    pub fn take_inbound(&mut self) -> Vec<(ChannelId, u32, Vec<u8>)> {
        std::mem::take(&mut self.pending_inbound)
    }

    /// Drains every connectivity change accumulated since the last `sync`.
    pub fn changes(&mut self) -> Vec<ConnectionChange> {
        std::mem::take(&mut self.changes)
    }

    pub fn connection(&self, channel_id: ChannelId) -> Option<&Connection> {
        self.connections.get(channel_id)
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.server.local_addr()
    }

    /// Forcibly closes a live or handshaking channel, e.g. after the health
    /// warden reports the peer's bulletin ping expired. No-op if the channel
    /// is already free.
    pub fn close_channel(&mut self, channel_id: ChannelId) {
        if self.handshaking.shift_remove(&channel_id) {
            let _ = self.channels[channel_id].deregister(&self.handshake_poll);
            self.channels[channel_id].close();
            self.free.push(channel_id);
            return;
        }

        if self.live.shift_remove(&channel_id) {
            let _ = self.channels[channel_id].deregister(&self.live_poll);
            self.channels[channel_id].close();
            self.free.push(channel_id);
            self.changes.push(ConnectionChange::Disconnected(channel_id));
        }
    }

    pub fn sync(&mut self, now: Instant) {
        self.current_time = now;

        if now.duration_since(self.housekeeping_time) >= Self::HOUSEKEEPING_INTERVAL {
            self.housekeeping();
            self.housekeeping_time = now;
        }

        self.flush_live_egress(now);
        self.accept_pending();
        self.drive_handshakes();
        self.drive_live(now);
    }

    fn flush_live_egress(&mut self, now: Instant) {
        let channels = &mut self.channels;
        let free = &mut self.free;
        let changes = &mut self.changes;

        self.live.retain(|&channel_id| {
            let channel = &mut channels[channel_id];
            let ok = if channel.has_egress() {
                channel.send(now).is_ok()
            } else {
                true
            };

            if !ok {
                channel.close();
                free.push(channel_id);
                changes.push(ConnectionChange::Disconnected(channel_id));
            }

            ok
        });
    }

    fn accept_pending(&mut self) {
        self.server_poll
            .poll(&mut self.events, Some(Self::ZERO_TIME))
            .expect("server poll failed");

        let mut accepted = Vec::new();
        for event in &self.events {
            if event.readiness().is_writable() {
                loop {
                    match self.server.accept() {
                        Ok((stream, addr)) => accepted.push((stream, addr)),
                        Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                        Err(e) => {
                            warn!(self.log, "accept failed"; "error" => %e);
                            break;
                        }
                    }
                }
            }
        }

        for (stream, addr) in accepted {
            let channel_id = match self.free.pop() {
                Some(id) => id,
                None => {
                    let id = self.channels.len();
                    self.channels.push(Channel::new(&self.log));
                    self.connections.push(Connection::new(
                        addr,
                        ConnectionKind::Inbound,
                        mio::Token(id),
                    ));
                    id
                }
            };

            self.handshake_poll
                .register(
                    &stream,
                    mio::Token(channel_id),
                    mio::Ready::readable() | mio::Ready::writable(),
                    mio::PollOpt::edge(),
                )
                .expect("handshake registration failed");

            self.channels[channel_id].open(channel_id, stream, self.current_time);
            self.connections[channel_id] = Connection::new(addr, ConnectionKind::Inbound, mio::Token(channel_id));

            let payload = self.handshake_payload();
            self.channels[channel_id].queue_frame(HANDSHAKE_TYPE_ID, &payload);
            self.handshaking.insert(channel_id);

            debug!(self.log, "accepted connection"; "channel_id" => channel_id, "addr" => %addr);
        }
    }

    fn drive_handshakes(&mut self) {
        self.handshake_poll
            .poll(&mut self.events, Some(Self::ZERO_TIME))
            .expect("handshake poll failed");

        let mut ready = Vec::new();
        for event in &self.events {
            ready.push((event.token().0, event.readiness().is_readable(), event.readiness().is_writable()));
        }

        for (channel_id, readable, writable) in ready {
            let channel = &mut self.channels[channel_id];

            if writable && channel.has_egress() && channel.send(self.current_time).is_err() {
                self.fail_handshake(channel_id);
                continue;
            }

            if !readable {
                continue;
            }

            let channel = &mut self.channels[channel_id];
            if channel.receive(self.current_time).is_err() {
                self.fail_handshake(channel_id);
                continue;
            }

            let frame = channel.drain_frames().into_iter().find(|(t, _)| *t == HANDSHAKE_TYPE_ID);
            let Some((_, payload)) = frame else { continue };

            match atlasnet_ident::decode_peer_identity(&payload) {
                Some(identity) if identity.role != Role::Invalid => {
                    self.connections[channel_id].mark_connected(identity);
                    self.channels[channel_id].mark_connected();

                    self.channels[channel_id]
                        .deregister(&self.handshake_poll)
                        .expect("handshake deregistration failed");
                    self.channels[channel_id]
                        .register(mio::Token(channel_id), &self.live_poll)
                        .expect("live registration failed");

                    self.handshaking.shift_remove(&channel_id);
                    self.live.insert(channel_id);
                    self.changes.push(ConnectionChange::Connected(identity, channel_id));
                }
                _ => self.fail_handshake(channel_id),
            }
        }
    }

    fn fail_handshake(&mut self, channel_id: ChannelId) {
        let _ = self.channels[channel_id].deregister(&self.handshake_poll);
        self.channels[channel_id].close();
        self.handshaking.shift_remove(&channel_id);
        self.free.push(channel_id);
    }

    fn drive_live(&mut self, now: Instant) {
        self.live_poll
            .poll(&mut self.events, Some(Self::ZERO_TIME))
            .expect("live poll failed");

        let mut ready = Vec::new();
        for event in &self.events {
            ready.push((event.token().0, event.readiness().is_readable(), event.readiness().is_writable()));
        }

        for (channel_id, readable, writable) in ready {
            let channel = &mut self.channels[channel_id];
            let mut failed = false;

            if readable && channel.receive(now).is_err() {
                failed = true;
            }
            if !failed && writable && channel.send(now).is_err() {
                failed = true;
            }

            if failed {
                let _ = channel.deregister(&self.live_poll);
                channel.close();
                self.live.shift_remove(&channel_id);
                self.free.push(channel_id);
                self.changes.push(ConnectionChange::Disconnected(channel_id));
                continue;
            }

            for (type_id, payload) in channel.drain_frames() {
                self.pending_inbound.push((channel_id, type_id, payload));
            }
        }
    }

    /// Drops channels stuck mid-handshake past `HANDSHAKE_TIMEOUT` and live
    /// channels silent past `INGRESS_TIMEOUT` (spec §4.4 "Connection
    /// lifecycle": a peer that never finishes or goes quiet is reclaimed
    /// rather than held open forever).
    fn housekeeping(&mut self) {
        let now = self.current_time;

        let timed_out: Vec<ChannelId> = self
            .handshaking
            .iter()
            .copied()
            .filter(|&id| now.duration_since(self.channels[id].last_ingress()) >= Self::HANDSHAKE_TIMEOUT)
            .collect();
        for channel_id in timed_out {
            warn!(self.log, "handshake timed out"; "channel_id" => channel_id);
            self.fail_handshake(channel_id);
        }

        let channels = &mut self.channels;
        let free = &mut self.free;
        let changes = &mut self.changes;
        let live_poll = &self.live_poll;

        self.live.retain(|&channel_id| {
            let channel = &mut channels[channel_id];
            let retain = match channel.state() {
                ChannelState::Handshake => true,
                ChannelState::Connected => {
                    now.duration_since(channel.last_ingress()) < Self::INGRESS_TIMEOUT
                }
                ChannelState::Disconnected => false,
            };

            if !retain {
                let _ = channel.deregister(live_poll);
                channel.close();
                free.push(channel_id);
                changes.push(ConnectionChange::Disconnected(channel_id));
            }

            retain
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use atlasnet_ident::Role;
    use std::thread;
    use uuid::Uuid;

    fn log() -> Logger {
        Logger::root(slog::Discard, o!())
    }

    fn identity(role: Role) -> NodeIdentity {
        NodeIdentity::new(role, Uuid::new_v4())
    }

    /// Ticks both endpoints until `done` is satisfied or the retry budget
    /// runs out, to ride out loopback TCP's scheduling jitter without a
    /// fixed sleep.
    fn pump(endpoints: &mut [&mut Endpoint], mut done: impl FnMut(&mut [&mut Endpoint]) -> bool) {
        for _ in 0..200 {
            let now = Instant::now();
            for endpoint in endpoints.iter_mut() {
                endpoint.sync(now);
            }
            if done(endpoints) {
                return;
            }
            thread::sleep(Duration::from_millis(5));
        }
        panic!("pump exceeded retry budget without satisfying condition");
    }

    #[test]
    fn dial_and_accept_complete_a_symmetric_handshake() {
        let mut server = Endpoint::new("127.0.0.1:0", identity(Role::Shard), &log()).unwrap();
        let server_addr = server.local_addr().unwrap();
        let mut client = Endpoint::new("127.0.0.1:0", identity(Role::Proxy), &log()).unwrap();

        let client_channel = client.dial(server_addr).unwrap();

        let mut server_change = None;
        let mut client_change = None;
        pump(&mut [&mut server, &mut client], |eps| {
            for change in eps[0].changes() {
                server_change = Some(change);
            }
            for change in eps[1].changes() {
                client_change = Some(change);
            }
            server_change.is_some() && client_change.is_some()
        });

        match server_change.expect("server side should observe a connect") {
            ConnectionChange::Connected(identity, _) => assert_eq!(identity.role, Role::Proxy),
            other => panic!("expected Connected, got {other:?}"),
        }
        match client_change.expect("client side should observe a connect") {
            ConnectionChange::Connected(identity, channel_id) => {
                assert_eq!(identity.role, Role::Shard);
                assert_eq!(channel_id, client_channel);
            }
            other => panic!("expected Connected, got {other:?}"),
        }
    }

    #[test]
    fn frames_sent_after_handshake_are_delivered() {
        let mut server = Endpoint::new("127.0.0.1:0", identity(Role::Shard), &log()).unwrap();
        let server_addr = server.local_addr().unwrap();
        let mut client = Endpoint::new("127.0.0.1:0", identity(Role::Proxy), &log()).unwrap();

        let client_channel = client.dial(server_addr).unwrap();

        let mut server_channel = None;
        pump(&mut [&mut server, &mut client], |eps| {
            for change in eps[0].changes() {
                if let ConnectionChange::Connected(_, channel_id) = change {
                    server_channel = Some(channel_id);
                }
            }
            server_channel.is_some()
        });
        let server_channel = server_channel.unwrap();

        client.push(client_channel, 7, b"hello");

        let mut received = Vec::new();
        pump(&mut [&mut server, &mut client], |eps| {
            received.extend(eps[0].take_inbound());
            !received.is_empty()
        });

        assert_eq!(received.len(), 1);
        assert_eq!(received[0].0, server_channel);
        assert_eq!(received[0].1, 7);
        assert_eq!(received[0].2, b"hello");
    }

    #[test]
    fn closing_the_remote_socket_surfaces_a_disconnect() {
        let mut server = Endpoint::new("127.0.0.1:0", identity(Role::Shard), &log()).unwrap();
        let server_addr = server.local_addr().unwrap();
        let mut client = Endpoint::new("127.0.0.1:0", identity(Role::Proxy), &log()).unwrap();

        client.dial(server_addr).unwrap();

        let mut server_channel = None;
        pump(&mut [&mut server, &mut client], |eps| {
            for change in eps[0].changes() {
                if let ConnectionChange::Connected(_, channel_id) = change {
                    server_channel = Some(channel_id);
                }
            }
            server_channel.is_some()
        });

        drop(client);

        let mut disconnected = false;
        pump(&mut [&mut server], |eps| {
            for change in eps[0].changes() {
                if matches!(change, ConnectionChange::Disconnected(_)) {
                    disconnected = true;
                }
            }
            disconnected
        });
        assert!(disconnected);
    }

    #[test]
    fn garbled_handshake_payload_is_rejected_and_frees_the_channel() {
        let mut server = Endpoint::new("127.0.0.1:0", identity(Role::Shard), &log()).unwrap();
        let server_addr = server.local_addr().unwrap();

        let stream = std::net::TcpStream::connect(server_addr).unwrap();
        use std::io::Write;
        let mut stream = stream;
        stream.write_all(&[0, 0, 0, 0, 0, 0, 0, 3, 9, 9, 9]).unwrap();

        pump(&mut [&mut server], |eps| {
            eps[0].changes();
            eps[0].connections.len() == 1 && eps[0].live.is_empty() && eps[0].handshaking.is_empty()
        });
    }
}
