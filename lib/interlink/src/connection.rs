use atlasnet_ident::NodeIdentity;
use std::net::SocketAddr;

#[cfg(test)]
use atlasnet_ident::Role;

/// Where a connection sits in its lifecycle (spec §4.4). Grounded on
/// `neutronium::net::endpoint`'s three-poll-group split: a connection
/// starts in the handshake group, graduates to the live group once its
/// peer identity is known, and is torn down from whichever group it was
/// last registered in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Accepted but the peer hasn't sent its identity yet.
    Handshaking,
    /// Identity confirmed, registered on the live poll group.
    Connected,
    /// Local side has asked to close; draining outstanding egress.
    Disconnecting,
    Closed,
}

/// Whether this side dialed out or accepted the connection. Internal roles
/// dial each other; `GameClient` connections are always accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionKind {
    Inbound,
    Outbound,
}

/// One peer's connection bookkeeping, independent of the socket itself
/// (which `channel::Channel` owns). `identity` is `None` until the
/// handshake packet arrives.
pub struct Connection {
    pub identity: Option<NodeIdentity>,
    pub remote_address: SocketAddr,
    pub state: ConnectionState,
    pub kind: ConnectionKind,
    pub token: mio::Token,
}

impl Connection {
    pub fn new(remote_address: SocketAddr, kind: ConnectionKind, token: mio::Token) -> Connection {
        Connection {
            identity: None,
            remote_address,
            state: ConnectionState::Handshaking,
            kind,
            token,
        }
    }

    pub fn mark_connected(&mut self, identity: NodeIdentity) {
        self.identity = Some(identity);
        self.state = ConnectionState::Connected;
    }

    pub fn mark_disconnecting(&mut self) {
        if self.state != ConnectionState::Closed {
            self.state = ConnectionState::Disconnecting;
        }
    }

    pub fn mark_closed(&mut self) {
        self.state = ConnectionState::Closed;
    }

    pub fn is_live(&self) -> bool {
        self.state == ConnectionState::Connected
    }
}
