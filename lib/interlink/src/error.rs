use std::fmt;
use std::io;

/// Connection-establishment and socket-level failures (spec §4.4).
#[derive(Debug)]
pub enum TransportError {
    /// The peer's identity did not resolve to a registered internal role
    /// (spec §4.1: only `GameClient` connections are accepted unregistered).
    PeerUnknown,
    DialFailed(io::Error),
    Closed,
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportError::PeerUnknown => write!(f, "peer identity is not a registered internal role"),
            TransportError::DialFailed(e) => write!(f, "failed to dial peer: {}", e),
            TransportError::Closed => write!(f, "connection is closed"),
        }
    }
}

impl std::error::Error for TransportError {}

impl From<io::Error> for TransportError {
    fn from(e: io::Error) -> Self {
        TransportError::DialFailed(e)
    }
}

/// A frame arrived that could not be decoded into its declared packet type.
#[derive(Debug)]
pub struct PacketError {
    pub type_id: u32,
}

impl fmt::Display for PacketError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "malformed packet body for type id {}", self.type_id)
    }
}

impl std::error::Error for PacketError {}

/// Violations of the transfer/authority protocols' invariants (spec §4.9,
/// §4.10, §4.11).
#[derive(Debug, Eq, PartialEq)]
pub enum ProtocolError {
    /// A transfer packet's stage is not the legal successor of the current one.
    OutOfOrderStage,
    /// A packet referenced a transfer id this node has no record of.
    UnknownTransfer,
    /// Two shards both believe they hold authority over the same entity.
    DualAuthority,
    /// A registry lookup found no handler for the given type id.
    BadType,
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            ProtocolError::OutOfOrderStage => "transfer packet stage is out of order",
            ProtocolError::UnknownTransfer => "unknown transfer id",
            ProtocolError::DualAuthority => "conflicting authority claim over entity",
            ProtocolError::BadType => "no registered handler for packet type",
        };
        f.write_str(msg)
    }
}

impl std::error::Error for ProtocolError {}
