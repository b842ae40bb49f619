//! The Interlink messaging fabric (spec §4.4 / C4): non-blocking TCP
//! transport, frame codec, peer handshake, and the packet registry/bus pair
//! that decoded frames fan out through.
//!
//! Grounded on `neutronium::net`: `endpoint` owns the three poll groups and
//! per-socket framing exactly as the teacher does, minus the per-session
//! crypto layer (see DESIGN.md). `fabric` is new — it is the peer-identity
//! layer the teacher doesn't need (its endpoint only ever talks to game
//! clients behind a single listener), turning `Endpoint`'s channel-id
//! bookkeeping into the `NodeIdentity`-addressed send/dial/retry API the
//! spec describes.

mod buffer;
mod bus;
mod channel;
mod connection;
mod endpoint;
mod error;
mod fabric;
mod frame;
mod packet;
mod registry;
mod wire;

pub use bus::{PacketBus, Subscription};
pub use connection::{Connection, ConnectionKind, ConnectionState};
pub use endpoint::{ConnectionChange, Endpoint, HANDSHAKE_TYPE_ID};
pub use error::{PacketError, ProtocolError, TransportError};
pub use fabric::{Interlink, PeerState, Reliability};
pub use packet::Packet;
pub use registry::{Fabric, PacketRegistry};
pub use wire::{ClientTransferPacket, EntityTransferPacket};

pub use channel::ChannelId;
