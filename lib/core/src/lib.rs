//! Shared simulation data model: entities, authority bookkeeping, transfer
//! state machines, and the typed command envelopes (spec §3, §4.9, §4.11,
//! §4.12 / C3, C9, C10, C12).

mod authority;
mod command;
mod command_bus;
mod entity;
mod network_telemetry;
pub mod tables;
mod transfer;
mod transform;

pub use authority::{AuthorityEntry, AuthorityState, AuthorityTracker, TelemetryRow};
pub use command::{decode_command, encode_command, ClientIntentCommandPacket, Command, ServerStateCommandPacket};
pub use command_bus::{ClientIntentBus, CommandHeader, CommandRegistry, CommandRegistryError, CommandSubscription, ServerStateBus};
pub use entity::{Entity, Metadata};
pub use network_telemetry::NetworkTelemetryRow;
pub use transfer::{ClientTransfer, ClientTransferStage, EntityTransfer, EntityTransferStage, TransferMode};
pub use transform::{Aabb3, Transform};
