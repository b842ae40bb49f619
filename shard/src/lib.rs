//! A shard process: owns one claimed spatial bound, the entities inside it,
//! and the authority/transfer bookkeeping spec §4.7-§4.10 describe.

pub mod bound_leaser;
pub mod client_transfer;
pub mod config;
pub mod entity_ledger;
pub mod logging;
pub mod orbit_sim;
pub mod transfer_coordinator;

pub use bound_leaser::{read_claimed_bounds, BoundLeaser};
pub use client_transfer::ClientTransferCoordinator;
pub use config::ShardConfig;
pub use entity_ledger::EntityLedger;
pub use orbit_sim::OrbitSim;
pub use transfer_coordinator::TransferCoordinator;
