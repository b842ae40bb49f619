//! A proxy process: fronts external game clients, binds each one to its
//! current owning shard, and routes intents/state across a six-phase
//! hand-off when a client's shard changes (spec §4.11-§4.12).

pub mod client_router;
pub mod config;
pub mod logging;

pub use client_router::{ClientRouter, RouteDecision, RouterOutcome};
pub use config::ProxyConfig;
