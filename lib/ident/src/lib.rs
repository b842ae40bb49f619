//! Typed node identities and network addresses (spec §4.1 / C1).
//!
//! Grounded on `flux`'s role-tagged session/connection types from the
//! teacher repo, generalized from the teacher's single `user`/`server`
//! session split into the full `Role` enum spec.md §3 requires.

mod address;
mod identity;

pub use address::Address;
pub use identity::{decode_peer_identity, NodeIdentity, ParseIdentityError, Role};
