use atlasnet_codec::{CodecError, CodecResult, Decode, Encode, Reader, Writer};
use std::cmp::Ordering;
use std::fmt;
use uuid::Uuid;

/// The role a node plays in the cluster (spec §3). `Invalid` is the zero
/// value used for uninitialized/placeholder identities; it is never a
/// registered internal role.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
#[repr(u8)]
pub enum Role {
    Invalid = 0,
    Shard = 1,
    Watchdog = 2,
    Cartograph = 3,
    GameClient = 4,
    GameServer = 5,
    Proxy = 6,
}

impl Role {
    pub const ALL: [Role; 7] = [
        Role::Invalid,
        Role::Shard,
        Role::Watchdog,
        Role::Cartograph,
        Role::GameClient,
        Role::GameServer,
        Role::Proxy,
    ];

    #[inline]
    pub fn from_u8(value: u8) -> Option<Role> {
        Self::ALL.into_iter().find(|role| *role as u8 == value)
    }

    /// Roles that must be pre-registered in the discovery bulletin before a
    /// peer accepts a connection from them (spec §3: "Internal roles (all
    /// except GameClient)").
    #[inline]
    pub fn is_internal(self) -> bool {
        !matches!(self, Role::GameClient | Role::Invalid)
    }

    /// Roles that carry a nil UUID and thus omit it from the canonical
    /// string form (spec §3).
    #[inline]
    fn carries_nil_uuid(self) -> bool {
        matches!(self, Role::Watchdog | Role::Cartograph)
    }

    #[inline]
    pub fn name(self) -> &'static str {
        match self {
            Role::Invalid => "Invalid",
            Role::Shard => "Shard",
            Role::Watchdog => "Watchdog",
            Role::Cartograph => "Cartograph",
            Role::GameClient => "GameClient",
            Role::GameServer => "GameServer",
            Role::Proxy => "Proxy",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// `(role, uuid)` tuple identifying one node in the cluster (spec §3).
///
/// Two identities are equal iff both fields match; ordering is lexicographic
/// on the canonical string form `"<RoleName> <uuid>"` (nil UUID omitted for
/// `Watchdog`/`Cartograph`).
#[derive(Debug, Clone, Copy, Eq, Hash)]
pub struct NodeIdentity {
    pub role: Role,
    pub uuid: Uuid,
}

impl NodeIdentity {
    #[inline]
    pub fn new(role: Role, uuid: Uuid) -> NodeIdentity {
        NodeIdentity { role, uuid }
    }

    /// Builds the identity for a `Watchdog`/`Cartograph`-class singleton node,
    /// which carries a nil UUID.
    #[inline]
    pub fn singleton(role: Role) -> NodeIdentity {
        NodeIdentity {
            role,
            uuid: Uuid::nil(),
        }
    }

    #[inline]
    pub fn is_internal(&self) -> bool {
        self.role.is_internal()
    }

    /// Canonical string form: `"<RoleName> <uuid>"`, nil UUID omitted for
    /// `Watchdog`/`Cartograph` (spec §4.1).
    pub fn canonical(&self) -> String {
        if self.role.carries_nil_uuid() && self.uuid.is_nil() {
            self.role.name().to_string()
        } else {
            format!("{} {}", self.role.name(), self.uuid)
        }
    }
}

impl fmt::Display for NodeIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical())
    }
}

impl PartialEq for NodeIdentity {
    fn eq(&self, other: &Self) -> bool {
        self.role == other.role && self.uuid == other.uuid
    }
}

impl PartialOrd for NodeIdentity {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for NodeIdentity {
    fn cmp(&self, other: &Self) -> Ordering {
        self.canonical().cmp(&other.canonical())
    }
}

impl std::str::FromStr for NodeIdentity {
    type Err = ParseIdentityError;

    /// Parses the canonical string form; primarily used by operational
    /// tooling (`cartograph` filters) rather than the wire protocol, which
    /// always uses the binary encoding below.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.splitn(2, ' ');
        let role_name = parts.next().ok_or(ParseIdentityError)?;
        let role = Role::ALL
            .into_iter()
            .find(|r| r.name() == role_name)
            .ok_or(ParseIdentityError)?;

        let uuid = match parts.next() {
            Some(rest) => rest.parse().map_err(|_| ParseIdentityError)?,
            None if role.carries_nil_uuid() => Uuid::nil(),
            None => return Err(ParseIdentityError),
        };

        Ok(NodeIdentity { role, uuid })
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct ParseIdentityError;

impl fmt::Display for ParseIdentityError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "malformed node identity string")
    }
}

impl std::error::Error for ParseIdentityError {}

impl Encode for NodeIdentity {
    /// Role (u8) followed by the raw 16-byte UUID (spec §4.1).
    fn encode(&self, w: &mut Writer) {
        w.u8(self.role as u8);
        w.uuid(&self.uuid);
    }
}

impl Decode for NodeIdentity {
    fn decode(r: &mut Reader) -> CodecResult<Self> {
        let role_byte = r.u8()?;
        let uuid = r.uuid()?;
        let role = Role::from_u8(role_byte).ok_or(CodecError::BadTag)?;
        Ok(NodeIdentity { role, uuid })
    }
}

/// Parses a raw identity payload the way Interlink does at connection
/// establishment (spec §4.4): a peer whose bytes don't parse, or whose role
/// is not a registered internal role, is tagged `External` rather than
/// rejected outright.
pub fn decode_peer_identity(bytes: &[u8]) -> Option<NodeIdentity> {
    let mut r = Reader::new(bytes);
    NodeIdentity::decode(&mut r).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_form_omits_nil_uuid_for_watchdog() {
        let id = NodeIdentity::singleton(Role::Watchdog);
        assert_eq!(id.canonical(), "Watchdog");
    }

    #[test]
    fn canonical_form_includes_uuid_for_shard() {
        let uuid = Uuid::new_v4();
        let id = NodeIdentity::new(Role::Shard, uuid);
        assert_eq!(id.canonical(), format!("Shard {}", uuid));
    }

    #[test]
    fn equality_requires_both_fields() {
        let uuid = Uuid::new_v4();
        let a = NodeIdentity::new(Role::Shard, uuid);
        let b = NodeIdentity::new(Role::Proxy, uuid);
        assert_ne!(a, b);
        assert_eq!(a, NodeIdentity::new(Role::Shard, uuid));
    }

    #[test]
    fn ordering_is_lexicographic_on_canonical_form() {
        let a = NodeIdentity::singleton(Role::Cartograph);
        let b = NodeIdentity::singleton(Role::Watchdog);
        assert!(a < b, "\"Cartograph\" sorts before \"Watchdog\"");
    }

    #[test]
    fn internal_roles_exclude_only_game_client_and_invalid() {
        assert!(!Role::GameClient.is_internal());
        assert!(!Role::Invalid.is_internal());
        for role in [Role::Shard, Role::Watchdog, Role::Cartograph, Role::GameServer, Role::Proxy] {
            assert!(role.is_internal(), "{:?} should be internal", role);
        }
    }

    #[test]
    fn wire_round_trip() {
        let id = NodeIdentity::new(Role::Proxy, Uuid::new_v4());
        let bytes = id.encode_to_vec();
        let mut r = Reader::new(&bytes);
        assert_eq!(NodeIdentity::decode(&mut r).unwrap(), id);
    }

    #[test]
    fn decode_peer_identity_rejects_garbage() {
        assert!(decode_peer_identity(&[0xff]).is_none());
    }

    #[test]
    fn decode_peer_identity_accepts_unregistered_role_byte() {
        // A role byte past the end of the known enum is a bad tag, not a panic.
        let mut w = Writer::new();
        w.u8(200);
        w.uuid(&Uuid::nil());
        assert!(decode_peer_identity(&w.into_bytes()).is_none());
    }

    #[test]
    fn from_str_round_trips_canonical_form() {
        let id = NodeIdentity::new(Role::Shard, Uuid::new_v4());
        let parsed: NodeIdentity = id.canonical().parse().unwrap();
        assert_eq!(parsed, id);
    }
}
