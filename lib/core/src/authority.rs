use crate::entity::Entity;
use atlasnet_codec::{CodecError, CodecResult, Decode, Encode, Reader, Writer};
use atlasnet_ident::NodeIdentity;
use std::collections::HashMap;
use uuid::Uuid;

/// Where an entity's authority currently stands (spec §4.9).
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum AuthorityState {
    /// This shard is the sole source of truth for the entity.
    Authoritative,
    /// Authority is being handed to `passing_to`; the entity is still served
    /// locally until the transfer completes.
    Passing,
}

const STATE_TAG_AUTHORITATIVE: u8 = 0;
const STATE_TAG_PASSING: u8 = 1;

impl Encode for AuthorityState {
    fn encode(&self, w: &mut Writer) {
        match self {
            AuthorityState::Authoritative => w.tag(STATE_TAG_AUTHORITATIVE),
            AuthorityState::Passing => w.tag(STATE_TAG_PASSING),
        };
    }
}

impl Decode for AuthorityState {
    fn decode(r: &mut Reader) -> CodecResult<Self> {
        match r.tag(2)? {
            STATE_TAG_AUTHORITATIVE => Ok(AuthorityState::Authoritative),
            STATE_TAG_PASSING => Ok(AuthorityState::Passing),
            _ => unreachable!("Reader::tag bounds-checks the discriminant"),
        }
    }
}

/// One row of the entity ledger (spec §4.9): the entity's last known
/// snapshot plus where authority over it currently stands.
#[derive(Debug, Clone, PartialEq)]
pub struct AuthorityEntry {
    pub snapshot: Entity,
    pub state: AuthorityState,
    pub passing_to: Option<NodeIdentity>,
}

impl AuthorityEntry {
    pub fn authoritative(snapshot: Entity) -> AuthorityEntry {
        AuthorityEntry {
            snapshot,
            state: AuthorityState::Authoritative,
            passing_to: None,
        }
    }

    pub fn mark_passing(&mut self, to: NodeIdentity) {
        self.state = AuthorityState::Passing;
        self.passing_to = Some(to);
    }

    pub fn mark_authoritative(&mut self) {
        self.state = AuthorityState::Authoritative;
        self.passing_to = None;
    }

    #[inline]
    pub fn is_authoritative(&self) -> bool {
        matches!(self.state, AuthorityState::Authoritative)
    }
}

impl Encode for AuthorityEntry {
    fn encode(&self, w: &mut Writer) {
        self.snapshot.encode(w);
        self.state.encode(w);
        match &self.passing_to {
            Some(id) => {
                w.bool(true);
                id.encode(w);
            }
            None => {
                w.bool(false);
            }
        }
    }
}

impl Decode for AuthorityEntry {
    fn decode(r: &mut Reader) -> CodecResult<Self> {
        let snapshot = Entity::decode(r)?;
        let state = AuthorityState::decode(r)?;
        let passing_to = if r.bool()? {
            Some(NodeIdentity::decode(r)?)
        } else {
            None
        };

        if matches!(state, AuthorityState::Passing) && passing_to.is_none() {
            return Err(CodecError::BadTag);
        }

        Ok(AuthorityEntry {
            snapshot,
            state,
            passing_to,
        })
    }
}

/// One row of `authority_telemetry` (spec §4.3): what a shard publishes to
/// the bulletin for each entity it tracks, for the Cartograph dashboard.
#[derive(Debug, Clone, PartialEq)]
pub struct TelemetryRow {
    pub entity_id: Uuid,
    pub owner: NodeIdentity,
    pub transform: crate::transform::Transform,
    pub client_id: Uuid,
    pub is_client: bool,
}

impl Encode for TelemetryRow {
    fn encode(&self, w: &mut Writer) {
        w.uuid(&self.entity_id);
        self.owner.encode(w);
        self.transform.encode(w);
        w.uuid(&self.client_id);
        w.bool(self.is_client);
    }
}

impl Decode for TelemetryRow {
    fn decode(r: &mut Reader) -> CodecResult<Self> {
        Ok(TelemetryRow {
            entity_id: r.uuid()?,
            owner: NodeIdentity::decode(r)?,
            transform: crate::transform::Transform::decode(r)?,
            client_id: r.uuid()?,
            is_client: r.bool()?,
        })
    }
}

/// Per-shard collection of `AuthorityEntry` rows, keyed by entity id (spec
/// §4.10). This is the live bookkeeping the debug orbit simulator (spec
/// §4.10) and the Transfer Coordinator drive; `AuthorityEntry` above is just
/// the row shape it stores.
#[derive(Debug, Default)]
pub struct AuthorityTracker {
    entries: HashMap<Uuid, AuthorityEntry>,
    self_identity: Option<NodeIdentity>,
}

impl AuthorityTracker {
    pub fn new(self_identity: NodeIdentity) -> AuthorityTracker {
        AuthorityTracker {
            entries: HashMap::new(),
            self_identity: Some(self_identity),
        }
    }

    /// Replaces the tracked set wholesale: entities no longer present are
    /// dropped, new ones enter as `Authoritative` (spec §4.10).
    pub fn set_owned<I: IntoIterator<Item = Entity>>(&mut self, entities: I) {
        let mut next = HashMap::new();
        for entity in entities {
            let entry = match self.entries.remove(&entity.entity_id) {
                Some(mut existing) => {
                    existing.snapshot = entity;
                    existing
                }
                None => AuthorityEntry::authoritative(entity),
            };
            next.insert(entry.snapshot.entity_id, entry);
        }
        self.entries = next;
    }

    pub fn insert_authoritative(&mut self, entity: Entity) {
        self.entries.insert(entity.entity_id, AuthorityEntry::authoritative(entity));
    }

    pub fn remove(&mut self, entity_id: Uuid) -> Option<AuthorityEntry> {
        self.entries.remove(&entity_id)
    }

    pub fn get(&self, entity_id: Uuid) -> Option<&AuthorityEntry> {
        self.entries.get(&entity_id)
    }

    /// Marks `entity_id` as passing to `target`. Returns `true` only if this
    /// is a new passing decision — i.e. the entity was authoritative, or was
    /// already passing to a *different* target (spec §8 idempotence).
    pub fn mark_passing(&mut self, entity_id: Uuid, target: NodeIdentity) -> bool {
        match self.entries.get_mut(&entity_id) {
            Some(entry) => {
                let changed = match (entry.state, entry.passing_to) {
                    (AuthorityState::Passing, Some(existing)) => existing != target,
                    _ => true,
                };
                if changed {
                    entry.mark_passing(target);
                }
                changed
            }
            None => false,
        }
    }

    /// Resets `entity_id` to authoritative. A no-op if it already was (spec
    /// §8 idempotence).
    pub fn mark_authoritative(&mut self, entity_id: Uuid) {
        if let Some(entry) = self.entries.get_mut(&entity_id) {
            if !entry.is_authoritative() {
                entry.mark_authoritative();
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// A stable snapshot for iteration: a sorted `Vec` rather than a live
    /// reference into the map, so callers (telemetry publication, the debug
    /// simulator) never observe a mutation mid-iteration (spec §4.10).
    pub fn snapshot(&self) -> Vec<AuthorityEntry> {
        let mut rows: Vec<AuthorityEntry> = self.entries.values().cloned().collect();
        rows.sort_by_key(|e| e.snapshot.entity_id);
        rows
    }

    /// Emits one `TelemetryRow` per tracked entity for bulletin publication
    /// (spec §4.3 `authority_telemetry`, §4.10 `collect_telemetry_rows`).
    /// `passing_to` entities still report the local identity as owner: the
    /// entity remains served here until the transfer's `Commit` stage.
    pub fn collect_telemetry_rows(&self) -> Vec<TelemetryRow> {
        let owner = self.self_identity.expect("AuthorityTracker must be constructed with an identity");
        self.snapshot()
            .into_iter()
            .map(|entry| TelemetryRow {
                entity_id: entry.snapshot.entity_id,
                owner,
                transform: entry.snapshot.transform,
                client_id: entry.snapshot.client_id,
                is_client: entry.snapshot.is_client,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transform::{Aabb3, Transform};
    use glam::Vec3;

    fn sample_entry() -> AuthorityEntry {
        let transform = Transform::new(0, Vec3::ZERO, Aabb3::new(Vec3::ZERO, Vec3::ONE));
        AuthorityEntry::authoritative(Entity::new(Uuid::new_v4(), transform))
    }

    #[test]
    fn mark_passing_sets_destination() {
        let mut entry = sample_entry();
        let target = NodeIdentity::singleton(atlasnet_ident::Role::Watchdog);
        entry.mark_passing(target);
        assert_eq!(entry.state, AuthorityState::Passing);
        assert_eq!(entry.passing_to, Some(target));
    }

    #[test]
    fn round_trips_with_and_without_passing_to() {
        let mut entry = sample_entry();
        let bytes = entry.encode_to_vec();
        let mut r = Reader::new(&bytes);
        assert_eq!(AuthorityEntry::decode(&mut r).unwrap(), entry);

        entry.mark_passing(NodeIdentity::singleton(atlasnet_ident::Role::Cartograph));
        let bytes = entry.encode_to_vec();
        let mut r = Reader::new(&bytes);
        assert_eq!(AuthorityEntry::decode(&mut r).unwrap(), entry);
    }

    fn tracked_entity() -> Entity {
        let transform = Transform::new(0, Vec3::ZERO, Aabb3::new(Vec3::ZERO, Vec3::ONE));
        Entity::new(Uuid::new_v4(), transform)
    }

    #[test]
    fn mark_passing_second_call_with_same_target_is_not_new() {
        let mut tracker = AuthorityTracker::new(NodeIdentity::singleton(atlasnet_ident::Role::Watchdog));
        let e = tracked_entity();
        let id = e.entity_id;
        tracker.insert_authoritative(e);

        let target = NodeIdentity::singleton(atlasnet_ident::Role::Cartograph);
        assert!(tracker.mark_passing(id, target), "first call is a new decision");
        assert!(!tracker.mark_passing(id, target), "same target again is not new");
    }

    #[test]
    fn mark_passing_to_a_different_target_is_new() {
        let mut tracker = AuthorityTracker::new(NodeIdentity::singleton(atlasnet_ident::Role::Watchdog));
        let e = tracked_entity();
        let id = e.entity_id;
        tracker.insert_authoritative(e);

        let first = NodeIdentity::singleton(atlasnet_ident::Role::Cartograph);
        let second = NodeIdentity::new(atlasnet_ident::Role::Shard, Uuid::new_v4());
        assert!(tracker.mark_passing(id, first));
        assert!(tracker.mark_passing(id, second));
    }

    #[test]
    fn mark_authoritative_is_idempotent() {
        let mut tracker = AuthorityTracker::new(NodeIdentity::singleton(atlasnet_ident::Role::Watchdog));
        let e = tracked_entity();
        let id = e.entity_id;
        tracker.insert_authoritative(e);

        tracker.mark_authoritative(id);
        assert!(tracker.get(id).unwrap().is_authoritative());
        tracker.mark_authoritative(id);
        assert!(tracker.get(id).unwrap().is_authoritative());
    }

    #[test]
    fn set_owned_drops_entities_not_present() {
        let mut tracker = AuthorityTracker::new(NodeIdentity::singleton(atlasnet_ident::Role::Watchdog));
        let kept = tracked_entity();
        let kept_id = kept.entity_id;
        let dropped = tracked_entity();
        tracker.insert_authoritative(kept.clone());
        tracker.insert_authoritative(dropped.clone());

        tracker.set_owned(vec![kept]);

        assert!(tracker.get(kept_id).is_some());
        assert!(tracker.get(dropped.entity_id).is_none());
    }

    #[test]
    fn collect_telemetry_rows_reports_self_as_owner() {
        let identity = NodeIdentity::new(atlasnet_ident::Role::Shard, Uuid::new_v4());
        let mut tracker = AuthorityTracker::new(identity);
        tracker.insert_authoritative(tracked_entity());

        let rows = tracker.collect_telemetry_rows();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].owner, identity);
    }
}
