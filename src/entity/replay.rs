//! The changed-bitmask protocol, encode and decode side.
//!
//! Both directions thread a [`ReplayState`] by value: the state goes in,
//! the next state comes out. The encoder and the decoder start from the
//! same initial state and apply the same transitions, which is what lets a
//! version store only the fields that differ from its newer neighbour.

use super::format::{
    ChildRef, HAS_LOCATION, PAYLOAD_CHANGED, TAGS_CHANGED, USER_CHANGED, VISIBLE,
};
use crate::codec::{ByteReader, ByteWriter};
use crate::error::DecodeError;
use crate::types::{
    EntityId, EntityType, EntityVersion, Location, Member, Payload, RecordBase, Tag, Timestamp,
};

/// Values carried from one version to the next during replay.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReplayState {
    /// Version number of the previous step; `None` before the first.
    pub version: Option<u32>,
    pub timestamp: i64,
    pub changeset: i64,
    pub user_id: i64,
    pub tags: Vec<Tag>,
    pub payload: Payload,
    pub last_lon: i64,
    pub last_lat: i64,
    pub last_member_id: EntityId,
}

impl ReplayState {
    pub fn initial(entity_type: EntityType, base: &RecordBase) -> Self {
        Self {
            version: None,
            timestamp: base.timestamp,
            changeset: 0,
            user_id: 0,
            tags: Vec::new(),
            payload: Payload::empty(entity_type),
            last_lon: base.lon,
            last_lat: base.lat,
            last_member_id: base.id,
        }
    }
}

/// Sorted ids of a record's embedded children, one table per member type.
#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct ChildIds<'a> {
    pub nodes: &'a [EntityId],
    pub ways: &'a [EntityId],
}

impl<'a> ChildIds<'a> {
    fn table(&self, target: EntityType) -> &'a [EntityId] {
        match target {
            EntityType::Node => self.nodes,
            EntityType::Way => self.ways,
            EntityType::Relation => &[],
        }
    }

    fn child_ref(&self, member: &Member) -> ChildRef {
        match self.table(member.target).binary_search(&member.id) {
            Ok(index) => ChildRef::Embedded(index as u32),
            Err(_) => ChildRef::ByReference(member.id),
        }
    }

    fn resolve(&self, target: EntityType, child: ChildRef) -> Result<EntityId, DecodeError> {
        match child {
            ChildRef::ByReference(id) => Ok(id),
            ChildRef::Embedded(index) => {
                let table = self.table(target);
                table
                    .get(index as usize)
                    .copied()
                    .ok_or(DecodeError::ChildIndexOutOfRange {
                        index: index as u64,
                        len: table.len(),
                    })
            }
        }
    }
}

/// Write one version. `version.tags` must already be sorted.
pub(crate) fn encode_version(
    w: &mut ByteWriter,
    version: &EntityVersion,
    children: ChildIds<'_>,
    state: ReplayState,
) -> ReplayState {
    let mut next = state;

    match next.version {
        None => w.write_u32(version.version),
        Some(prev) => w.write_u32(prev - version.version),
    }
    next.version = Some(version.version);

    let mut flags = 0u8;
    if version.visible {
        flags |= VISIBLE;
    }
    let user_changed = version.user_id != next.user_id;
    if user_changed {
        flags |= USER_CHANGED;
    }
    let tags_changed = version.tags != next.tags;
    if tags_changed {
        flags |= TAGS_CHANGED;
    }
    let payload_changed = version.payload != next.payload;
    if payload_changed {
        flags |= PAYLOAD_CHANGED;
    }
    if let Payload::Node(Some(_)) = version.payload {
        flags |= HAS_LOCATION;
    }
    w.write_byte(flags);

    w.write_s64(version.timestamp.0.wrapping_sub(next.timestamp));
    next.timestamp = version.timestamp.0;
    w.write_s64(version.changeset.wrapping_sub(next.changeset));
    next.changeset = version.changeset;

    if user_changed {
        w.write_s64(version.user_id.wrapping_sub(next.user_id));
        next.user_id = version.user_id;
    }

    if tags_changed {
        w.write_u32(version.tags.len() as u32);
        let mut prev_key = 0u32;
        for tag in &version.tags {
            w.write_u32(tag.key - prev_key);
            w.write_u32(tag.value);
            prev_key = tag.key;
        }
        next.tags = version.tags.clone();
    }

    if payload_changed {
        match &version.payload {
            Payload::Node(Some(loc)) => {
                w.write_s64((loc.lon as i64).wrapping_sub(next.last_lon));
                w.write_s64((loc.lat as i64).wrapping_sub(next.last_lat));
                next.last_lon = loc.lon as i64;
                next.last_lat = loc.lat as i64;
            }
            Payload::Node(None) => {}
            Payload::Way(members) => {
                w.write_u32(members.len() as u32);
                for member in members {
                    children.child_ref(member).write(w, next.last_member_id);
                    next.last_member_id = member.id;
                }
            }
            Payload::Relation(members) => {
                w.write_u32(members.len() as u32);
                for member in members {
                    w.write_u32(member.target.tag() as u32);
                    w.write_u32(member.role);
                    children.child_ref(member).write(w, next.last_member_id);
                    next.last_member_id = member.id;
                }
            }
        }
        next.payload = version.payload.clone();
    }

    next
}

/// Read one version, returning it together with the state for the next step.
pub(crate) fn decode_version(
    r: &mut ByteReader<'_>,
    id: EntityId,
    children: ChildIds<'_>,
    state: ReplayState,
) -> Result<(EntityVersion, ReplayState), DecodeError> {
    let mut next = state;

    let raw_version = r.read_u32()?;
    let version = match next.version {
        None => raw_version,
        Some(prev) => prev
            .checked_sub(raw_version)
            .filter(|_| raw_version > 0)
            .ok_or(DecodeError::OutOfRange("version decrement"))?,
    };
    next.version = Some(version);

    let flags = r.read_raw_byte()?;

    next.timestamp = next.timestamp.wrapping_add(r.read_s64()?);
    next.changeset = next.changeset.wrapping_add(r.read_s64()?);

    if flags & USER_CHANGED != 0 {
        next.user_id = next.user_id.wrapping_add(r.read_s64()?);
    }

    if flags & TAGS_CHANGED != 0 {
        let count = r.read_u32()? as usize;
        let mut tags = Vec::with_capacity(count.min(r.remaining()));
        let mut prev_key = 0u32;
        for _ in 0..count {
            let key = prev_key
                .checked_add(r.read_u32()?)
                .ok_or(DecodeError::OutOfRange("tag key"))?;
            let value = r.read_u32()?;
            tags.push(Tag { key, value });
            prev_key = key;
        }
        next.tags = tags;
    }

    if flags & PAYLOAD_CHANGED != 0 {
        next.payload = match next.payload.entity_type() {
            EntityType::Node => {
                if flags & HAS_LOCATION != 0 {
                    next.last_lon = next.last_lon.wrapping_add(r.read_s64()?);
                    next.last_lat = next.last_lat.wrapping_add(r.read_s64()?);
                    let lon = i32::try_from(next.last_lon)
                        .map_err(|_| DecodeError::OutOfRange("longitude"))?;
                    let lat = i32::try_from(next.last_lat)
                        .map_err(|_| DecodeError::OutOfRange("latitude"))?;
                    Payload::Node(Some(Location { lon, lat }))
                } else {
                    Payload::Node(None)
                }
            }
            EntityType::Way => {
                let count = r.read_u32()? as usize;
                let mut members = Vec::with_capacity(count.min(r.remaining()));
                for _ in 0..count {
                    let child = ChildRef::read(r, next.last_member_id)?;
                    let member_id = children.resolve(EntityType::Node, child)?;
                    members.push(Member::node(member_id));
                    next.last_member_id = member_id;
                }
                Payload::Way(members)
            }
            EntityType::Relation => {
                let count = r.read_u32()? as usize;
                let mut members = Vec::with_capacity(count.min(r.remaining()));
                for _ in 0..count {
                    let tag = r.read_u32()? as u64;
                    let target =
                        EntityType::from_tag(tag).ok_or(DecodeError::InvalidEntityType(tag))?;
                    let role = r.read_u32()?;
                    let child = ChildRef::read(r, next.last_member_id)?;
                    let member_id = children.resolve(target, child)?;
                    members.push(Member::new(target, member_id, role));
                    next.last_member_id = member_id;
                }
                Payload::Relation(members)
            }
        };
    }

    let decoded = EntityVersion {
        id,
        version,
        visible: flags & VISIBLE != 0,
        timestamp: Timestamp(next.timestamp),
        changeset: next.changeset,
        user_id: next.user_id,
        tags: next.tags.clone(),
        payload: next.payload.clone(),
    };
    Ok((decoded, next))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(version: u32, ts: i64, user: i64, tags: Vec<Tag>, loc: Option<(i32, i32)>) -> EntityVersion {
        EntityVersion {
            id: 42,
            version,
            visible: loc.is_some(),
            timestamp: Timestamp(ts),
            changeset: 1000 + version as i64,
            user_id: user,
            tags,
            payload: Payload::Node(loc.map(|(lon, lat)| Location::new(lon, lat))),
        }
    }

    #[test]
    fn test_unchanged_fields_are_not_restored() {
        let base = RecordBase::new(40, 0, 0, 0);
        let v2 = node(2, 200, 7, vec![Tag::new(1, 1)], Some((10, 10)));
        let v1 = node(1, 100, 7, vec![Tag::new(1, 1)], Some((10, 10)));

        let mut w = ByteWriter::new();
        let state = ReplayState::initial(EntityType::Node, &base);
        let state = encode_version(&mut w, &v2, ChildIds::default(), state);
        let after_first = w.position();
        encode_version(&mut w, &v1, ChildIds::default(), state);
        let bytes = w.into_inner();

        // version decrement, flags, timestamp delta, changeset delta only
        let second = &bytes[after_first..];
        assert_eq!(second[1], VISIBLE | HAS_LOCATION);
        assert_eq!(second.len(), 5);
    }

    #[test]
    fn test_state_threads_through_decode() {
        let base = RecordBase::new(40, 50, 5, 5);
        let versions = [
            node(3, 300, 9, vec![], None),
            node(2, 200, 7, vec![Tag::new(1, 2), Tag::new(4, 1)], Some((-10, 20))),
            node(1, 100, 7, vec![], Some((-10, 21))),
        ];

        let mut w = ByteWriter::new();
        let mut state = ReplayState::initial(EntityType::Node, &base);
        for v in &versions {
            state = encode_version(&mut w, v, ChildIds::default(), state);
        }
        let bytes = w.into_inner();

        let mut r = ByteReader::new(&bytes);
        let mut state = ReplayState::initial(EntityType::Node, &base);
        for expected in &versions {
            let (decoded, next) = decode_version(&mut r, 42, ChildIds::default(), state).unwrap();
            assert_eq!(&decoded, expected);
            state = next;
        }
        assert!(r.is_empty());
        assert_eq!(state.version, Some(1));
        assert_eq!(state.last_lat, 21);
    }

    #[test]
    fn test_embedded_members_resolve_through_tables() {
        let base = RecordBase::new(0, 0, 0, 0);
        let nodes = [5, 9];
        let children = ChildIds {
            nodes: &nodes,
            ways: &[],
        };
        let way = EntityVersion {
            id: 1,
            version: 1,
            visible: true,
            timestamp: Timestamp(1),
            changeset: 1,
            user_id: 1,
            tags: vec![],
            payload: Payload::Way(vec![Member::node(9), Member::node(6), Member::node(5)]),
        };

        let mut w = ByteWriter::new();
        encode_version(
            &mut w,
            &way,
            children,
            ReplayState::initial(EntityType::Way, &base),
        );
        let bytes = w.into_inner();

        let mut r = ByteReader::new(&bytes);
        let (decoded, _) = decode_version(
            &mut r,
            1,
            children,
            ReplayState::initial(EntityType::Way, &base),
        )
        .unwrap();
        assert_eq!(decoded, way);

        // Without the table the embedded indexes cannot be resolved.
        let mut r = ByteReader::new(&bytes);
        let err = decode_version(
            &mut r,
            1,
            ChildIds::default(),
            ReplayState::initial(EntityType::Way, &base),
        )
        .unwrap_err();
        assert!(matches!(err, DecodeError::ChildIndexOutOfRange { .. }));
    }
}
