//! Property tests for the record format and the grid.
//!
//! Histories cover all three entity types. Way and relation members mix
//! embedded children with by-id references, and member lists may be empty
//! or sit on deleted versions.

use osh_grid::{
    EntityId, EntityRecord, EntityType, EntityVersion, Location, Member, Payload, RecordBase,
    SpatialGrid, Tag, Timestamp, MAX_LAT, MAX_LON, MAX_ZOOM,
};
use proptest::prelude::*;
use std::collections::BTreeSet;

fn arb_tags() -> impl Strategy<Value = Vec<Tag>> {
    prop::collection::btree_map(0u32..50, 0u32..1000, 0..5)
        .prop_map(|m| m.into_iter().map(|(k, v)| Tag::new(k, v)).collect())
}

fn arb_location() -> impl Strategy<Value = Option<Location>> {
    prop::option::weighted(
        0.8,
        (-1_800_000_000i32..=1_800_000_000, -900_000_000i32..=900_000_000)
            .prop_map(|(lon, lat)| Location::new(lon, lat)),
    )
}

/// Node histories with versions 1..=n and timestamps in any order.
fn arb_history() -> impl Strategy<Value = Vec<EntityVersion>> {
    (1i64..1_000_000, prop::collection::vec(
        (0i64..10_000, 1i64..500, 1i64..50, arb_tags(), arb_location()),
        1..8,
    ))
        .prop_map(|(id, steps)| {
            steps
                .into_iter()
                .enumerate()
                .map(|(i, (ts, changeset, user_id, tags, location))| EntityVersion {
                    id,
                    version: i as u32 + 1,
                    visible: location.is_some(),
                    timestamp: Timestamp(ts),
                    changeset,
                    user_id,
                    tags,
                    payload: Payload::Node(location),
                })
                .collect()
        })
}

/// A one-version child record, placed by its id.
fn child(entity_type: EntityType, id: EntityId) -> EntityRecord {
    let payload = match entity_type {
        EntityType::Node => Payload::Node(Some(Location::new(id as i32 * 1_000, -(id as i32) * 700))),
        EntityType::Way => Payload::Way(vec![Member::node(1), Member::node(2)]),
        EntityType::Relation => Payload::Relation(vec![]),
    };
    let version = EntityVersion {
        id,
        version: 1,
        visible: true,
        timestamp: Timestamp(id * 10),
        changeset: 1,
        user_id: 1,
        tags: vec![],
        payload,
    };
    EntityRecord::new(&[version], RecordBase::default(), &[]).unwrap()
}

/// Version steps for a way or relation: timestamp, changeset, tags,
/// visibility and a member list that may be empty.
fn arb_steps<M: std::fmt::Debug + Clone>(
    member: impl Strategy<Value = M>,
) -> impl Strategy<Value = Vec<(i64, i64, Vec<Tag>, bool, Vec<M>)>> {
    prop::collection::vec(
        (
            0i64..10_000,
            1i64..500,
            arb_tags(),
            prop::bool::weighted(0.8),
            prop::collection::vec(member, 0..6),
        ),
        1..6,
    )
}

fn versions_of(
    id: EntityId,
    steps: Vec<(i64, i64, Vec<Tag>, bool, Vec<Member>)>,
    payload: fn(Vec<Member>) -> Payload,
) -> Vec<EntityVersion> {
    steps
        .into_iter()
        .enumerate()
        .map(|(i, (ts, changeset, tags, visible, members))| EntityVersion {
            id,
            version: i as u32 + 1,
            visible,
            timestamp: Timestamp(ts),
            changeset,
            user_id: 3,
            tags,
            payload: payload(members),
        })
        .collect()
}

/// Way histories over nodes 1..=6, some of them embedded and the rest
/// referenced by id only.
fn arb_way_history() -> impl Strategy<Value = (Vec<EntityVersion>, Vec<EntityRecord>)> {
    (
        1i64..1_000_000,
        arb_steps((1i64..=6).prop_map(Member::node)),
        prop::collection::btree_set(1i64..=6, 0..6),
    )
        .prop_map(|(id, steps, embedded)| {
            let versions = versions_of(id, steps, Payload::Way);
            let children = embedded
                .into_iter()
                .map(|n| child(EntityType::Node, n))
                .collect();
            (versions, children)
        })
}

/// Relation histories over nodes 1..=3, ways 101..=103 and relations
/// 201..=203. Some nodes and ways are embedded; relations never are.
fn arb_relation_history() -> impl Strategy<Value = (Vec<EntityVersion>, Vec<EntityRecord>)> {
    let member = (0u8..3, 1i64..=3, 0u32..4).prop_map(|(kind, n, role)| match kind {
        0 => Member::new(EntityType::Node, n, role),
        1 => Member::new(EntityType::Way, 100 + n, role),
        _ => Member::new(EntityType::Relation, 200 + n, role),
    });
    (
        1i64..1_000_000,
        arb_steps(member),
        prop::collection::btree_set(1i64..=3, 0..3),
        prop::collection::btree_set(101i64..=103, 0..3),
    )
        .prop_map(|(id, steps, nodes, ways)| {
            let versions = versions_of(id, steps, Payload::Relation);
            let children = nodes
                .into_iter()
                .map(|n| child(EntityType::Node, n))
                .chain(ways.into_iter().map(|w| child(EntityType::Way, w)))
                .collect();
            (versions, children)
        })
}

/// Children that some version references, as (type, id).
fn referenced(versions: &[EntityVersion], children: &[EntityRecord]) -> BTreeSet<(EntityType, EntityId)> {
    let members: BTreeSet<(EntityType, EntityId)> = versions
        .iter()
        .flat_map(|v| v.members().iter().map(|m| (m.target, m.id)))
        .collect();
    children
        .iter()
        .map(|c| (c.entity_type(), c.id()))
        .filter(|key| members.contains(key))
        .collect()
}

fn embedded(record: &EntityRecord) -> BTreeSet<(EntityType, EntityId)> {
    record
        .node_children()
        .iter()
        .chain(record.way_children())
        .map(|c| (c.entity_type(), c.id()))
        .collect()
}

fn arb_base() -> impl Strategy<Value = RecordBase> {
    (
        0i64..1_000_000,
        -1_000i64..1_000,
        -MAX_LON..=MAX_LON,
        -MAX_LAT..=MAX_LAT,
    )
        .prop_map(|(id, ts, lon, lat)| RecordBase::new(id, ts, lon, lat))
}

fn newest_first(versions: &[EntityVersion]) -> Vec<EntityVersion> {
    let mut out = versions.to_vec();
    out.sort_by(|a, b| b.version.cmp(&a.version));
    out
}

proptest! {
    #[test]
    fn prop_record_preserves_history(history in arb_history(), base in arb_base()) {
        let record = EntityRecord::new(&history, base, &[]).unwrap();
        prop_assert_eq!(record.id(), history[0].id);
        prop_assert_eq!(record.version_count(), history.len());
        prop_assert_eq!(record.all_versions().unwrap(), newest_first(&history));
    }

    #[test]
    fn prop_rebase_composes(history in arb_history(), a in arb_base(), b in arb_base()) {
        let record = EntityRecord::new(&history, a, &[]).unwrap();
        let same = record.rebase(a).unwrap();
        prop_assert_eq!(same.as_bytes(), record.as_bytes());

        let back = record.rebase(b).unwrap().rebase(a).unwrap();
        prop_assert_eq!(back.as_bytes(), record.as_bytes());
        prop_assert_eq!(record.rebase(b).unwrap().bbox(), record.bbox());
    }

    #[test]
    fn prop_way_record_preserves_history(
        (history, children) in arb_way_history(),
        base in arb_base(),
    ) {
        let record = EntityRecord::new(&history, base, &children).unwrap();
        prop_assert_eq!(record.all_versions().unwrap(), newest_first(&history));
        prop_assert_eq!(embedded(&record), referenced(&history, &children));
        for version in &history {
            for member in version.members() {
                let found = record.resolve(member).map(|c| c.id());
                let expected = children.iter().any(|c| c.id() == member.id).then_some(member.id);
                prop_assert_eq!(found, expected);
            }
        }
    }

    #[test]
    fn prop_relation_record_preserves_history(
        (history, children) in arb_relation_history(),
        base in arb_base(),
    ) {
        let record = EntityRecord::new(&history, base, &children).unwrap();
        prop_assert_eq!(record.all_versions().unwrap(), newest_first(&history));
        prop_assert_eq!(embedded(&record), referenced(&history, &children));
        for version in &history {
            for member in version.members() {
                let found = record.resolve(member).map(|c| (c.entity_type(), c.id()));
                let expected = (member.target != EntityType::Relation
                    && children.iter().any(|c| c.id() == member.id))
                .then_some((member.target, member.id));
                prop_assert_eq!(found, expected);
            }
        }
    }

    #[test]
    fn prop_rebase_composes_with_children(
        (history, children) in arb_relation_history(),
        a in arb_base(),
        b in arb_base(),
    ) {
        let record = EntityRecord::new(&history, a, &children).unwrap();
        let back = record.rebase(b).unwrap().rebase(a).unwrap();
        prop_assert_eq!(back.as_bytes(), record.as_bytes());
        prop_assert_eq!(record.rebase(b).unwrap().all_versions().unwrap(), newest_first(&history));
    }

    #[test]
    fn prop_version_at_matches_linear_scan(history in arb_history(), t in -10i64..10_100) {
        let record = EntityRecord::new(&history, RecordBase::default(), &[]).unwrap();
        let expected = history
            .iter()
            .filter(|v| v.timestamp.0 <= t)
            .max_by_key(|v| (v.timestamp, v.version))
            .cloned();
        prop_assert_eq!(record.version_at(Timestamp(t)).unwrap(), expected);
    }

    #[test]
    fn prop_cell_contains_its_points(
        lon in -MAX_LON..=MAX_LON,
        lat in -MAX_LAT..=MAX_LAT,
        zoom in 1u32..=MAX_ZOOM,
    ) {
        let cell = SpatialGrid::cell_id(lon, lat, zoom).unwrap();
        prop_assert!(SpatialGrid::bounding_box(cell).unwrap().contains_point(lon, lat));

        let parent = SpatialGrid::parent(cell).unwrap().unwrap();
        prop_assert_eq!(parent, SpatialGrid::cell_id(lon, lat, zoom - 1).unwrap());
        prop_assert!(SpatialGrid::bounding_box(parent)
            .unwrap()
            .contains(&SpatialGrid::bounding_box(cell).unwrap()));
    }
}
