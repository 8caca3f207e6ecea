//! Encoding a version history into one record.

use super::format::{
    HAS_BBOX, HAS_CHILDREN, HAS_TAGS, MULTI_VERSION, TIMESTAMPS_NOT_SORTED,
};
use super::record::EntityRecord;
use super::replay::{encode_version, ChildIds, ReplayState};
use crate::codec::ByteWriter;
use crate::error::{Error, Result};
use crate::types::{BoundingBox, EntityId, EntityType, EntityVersion, Payload, RecordBase};
use std::borrow::Cow;
use std::collections::HashSet;

/// Encode all versions of one entity against `base`.
///
/// Versions may arrive in any order; they are written newest version first.
/// `children` are candidate sub-records to embed: only those referenced by
/// some version's member list are kept. Ways may embed nodes; relations may
/// embed nodes and ways, never relations.
pub fn build_record(
    versions: &[EntityVersion],
    base: RecordBase,
    children: &[EntityRecord],
) -> Result<Vec<u8>> {
    let first = versions
        .first()
        .ok_or_else(|| Error::InvalidArgument("cannot build a record without versions".into()))?;
    let entity_type = first.entity_type();
    let id = first.id;

    let mut sorted: Vec<&EntityVersion> = versions.iter().collect();
    sorted.sort_by(|a, b| b.version.cmp(&a.version));

    for pair in sorted.windows(2) {
        if pair[0].version == pair[1].version {
            return Err(Error::InvalidArgument(format!(
                "duplicate version {} of {} {}",
                pair[0].version, entity_type, id
            )));
        }
    }
    for v in &sorted {
        if v.id != id || v.entity_type() != entity_type {
            return Err(Error::InvalidArgument(format!(
                "mixed entities in one record: {} {} and {} {}",
                entity_type,
                id,
                v.entity_type(),
                v.id
            )));
        }
        if let Payload::Way(members) = &v.payload {
            if let Some(m) = members.iter().find(|m| m.target != EntityType::Node) {
                return Err(Error::InvalidArgument(format!(
                    "way {} references {} {}; ways may only reference nodes",
                    id, m.target, m.id
                )));
            }
        }
    }

    let (node_children, way_children) = select_children(entity_type, id, &sorted, children)?;
    let node_children = rebase_all(node_children, base)?;
    let way_children = rebase_all(way_children, base)?;
    let node_ids: Vec<EntityId> = node_children.iter().map(|c| c.id()).collect();
    let way_ids: Vec<EntityId> = way_children.iter().map(|c| c.id()).collect();

    let mut key_summary: Vec<u32> = sorted
        .iter()
        .flat_map(|v| v.tags.iter().map(|t| t.key))
        .collect();
    key_summary.sort_unstable();
    key_summary.dedup();

    let bbox = match entity_type {
        EntityType::Node => {
            let boxes: Vec<BoundingBox> = sorted
                .iter()
                .filter(|v| v.visible)
                .filter_map(|v| v.payload.location())
                .map(BoundingBox::from_location)
                .collect();
            BoundingBox::union_all(&boxes)
        }
        _ => BoundingBox::union_all(
            node_children
                .iter()
                .chain(way_children.iter())
                .filter_map(|c| c.bbox_ref()),
        ),
    };

    let timestamps_sorted = sorted
        .windows(2)
        .all(|pair| pair[0].timestamp >= pair[1].timestamp);

    let mut header = entity_type.tag();
    if sorted.len() > 1 {
        header |= MULTI_VERSION;
    }
    if !timestamps_sorted {
        header |= TIMESTAMPS_NOT_SORTED;
    }
    if !key_summary.is_empty() {
        header |= HAS_TAGS;
    }
    if bbox.is_some() {
        header |= HAS_BBOX;
    }
    let has_children = !node_children.is_empty() || !way_children.is_empty();
    if has_children {
        header |= HAS_CHILDREN;
    }

    let mut w = ByteWriter::with_capacity(64 + 16 * sorted.len());
    w.write_byte(header);

    if !key_summary.is_empty() {
        w.write_u32(key_summary.len() as u32);
        let mut prev = 0u32;
        for key in &key_summary {
            w.write_u32(key - prev);
            prev = *key;
        }
    }

    w.write_s64(id.wrapping_sub(base.id));

    if let Some(bbox) = bbox {
        w.write_s64(bbox.min_lon.wrapping_sub(base.lon));
        w.write_s64(bbox.min_lat.wrapping_sub(base.lat));
        w.write_u64((bbox.max_lon - bbox.min_lon) as u64);
        w.write_u64((bbox.max_lat - bbox.min_lat) as u64);
    }

    if has_children {
        write_child_table(&mut w, &node_children);
        if entity_type == EntityType::Relation {
            write_child_table(&mut w, &way_children);
        }
    }

    if sorted.len() > 1 {
        w.write_u32(sorted.len() as u32);
    }

    let child_ids = ChildIds {
        nodes: &node_ids,
        ways: &way_ids,
    };
    let mut state = ReplayState::initial(entity_type, &base);
    for v in sorted {
        let v = normalized(v);
        state = encode_version(&mut w, &v, child_ids, state);
    }

    Ok(w.into_inner())
}

/// Tags must be sorted for the key deltas to be non-negative.
fn normalized(v: &EntityVersion) -> Cow<'_, EntityVersion> {
    if v.tags.windows(2).all(|t| t[0] <= t[1]) {
        Cow::Borrowed(v)
    } else {
        let mut owned = v.clone();
        owned.tags.sort_unstable();
        Cow::Owned(owned)
    }
}

/// Split candidate children into the node and way tables, sorted by id,
/// keeping only referenced ones.
fn select_children<'a>(
    entity_type: EntityType,
    id: EntityId,
    versions: &[&EntityVersion],
    children: &'a [EntityRecord],
) -> Result<(Vec<&'a EntityRecord>, Vec<&'a EntityRecord>)> {
    for child in children {
        let allowed = match (entity_type, child.entity_type()) {
            (EntityType::Way, EntityType::Node) => true,
            (EntityType::Relation, EntityType::Node | EntityType::Way) => true,
            _ => false,
        };
        if !allowed {
            return Err(Error::InvalidArgument(format!(
                "{} {} cannot embed {} {}",
                entity_type,
                id,
                child.entity_type(),
                child.id()
            )));
        }
    }

    let referenced: HashSet<(EntityType, EntityId)> = versions
        .iter()
        .flat_map(|v| v.members().iter().map(|m| (m.target, m.id)))
        .collect();

    let mut nodes = Vec::new();
    let mut ways = Vec::new();
    for child in children {
        if !referenced.contains(&(child.entity_type(), child.id())) {
            tracing::trace!(
                parent = id,
                child = child.id(),
                "dropping unreferenced child record"
            );
            continue;
        }
        match child.entity_type() {
            EntityType::Node => nodes.push(child),
            _ => ways.push(child),
        }
    }

    nodes.sort_by_key(|c| c.id());
    nodes.dedup_by_key(|c| c.id());
    ways.sort_by_key(|c| c.id());
    ways.dedup_by_key(|c| c.id());
    Ok((nodes, ways))
}

fn rebase_all(children: Vec<&EntityRecord>, base: RecordBase) -> Result<Vec<EntityRecord>> {
    children
        .into_iter()
        .map(|c| {
            if c.base() == base {
                Ok(c.clone())
            } else {
                c.rebase(base)
            }
        })
        .collect()
}

fn write_child_table(w: &mut ByteWriter, children: &[EntityRecord]) {
    w.write_u32(children.len() as u32);
    for child in children {
        w.write_byte_array(child.as_bytes());
    }
}

