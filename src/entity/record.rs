//! Parsed, immutable view of one entity's version history.

use super::builder::build_record;
use super::format::{
    HAS_BBOX, HAS_CHILDREN, HAS_TAGS, MULTI_VERSION, TIMESTAMPS_NOT_SORTED, TYPE_MASK,
};
use super::replay::{decode_version, ChildIds, ReplayState};
use crate::codec::ByteReader;
use crate::error::{DecodeError, Error, Result};
use crate::types::{
    BoundingBox, EntityId, EntityType, EntityVersion, Member, RecordBase, Timestamp,
};
use std::fmt;
use std::ops::Range;
use std::sync::Arc;

/// All versions of one node, way or relation, backed by a shared buffer.
///
/// Parsing reads only the header, tag-key summary, bounding box and child
/// tables; versions are decoded on demand by [`EntityRecord::versions`].
/// Cloning is cheap and clones share the buffer.
#[derive(Clone)]
pub struct EntityRecord {
    data: Arc<[u8]>,
    range: Range<usize>,
    base: RecordBase,
    header: u8,
    entity_type: EntityType,
    id: EntityId,
    key_summary: Arc<[u32]>,
    bbox: Option<BoundingBox>,
    node_children: Arc<[EntityRecord]>,
    way_children: Arc<[EntityRecord]>,
    node_ids: Arc<[EntityId]>,
    way_ids: Arc<[EntityId]>,
    version_count: u32,
    /// Offset of the first version, relative to `range.start`.
    versions_offset: usize,
}

impl EntityRecord {
    /// Build and parse in one step.
    pub fn new(
        versions: &[EntityVersion],
        base: RecordBase,
        children: &[EntityRecord],
    ) -> Result<Self> {
        let bytes = build_record(versions, base, children)?;
        Self::parse(Arc::from(bytes), base)
    }

    /// Parse a record spanning the whole buffer.
    pub fn parse(data: Arc<[u8]>, base: RecordBase) -> Result<Self> {
        let len = data.len();
        Self::parse_range(data, 0..len, base)
    }

    /// Parse a record stored at `range` of a larger buffer.
    pub fn parse_range(data: Arc<[u8]>, range: Range<usize>, base: RecordBase) -> Result<Self> {
        if range.start > range.end || range.end > data.len() {
            return Err(DecodeError::SeekOutOfBounds {
                pos: range.end,
                len: data.len(),
            }
            .into());
        }
        let bytes = &data[range.clone()];
        let mut r = ByteReader::new(bytes);

        let header = r.read_raw_byte()?;
        let type_tag = (header & TYPE_MASK) as u64;
        let entity_type =
            EntityType::from_tag(type_tag).ok_or(DecodeError::InvalidEntityType(type_tag))?;

        let key_summary: Arc<[u32]> = if header & HAS_TAGS != 0 {
            let count = r.read_u32()? as usize;
            let mut keys = Vec::with_capacity(count.min(r.remaining()));
            let mut prev = 0u32;
            for _ in 0..count {
                prev = prev
                    .checked_add(r.read_u32()?)
                    .ok_or(DecodeError::OutOfRange("tag key summary"))?;
                keys.push(prev);
            }
            keys.into()
        } else {
            Arc::from(Vec::new())
        };

        let id = base.id.wrapping_add(r.read_s64()?);

        let bbox = if header & HAS_BBOX != 0 {
            let min_lon = base.lon.wrapping_add(r.read_s64()?);
            let min_lat = base.lat.wrapping_add(r.read_s64()?);
            let width = i64::try_from(r.read_u64()?)
                .map_err(|_| DecodeError::OutOfRange("bbox width"))?;
            let height = i64::try_from(r.read_u64()?)
                .map_err(|_| DecodeError::OutOfRange("bbox height"))?;
            Some(BoundingBox::new(
                min_lon,
                min_lat,
                min_lon.wrapping_add(width),
                min_lat.wrapping_add(height),
            ))
        } else {
            None
        };

        let (node_children, way_children) = if header & HAS_CHILDREN != 0 {
            let nodes = read_child_table(&data, range.start, &mut r, base)?;
            let ways = if entity_type == EntityType::Relation {
                read_child_table(&data, range.start, &mut r, base)?
            } else {
                Vec::new()
            };
            (nodes, ways)
        } else {
            (Vec::new(), Vec::new())
        };

        let version_count = if header & MULTI_VERSION != 0 {
            r.read_u32()?
        } else {
            1
        };

        let node_ids: Arc<[EntityId]> = node_children.iter().map(|c| c.id).collect();
        let way_ids: Arc<[EntityId]> = way_children.iter().map(|c| c.id).collect();
        let versions_offset = r.position();

        Ok(Self {
            data,
            range,
            base,
            header,
            entity_type,
            id,
            key_summary,
            bbox,
            node_children: node_children.into(),
            way_children: way_children.into(),
            node_ids,
            way_ids,
            version_count,
            versions_offset,
        })
    }

    pub fn id(&self) -> EntityId {
        self.id
    }

    pub fn entity_type(&self) -> EntityType {
        self.entity_type
    }

    pub fn base(&self) -> RecordBase {
        self.base
    }

    /// Union of all visible locations, including embedded children.
    pub fn bbox(&self) -> Option<BoundingBox> {
        self.bbox
    }

    pub(crate) fn bbox_ref(&self) -> Option<&BoundingBox> {
        self.bbox.as_ref()
    }

    /// Sorted distinct tag keys used by any version.
    pub fn key_summary(&self) -> &[u32] {
        &self.key_summary
    }

    /// Cheap key-presence check on the summary; no version is decoded.
    pub fn has_tag_key(&self, key: u32) -> bool {
        self.key_summary.binary_search(&key).is_ok()
    }

    pub fn version_count(&self) -> usize {
        self.version_count as usize
    }

    /// Whether version timestamps decrease along with version numbers.
    pub fn timestamps_sorted(&self) -> bool {
        self.header & TIMESTAMPS_NOT_SORTED == 0
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data[self.range.clone()]
    }

    pub fn to_vec(&self) -> Vec<u8> {
        self.as_bytes().to_vec()
    }

    /// Embedded node sub-records, sorted by id.
    pub fn node_children(&self) -> &[EntityRecord] {
        &self.node_children
    }

    /// Embedded way sub-records, sorted by id. Only relations have them.
    pub fn way_children(&self) -> &[EntityRecord] {
        &self.way_children
    }

    /// The embedded record a member points at, if it was embedded.
    ///
    /// Relation members are never embedded.
    pub fn resolve(&self, member: &Member) -> Option<&EntityRecord> {
        let (ids, children) = match member.target {
            EntityType::Node => (&self.node_ids, &self.node_children),
            EntityType::Way => (&self.way_ids, &self.way_children),
            EntityType::Relation => return None,
        };
        ids.binary_search(&member.id)
            .ok()
            .and_then(|index| children.get(index))
    }

    /// Lazily decode versions, newest first. Each call starts a fresh replay.
    pub fn versions(&self) -> VersionIter<'_> {
        let bytes = self.as_bytes();
        let mut reader = ByteReader::new(bytes);
        // versions_offset was produced by parsing this very slice
        let start = reader.seek(self.versions_offset);
        VersionIter {
            record: self,
            reader,
            state: Some(ReplayState::initial(self.entity_type, &self.base)),
            pending_error: start.err(),
        }
    }

    /// Decode everything, newest first.
    pub fn all_versions(&self) -> Result<Vec<EntityVersion>> {
        self.versions().collect()
    }

    /// Newest version.
    pub fn latest(&self) -> Result<EntityVersion> {
        match self.versions().next() {
            Some(v) => v,
            None => Err(DecodeError::UnexpectedEof {
                pos: self.versions_offset,
                needed: 1,
            }
            .into()),
        }
    }

    /// The version valid at `t`: the most recent one with timestamp `<= t`.
    pub fn version_at(&self, t: Timestamp) -> Result<Option<EntityVersion>> {
        if self.timestamps_sorted() {
            for v in self.versions() {
                let v = v?;
                if v.timestamp <= t {
                    return Ok(Some(v));
                }
            }
            return Ok(None);
        }

        let mut best: Option<EntityVersion> = None;
        for v in self.versions() {
            let v = v?;
            if v.timestamp <= t && best.as_ref().map_or(true, |b| v.timestamp > b.timestamp) {
                best = Some(v);
            }
        }
        Ok(best)
    }

    /// Batched [`version_at`](Self::version_at) for timestamps sorted in
    /// descending order, in one pass over the versions.
    ///
    /// Unsorted input is rejected rather than sorted behind the caller's back,
    /// since the result is positional.
    pub fn versions_at(&self, timestamps: &[Timestamp]) -> Result<Vec<Option<EntityVersion>>> {
        if timestamps.windows(2).any(|pair| pair[0] < pair[1]) {
            return Err(Error::InvalidArgument(
                "versions_at expects timestamps in descending order".into(),
            ));
        }
        if !self.timestamps_sorted() {
            return timestamps.iter().map(|t| self.version_at(*t)).collect();
        }

        let mut out = Vec::with_capacity(timestamps.len());
        let mut versions = self.versions();
        let mut current = versions.next().transpose()?;
        for t in timestamps {
            while let Some(v) = &current {
                if v.timestamp <= *t {
                    break;
                }
                current = versions.next().transpose()?;
            }
            out.push(current.clone());
        }
        Ok(out)
    }

    /// Decode and rebuild against another base. The original is untouched.
    pub fn rebase(&self, base: RecordBase) -> Result<EntityRecord> {
        let versions = self.all_versions()?;
        let children: Vec<EntityRecord> = self
            .node_children
            .iter()
            .chain(self.way_children.iter())
            .cloned()
            .collect();
        EntityRecord::new(&versions, base, &children)
    }

    /// Ascending, distinct timestamps at which this entity's state may have
    /// changed.
    ///
    /// With `recurse`, embedded children contribute the timestamps of their
    /// own changes that fall while they were members of a visible version.
    pub fn modification_timestamps(&self, recurse: bool) -> Result<Vec<Timestamp>> {
        let mut versions = self.all_versions()?;
        versions.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then(a.version.cmp(&b.version)));

        let mut out: Vec<Timestamp> = versions.iter().map(|v| v.timestamp).collect();

        if recurse && self.entity_type != EntityType::Node {
            for (i, v) in versions.iter().enumerate() {
                if !v.visible {
                    continue;
                }
                let from = v.timestamp;
                let until = versions.get(i + 1).map_or(Timestamp::MAX, |n| n.timestamp);
                for member in v.members() {
                    let Some(child) = self.resolve(member) else {
                        continue;
                    };
                    for t in child.modification_timestamps(true)? {
                        if t > from && t < until {
                            out.push(t);
                        }
                    }
                }
            }
        }

        out.sort_unstable();
        out.dedup();
        Ok(out)
    }

    fn child_ids(&self) -> ChildIds<'_> {
        ChildIds {
            nodes: &self.node_ids,
            ways: &self.way_ids,
        }
    }
}

impl fmt::Debug for EntityRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityRecord")
            .field("type", &self.entity_type)
            .field("id", &self.id)
            .field("versions", &self.version_count)
            .field("bbox", &self.bbox)
            .field("bytes", &self.range.len())
            .finish()
    }
}

fn read_child_table(
    data: &Arc<[u8]>,
    offset: usize,
    r: &mut ByteReader<'_>,
    base: RecordBase,
) -> Result<Vec<EntityRecord>> {
    let count = r.read_u32()? as usize;
    let mut children = Vec::with_capacity(count.min(r.remaining()));
    for _ in 0..count {
        let len = r.read_u64()?;
        let len = usize::try_from(len).map_err(|_| DecodeError::OutOfRange("child length"))?;
        let start = offset + r.position();
        r.read_bytes(len)?;
        children.push(EntityRecord::parse_range(
            Arc::clone(data),
            start..start + len,
            base,
        )?);
    }
    Ok(children)
}

/// Lazy decoder over a record's versions, newest first.
///
/// The replay state is owned by the iterator; two iterators over one
/// record never share it. Stops after the first error.
pub struct VersionIter<'a> {
    record: &'a EntityRecord,
    reader: ByteReader<'a>,
    state: Option<ReplayState>,
    pending_error: Option<DecodeError>,
}

impl<'a> Iterator for VersionIter<'a> {
    type Item = Result<EntityVersion>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(e) = self.pending_error.take() {
            self.state = None;
            return Some(Err(e.into()));
        }
        if self.reader.is_empty() {
            return None;
        }
        let state = self.state.take()?;
        match decode_version(
            &mut self.reader,
            self.record.id,
            self.record.child_ids(),
            state,
        ) {
            Ok((version, next)) => {
                self.state = Some(next);
                Some(Ok(version))
            }
            Err(e) => Some(Err(e.into())),
        }
    }
}
