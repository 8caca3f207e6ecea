//! Grid cells: the unit of storage and of query parallelism.

use super::spatial::{CellId, SpatialGrid};
use crate::codec::{ByteReader, ByteWriter};
use crate::entity::EntityRecord;
use crate::error::{DecodeError, Error, Result};
use crate::types::{BoundingBox, CellKey, EntityType, RecordBase};
use std::fmt;
use std::ops::Range;
use std::sync::Arc;

/// Magic bytes for cell blobs.
const CELL_MAGIC: &[u8; 4] = b"OSHC";

/// Current cell format version.
const CELL_VERSION: u8 = 1;

/// Records of one entity type stored in one grid tile, encoded against a
/// shared base.
///
/// Blob layout:
///
/// ```text
/// magic "OSHC" | format version u8 | entity type u8 | zoom u32 | cell id u64
/// | base id s64 | base timestamp s64 | base lon s64 | base lat s64
/// | record count u32 | (length-prefixed record, crc32 LE) * count
/// ```
///
/// Each record carries its own checksum so one damaged record never takes
/// its siblings down with it.
#[derive(Clone)]
pub struct GridCell {
    key: CellKey,
    base: RecordBase,
    data: Arc<[u8]>,
    entries: Arc<[Entry]>,
}

#[derive(Clone, Debug)]
struct Entry {
    range: Range<usize>,
    checksum: u32,
}

impl GridCell {
    /// Rebase `records` onto a cell-level base and pack them.
    ///
    /// The base is the smallest id and timestamp among the records and the
    /// south-west corner of the tile. Records are stored ordered by id.
    pub fn build(
        entity_type: EntityType,
        cell: CellId,
        records: &[EntityRecord],
    ) -> Result<GridCell> {
        let cell_bbox = SpatialGrid::bounding_box(cell)?;

        if let Some(other) = records.iter().find(|r| r.entity_type() != entity_type) {
            return Err(Error::InvalidArgument(format!(
                "{} {} does not belong in a {} cell",
                other.entity_type(),
                other.id(),
                entity_type
            )));
        }

        let mut min_id = None;
        let mut min_timestamp = None;
        for record in records {
            min_id = Some(min_id.map_or(record.id(), |m: i64| m.min(record.id())));
            for v in record.versions() {
                let ts = v?.timestamp.0;
                min_timestamp = Some(min_timestamp.map_or(ts, |m: i64| m.min(ts)));
            }
        }
        let base = RecordBase::new(
            min_id.unwrap_or(0),
            min_timestamp.unwrap_or(0),
            cell_bbox.min_lon,
            cell_bbox.min_lat,
        );

        let mut sorted: Vec<&EntityRecord> = records.iter().collect();
        sorted.sort_by_key(|r| r.id());

        let mut w = ByteWriter::with_capacity(
            64 + records.iter().map(|r| r.as_bytes().len() + 8).sum::<usize>(),
        );
        w.write_bytes(CELL_MAGIC);
        w.write_byte(CELL_VERSION);
        w.write_byte(entity_type.tag());
        w.write_u32(cell.zoom);
        w.write_u64(cell.id);
        w.write_s64(base.id);
        w.write_s64(base.timestamp);
        w.write_s64(base.lon);
        w.write_s64(base.lat);
        w.write_u32(sorted.len() as u32);
        for record in sorted {
            let rebased = record.rebase(base)?;
            let bytes = rebased.as_bytes();
            w.write_byte_array(bytes);
            w.write_bytes(&crc32fast::hash(bytes).to_le_bytes());
        }

        tracing::debug!(
            cell = %CellKey::new(entity_type, cell.zoom, cell.id),
            records = records.len(),
            bytes = w.position(),
            "built grid cell"
        );
        GridCell::from_bytes(w.into_inner())
    }

    /// Parse a cell blob. Only the header and the record table are read;
    /// records are decoded and checksummed as they are visited.
    pub fn from_bytes(data: impl Into<Arc<[u8]>>) -> Result<GridCell> {
        let data: Arc<[u8]> = data.into();
        let mut r = ByteReader::new(&data);

        let magic = r.read_bytes(4)?;
        if magic != CELL_MAGIC {
            return Err(Error::InvalidFormat("Invalid cell magic".into()));
        }
        let version = r.read_raw_byte()?;
        if version != CELL_VERSION {
            return Err(Error::InvalidFormat(format!(
                "Unsupported cell version: {}",
                version
            )));
        }

        let type_tag = r.read_raw_byte()? as u64;
        let entity_type =
            EntityType::from_tag(type_tag).ok_or(DecodeError::InvalidEntityType(type_tag))?;
        let zoom = r.read_u32()?;
        let cell_id = r.read_u64()?;
        let base = RecordBase::new(r.read_s64()?, r.read_s64()?, r.read_s64()?, r.read_s64()?);

        let count = r.read_u32()? as usize;
        let mut entries = Vec::with_capacity(count.min(r.remaining()));
        for _ in 0..count {
            let len = usize::try_from(r.read_u64()?)
                .map_err(|_| DecodeError::OutOfRange("record length"))?;
            let start = r.position();
            r.read_bytes(len)?;
            let crc = r.read_bytes(4)?;
            let checksum = u32::from_le_bytes([crc[0], crc[1], crc[2], crc[3]]);
            entries.push(Entry {
                range: start..start + len,
                checksum,
            });
        }
        if !r.is_empty() {
            return Err(Error::InvalidFormat(format!(
                "{} trailing bytes after cell records",
                r.remaining()
            )));
        }

        Ok(GridCell {
            key: CellKey::new(entity_type, zoom, cell_id),
            base,
            data,
            entries: entries.into(),
        })
    }

    pub fn key(&self) -> CellKey {
        self.key
    }

    pub fn cell_id(&self) -> CellId {
        CellId::new(self.key.zoom, self.key.cell_id)
    }

    pub fn entity_type(&self) -> EntityType {
        self.key.entity_type
    }

    pub fn base(&self) -> RecordBase {
        self.base
    }

    /// Extent of the tile this cell is stored under.
    pub fn bounding_box(&self) -> Result<BoundingBox> {
        SpatialGrid::bounding_box(self.cell_id())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The serialized blob.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.data.to_vec()
    }

    /// Parse the record at `index`, verifying its checksum first.
    pub fn get(&self, index: usize) -> Option<Result<EntityRecord>> {
        let entry = self.entries.get(index)?;
        let bytes = &self.data[entry.range.clone()];
        let computed = crc32fast::hash(bytes);
        if computed != entry.checksum {
            return Some(Err(Error::ChecksumMismatch {
                expected: entry.checksum,
                got: computed,
            }));
        }
        Some(EntityRecord::parse_range(
            Arc::clone(&self.data),
            entry.range.clone(),
            self.base,
        ))
    }

    /// Lazily parse every record, in id order.
    pub fn records(&self) -> impl Iterator<Item = Result<EntityRecord>> + '_ {
        (0..self.entries.len()).filter_map(move |i| self.get(i))
    }
}

impl fmt::Debug for GridCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GridCell")
            .field("key", &self.key)
            .field("records", &self.entries.len())
            .field("bytes", &self.data.len())
            .finish()
    }
}
