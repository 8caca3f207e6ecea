//! Byte layout of a versioned entity record.
//!
//! ```text
//! header                u8   type(2 bits) | MULTI_VERSION | TIMESTAMPS_NOT_SORTED
//!                            | HAS_TAGS | HAS_BBOX | HAS_CHILDREN
//! [key summary]         u32 count, then ascending keys as u32 deltas
//! id                    s64 delta against base.id
//! [bbox]                s64 min_lon, s64 min_lat (against base), u64 width, u64 height
//! [child tables]        node table; relations add a way table.
//!                       Each: u32 count, then length-prefixed child records
//! [version count]       u32, only with MULTI_VERSION
//! versions...           newest first, until the end of the record
//! ```
//!
//! Each version:
//!
//! ```text
//! version               u32 (first) or u32 decrement from the previous one
//! flags                 u8   VISIBLE | USER_CHANGED | TAGS_CHANGED | PAYLOAD_CHANGED | HAS_LOCATION
//! timestamp             s64 delta against the previous (first: base.timestamp)
//! changeset             s64 delta against the previous (first: 0)
//! [user]                s64 delta
//! [tags]                u32 count, then (u32 key delta, u32 value)
//! [payload]             node: [s64 lon delta, s64 lat delta]
//!                       way:  u32 count, then child refs
//!                       relation: u32 count, then (u32 type, u32 role, child ref)
//! ```

use crate::codec::{ByteReader, ByteWriter};
use crate::error::DecodeError;
use crate::types::EntityId;

pub(crate) const TYPE_MASK: u8 = 0b0000_0011;
pub(crate) const MULTI_VERSION: u8 = 1 << 2;
pub(crate) const TIMESTAMPS_NOT_SORTED: u8 = 1 << 3;
pub(crate) const HAS_TAGS: u8 = 1 << 4;
pub(crate) const HAS_BBOX: u8 = 1 << 5;
pub(crate) const HAS_CHILDREN: u8 = 1 << 6;

pub(crate) const VISIBLE: u8 = 1;
pub(crate) const USER_CHANGED: u8 = 1 << 1;
pub(crate) const TAGS_CHANGED: u8 = 1 << 2;
pub(crate) const PAYLOAD_CHANGED: u8 = 1 << 3;
pub(crate) const HAS_LOCATION: u8 = 1 << 4;

/// How a member is stored inside its parent record.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChildRef {
    /// Zero-based index into the parent's child table for the member type.
    Embedded(u32),
    /// Not embedded; the raw target id.
    ByReference(EntityId),
}

impl ChildRef {
    /// Wire form: `index + 1`, or `0` followed by the id delta against
    /// `prev_id`.
    pub(crate) fn write(self, w: &mut ByteWriter, prev_id: EntityId) {
        match self {
            ChildRef::Embedded(index) => w.write_u64(index as u64 + 1),
            ChildRef::ByReference(id) => {
                w.write_u64(0);
                w.write_s64(id.wrapping_sub(prev_id));
            }
        }
    }

    pub(crate) fn read(r: &mut ByteReader<'_>, prev_id: EntityId) -> Result<Self, DecodeError> {
        match r.read_u64()? {
            0 => Ok(ChildRef::ByReference(prev_id.wrapping_add(r.read_s64()?))),
            k => {
                let index =
                    u32::try_from(k - 1).map_err(|_| DecodeError::OutOfRange("child index"))?;
                Ok(ChildRef::Embedded(index))
            }
        }
    }
}
