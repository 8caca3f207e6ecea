//! Core types for versioned entities.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a node, way or relation. Unique per entity type only.
pub type EntityId = i64;

/// Fixed-point scale: coordinates are stored in 1e-7 degree units.
pub const COORD_SCALE: f64 = 10_000_000.0;

/// Longitude bound in fixed-point units.
pub const MAX_LON: i64 = 1_800_000_000;

/// Latitude bound in fixed-point units.
pub const MAX_LAT: i64 = 900_000_000;

/// Seconds since Unix epoch.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
pub struct Timestamp(pub i64);

impl Timestamp {
    pub const MIN: Timestamp = Timestamp(i64::MIN);
    pub const MAX: Timestamp = Timestamp(i64::MAX);
}

impl fmt::Debug for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Timestamp({})", self.0)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Kind of entity.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum EntityType {
    Node,
    Way,
    Relation,
}

impl EntityType {
    /// Wire tag used in record headers and relation members.
    pub fn tag(self) -> u8 {
        match self {
            EntityType::Node => 0,
            EntityType::Way => 1,
            EntityType::Relation => 2,
        }
    }

    pub fn from_tag(tag: u64) -> Option<Self> {
        match tag {
            0 => Some(EntityType::Node),
            1 => Some(EntityType::Way),
            2 => Some(EntityType::Relation),
            _ => None,
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EntityType::Node => "node",
            EntityType::Way => "way",
            EntityType::Relation => "relation",
        };
        f.write_str(name)
    }
}

/// A fixed-point coordinate pair.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Location {
    pub lon: i32,
    pub lat: i32,
}

impl Location {
    pub fn new(lon: i32, lat: i32) -> Self {
        Self { lon, lat }
    }

    /// Round degrees to the nearest fixed-point unit.
    pub fn from_degrees(lon: f64, lat: f64) -> Self {
        Self {
            lon: (lon * COORD_SCALE).round() as i32,
            lat: (lat * COORD_SCALE).round() as i32,
        }
    }

    pub fn lon_degrees(self) -> f64 {
        self.lon as f64 / COORD_SCALE
    }

    pub fn lat_degrees(self) -> f64 {
        self.lat as f64 / COORD_SCALE
    }
}

/// Inclusive bounding box in fixed-point units.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_lon: i64,
    pub min_lat: i64,
    pub max_lon: i64,
    pub max_lat: i64,
}

impl BoundingBox {
    pub fn new(min_lon: i64, min_lat: i64, max_lon: i64, max_lat: i64) -> Self {
        Self {
            min_lon,
            min_lat,
            max_lon,
            max_lat,
        }
    }

    /// The whole coordinate space.
    pub fn world() -> Self {
        Self::new(-MAX_LON, -MAX_LAT, MAX_LON, MAX_LAT)
    }

    pub fn from_degrees(min_lon: f64, min_lat: f64, max_lon: f64, max_lat: f64) -> Self {
        let min = Location::from_degrees(min_lon, min_lat);
        let max = Location::from_degrees(max_lon, max_lat);
        Self::new(
            min.lon as i64,
            min.lat as i64,
            max.lon as i64,
            max.lat as i64,
        )
    }

    pub fn from_location(loc: Location) -> Self {
        Self::new(
            loc.lon as i64,
            loc.lat as i64,
            loc.lon as i64,
            loc.lat as i64,
        )
    }

    pub fn is_valid(&self) -> bool {
        self.min_lon <= self.max_lon && self.min_lat <= self.max_lat
    }

    /// Smallest box covering both.
    pub fn union(&self, other: &BoundingBox) -> BoundingBox {
        BoundingBox {
            min_lon: self.min_lon.min(other.min_lon),
            min_lat: self.min_lat.min(other.min_lat),
            max_lon: self.max_lon.max(other.max_lon),
            max_lat: self.max_lat.max(other.max_lat),
        }
    }

    pub fn intersects(&self, other: &BoundingBox) -> bool {
        self.min_lon <= other.max_lon
            && other.min_lon <= self.max_lon
            && self.min_lat <= other.max_lat
            && other.min_lat <= self.max_lat
    }

    /// Whether `other` lies completely inside this box.
    pub fn contains(&self, other: &BoundingBox) -> bool {
        other.min_lon >= self.min_lon
            && other.max_lon <= self.max_lon
            && other.min_lat >= self.min_lat
            && other.max_lat <= self.max_lat
    }

    pub fn contains_point(&self, lon: i64, lat: i64) -> bool {
        lon >= self.min_lon && lon <= self.max_lon && lat >= self.min_lat && lat <= self.max_lat
    }

    /// Union over an iterator of optional boxes.
    pub fn union_all<'a>(boxes: impl IntoIterator<Item = &'a BoundingBox>) -> Option<BoundingBox> {
        boxes
            .into_iter()
            .fold(None, |acc: Option<BoundingBox>, b| match acc {
                Some(a) => Some(a.union(b)),
                None => Some(*b),
            })
    }
}

/// A (key, value) tag pair of dictionary ids.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Tag {
    pub key: u32,
    pub value: u32,
}

impl Tag {
    pub fn new(key: u32, value: u32) -> Self {
        Self { key, value }
    }
}

/// Reference from a way or relation to another entity.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Member {
    pub target: EntityType,
    pub id: EntityId,
    pub role: u32,
}

impl Member {
    pub fn new(target: EntityType, id: EntityId, role: u32) -> Self {
        Self { target, id, role }
    }

    /// A way's node reference (ways carry no roles).
    pub fn node(id: EntityId) -> Self {
        Self::new(EntityType::Node, id, 0)
    }
}

/// Type-specific part of a version.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Payload {
    /// Deleted nodes usually carry no location.
    Node(Option<Location>),
    /// Ordered node references.
    Way(Vec<Member>),
    /// Ordered node/way/relation references with roles.
    Relation(Vec<Member>),
}

impl Payload {
    pub fn entity_type(&self) -> EntityType {
        match self {
            Payload::Node(_) => EntityType::Node,
            Payload::Way(_) => EntityType::Way,
            Payload::Relation(_) => EntityType::Relation,
        }
    }

    /// The empty payload of a type, used as the decode starting point.
    pub fn empty(entity_type: EntityType) -> Self {
        match entity_type {
            EntityType::Node => Payload::Node(None),
            EntityType::Way => Payload::Way(Vec::new()),
            EntityType::Relation => Payload::Relation(Vec::new()),
        }
    }

    pub fn members(&self) -> &[Member] {
        match self {
            Payload::Node(_) => &[],
            Payload::Way(m) | Payload::Relation(m) => m,
        }
    }

    pub fn location(&self) -> Option<Location> {
        match self {
            Payload::Node(loc) => *loc,
            _ => None,
        }
    }
}

/// One version of one entity.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityVersion {
    pub id: EntityId,
    pub version: u32,
    pub visible: bool,
    pub timestamp: Timestamp,
    pub changeset: i64,
    pub user_id: i64,
    /// Sorted by key.
    pub tags: Vec<Tag>,
    pub payload: Payload,
}

impl EntityVersion {
    pub fn entity_type(&self) -> EntityType {
        self.payload.entity_type()
    }

    pub fn has_tag_key(&self, key: u32) -> bool {
        self.tags.iter().any(|t| t.key == key)
    }

    pub fn has_tag(&self, key: u32, value: u32) -> bool {
        self.tags.iter().any(|t| t.key == key && t.value == value)
    }

    pub fn tag_value(&self, key: u32) -> Option<u32> {
        self.tags.iter().find(|t| t.key == key).map(|t| t.value)
    }

    pub fn members(&self) -> &[Member] {
        self.payload.members()
    }
}

/// Reference values subtracted before delta-encoding a record.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RecordBase {
    pub id: EntityId,
    pub timestamp: i64,
    pub lon: i64,
    pub lat: i64,
}

impl RecordBase {
    pub fn new(id: EntityId, timestamp: i64, lon: i64, lat: i64) -> Self {
        Self {
            id,
            timestamp,
            lon,
            lat,
        }
    }
}

/// Key of one stored grid cell blob.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CellKey {
    pub entity_type: EntityType,
    pub zoom: u32,
    pub cell_id: u64,
}

impl CellKey {
    pub fn new(entity_type: EntityType, zoom: u32, cell_id: u64) -> Self {
        Self {
            entity_type,
            zoom,
            cell_id,
        }
    }
}

impl fmt::Display for CellKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.entity_type, self.zoom, self.cell_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entity_type_tags() {
        for t in [EntityType::Node, EntityType::Way, EntityType::Relation] {
            assert_eq!(EntityType::from_tag(t.tag() as u64), Some(t));
        }
        assert_eq!(EntityType::from_tag(7), None);
    }

    #[test]
    fn test_location_degrees() {
        let loc = Location::from_degrees(8.6756, 49.4184);
        assert_eq!(loc.lon, 86_756_000);
        assert_eq!(loc.lat, 494_184_000);
        assert!((loc.lon_degrees() - 8.6756).abs() < 1e-9);
    }

    #[test]
    fn test_bbox_union_and_intersection() {
        let a = BoundingBox::new(0, 0, 10, 10);
        let b = BoundingBox::new(5, 5, 20, 20);
        let c = BoundingBox::new(11, 11, 12, 12);

        assert_eq!(a.union(&b), BoundingBox::new(0, 0, 20, 20));
        assert!(a.intersects(&b));
        assert!(!a.intersects(&c));
        assert!(b.contains(&c));
        assert!(!a.contains(&b));
        assert_eq!(
            BoundingBox::union_all([&a, &c]),
            Some(BoundingBox::new(0, 0, 12, 12))
        );
        assert_eq!(BoundingBox::union_all(std::iter::empty()), None);
    }

    #[test]
    fn test_version_tag_lookup() {
        let v = EntityVersion {
            id: 1,
            version: 1,
            visible: true,
            timestamp: Timestamp(10),
            changeset: 1,
            user_id: 1,
            tags: vec![Tag::new(1, 2), Tag::new(3, 4)],
            payload: Payload::Node(None),
        };
        assert!(v.has_tag_key(3));
        assert!(v.has_tag(1, 2));
        assert!(!v.has_tag(1, 4));
        assert_eq!(v.tag_value(3), Some(4));
        assert_eq!(v.entity_type(), EntityType::Node);
    }
}
