//! Shared fixtures for integration tests.
#![allow(dead_code)]

use osh_grid::{
    BoundingBox, CellId, EngineConfig, EntityId, EntityRecord, EntityType, EntityVersion,
    Geometry, GeometryBuilder, GeometryError, GeometryRequest, GridCell, HistoryQueryEngine,
    KeyValueInterpreter, Location, Member, Payload, Polygon, RecordBase, SimpleGeometryBuilder,
    SpatialGrid, Tag, TagInterpreter, Timestamp,
};
use std::sync::Arc;

pub const TYPE: u32 = 1;
pub const MULTIPOLYGON: u32 = 1;
pub const BUILDING: u32 = 2;
pub const YES: u32 = 1;
pub const HIGHWAY: u32 = 3;
pub const RESIDENTIAL: u32 = 2;

pub const OUTER: u32 = 1;
pub const INNER: u32 = 2;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

pub fn interpreter() -> KeyValueInterpreter {
    KeyValueInterpreter::new(Tag::new(TYPE, MULTIPOLYGON), OUTER, INNER, 0).with_area_key(BUILDING)
}

pub fn engine() -> HistoryQueryEngine {
    engine_with(SimpleGeometryBuilder)
}

pub fn engine_with(builder: impl GeometryBuilder + 'static) -> HistoryQueryEngine {
    HistoryQueryEngine::new(
        Arc::new(builder),
        Arc::new(interpreter()),
        &EngineConfig::default(),
    )
}

/// Refuses to build the listed `(id, version)` pairs and builds everything
/// else like [`SimpleGeometryBuilder`].
pub struct FailingBuilder {
    pub failing: Vec<(EntityId, u32)>,
}

impl GeometryBuilder for FailingBuilder {
    fn build(
        &self,
        request: &GeometryRequest<'_>,
        tags: &dyn TagInterpreter,
    ) -> Result<Option<Geometry>, GeometryError> {
        let version = request.version;
        if self.failing.contains(&(version.id, version.version)) {
            return Err(GeometryError::Unsupported(format!(
                "entity {} version {}",
                version.id, version.version
            )));
        }
        SimpleGeometryBuilder.build(request, tags)
    }

    fn clip_to_bbox(
        &self,
        geometry: &Geometry,
        bbox: &BoundingBox,
    ) -> Result<Option<Geometry>, GeometryError> {
        SimpleGeometryBuilder.clip_to_bbox(geometry, bbox)
    }

    fn clip_to_polygon(
        &self,
        geometry: &Geometry,
        polygon: &Polygon,
    ) -> Result<Option<Geometry>, GeometryError> {
        SimpleGeometryBuilder.clip_to_polygon(geometry, polygon)
    }
}

pub fn tags(pairs: &[(u32, u32)]) -> Vec<Tag> {
    pairs.iter().map(|(k, v)| Tag::new(*k, *v)).collect()
}

/// A node version; `None` location means deleted.
pub fn node_version(
    id: EntityId,
    version: u32,
    ts: i64,
    location: Option<(f64, f64)>,
    tag_pairs: &[(u32, u32)],
) -> EntityVersion {
    EntityVersion {
        id,
        version,
        visible: location.is_some(),
        timestamp: Timestamp(ts),
        changeset: 1000 + version as i64,
        user_id: 7,
        tags: tags(tag_pairs),
        payload: Payload::Node(location.map(|(lon, lat)| Location::from_degrees(lon, lat))),
    }
}

pub fn way_version(
    id: EntityId,
    version: u32,
    ts: i64,
    nodes: &[EntityId],
    tag_pairs: &[(u32, u32)],
) -> EntityVersion {
    EntityVersion {
        id,
        version,
        visible: true,
        timestamp: Timestamp(ts),
        changeset: 2000 + version as i64,
        user_id: 9,
        tags: tags(tag_pairs),
        payload: Payload::Way(nodes.iter().map(|n| Member::node(*n)).collect()),
    }
}

pub fn relation_version(
    id: EntityId,
    version: u32,
    ts: i64,
    members: &[(EntityType, EntityId, u32)],
    tag_pairs: &[(u32, u32)],
) -> EntityVersion {
    EntityVersion {
        id,
        version,
        visible: true,
        timestamp: Timestamp(ts),
        changeset: 3000 + version as i64,
        user_id: 11,
        tags: tags(tag_pairs),
        payload: Payload::Relation(
            members
                .iter()
                .map(|(t, id, role)| Member::new(*t, *id, *role))
                .collect(),
        ),
    }
}

/// A node that never moves or changes.
pub fn static_node(id: EntityId, lon: f64, lat: f64) -> EntityRecord {
    record(&[node_version(id, 1, 1, Some((lon, lat)), &[])], &[])
}

pub fn record(versions: &[EntityVersion], children: &[EntityRecord]) -> EntityRecord {
    EntityRecord::new(versions, RecordBase::default(), children).unwrap()
}

pub fn world_cell(entity_type: EntityType, records: &[EntityRecord]) -> GridCell {
    GridCell::build(entity_type, CellId::new(0, 0), records).unwrap()
}

pub fn cell_at(entity_type: EntityType, lon: f64, lat: f64, zoom: u32, records: &[EntityRecord]) -> GridCell {
    let cell = SpatialGrid::cell_id_degrees(lon, lat, zoom).unwrap();
    GridCell::build(entity_type, cell, records).unwrap()
}
