//! Building entity geometries at a point in time.

use super::clip::{self, BoxClip};
use super::interpreter::TagInterpreter;
use super::shapes::{Coord, Geometry, GeometryCollection, LineString, MultiPolygon, Point, Polygon};
use crate::entity::EntityRecord;
use crate::error::GeometryError;
use crate::types::{BoundingBox, EntityId, EntityType, EntityVersion, Member, Timestamp};
use geo::orient::{Direction, Orient};
use geo::{Contains, InteriorPoint};

/// Everything needed to build one entity's geometry at one instant.
#[derive(Debug, Clone, Copy)]
pub struct GeometryRequest<'a> {
    /// Record holding the version and the embedded children it references.
    pub record: &'a EntityRecord,
    pub version: &'a EntityVersion,
    /// Instant at which member children are resolved.
    pub timestamp: Timestamp,
    /// Build only the inner rings of old-style multipolygons; their outer
    /// ring is reported through the outer way itself.
    pub old_style_multipolygons: bool,
}

/// Geometry construction and clipping.
pub trait GeometryBuilder: Send + Sync {
    /// `Ok(None)` when the version has no drawable geometry at that time.
    fn build(
        &self,
        request: &GeometryRequest<'_>,
        tags: &dyn TagInterpreter,
    ) -> Result<Option<Geometry>, GeometryError>;

    /// `Ok(None)` when nothing is left inside the box.
    fn clip_to_bbox(
        &self,
        geometry: &Geometry,
        bbox: &BoundingBox,
    ) -> Result<Option<Geometry>, GeometryError>;

    /// `Ok(None)` when nothing is left inside the polygon.
    fn clip_to_polygon(
        &self,
        geometry: &Geometry,
        polygon: &Polygon,
    ) -> Result<Option<Geometry>, GeometryError>;
}

/// Planar builder over embedded children.
///
/// Nodes become points, ways become line strings or (closed and tagged as
/// area) polygons, multipolygon relations are assembled from their outer
/// and inner member ways, and other relations become collections of their
/// members. Members that were not embedded are skipped.
#[derive(Debug, Clone, Copy, Default)]
pub struct SimpleGeometryBuilder;

impl GeometryBuilder for SimpleGeometryBuilder {
    fn build(
        &self,
        request: &GeometryRequest<'_>,
        tags: &dyn TagInterpreter,
    ) -> Result<Option<Geometry>, GeometryError> {
        let version = request.version;
        if !version.visible {
            return Ok(None);
        }
        match version.entity_type() {
            EntityType::Node => Ok(version.payload.location().map(|l| Geometry::Point(l.into()))),
            EntityType::Way => {
                let points = way_points(request.record, version.members(), request.timestamp)?;
                Ok(way_geometry(points, tags.is_area(version)))
            }
            EntityType::Relation => {
                if tags.is_area(version) {
                    let holes_only =
                        request.old_style_multipolygons && tags.is_old_style_multipolygon(version);
                    multipolygon(request, tags, holes_only)
                } else {
                    collection(request, tags)
                }
            }
        }
    }

    fn clip_to_bbox(
        &self,
        geometry: &Geometry,
        bbox: &BoundingBox,
    ) -> Result<Option<Geometry>, GeometryError> {
        Ok(BoxClip::new(bbox.to_rect()).clip(geometry))
    }

    fn clip_to_polygon(
        &self,
        geometry: &Geometry,
        polygon: &Polygon,
    ) -> Result<Option<Geometry>, GeometryError> {
        clip::clip_to_polygon(geometry, polygon)
    }
}

/// Locations of a way's nodes at `t`. Nodes that are missing, deleted or
/// not embedded are skipped.
fn way_points(
    record: &EntityRecord,
    members: &[Member],
    t: Timestamp,
) -> Result<Vec<Coord>, GeometryError> {
    let mut points: Vec<Coord> = Vec::with_capacity(members.len());
    for member in members {
        let Some(child) = record.resolve(member) else {
            continue;
        };
        let version = child.version_at(t).map_err(|e| GeometryError::Member {
            id: member.id,
            reason: e.to_string(),
        })?;
        let Some(location) = version.filter(|v| v.visible).and_then(|v| v.payload.location())
        else {
            continue;
        };
        let point = Coord::from(location);
        if points.last() != Some(&point) {
            points.push(point);
        }
    }
    Ok(points)
}

fn way_geometry(points: Vec<Coord>, is_area: bool) -> Option<Geometry> {
    match points.len() {
        0 => None,
        1 => Some(Geometry::Point(Point(points[0]))),
        n if is_area && n >= 4 && points.first() == points.last() => Some(Geometry::Polygon(
            Polygon::new(LineString::new(points), vec![]),
        )),
        _ => Some(Geometry::LineString(LineString::new(points))),
    }
}

/// The visible version of an embedded member way at `t`, with its points.
fn member_way_points(
    record: &EntityRecord,
    member: &Member,
    t: Timestamp,
) -> Result<Option<(EntityVersion, Vec<Coord>)>, GeometryError> {
    let Some(way) = record.resolve(member) else {
        return Ok(None);
    };
    let version = way.version_at(t).map_err(|e| GeometryError::Member {
        id: member.id,
        reason: e.to_string(),
    })?;
    match version {
        Some(v) if v.visible => {
            let points = way_points(way, v.members(), t)?;
            Ok(Some((v, points)))
        }
        _ => Ok(None),
    }
}

fn multipolygon(
    request: &GeometryRequest<'_>,
    tags: &dyn TagInterpreter,
    holes_only: bool,
) -> Result<Option<Geometry>, GeometryError> {
    let id = request.version.id;
    let mut outer_lines = Vec::new();
    let mut inner_lines = Vec::new();
    for member in request.version.members() {
        let outer = tags.is_multipolygon_outer_member(member);
        let inner = tags.is_multipolygon_inner_member(member);
        if !outer && !inner {
            continue;
        }
        if let Some((_, points)) = member_way_points(request.record, member, request.timestamp)? {
            if outer {
                outer_lines.push(points);
            } else {
                inner_lines.push(points);
            }
        }
    }

    let inner_rings = assemble_rings(inner_lines, id)?;
    let mut polygons: Vec<Polygon> = if holes_only {
        tracing::trace!(relation = id, "old-style multipolygon, emitting inner rings only");
        inner_rings
            .into_iter()
            .map(|ring| Polygon::new(ring, vec![]))
            .collect()
    } else {
        let shells: Vec<Polygon> = assemble_rings(outer_lines, id)?
            .into_iter()
            .map(|ring| Polygon::new(ring, vec![]))
            .collect();
        let mut holes: Vec<Vec<LineString>> = vec![Vec::new(); shells.len()];
        for ring in inner_rings {
            let inside = Polygon::new(ring.clone(), vec![])
                .interior_point()
                .and_then(|point| shells.iter().position(|shell| shell.contains(&point)));
            match inside {
                Some(index) => holes[index].push(ring),
                None => {
                    return Err(GeometryError::InvalidRing {
                        id,
                        reason: "inner ring outside every outer ring".into(),
                    })
                }
            }
        }
        shells
            .into_iter()
            .zip(holes)
            .map(|(shell, holes)| Polygon::new(shell.into_inner().0, holes))
            .collect()
    };

    Ok(match polygons.len() {
        0 => None,
        1 => polygons
            .pop()
            .map(|p| Geometry::Polygon(p.orient(Direction::Default))),
        _ => Some(Geometry::MultiPolygon(
            MultiPolygon::new(polygons).orient(Direction::Default),
        )),
    })
}

/// Join way segments end to end into closed rings.
fn assemble_rings(lines: Vec<Vec<Coord>>, id: EntityId) -> Result<Vec<LineString>, GeometryError> {
    let mut rings = Vec::new();
    let mut open: Vec<Vec<Coord>> = lines.into_iter().filter(|l| l.len() > 1).collect();

    while let Some(mut current) = open.pop() {
        loop {
            let (Some(&first), Some(&last)) = (current.first(), current.last()) else {
                break;
            };
            if first == last {
                if current.len() < 4 {
                    return Err(GeometryError::InvalidRing {
                        id,
                        reason: format!("ring has only {} points", current.len()),
                    });
                }
                rings.push(LineString::new(current));
                break;
            }
            let next = open
                .iter()
                .position(|l| l.first() == Some(&last) || l.last() == Some(&last));
            let Some(index) = next else {
                return Err(GeometryError::InvalidRing {
                    id,
                    reason: "ring does not close".into(),
                });
            };
            let mut segment = open.swap_remove(index);
            if segment.first() != Some(&last) {
                segment.reverse();
            }
            current.extend(segment.into_iter().skip(1));
        }
    }
    Ok(rings)
}

fn collection(
    request: &GeometryRequest<'_>,
    tags: &dyn TagInterpreter,
) -> Result<Option<Geometry>, GeometryError> {
    let mut parts = Vec::new();
    for member in request.version.members() {
        match member.target {
            EntityType::Node => {
                let Some(node) = request.record.resolve(member) else {
                    continue;
                };
                let version = node
                    .version_at(request.timestamp)
                    .map_err(|e| GeometryError::Member {
                        id: member.id,
                        reason: e.to_string(),
                    })?;
                if let Some(location) =
                    version.filter(|v| v.visible).and_then(|v| v.payload.location())
                {
                    parts.push(Geometry::Point(location.into()));
                }
            }
            EntityType::Way => {
                if let Some((version, points)) =
                    member_way_points(request.record, member, request.timestamp)?
                {
                    parts.extend(way_geometry(points, tags.is_area(&version)));
                }
            }
            EntityType::Relation => {}
        }
    }
    Ok((!parts.is_empty()).then_some(Geometry::GeometryCollection(GeometryCollection(parts))))
}
