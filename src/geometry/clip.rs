//! Clipping geometries to a query area.
//!
//! Boxes clip edge by edge so that every cut point lies exactly on the box
//! boundary coordinate. Rings go through Sutherland-Hodgman and line
//! strings are cut segment by segment, then stitched back together.
//! Polygons of any shape, holes included, clip through `geo`'s boolean
//! operations.

use crate::error::GeometryError;
use geo::{BooleanOps, BoundingRect, Intersects};
use geo_types::{
    Coord, Geometry, GeometryCollection, LineString, MultiLineString, MultiPoint, MultiPolygon,
    Point, Polygon, Rect,
};
use std::panic::{catch_unwind, AssertUnwindSafe};

/// One side of a clip box.
#[derive(Debug, Clone, Copy)]
enum Edge {
    MinX(f64),
    MaxX(f64),
    MinY(f64),
    MaxY(f64),
}

impl Edge {
    fn inside(self, c: Coord) -> bool {
        match self {
            Edge::MinX(x) => c.x >= x,
            Edge::MaxX(x) => c.x <= x,
            Edge::MinY(y) => c.y >= y,
            Edge::MaxY(y) => c.y <= y,
        }
    }

    /// Where `a -> b` crosses the edge. Only called when exactly one of the
    /// two points is inside.
    fn intersect(self, a: Coord, b: Coord) -> Coord {
        match self {
            Edge::MinX(x) | Edge::MaxX(x) => {
                let t = (x - a.x) / (b.x - a.x);
                Coord {
                    x,
                    y: a.y + t * (b.y - a.y),
                }
            }
            Edge::MinY(y) | Edge::MaxY(y) => {
                let t = (y - a.y) / (b.y - a.y);
                Coord {
                    x: a.x + t * (b.x - a.x),
                    y,
                }
            }
        }
    }
}

/// Axis-aligned clip region with exact boundaries.
pub(crate) struct BoxClip {
    rect: Rect,
    edges: [Edge; 4],
}

impl BoxClip {
    pub(crate) fn new(rect: Rect) -> Self {
        Self {
            rect,
            edges: [
                Edge::MinX(rect.min().x),
                Edge::MaxX(rect.max().x),
                Edge::MinY(rect.min().y),
                Edge::MaxY(rect.max().y),
            ],
        }
    }

    fn contains(&self, c: Coord) -> bool {
        self.edges.iter().all(|edge| edge.inside(c))
    }

    /// Clip a geometry; `None` when nothing is left.
    pub(crate) fn clip(&self, geometry: &Geometry) -> Option<Geometry> {
        if let Some(env) = geometry.bounding_rect() {
            if !env.intersects(&self.rect) {
                return None;
            }
        }
        match geometry {
            Geometry::Point(p) => self.contains(p.0).then_some(Geometry::Point(*p)),
            Geometry::MultiPoint(points) => points_to_geometry(
                points.iter().filter(|p| self.contains(p.0)).copied().collect(),
            ),
            Geometry::Line(line) => lines_to_geometry(self.clip_line(&[line.start, line.end])),
            Geometry::LineString(line) => lines_to_geometry(self.clip_line(&line.0)),
            Geometry::MultiLineString(lines) => {
                lines_to_geometry(lines.iter().flat_map(|l| self.clip_line(&l.0)).collect())
            }
            Geometry::Polygon(polygon) => self.clip_polygon(polygon).map(Geometry::Polygon),
            Geometry::MultiPolygon(polygons) => {
                polygons_to_geometry(polygons.iter().filter_map(|p| self.clip_polygon(p)).collect())
            }
            Geometry::Rect(rect) => self.clip_polygon(&rect.to_polygon()).map(Geometry::Polygon),
            Geometry::Triangle(triangle) => self
                .clip_polygon(&triangle.to_polygon())
                .map(Geometry::Polygon),
            Geometry::GeometryCollection(parts) => {
                let clipped: Vec<Geometry> = parts.iter().filter_map(|g| self.clip(g)).collect();
                (!clipped.is_empty())
                    .then_some(Geometry::GeometryCollection(GeometryCollection(clipped)))
            }
        }
    }

    /// Cut a line string into the pieces inside the box.
    fn clip_line(&self, coords: &[Coord]) -> Vec<Vec<Coord>> {
        let mut pieces: Vec<Vec<Coord>> = Vec::new();
        let mut current: Vec<Coord> = Vec::new();

        if coords.len() == 1 {
            if self.contains(coords[0]) {
                pieces.push(coords.to_vec());
            }
            return pieces;
        }

        for pair in coords.windows(2) {
            match self.clip_segment(pair[0], pair[1]) {
                Some((a, b)) => {
                    if current.last() != Some(&a) {
                        if current.len() > 1 {
                            pieces.push(std::mem::take(&mut current));
                        }
                        current.clear();
                        current.push(a);
                    }
                    current.push(b);
                }
                None => {
                    if current.len() > 1 {
                        pieces.push(std::mem::take(&mut current));
                    }
                    current.clear();
                }
            }
        }
        if current.len() > 1 {
            pieces.push(current);
        }
        pieces
    }

    fn clip_segment(&self, mut a: Coord, mut b: Coord) -> Option<(Coord, Coord)> {
        for edge in self.edges {
            match (edge.inside(a), edge.inside(b)) {
                (true, true) => {}
                (false, false) => return None,
                (true, false) => b = edge.intersect(a, b),
                (false, true) => a = edge.intersect(a, b),
            }
        }
        Some((a, b))
    }

    /// Holes that vanish are dropped; a vanished shell drops the polygon.
    fn clip_polygon(&self, polygon: &Polygon) -> Option<Polygon> {
        let shell = self.clip_ring(polygon.exterior())?;
        let holes = polygon
            .interiors()
            .iter()
            .filter_map(|ring| self.clip_ring(ring))
            .collect();
        Some(Polygon::new(shell, holes))
    }

    fn clip_ring(&self, ring: &LineString) -> Option<LineString> {
        let mut subject: Vec<Coord> = ring.0.clone();
        if subject.len() > 1 && subject.first() == subject.last() {
            subject.pop();
        }
        for edge in self.edges {
            if subject.is_empty() {
                break;
            }
            let input = std::mem::take(&mut subject);
            let mut previous = input[input.len() - 1];
            for &current in &input {
                match (edge.inside(previous), edge.inside(current)) {
                    (true, true) => subject.push(current),
                    (true, false) => subject.push(edge.intersect(previous, current)),
                    (false, true) => {
                        subject.push(edge.intersect(previous, current));
                        subject.push(current);
                    }
                    (false, false) => {}
                }
                previous = current;
            }
            subject.dedup();
        }
        if subject.len() > 1 && subject.first() == subject.last() {
            subject.pop();
        }
        if subject.len() < 3 {
            return None;
        }
        let first = subject[0];
        subject.push(first);
        Some(LineString::new(subject))
    }
}

/// Intersect a geometry with an arbitrary polygon.
pub(crate) fn clip_to_polygon(
    geometry: &Geometry,
    area: &Polygon,
) -> Result<Option<Geometry>, GeometryError> {
    match (geometry.bounding_rect(), area.bounding_rect()) {
        (Some(env), Some(area_env)) if !env.intersects(&area_env) => return Ok(None),
        _ => {}
    }
    match geometry {
        Geometry::Point(p) => Ok(area.intersects(p).then_some(Geometry::Point(*p))),
        Geometry::MultiPoint(points) => Ok(points_to_geometry(
            points.iter().filter(|p| area.intersects(*p)).copied().collect(),
        )),
        Geometry::Line(line) => clip_lines(
            area,
            MultiLineString::new(vec![LineString::new(vec![line.start, line.end])]),
        ),
        Geometry::LineString(line) => clip_lines(area, MultiLineString::new(vec![line.clone()])),
        Geometry::MultiLineString(lines) => clip_lines(area, lines.clone()),
        Geometry::Polygon(polygon) => clip_areas(area, MultiPolygon::new(vec![polygon.clone()])),
        Geometry::MultiPolygon(polygons) => clip_areas(area, polygons.clone()),
        Geometry::Rect(rect) => clip_areas(area, MultiPolygon::new(vec![rect.to_polygon()])),
        Geometry::Triangle(triangle) => {
            clip_areas(area, MultiPolygon::new(vec![triangle.to_polygon()]))
        }
        Geometry::GeometryCollection(parts) => {
            let mut clipped = Vec::with_capacity(parts.len());
            for part in parts {
                if let Some(g) = clip_to_polygon(part, area)? {
                    clipped.push(g);
                }
            }
            Ok((!clipped.is_empty())
                .then_some(Geometry::GeometryCollection(GeometryCollection(clipped))))
        }
    }
}

fn clip_lines(area: &Polygon, lines: MultiLineString) -> Result<Option<Geometry>, GeometryError> {
    let clipped = boolean_op(|| area.clip(&lines, false))?;
    Ok(lines_to_geometry(
        clipped
            .0
            .into_iter()
            .map(|l| l.0)
            .filter(|coords| coords.len() > 1)
            .collect(),
    ))
}

fn clip_areas(area: &Polygon, subject: MultiPolygon) -> Result<Option<Geometry>, GeometryError> {
    let mask = MultiPolygon::new(vec![area.clone()]);
    let clipped = boolean_op(|| subject.intersection(&mask))?;
    Ok(polygons_to_geometry(clipped.0))
}

/// `geo`'s boolean operations panic on some degenerate inputs.
fn boolean_op<T>(op: impl FnOnce() -> T) -> Result<T, GeometryError> {
    catch_unwind(AssertUnwindSafe(op)).map_err(|payload| {
        let reason = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "boolean operation failed".to_string());
        GeometryError::Topology(reason)
    })
}

fn points_to_geometry(mut points: Vec<Point>) -> Option<Geometry> {
    match points.len() {
        0 => None,
        1 => points.pop().map(Geometry::Point),
        _ => Some(Geometry::MultiPoint(MultiPoint(points))),
    }
}

fn lines_to_geometry(mut lines: Vec<Vec<Coord>>) -> Option<Geometry> {
    match lines.len() {
        0 => None,
        1 => lines.pop().map(|line| {
            if line.len() == 1 {
                Geometry::Point(Point(line[0]))
            } else {
                Geometry::LineString(LineString::new(line))
            }
        }),
        _ => Some(Geometry::MultiLineString(MultiLineString::new(
            lines.into_iter().map(LineString::new).collect(),
        ))),
    }
}

fn polygons_to_geometry(mut polygons: Vec<Polygon>) -> Option<Geometry> {
    match polygons.len() {
        0 => None,
        1 => polygons.pop().map(Geometry::Polygon),
        _ => Some(Geometry::MultiPolygon(MultiPolygon::new(polygons))),
    }
}
