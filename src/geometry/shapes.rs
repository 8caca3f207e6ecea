//! Planar shapes in degrees.
//!
//! Geometries are plain `geo_types` values. This module only bridges them
//! to the fixed-point [`Location`] and [`BoundingBox`] used by records and
//! the grid.

use crate::types::{BoundingBox, Location, COORD_SCALE};
use geo::BoundingRect;
pub use geo_types::{
    Coord, Geometry, GeometryCollection, LineString, MultiLineString, MultiPoint, MultiPolygon,
    Point, Polygon, Rect,
};

impl From<Location> for Coord {
    fn from(loc: Location) -> Self {
        Coord {
            x: loc.lon_degrees(),
            y: loc.lat_degrees(),
        }
    }
}

impl From<Location> for Point {
    fn from(loc: Location) -> Self {
        Point(Coord::from(loc))
    }
}

impl BoundingBox {
    /// The same box in degrees.
    pub fn to_rect(&self) -> Rect {
        Rect::new(
            Coord {
                x: self.min_lon as f64 / COORD_SCALE,
                y: self.min_lat as f64 / COORD_SCALE,
            },
            Coord {
                x: self.max_lon as f64 / COORD_SCALE,
                y: self.max_lat as f64 / COORD_SCALE,
            },
        )
    }

    /// Smallest fixed-point box enclosing `rect`, rounded outward.
    pub fn enclosing(rect: &Rect) -> BoundingBox {
        BoundingBox::new(
            (rect.min().x * COORD_SCALE).floor() as i64,
            (rect.min().y * COORD_SCALE).floor() as i64,
            (rect.max().x * COORD_SCALE).ceil() as i64,
            (rect.max().y * COORD_SCALE).ceil() as i64,
        )
    }

    /// Enclosing box of any geometry; `None` when it has no coordinates.
    pub fn of_geometry(geometry: &Geometry) -> Option<BoundingBox> {
        geometry.bounding_rect().map(|r| BoundingBox::enclosing(&r))
    }
}
