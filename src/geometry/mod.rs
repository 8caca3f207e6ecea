//! Geometry construction and clipping.
//!
//! The query engine talks to geometry through two traits:
//! [`GeometryBuilder`] turns an entity version into a [`Geometry`] and clips
//! it, [`TagInterpreter`] decides what the tags of a version mean.
//! [`SimpleGeometryBuilder`] and [`KeyValueInterpreter`] are planar
//! implementations working on embedded child records. Shapes are
//! `geo_types` values in degrees.

mod builder;
mod clip;
mod interpreter;
mod shapes;

pub use builder::{GeometryBuilder, GeometryRequest, SimpleGeometryBuilder};
pub use interpreter::{KeyValueInterpreter, TagInterpreter};
pub use shapes::{
    Coord, Geometry, GeometryCollection, LineString, MultiLineString, MultiPoint, MultiPolygon,
    Point, Polygon, Rect,
};
