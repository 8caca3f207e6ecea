//! Spatial bucketing of records.
//!
//! [`SpatialGrid`] maps locations and bounding boxes to hierarchical tiles;
//! [`GridCell`] packs the records stored under one tile.

mod cell;
mod spatial;

pub use cell::GridCell;
pub use spatial::{CellId, CellIdRange, SpatialGrid, MAX_ZOOM};
