//! Hierarchical tile numbering.
//!
//! Zoom `z` splits the world into square tiles `360 / 2^z` degrees wide:
//! `2^z` columns and `max(1, 2^(z-1))` rows, numbered row-major from the
//! south-west corner (`id = row * 2^z + column`). Zoom 0 is the single
//! world tile. All arithmetic runs on fixed-point integers, so a tile's
//! bounding box is exact and inclusive, adjacent tiles never overlap, and
//! `parent` is plain halving of row and column.

use crate::error::{Error, Result};
use crate::types::{BoundingBox, MAX_LAT, MAX_LON};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Deepest supported zoom level.
pub const MAX_ZOOM: u32 = 30;

const WORLD_WIDTH: i128 = 2 * MAX_LON as i128;

/// One tile of the grid.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CellId {
    pub zoom: u32,
    pub id: u64,
}

impl CellId {
    pub fn new(zoom: u32, id: u64) -> Self {
        Self { zoom, id }
    }
}

impl fmt::Debug for CellId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CellId({}:{})", self.zoom, self.id)
    }
}

/// Inclusive run of cell ids on one zoom level, all in the same row.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CellIdRange {
    pub zoom: u32,
    pub start: u64,
    pub end: u64,
}

impl CellIdRange {
    pub fn contains(&self, cell: CellId) -> bool {
        cell.zoom == self.zoom && cell.id >= self.start && cell.id <= self.end
    }

    pub fn cells(&self) -> impl Iterator<Item = CellId> + '_ {
        (self.start..=self.end).map(move |id| CellId::new(self.zoom, id))
    }

    /// Number of cells in the range; never zero.
    pub fn count(&self) -> u64 {
        self.end - self.start + 1
    }
}

/// The tile grid. Stateless: every zoom level is derived on demand.
#[derive(Clone, Copy, Debug, Default)]
pub struct SpatialGrid;

impl SpatialGrid {
    /// Tile containing a fixed-point location. Out-of-range coordinates are
    /// clamped onto the world edge.
    pub fn cell_id(lon: i64, lat: i64, zoom: u32) -> Result<CellId> {
        check_zoom(zoom)?;
        let x = column_of(lon, zoom);
        let y = row_of(lat, zoom);
        Ok(CellId::new(zoom, y * columns(zoom) + x))
    }

    /// Tile containing a location given in degrees.
    pub fn cell_id_degrees(lon: f64, lat: f64, zoom: u32) -> Result<CellId> {
        let loc = crate::types::Location::from_degrees(lon, lat);
        Self::cell_id(loc.lon as i64, loc.lat as i64, zoom)
    }

    /// Inclusive fixed-point extent of a tile.
    pub fn bounding_box(cell: CellId) -> Result<BoundingBox> {
        check_zoom(cell.zoom)?;
        let cols = columns(cell.zoom);
        let rows = rows(cell.zoom);
        let x = cell.id % cols;
        let y = cell.id / cols;
        if y >= rows {
            return Err(Error::InvalidArgument(format!(
                "cell id {} out of range at zoom {}",
                cell.id, cell.zoom
            )));
        }

        let min_lon = edge(x, cell.zoom) - MAX_LON;
        let max_lon = if x + 1 == cols {
            MAX_LON
        } else {
            edge(x + 1, cell.zoom) - 1 - MAX_LON
        };
        let min_lat = edge(y, cell.zoom) - MAX_LAT;
        let max_lat = if y + 1 == rows {
            MAX_LAT
        } else {
            edge(y + 1, cell.zoom) - 1 - MAX_LAT
        };
        Ok(BoundingBox::new(min_lon, min_lat, max_lon, max_lat))
    }

    /// The tile one zoom level up that covers `cell`; `None` at zoom 0.
    pub fn parent(cell: CellId) -> Result<Option<CellId>> {
        check_zoom(cell.zoom)?;
        if cell.zoom == 0 {
            return Ok(None);
        }
        let cols = columns(cell.zoom);
        let x = cell.id % cols;
        let y = cell.id / cols;
        if y >= rows(cell.zoom) {
            return Err(Error::InvalidArgument(format!(
                "cell id {} out of range at zoom {}",
                cell.id, cell.zoom
            )));
        }
        let zoom = cell.zoom - 1;
        Ok(Some(CellId::new(zoom, (y / 2) * columns(zoom) + x / 2)))
    }

    /// All ancestors of `cell`, nearest first, ending at zoom 0.
    pub fn ancestors(cell: CellId) -> Result<Vec<CellId>> {
        let mut out = Vec::with_capacity(cell.zoom as usize);
        let mut current = cell;
        while let Some(parent) = Self::parent(current)? {
            out.push(parent);
            current = parent;
        }
        Ok(out)
    }

    /// Cells at `zoom` intersecting `bbox`, one range per row. With
    /// `enlarge`, one extra ring of neighbouring cells is included.
    pub fn bbox_to_cell_id_ranges(
        bbox: &BoundingBox,
        zoom: u32,
        enlarge: bool,
    ) -> Result<Vec<CellIdRange>> {
        check_zoom(zoom)?;
        if !bbox.is_valid() {
            return Err(Error::InvalidArgument(format!(
                "bounding box is inverted: {bbox:?}"
            )));
        }
        let cols = columns(zoom);
        let mut x0 = column_of(bbox.min_lon, zoom);
        let mut x1 = column_of(bbox.max_lon, zoom);
        let mut y0 = row_of(bbox.min_lat, zoom);
        let mut y1 = row_of(bbox.max_lat, zoom);
        if enlarge {
            x0 = x0.saturating_sub(1);
            y0 = y0.saturating_sub(1);
            x1 = (x1 + 1).min(cols - 1);
            y1 = (y1 + 1).min(rows(zoom) - 1);
        }

        Ok((y0..=y1)
            .map(|y| CellIdRange {
                zoom,
                start: y * cols + x0,
                end: y * cols + x1,
            })
            .collect())
    }

    /// Candidate ranges on every zoom from 0 to `max_zoom`.
    ///
    /// Entities live in the finest cell fully containing them, so a query
    /// must look at coarser levels too.
    pub fn bbox_to_cell_id_ranges_all_zooms(
        bbox: &BoundingBox,
        max_zoom: u32,
        enlarge: bool,
    ) -> Result<Vec<CellIdRange>> {
        check_zoom(max_zoom)?;
        let mut out = Vec::new();
        for zoom in 0..=max_zoom {
            out.extend(Self::bbox_to_cell_id_ranges(bbox, zoom, enlarge)?);
        }
        Ok(out)
    }
}

fn check_zoom(zoom: u32) -> Result<()> {
    if zoom > MAX_ZOOM {
        return Err(Error::InvalidArgument(format!(
            "zoom {zoom} exceeds maximum {MAX_ZOOM}"
        )));
    }
    Ok(())
}

fn columns(zoom: u32) -> u64 {
    1u64 << zoom
}

fn rows(zoom: u32) -> u64 {
    if zoom == 0 {
        1
    } else {
        1u64 << (zoom - 1)
    }
}

/// First fixed-point offset (from the world edge) belonging to tile `k`.
fn edge(k: u64, zoom: u32) -> i64 {
    let scale = 1i128 << zoom;
    let numerator = k as i128 * WORLD_WIDTH;
    ((numerator + scale - 1) / scale) as i64
}

fn column_of(lon: i64, zoom: u32) -> u64 {
    let offset = (lon.clamp(-MAX_LON, MAX_LON) + MAX_LON) as i128;
    let x = (offset << zoom) / WORLD_WIDTH;
    (x as u64).min(columns(zoom) - 1)
}

fn row_of(lat: i64, zoom: u32) -> u64 {
    let offset = (lat.clamp(-MAX_LAT, MAX_LAT) + MAX_LAT) as i128;
    let y = (offset << zoom) / WORLD_WIDTH;
    (y as u64).min(rows(zoom) - 1)
}
