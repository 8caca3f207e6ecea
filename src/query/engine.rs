//! The history query engine: per-cell scanning shared by both query modes.

use super::filter::{AreaOfInterest, QueryFilters};
use super::lazy::Lazy;
use crate::config::EngineConfig;
use crate::entity::EntityRecord;
use crate::error::{GeometryError, Result};
use crate::geometry::{Geometry, GeometryBuilder, GeometryRequest, TagInterpreter};
use crate::grid::GridCell;
use crate::types::{EntityVersion, Timestamp};
use geo::HasDimensions;
use std::ops::AddAssign;
use std::sync::Arc;

/// A built geometry. `Ok(None)` when the entity has nothing drawable at
/// that time.
pub type GeometryResult = std::result::Result<Option<Geometry>, GeometryError>;

/// A geometry built on first access.
pub type LazyGeometry = Lazy<GeometryResult>;

/// Counters for one scanned cell.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CellStats {
    pub records_scanned: usize,
    /// Records skipped because they failed to decode.
    pub corrupt_records: usize,
    /// Eager geometry builds or clips that failed. Failures inside lazy
    /// geometries surface later, when the geometry is first read.
    pub geometry_failures: usize,
    pub results: usize,
}

impl AddAssign for CellStats {
    fn add_assign(&mut self, other: Self) {
        self.records_scanned += other.records_scanned;
        self.corrupt_records += other.corrupt_records;
        self.geometry_failures += other.geometry_failures;
        self.results += other.results;
    }
}

/// State of one record at one instant.
pub(crate) enum EntityState {
    /// Before the first version.
    Absent,
    /// Deleted, rejected by the filter, or with nothing inside the area.
    Unmatched(Arc<EntityVersion>),
    /// Visible, accepted, and with geometry inside the area.
    Matched {
        version: Arc<EntityVersion>,
        geometry: Arc<LazyGeometry>,
    },
    /// The clipped geometry could not be built, so membership is unknown.
    Failed,
}

impl EntityState {
    pub fn is_failed(&self) -> bool {
        matches!(self, EntityState::Failed)
    }
}

/// Per-cell context.
pub(crate) struct CellScan<'q> {
    pub area: &'q AreaOfInterest,
    pub filters: &'q QueryFilters,
    /// The whole cell lies inside the area: no clipping needed.
    pub fully_inside: bool,
}

/// Reconstructs entity states from grid cells.
///
/// Cells are scanned one at a time and independently; the engine holds no
/// mutable state and can be shared by any number of worker threads.
pub struct HistoryQueryEngine {
    geometry: Arc<dyn GeometryBuilder>,
    tags: Arc<dyn TagInterpreter>,
    old_style_multipolygons: bool,
}

impl HistoryQueryEngine {
    pub fn new(
        geometry: Arc<dyn GeometryBuilder>,
        tags: Arc<dyn TagInterpreter>,
        config: &EngineConfig,
    ) -> Self {
        Self {
            geometry,
            tags,
            old_style_multipolygons: config.old_style_multipolygons,
        }
    }

    /// Drive `visit` over every decodable record of `cell` that passes the
    /// pre-filter and may intersect the area. A record that fails to decode
    /// is logged and skipped; its siblings are unaffected.
    pub(crate) fn scan_cell(
        &self,
        cell: &GridCell,
        area: &AreaOfInterest,
        filters: &QueryFilters,
        stats: &mut CellStats,
        mut visit: impl FnMut(&CellScan<'_>, &EntityRecord, &mut CellStats) -> Result<()>,
    ) -> Result<()> {
        let cell_bbox = cell.bounding_box()?;
        let scan = CellScan {
            area,
            filters,
            fully_inside: area.covers(&cell_bbox),
        };
        tracing::debug!(
            cell = %cell.key(),
            records = cell.len(),
            fully_inside = scan.fully_inside,
            "scanning cell"
        );

        for (index, record) in cell.records().enumerate() {
            stats.records_scanned += 1;
            let record = match record {
                Ok(record) => record,
                Err(e) => {
                    tracing::warn!(cell = %cell.key(), index, error = %e, "skipping undecodable record");
                    stats.corrupt_records += 1;
                    continue;
                }
            };
            if !filters.accepts_record(&record) {
                tracing::trace!(id = record.id(), "rejected by pre-filter");
                continue;
            }
            if !scan.fully_inside && !record.bbox().map_or(false, |b| area.intersects(&b)) {
                tracing::trace!(id = record.id(), "outside the area");
                continue;
            }
            if let Err(e) = visit(&scan, &record, stats) {
                if !e.is_decode() {
                    return Err(e);
                }
                tracing::warn!(
                    cell = %cell.key(),
                    id = record.id(),
                    error = %e,
                    "skipping undecodable record"
                );
                stats.corrupt_records += 1;
            }
        }
        Ok(())
    }

    /// The state of `record` at `t`.
    ///
    /// Inside a fully covered cell the geometry is left to build lazily and
    /// a failure surfaces through the [`LazyGeometry`]. Otherwise it is
    /// built and clipped now, and a failure yields [`EntityState::Failed`].
    pub(crate) fn resolve(
        &self,
        scan: &CellScan<'_>,
        record: &EntityRecord,
        t: Timestamp,
        stats: &mut CellStats,
    ) -> Result<EntityState> {
        let Some(version) = record.version_at(t)? else {
            return Ok(EntityState::Absent);
        };
        let version = Arc::new(version);
        if !version.visible || !scan.filters.accepts_version(&version) {
            return Ok(EntityState::Unmatched(version));
        }

        if scan.fully_inside {
            let geometry = Arc::new(self.lazy_geometry(record, &version, t));
            return Ok(EntityState::Matched { version, geometry });
        }
        let state = match self.clipped_geometry(scan.area, record, &version, t) {
            Ok(Some(g)) => EntityState::Matched {
                version,
                geometry: Arc::new(Lazy::ready(Ok(Some(g)))),
            },
            Ok(None) => EntityState::Unmatched(version),
            Err(e) => {
                tracing::warn!(
                    id = version.id,
                    timestamp = %t,
                    error = %e,
                    "geometry build or clip failed"
                );
                stats.geometry_failures += 1;
                EntityState::Failed
            }
        };
        Ok(state)
    }

    fn lazy_geometry(
        &self,
        record: &EntityRecord,
        version: &Arc<EntityVersion>,
        t: Timestamp,
    ) -> LazyGeometry {
        let builder = Arc::clone(&self.geometry);
        let tags = Arc::clone(&self.tags);
        let record = record.clone();
        let version = Arc::clone(version);
        let old_style_multipolygons = self.old_style_multipolygons;
        Lazy::new(move || {
            let request = GeometryRequest {
                record: &record,
                version: &version,
                timestamp: t,
                old_style_multipolygons,
            };
            let built = builder.build(&request, tags.as_ref());
            if let Err(e) = &built {
                tracing::warn!(id = version.id, timestamp = %t, error = %e, "geometry build failed");
            }
            built
        })
    }

    /// Build and clip right away; `Ok(None)` when nothing is left inside
    /// the area.
    fn clipped_geometry(
        &self,
        area: &AreaOfInterest,
        record: &EntityRecord,
        version: &EntityVersion,
        t: Timestamp,
    ) -> GeometryResult {
        let request = GeometryRequest {
            record,
            version,
            timestamp: t,
            old_style_multipolygons: self.old_style_multipolygons,
        };
        let Some(geometry) = self.geometry.build(&request, self.tags.as_ref())? else {
            return Ok(None);
        };
        let clipped = match area.polygon_filter() {
            Some(polygon) => self.geometry.clip_to_polygon(&geometry, polygon)?,
            None => self.geometry.clip_to_bbox(&geometry, area.bounding_box())?,
        };
        Ok(clipped.filter(|g| !g.is_empty()))
    }
}
