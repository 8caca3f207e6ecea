//! Snapshot mode: entity states at given instants.

use super::engine::{CellStats, EntityState, HistoryQueryEngine, LazyGeometry};
use super::filter::SnapshotQuery;
use crate::entity::EntityRecord;
use crate::error::{GeometryError, Result};
use crate::geometry::Geometry;
use crate::grid::GridCell;
use crate::types::{EntityVersion, Timestamp};
use std::fmt;
use std::sync::Arc;

/// One entity's state at one requested instant.
#[derive(Clone)]
pub struct Snapshot {
    pub timestamp: Timestamp,
    pub record: EntityRecord,
    pub version: Arc<EntityVersion>,
    /// Shared by consecutive snapshots of the same state.
    pub geometry: Arc<LazyGeometry>,
}

impl Snapshot {
    /// Build (or fetch the memoized) geometry. `None` when there is
    /// nothing drawable or the build failed.
    pub fn geometry(&self) -> Option<&Geometry> {
        self.geometry.get().as_ref().ok().and_then(Option::as_ref)
    }

    /// Why the geometry could not be built, if it could not.
    pub fn geometry_error(&self) -> Option<&GeometryError> {
        self.geometry.get().as_ref().err()
    }

    /// Whether both snapshots come from the same resolved state.
    pub fn same_state(&self, other: &Snapshot) -> bool {
        Arc::ptr_eq(&self.geometry, &other.geometry)
    }
}

impl fmt::Debug for Snapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Snapshot")
            .field("timestamp", &self.timestamp)
            .field("type", &self.record.entity_type())
            .field("id", &self.record.id())
            .field("version", &self.version.version)
            .finish()
    }
}

impl HistoryQueryEngine {
    /// Stream the snapshots of one cell into `emit`, in record order and
    /// ascending time per record.
    pub fn snapshot_cell(
        &self,
        cell: &GridCell,
        query: &SnapshotQuery,
        emit: &mut dyn FnMut(Snapshot),
    ) -> Result<CellStats> {
        let mut stats = CellStats::default();
        self.scan_cell(cell, &query.area, &query.filters, &mut stats, |scan, record, stats| {
            // a state only changes at a modification timestamp, so requested
            // instants between the same two modifications share one state
            let modifications = record.modification_timestamps(true)?;
            let mut last_slot: Option<usize> = None;
            let mut last: Option<(Arc<EntityVersion>, Arc<LazyGeometry>)> = None;

            for &t in &query.timestamps {
                let slot = modifications.partition_point(|m| *m <= t);
                if last_slot != Some(slot) {
                    last_slot = Some(slot);
                    last = if slot == 0 {
                        None
                    } else {
                        match self.resolve(scan, record, t, stats)? {
                            EntityState::Matched { version, geometry } => Some((version, geometry)),
                            _ => None,
                        }
                    };
                }
                if let Some((version, geometry)) = &last {
                    stats.results += 1;
                    emit(Snapshot {
                        timestamp: t,
                        record: record.clone(),
                        version: Arc::clone(version),
                        geometry: Arc::clone(geometry),
                    });
                }
            }
            Ok(())
        })?;
        Ok(stats)
    }

    /// Collect the snapshots of one cell.
    pub fn snapshots(&self, cell: &GridCell, query: &SnapshotQuery) -> Result<Vec<Snapshot>> {
        let mut out = Vec::new();
        self.snapshot_cell(cell, query, &mut |s| out.push(s))?;
        Ok(out)
    }
}
