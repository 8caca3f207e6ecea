//! Fanning a query out over many cells.
//!
//! A feeder pushes cell keys into a bounded task channel; `workers` scoped
//! threads load and scan one cell per task and send results back over a
//! bounded result channel, drained on the calling thread. Results from
//! different cells arrive in no particular order.

use super::contribution::Contribution;
use super::engine::{CellStats, HistoryQueryEngine};
use super::filter::{ContributionQuery, SnapshotQuery};
use super::snapshot::Snapshot;
use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::grid::{GridCell, SpatialGrid};
use crate::store::CellSource;
use crate::types::{BoundingBox, CellKey, EntityType};
use crossbeam_channel::bounded;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

/// Totals of one scan.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ScanStats {
    pub total_cells: usize,
    pub processed_cells: usize,
    /// Keys the source had no cell for.
    pub missing_cells: usize,
    pub records_scanned: usize,
    pub corrupt_records: usize,
    pub geometry_failures: usize,
    pub results: usize,
}

impl ScanStats {
    fn add_cell(&mut self, cell: CellStats) {
        self.processed_cells += 1;
        self.records_scanned += cell.records_scanned;
        self.corrupt_records += cell.corrupt_records;
        self.geometry_failures += cell.geometry_failures;
        self.results += cell.results;
    }
}

enum Message<T> {
    Result(T),
    CellDone(CellStats),
    CellMissing,
    Failed(CellKey, Error),
    Expired,
}

/// Runs queries over a [`CellSource`] with a fixed pool of workers.
pub struct QueryExecutor<'a> {
    engine: &'a HistoryQueryEngine,
    source: &'a dyn CellSource,
    config: EngineConfig,
}

impl<'a> QueryExecutor<'a> {
    pub fn new(engine: &'a HistoryQueryEngine, source: &'a dyn CellSource, config: EngineConfig) -> Self {
        Self {
            engine,
            source,
            config,
        }
    }

    /// Candidate cells for an area on every zoom up to the query zoom.
    pub fn cell_keys(&self, bbox: &BoundingBox, types: &[EntityType]) -> Result<Vec<CellKey>> {
        let ranges = SpatialGrid::bbox_to_cell_id_ranges_all_zooms(
            bbox,
            self.config.query_zoom,
            self.config.enlarge,
        )?;
        Ok(types
            .iter()
            .flat_map(|t| self.source.keys_for(*t, &ranges))
            .collect())
    }

    /// Snapshot query over every stored cell of `types` touching the area.
    pub fn snapshots(
        &self,
        types: &[EntityType],
        query: &SnapshotQuery,
        sink: impl FnMut(Snapshot),
    ) -> Result<ScanStats> {
        let keys = self.cell_keys(query.area.bounding_box(), types)?;
        self.scan(&keys, self.deadline(), sink, |cell, emit| {
            self.engine.snapshot_cell(cell, query, emit)
        })
    }

    /// Contribution query over every stored cell of `types` touching the area.
    pub fn contributions(
        &self,
        types: &[EntityType],
        query: &ContributionQuery,
        sink: impl FnMut(Contribution),
    ) -> Result<ScanStats> {
        let keys = self.cell_keys(query.area.bounding_box(), types)?;
        self.scan(&keys, self.deadline(), sink, |cell, emit| {
            self.engine.contribution_cell(cell, query, emit)
        })
    }

    fn deadline(&self) -> Option<Instant> {
        self.config.timeout().map(|d| Instant::now() + d)
    }

    /// Run `per_cell` on every cell in `keys`, handing its results to `sink`
    /// on the calling thread.
    ///
    /// The deadline is checked before each cell. Once it passes, no further
    /// cell is started, results already handed to `sink` stay delivered, and
    /// the scan fails with [`Error::Timeout`]. The first failing cell stops
    /// the scan the same way and its error is returned.
    pub fn scan<T, F>(
        &self,
        keys: &[CellKey],
        deadline: Option<Instant>,
        mut sink: impl FnMut(T),
        per_cell: F,
    ) -> Result<ScanStats>
    where
        T: Send,
        F: Fn(&GridCell, &mut dyn FnMut(T)) -> Result<CellStats> + Sync,
    {
        let mut stats = ScanStats {
            total_cells: keys.len(),
            ..Default::default()
        };
        if keys.is_empty() {
            return Ok(stats);
        }

        let workers = self.config.workers.max(1).min(keys.len());
        let buffer = self.config.task_buffer.max(1);
        let (task_tx, task_rx) = bounded::<CellKey>(buffer);
        let (result_tx, result_rx) = bounded::<Message<T>>(buffer);
        let stop = AtomicBool::new(false);
        let source = self.source;

        tracing::debug!(cells = keys.len(), workers, "starting scan");

        let mut failure: Option<Error> = None;
        let mut expired = false;

        std::thread::scope(|s| {
            s.spawn(|| {
                for key in keys {
                    if stop.load(Ordering::Relaxed) || task_tx.send(*key).is_err() {
                        break;
                    }
                }
                drop(task_tx);
            });

            for _ in 0..workers {
                let task_rx = task_rx.clone();
                let result_tx = result_tx.clone();
                let per_cell = &per_cell;
                let stop = &stop;
                s.spawn(move || {
                    for key in task_rx.iter() {
                        if stop.load(Ordering::Relaxed) {
                            break;
                        }
                        if deadline.map_or(false, |d| Instant::now() >= d) {
                            stop.store(true, Ordering::Relaxed);
                            let _ = result_tx.send(Message::Expired);
                            break;
                        }
                        let message = match source.load(&key) {
                            Ok(Some(cell)) => {
                                let mut emit = |item: T| {
                                    let _ = result_tx.send(Message::Result(item));
                                };
                                match per_cell(&cell, &mut emit) {
                                    Ok(cell_stats) => Message::CellDone(cell_stats),
                                    Err(e) => Message::Failed(key, e),
                                }
                            }
                            Ok(None) => Message::CellMissing,
                            Err(e) => Message::Failed(key, e),
                        };
                        if result_tx.send(message).is_err() {
                            break;
                        }
                    }
                });
            }
            drop(task_rx);
            drop(result_tx);

            for message in result_rx.iter() {
                match message {
                    Message::Result(item) => sink(item),
                    Message::CellDone(cell_stats) => stats.add_cell(cell_stats),
                    Message::CellMissing => {
                        stats.processed_cells += 1;
                        stats.missing_cells += 1;
                    }
                    Message::Failed(key, e) => {
                        tracing::warn!(cell = %key, error = %e, "cell scan failed");
                        stop.store(true, Ordering::Relaxed);
                        if failure.is_none() {
                            failure = Some(e);
                        }
                    }
                    Message::Expired => expired = true,
                }
            }
        });

        tracing::debug!(
            processed = stats.processed_cells,
            total = stats.total_cells,
            results = stats.results,
            corrupt = stats.corrupt_records,
            "scan finished"
        );

        if let Some(e) = failure {
            return Err(e);
        }
        if expired {
            return Err(Error::Timeout {
                processed_cells: stats.processed_cells,
                total_cells: stats.total_cells,
            });
        }
        Ok(stats)
    }
}
