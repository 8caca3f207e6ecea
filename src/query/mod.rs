//! Time-aware queries over grid cells.
//!
//! [`HistoryQueryEngine`] scans one cell at a time in one of two modes:
//!
//! - **snapshots**: the state of every matching entity at each requested
//!   instant ([`Snapshot`]),
//! - **contributions**: every transition into, out of or within the
//!   matching set during an interval, classified by [`ContributionType`].
//!
//! Geometries are built lazily and unclipped when the whole cell lies
//! inside the area of interest; otherwise they are built and clipped while
//! scanning. [`QueryExecutor`] fans a query out over many cells.

mod contribution;
mod engine;
mod executor;
mod filter;
mod lazy;
mod snapshot;

pub use contribution::{Contribution, ContributionType, ContributionTypes};
pub use engine::{CellStats, GeometryResult, HistoryQueryEngine, LazyGeometry};
pub use executor::{QueryExecutor, ScanStats};
pub use filter::{
    AreaOfInterest, ContributionQuery, QueryFilters, RecordFilter, SnapshotQuery, VersionFilter,
};
pub use lazy::Lazy;
pub use snapshot::Snapshot;
