//! # osh-grid
//!
//! Storage and time-aware querying of the full edit history of map
//! entities (nodes, ways and relations).
//!
//! ## Core Concepts
//!
//! - **Records**: every version of one entity packed into one delta-encoded
//!   byte string, with the nodes and ways it references embedded
//! - **Grid**: hierarchical tiles bucketing records by location, one
//!   checksummed blob per (type, zoom, cell)
//! - **Queries**: entity states at chosen instants (snapshots) or the
//!   classified changes between them (contributions), with geometries
//!   built lazily and clipped to the area of interest
//!
//! ## Example
//!
//! ```ignore
//! use osh_grid::*;
//! use std::sync::Arc;
//!
//! let config = EngineConfig::default();
//! let store = MemoryCellStore::from_config(&config);
//! store.insert(&GridCell::build(EntityType::Node, cell, &records)?);
//!
//! let engine = HistoryQueryEngine::new(
//!     Arc::new(SimpleGeometryBuilder),
//!     Arc::new(interpreter),
//!     &config,
//! );
//! let query = SnapshotQuery::new(AreaOfInterest::bbox(bbox)?, timestamps)?
//!     .with_filter(|v| v.has_tag(BUILDING, YES));
//!
//! QueryExecutor::new(&engine, &store, config).snapshots(
//!     &[EntityType::Node, EntityType::Way],
//!     &query,
//!     |snapshot| println!("{snapshot:?}"),
//! )?;
//! ```

pub mod codec;
pub mod config;
pub mod entity;
pub mod error;
pub mod geometry;
pub mod grid;
pub mod query;
pub mod store;
pub mod types;

// Re-exports
pub use codec::{ByteReader, ByteWriter};
pub use config::EngineConfig;
pub use entity::{build_record, ChildRef, EntityRecord, ReplayState, VersionIter};
pub use error::{DecodeError, Error, GeometryError, Result};
pub use geometry::{
    Coord, Geometry, GeometryBuilder, GeometryCollection, GeometryRequest, KeyValueInterpreter,
    LineString, MultiLineString, MultiPolygon, Point, Polygon, Rect, SimpleGeometryBuilder,
    TagInterpreter,
};
pub use grid::{CellId, CellIdRange, GridCell, SpatialGrid, MAX_ZOOM};
pub use query::{
    AreaOfInterest, CellStats, Contribution, ContributionQuery, ContributionType,
    ContributionTypes, GeometryResult, HistoryQueryEngine, Lazy, LazyGeometry, QueryExecutor, QueryFilters,
    ScanStats, Snapshot, SnapshotQuery,
};
pub use store::{CellSource, MemoryCellStore};
pub use types::*;
