//! Versioned entity records.
//!
//! One record holds every version of one node, way or relation as a single
//! delta-encoded byte string. Versions are stored newest first and each one
//! writes only what changed relative to the version before it in the stream
//! (see [`ReplayState`]). Ways and relations may embed the records of the
//! nodes and ways they reference so geometries can be rebuilt at any point
//! in time without further lookups.

mod builder;
mod format;
mod record;
mod replay;

pub use builder::build_record;
pub use format::ChildRef;
pub use record::{EntityRecord, VersionIter};
pub use replay::ReplayState;
