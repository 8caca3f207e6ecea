//! Contribution mode: classified transitions between consecutive states.

use super::engine::{CellScan, CellStats, EntityState, HistoryQueryEngine, LazyGeometry};
use super::filter::ContributionQuery;
use super::lazy::Lazy;
use crate::entity::EntityRecord;
use crate::error::Result;
use crate::grid::GridCell;
use crate::types::{EntityVersion, Timestamp};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// What changed in one transition.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ContributionType {
    Creation,
    Deletion,
    TagChange,
    MemberlistChange,
    GeometryChange,
}

impl ContributionType {
    pub const ALL: [ContributionType; 5] = [
        ContributionType::Creation,
        ContributionType::Deletion,
        ContributionType::TagChange,
        ContributionType::MemberlistChange,
        ContributionType::GeometryChange,
    ];
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Transition {
    Creation,
    Deletion,
    Modification,
}

/// The change set of a contribution. Creation and deletion are known up
/// front; the modification flags are each computed on first query.
pub struct ContributionTypes {
    transition: Transition,
    tag_change: Lazy<bool>,
    memberlist_change: Lazy<bool>,
    geometry_change: Lazy<bool>,
}

impl ContributionTypes {
    fn creation() -> Self {
        Self::fixed(Transition::Creation)
    }

    fn deletion() -> Self {
        Self::fixed(Transition::Deletion)
    }

    fn fixed(transition: Transition) -> Self {
        Self {
            transition,
            tag_change: Lazy::ready(false),
            memberlist_change: Lazy::ready(false),
            geometry_change: Lazy::ready(false),
        }
    }

    fn modification(
        previous: &Arc<EntityVersion>,
        current: &Arc<EntityVersion>,
        previous_geometry: &Arc<LazyGeometry>,
        current_geometry: &Arc<LazyGeometry>,
    ) -> Self {
        let (p, c) = (Arc::clone(previous), Arc::clone(current));
        let tag_change = Lazy::new(move || p.tags != c.tags);

        let (p, c) = (Arc::clone(previous), Arc::clone(current));
        let memberlist_change = Lazy::new(move || p.members() != c.members());

        let (p, c) = (Arc::clone(previous_geometry), Arc::clone(current_geometry));
        // a failed build is never reported as a change
        let geometry_change = Lazy::new(move || {
            !Arc::ptr_eq(&p, &c) && matches!((p.get(), c.get()), (Ok(a), Ok(b)) if a != b)
        });

        Self {
            transition: Transition::Modification,
            tag_change,
            memberlist_change,
            geometry_change,
        }
    }

    pub fn contains(&self, kind: ContributionType) -> bool {
        match kind {
            ContributionType::Creation => self.transition == Transition::Creation,
            ContributionType::Deletion => self.transition == Transition::Deletion,
            ContributionType::TagChange => *self.tag_change.get(),
            ContributionType::MemberlistChange => *self.memberlist_change.get(),
            ContributionType::GeometryChange => *self.geometry_change.get(),
        }
    }

    /// Every flag that is set. Evaluates all lazy flags.
    pub fn to_vec(&self) -> Vec<ContributionType> {
        ContributionType::ALL
            .into_iter()
            .filter(|kind| self.contains(*kind))
            .collect()
    }

    /// A modification that changed nothing visible on this entity, e.g. a
    /// tag edit on one of its member nodes.
    pub fn is_empty(&self) -> bool {
        ContributionType::ALL.iter().all(|kind| !self.contains(*kind))
    }
}

impl fmt::Debug for ContributionTypes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContributionTypes")
            .field("transition", &self.transition)
            .field("tag_change", &self.tag_change)
            .field("memberlist_change", &self.memberlist_change)
            .field("geometry_change", &self.geometry_change)
            .finish()
    }
}

/// One transition of one entity.
pub struct Contribution {
    pub timestamp: Timestamp,
    pub record: EntityRecord,
    /// The version valid at `timestamp`. Invisible for most deletions.
    pub version: Arc<EntityVersion>,
    pub previous_version: Option<Arc<EntityVersion>>,
    /// `None` for deletions.
    pub geometry: Option<Arc<LazyGeometry>>,
    /// `None` for creations.
    pub previous_geometry: Option<Arc<LazyGeometry>>,
    pub types: ContributionTypes,
}

impl Contribution {
    pub fn is(&self, kind: ContributionType) -> bool {
        self.types.contains(kind)
    }
}

impl fmt::Debug for Contribution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Contribution")
            .field("timestamp", &self.timestamp)
            .field("type", &self.record.entity_type())
            .field("id", &self.record.id())
            .field("version", &self.version.version)
            .field("types", &self.types)
            .finish()
    }
}

impl HistoryQueryEngine {
    /// Stream the contributions of one cell into `emit`.
    ///
    /// The state before the interval is the baseline; every modification
    /// timestamp inside `[start, end)`, own or from an embedded child,
    /// is compared against the state before it. Entering the matching set
    /// (visible, passing the filter, inside the area) is a creation, leaving
    /// it a deletion. A state whose clipped geometry fails to build yields
    /// nothing and the next state is compared against the one before it.
    pub fn contribution_cell(
        &self,
        cell: &GridCell,
        query: &ContributionQuery,
        emit: &mut dyn FnMut(Contribution),
    ) -> Result<CellStats> {
        let mut stats = CellStats::default();
        self.scan_cell(cell, &query.area, &query.filters, &mut stats, |scan, record, stats| {
            let modifications = record.modification_timestamps(true)?;
            let first = modifications.partition_point(|m| *m < query.start);
            let inside: Vec<Timestamp> = modifications[first..]
                .iter()
                .copied()
                .take_while(|t| *t < query.end)
                .collect();
            if inside.is_empty() {
                return Ok(());
            }

            let mut previous = self.baseline(scan, record, &modifications[..first], stats)?;
            for t in inside {
                let current = self.resolve(scan, record, t, stats)?;
                if current.is_failed() {
                    continue;
                }
                if let Some(contribution) = transition(record, t, &previous, &current) {
                    stats.results += 1;
                    emit(contribution);
                }
                previous = current;
            }
            Ok(())
        })?;
        Ok(stats)
    }

    /// The latest resolvable state among the modifications before the
    /// interval.
    fn baseline(
        &self,
        scan: &CellScan<'_>,
        record: &EntityRecord,
        earlier: &[Timestamp],
        stats: &mut CellStats,
    ) -> Result<EntityState> {
        for &t in earlier.iter().rev() {
            let state = self.resolve(scan, record, t, stats)?;
            if !state.is_failed() {
                return Ok(state);
            }
        }
        Ok(EntityState::Absent)
    }

    /// Collect the contributions of one cell.
    pub fn contributions(
        &self,
        cell: &GridCell,
        query: &ContributionQuery,
    ) -> Result<Vec<Contribution>> {
        let mut out = Vec::new();
        self.contribution_cell(cell, query, &mut |c| out.push(c))?;
        Ok(out)
    }
}

fn transition(
    record: &EntityRecord,
    t: Timestamp,
    previous: &EntityState,
    current: &EntityState,
) -> Option<Contribution> {
    let before = match previous {
        EntityState::Matched { version, geometry } => Some((version, geometry)),
        _ => None,
    };
    let (version, after) = match current {
        EntityState::Matched { version, geometry } => (version, Some(geometry)),
        EntityState::Unmatched(version) => (version, None),
        EntityState::Absent | EntityState::Failed => return None,
    };

    let types = match (before, after) {
        (None, None) => return None,
        (None, Some(_)) => ContributionTypes::creation(),
        (Some(_), None) => ContributionTypes::deletion(),
        (Some((previous_version, previous_geometry)), Some(geometry)) => {
            ContributionTypes::modification(previous_version, version, previous_geometry, geometry)
        }
    };
    tracing::trace!(id = record.id(), timestamp = %t, ?types, "contribution");

    Some(Contribution {
        timestamp: t,
        record: record.clone(),
        version: Arc::clone(version),
        previous_version: before.map(|(v, _)| Arc::clone(v)),
        geometry: after.cloned(),
        previous_geometry: before.map(|(_, g)| Arc::clone(g)),
        types,
    })
}
