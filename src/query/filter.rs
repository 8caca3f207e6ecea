//! Query inputs: the area of interest, filters and time selection.

use crate::entity::EntityRecord;
use crate::error::{Error, Result};
use crate::geometry::Polygon;
use crate::types::{BoundingBox, EntityVersion, Timestamp};
use geo::{BoundingRect, Contains};
use std::fmt;
use std::sync::Arc;

/// Cheap test on a whole record (key summary, bounding box).
pub type RecordFilter = Arc<dyn Fn(&EntityRecord) -> bool + Send + Sync>;

/// Full test on one decoded version.
pub type VersionFilter = Arc<dyn Fn(&EntityVersion) -> bool + Send + Sync>;

/// Spatial restriction of a query: a box, or a polygon with its enclosing
/// box. Results are clipped to the polygon when there is one.
#[derive(Debug, Clone, PartialEq)]
pub struct AreaOfInterest {
    bbox: BoundingBox,
    polygon: Option<Polygon>,
}

impl AreaOfInterest {
    pub fn bbox(bbox: BoundingBox) -> Result<Self> {
        if !bbox.is_valid() {
            return Err(Error::InvalidArgument(format!(
                "bounding box is inverted: {bbox:?}"
            )));
        }
        Ok(Self {
            bbox,
            polygon: None,
        })
    }

    /// Any simple polygon, holes included.
    pub fn polygon(polygon: Polygon) -> Result<Self> {
        let Some(rect) = polygon.bounding_rect() else {
            return Err(Error::InvalidArgument("area polygon has no coordinates".into()));
        };
        Ok(Self {
            bbox: BoundingBox::enclosing(&rect),
            polygon: Some(polygon),
        })
    }

    pub fn world() -> Self {
        Self {
            bbox: BoundingBox::world(),
            polygon: None,
        }
    }

    pub fn bounding_box(&self) -> &BoundingBox {
        &self.bbox
    }

    pub fn polygon_filter(&self) -> Option<&Polygon> {
        self.polygon.as_ref()
    }

    /// Whether everything inside `cell` is inside the area, so results
    /// need no clipping.
    pub fn covers(&self, cell: &BoundingBox) -> bool {
        self.bbox.contains(cell)
            && self
                .polygon
                .as_ref()
                .map_or(true, |p| p.contains(&cell.to_rect().to_polygon()))
    }

    pub fn intersects(&self, bbox: &BoundingBox) -> bool {
        self.bbox.intersects(bbox)
    }
}

/// Optional record and version predicates.
#[derive(Clone, Default)]
pub struct QueryFilters {
    pub pre_filter: Option<RecordFilter>,
    pub filter: Option<VersionFilter>,
}

impl QueryFilters {
    pub fn accepts_record(&self, record: &EntityRecord) -> bool {
        self.pre_filter.as_ref().map_or(true, |f| f(record))
    }

    pub fn accepts_version(&self, version: &EntityVersion) -> bool {
        self.filter.as_ref().map_or(true, |f| f(version))
    }
}

impl fmt::Debug for QueryFilters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryFilters")
            .field("pre_filter", &self.pre_filter.is_some())
            .field("filter", &self.filter.is_some())
            .finish()
    }
}

/// Entity states at a list of instants.
#[derive(Clone, Debug)]
pub struct SnapshotQuery {
    pub area: AreaOfInterest,
    /// Ascending.
    pub timestamps: Vec<Timestamp>,
    pub filters: QueryFilters,
}

impl SnapshotQuery {
    pub fn new(area: AreaOfInterest, timestamps: Vec<Timestamp>) -> Result<Self> {
        if timestamps.windows(2).any(|pair| pair[0] > pair[1]) {
            return Err(Error::InvalidArgument(
                "snapshot timestamps must be sorted ascending".into(),
            ));
        }
        Ok(Self {
            area,
            timestamps,
            filters: QueryFilters::default(),
        })
    }

    pub fn with_pre_filter(
        mut self,
        f: impl Fn(&EntityRecord) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.filters.pre_filter = Some(Arc::new(f));
        self
    }

    pub fn with_filter(mut self, f: impl Fn(&EntityVersion) -> bool + Send + Sync + 'static) -> Self {
        self.filters.filter = Some(Arc::new(f));
        self
    }
}

/// State transitions inside the half-open interval `[start, end)`.
#[derive(Clone, Debug)]
pub struct ContributionQuery {
    pub area: AreaOfInterest,
    pub start: Timestamp,
    pub end: Timestamp,
    pub filters: QueryFilters,
}

impl ContributionQuery {
    pub fn new(area: AreaOfInterest, start: Timestamp, end: Timestamp) -> Result<Self> {
        if start >= end {
            return Err(Error::InvalidArgument(format!(
                "empty contribution interval [{start}, {end})"
            )));
        }
        Ok(Self {
            area,
            start,
            end,
            filters: QueryFilters::default(),
        })
    }

    pub fn with_pre_filter(
        mut self,
        f: impl Fn(&EntityRecord) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.filters.pre_filter = Some(Arc::new(f));
        self
    }

    pub fn with_filter(mut self, f: impl Fn(&EntityVersion) -> bool + Send + Sync + 'static) -> Self {
        self.filters.filter = Some(Arc::new(f));
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::LineString;

    #[test]
    fn test_query_validation() {
        let area = AreaOfInterest::world();
        assert!(SnapshotQuery::new(area.clone(), vec![Timestamp(2), Timestamp(1)]).is_err());
        assert!(SnapshotQuery::new(area.clone(), vec![Timestamp(1), Timestamp(1)]).is_ok());
        assert!(ContributionQuery::new(area.clone(), Timestamp(5), Timestamp(5)).is_err());
        assert!(AreaOfInterest::bbox(BoundingBox::new(1, 1, 0, 0)).is_err());
    }

    #[test]
    fn test_area_covers_cell() {
        let polygon = Polygon::new(
            LineString::from(vec![(0.0, 0.0), (10.0, 0.0), (0.0, 10.0)]),
            vec![],
        );
        let area = AreaOfInterest::polygon(polygon).unwrap();
        assert_eq!(
            *area.bounding_box(),
            BoundingBox::from_degrees(0.0, 0.0, 10.0, 10.0)
        );
        assert!(area.covers(&BoundingBox::from_degrees(1.0, 1.0, 2.0, 2.0)));
        // inside the box but beyond the hypotenuse
        assert!(!area.covers(&BoundingBox::from_degrees(7.0, 7.0, 8.0, 8.0)));

        // concave: the cell sits in the notch of an L
        let l_shape = Polygon::new(
            LineString::from(vec![(0.0, 0.0), (4.0, 0.0), (4.0, 2.0), (2.0, 2.0), (2.0, 4.0), (0.0, 4.0)]),
            vec![],
        );
        let area = AreaOfInterest::polygon(l_shape).unwrap();
        assert!(area.covers(&BoundingBox::from_degrees(0.5, 0.5, 1.5, 1.5)));
        assert!(!area.covers(&BoundingBox::from_degrees(2.5, 2.5, 3.5, 3.5)));
        assert!(area.intersects(&BoundingBox::from_degrees(2.5, 2.5, 3.5, 3.5)));

        let empty = Polygon::new(LineString::new(vec![]), vec![]);
        assert!(AreaOfInterest::polygon(empty).is_err());
    }

    #[test]
    fn test_filters_default_to_accepting() {
        let filters = QueryFilters::default();
        let version = EntityVersion {
            id: 1,
            version: 1,
            visible: true,
            timestamp: Timestamp(1),
            changeset: 1,
            user_id: 1,
            tags: vec![],
            payload: crate::types::Payload::Node(None),
        };
        assert!(filters.accepts_version(&version));
        let query = SnapshotQuery::new(AreaOfInterest::world(), vec![Timestamp(1)])
            .unwrap()
            .with_filter(|v| !v.tags.is_empty());
        assert!(!query.filters.accepts_version(&version));
    }
}
