//! Tag interpretation: which entities are areas, lines and multipolygons.

use crate::types::{EntityType, EntityVersion, Member, Tag};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Predicates answered from integer tag and role ids.
pub trait TagInterpreter: Send + Sync {
    /// Whether a closed way or a relation describes an area.
    fn is_area(&self, version: &EntityVersion) -> bool;

    /// Whether a way describes a line.
    fn is_line(&self, version: &EntityVersion) -> bool;

    fn is_multipolygon_outer_member(&self, member: &Member) -> bool;

    fn is_multipolygon_inner_member(&self, member: &Member) -> bool;

    /// A multipolygon relation whose area tags live on the outer way.
    fn is_old_style_multipolygon(&self, version: &EntityVersion) -> bool;
}

/// Rule-set interpreter over tag id pairs.
///
/// A way is an area when it carries one of the area keys (any value) or
/// area tags (exact pair) and none of the not-area tags. A relation is an
/// area when it carries the multipolygon type tag. Members with an empty
/// role count as outer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyValueInterpreter {
    pub area_keys: HashSet<u32>,
    pub area_tags: HashSet<Tag>,
    pub not_area_tags: HashSet<Tag>,
    pub multipolygon_type: Tag,
    /// Keys ignored when deciding whether a multipolygon is old-style,
    /// e.g. `type`, `source`, `created_by`.
    pub uninteresting_keys: HashSet<u32>,
    pub outer_role: u32,
    pub inner_role: u32,
    pub empty_role: u32,
}

impl KeyValueInterpreter {
    pub fn new(multipolygon_type: Tag, outer_role: u32, inner_role: u32, empty_role: u32) -> Self {
        let mut uninteresting_keys = HashSet::new();
        uninteresting_keys.insert(multipolygon_type.key);
        Self {
            area_keys: HashSet::new(),
            area_tags: HashSet::new(),
            not_area_tags: HashSet::new(),
            multipolygon_type,
            uninteresting_keys,
            outer_role,
            inner_role,
            empty_role,
        }
    }

    pub fn with_area_key(mut self, key: u32) -> Self {
        self.area_keys.insert(key);
        self
    }

    pub fn with_area_tag(mut self, tag: Tag) -> Self {
        self.area_tags.insert(tag);
        self
    }

    pub fn with_not_area_tag(mut self, tag: Tag) -> Self {
        self.not_area_tags.insert(tag);
        self
    }

    pub fn with_uninteresting_key(mut self, key: u32) -> Self {
        self.uninteresting_keys.insert(key);
        self
    }

    fn is_multipolygon(&self, version: &EntityVersion) -> bool {
        version.entity_type() == EntityType::Relation
            && version.has_tag(self.multipolygon_type.key, self.multipolygon_type.value)
    }
}

impl TagInterpreter for KeyValueInterpreter {
    fn is_area(&self, version: &EntityVersion) -> bool {
        match version.entity_type() {
            EntityType::Node => false,
            EntityType::Relation => self.is_multipolygon(version),
            EntityType::Way => {
                if version.tags.iter().any(|t| self.not_area_tags.contains(t)) {
                    return false;
                }
                version
                    .tags
                    .iter()
                    .any(|t| self.area_keys.contains(&t.key) || self.area_tags.contains(t))
            }
        }
    }

    fn is_line(&self, version: &EntityVersion) -> bool {
        version.entity_type() == EntityType::Way && !self.is_area(version)
    }

    fn is_multipolygon_outer_member(&self, member: &Member) -> bool {
        member.target == EntityType::Way
            && (member.role == self.outer_role || member.role == self.empty_role)
    }

    fn is_multipolygon_inner_member(&self, member: &Member) -> bool {
        member.target == EntityType::Way && member.role == self.inner_role
    }

    fn is_old_style_multipolygon(&self, version: &EntityVersion) -> bool {
        self.is_multipolygon(version)
            && version
                .tags
                .iter()
                .all(|t| self.uninteresting_keys.contains(&t.key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Payload, Timestamp};

    const TYPE: u32 = 1;
    const MULTIPOLYGON: u32 = 1;
    const BUILDING: u32 = 2;
    const YES: u32 = 2;
    const AREA: u32 = 3;
    const NO: u32 = 3;
    const HIGHWAY: u32 = 4;

    const OUTER: u32 = 1;
    const INNER: u32 = 2;
    const EMPTY: u32 = 0;

    fn interpreter() -> KeyValueInterpreter {
        KeyValueInterpreter::new(Tag::new(TYPE, MULTIPOLYGON), OUTER, INNER, EMPTY)
            .with_area_key(BUILDING)
            .with_area_tag(Tag::new(AREA, YES))
            .with_not_area_tag(Tag::new(AREA, NO))
    }

    fn version(payload: Payload, tags: Vec<Tag>) -> EntityVersion {
        EntityVersion {
            id: 1,
            version: 1,
            visible: true,
            timestamp: Timestamp(1),
            changeset: 1,
            user_id: 1,
            tags,
            payload,
        }
    }

    #[test]
    fn test_way_area_rules() {
        let i = interpreter();
        let building = version(Payload::Way(vec![]), vec![Tag::new(BUILDING, 9)]);
        assert!(i.is_area(&building));
        assert!(!i.is_line(&building));

        let highway = version(Payload::Way(vec![]), vec![Tag::new(HIGHWAY, 1)]);
        assert!(!i.is_area(&highway));
        assert!(i.is_line(&highway));

        let not_area = version(
            Payload::Way(vec![]),
            vec![Tag::new(BUILDING, YES), Tag::new(AREA, NO)],
        );
        assert!(!i.is_area(&not_area));
    }

    #[test]
    fn test_multipolygon_rules() {
        let i = interpreter();
        let old_style = version(Payload::Relation(vec![]), vec![Tag::new(TYPE, MULTIPOLYGON)]);
        assert!(i.is_area(&old_style));
        assert!(i.is_old_style_multipolygon(&old_style));

        let tagged = version(
            Payload::Relation(vec![]),
            vec![Tag::new(TYPE, MULTIPOLYGON), Tag::new(BUILDING, YES)],
        );
        assert!(i.is_area(&tagged));
        assert!(!i.is_old_style_multipolygon(&tagged));

        assert!(i.is_multipolygon_outer_member(&Member::new(EntityType::Way, 5, OUTER)));
        assert!(i.is_multipolygon_outer_member(&Member::new(EntityType::Way, 5, EMPTY)));
        assert!(!i.is_multipolygon_outer_member(&Member::new(EntityType::Node, 5, OUTER)));
        assert!(i.is_multipolygon_inner_member(&Member::new(EntityType::Way, 5, INNER)));
    }
}
