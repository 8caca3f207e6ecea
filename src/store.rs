//! Cell storage boundary and an in-memory implementation.

use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::grid::{CellIdRange, GridCell};
use crate::types::{CellKey, EntityType};
use lru::LruCache;
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::num::NonZeroUsize;
use std::sync::Arc;

/// Where the executor loads cells from.
///
/// Loading bytes is the source's job; decoding happens on the workers.
pub trait CellSource: Send + Sync {
    /// `Ok(None)` when no cell is stored under `key`.
    fn load(&self, key: &CellKey) -> Result<Option<GridCell>>;

    /// Stored cells of one entity type falling in any of `ranges`.
    fn keys_for(&self, entity_type: EntityType, ranges: &[CellIdRange]) -> Vec<CellKey>;
}

/// Cell blobs held in memory, with an LRU cache of parsed cells.
pub struct MemoryCellStore {
    blobs: RwLock<BTreeMap<CellKey, Arc<[u8]>>>,
    cache: Mutex<LruCache<CellKey, GridCell>>,
}

impl MemoryCellStore {
    pub fn new(cache_size: usize) -> Self {
        let cache_size = NonZeroUsize::new(cache_size.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            blobs: RwLock::new(BTreeMap::new()),
            cache: Mutex::new(LruCache::new(cache_size)),
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(config.cell_cache_size)
    }

    /// Store a cell, replacing any cell under the same key.
    pub fn insert(&self, cell: &GridCell) {
        let key = cell.key();
        self.blobs.write().insert(key, Arc::from(cell.as_bytes()));
        self.cache.lock().put(key, cell.clone());
    }

    /// Store a serialized cell. The blob header must name `key`.
    pub fn insert_blob(&self, key: CellKey, blob: Vec<u8>) -> Result<()> {
        let cell = GridCell::from_bytes(blob)?;
        if cell.key() != key {
            return Err(Error::InvalidArgument(format!(
                "blob holds cell {} but was stored as {}",
                cell.key(),
                key
            )));
        }
        self.insert(&cell);
        Ok(())
    }

    pub fn remove(&self, key: &CellKey) -> bool {
        self.cache.lock().pop(key);
        self.blobs.write().remove(key).is_some()
    }

    pub fn len(&self) -> usize {
        self.blobs.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.read().is_empty()
    }

    pub fn keys(&self) -> Vec<CellKey> {
        self.blobs.read().keys().copied().collect()
    }
}

impl CellSource for MemoryCellStore {
    fn load(&self, key: &CellKey) -> Result<Option<GridCell>> {
        if let Some(cell) = self.cache.lock().get(key).cloned() {
            return Ok(Some(cell));
        }

        let Some(blob) = self.blobs.read().get(key).cloned() else {
            return Ok(None);
        };
        let cell = GridCell::from_bytes(blob)?;
        tracing::trace!(cell = %key, records = cell.len(), "parsed cell into cache");
        self.cache.lock().put(*key, cell.clone());
        Ok(Some(cell))
    }

    fn keys_for(&self, entity_type: EntityType, ranges: &[CellIdRange]) -> Vec<CellKey> {
        let blobs = self.blobs.read();
        let mut keys = Vec::new();
        for range in ranges {
            let from = CellKey::new(entity_type, range.zoom, range.start);
            let to = CellKey::new(entity_type, range.zoom, range.end);
            keys.extend(blobs.range(from..=to).map(|(k, _)| *k));
        }
        keys.sort_unstable();
        keys.dedup();
        keys
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::EntityRecord;
    use crate::grid::{CellId, SpatialGrid};
    use crate::types::{BoundingBox, EntityVersion, Location, Payload, RecordBase, Timestamp};

    fn cell_with_node(lon: f64, lat: f64, zoom: u32) -> GridCell {
        let version = EntityVersion {
            id: 1,
            version: 1,
            visible: true,
            timestamp: Timestamp(1),
            changeset: 1,
            user_id: 1,
            tags: vec![],
            payload: Payload::Node(Some(Location::from_degrees(lon, lat))),
        };
        let record = EntityRecord::new(&[version], RecordBase::default(), &[]).unwrap();
        let cell = SpatialGrid::cell_id_degrees(lon, lat, zoom).unwrap();
        GridCell::build(EntityType::Node, cell, &[record]).unwrap()
    }

    #[test]
    fn test_insert_and_load() {
        let store = MemoryCellStore::new(1);
        let a = cell_with_node(8.67, 49.41, 10);
        let b = cell_with_node(-70.0, -30.0, 10);
        store.insert(&a);
        store.insert(&b);
        assert_eq!(store.len(), 2);

        // b pushed a out of the single-entry cache; a comes back from its blob
        let loaded = store.load(&a.key()).unwrap().unwrap();
        assert_eq!(loaded.as_bytes(), a.as_bytes());
        assert!(store.load(&CellKey::new(EntityType::Way, 10, 0)).unwrap().is_none());

        assert!(store.remove(&a.key()));
        assert!(store.load(&a.key()).unwrap().is_none());
    }

    #[test]
    fn test_insert_blob_checks_key() {
        let store = MemoryCellStore::new(4);
        let cell = cell_with_node(8.67, 49.41, 10);
        let wrong = CellKey::new(EntityType::Node, 10, cell.key().cell_id + 1);
        assert!(matches!(
            store.insert_blob(wrong, cell.to_bytes()),
            Err(Error::InvalidArgument(_))
        ));
        store.insert_blob(cell.key(), cell.to_bytes()).unwrap();
        assert_eq!(store.keys(), vec![cell.key()]);
    }

    #[test]
    fn test_keys_for_ranges() {
        let store = MemoryCellStore::new(4);
        let inside = cell_with_node(8.67, 49.41, 10);
        let outside = cell_with_node(-70.0, -30.0, 10);
        let world = GridCell::build(EntityType::Node, CellId::new(0, 0), &[]).unwrap();
        store.insert(&inside);
        store.insert(&outside);
        store.insert(&world);

        let bbox = BoundingBox::from_degrees(8.0, 49.0, 9.0, 50.0);
        let ranges = SpatialGrid::bbox_to_cell_id_ranges_all_zooms(&bbox, 10, false).unwrap();
        let keys = store.keys_for(EntityType::Node, &ranges);
        assert_eq!(keys, vec![world.key(), inside.key()]);
        assert!(store.keys_for(EntityType::Way, &ranges).is_empty());
    }
}
