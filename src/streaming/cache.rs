//! Time-bounded cache of decoded tiles
//!
//! Entries expire when they haven't been read for `max_ram_time`. Eviction
//! is lazy: stale entries are dropped when read or by [`GeometryCache::sweep`].
//! There is no byte budget, so everything touched within the window can be
//! resident at once; [`GeometryCache::resident_bytes`] reports how much that is.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::streaming::tile::{GeometryTile, TileId};

struct TileCacheEntry {
    tile: Arc<GeometryTile>,
    bytes: usize,
    last_access: Instant,
}

/// Decoded tiles by tile id
pub struct GeometryCache {
    entries: HashMap<TileId, TileCacheEntry>,
    max_ram_time: Duration,
    resident_bytes: usize,
}

impl GeometryCache {
    pub fn new(max_ram_time: Duration) -> Self {
        Self {
            entries: HashMap::new(),
            max_ram_time,
            resident_bytes: 0,
        }
    }

    pub fn max_ram_time(&self) -> Duration {
        self.max_ram_time
    }

    fn is_stale(&self, entry: &TileCacheEntry, now: Instant) -> bool {
        now.saturating_duration_since(entry.last_access) > self.max_ram_time
    }

    /// Read a tile and refresh its access time. Stale entries are evicted
    /// instead of returned.
    pub fn get(&mut self, id: &TileId, now: Instant) -> Option<Arc<GeometryTile>> {
        let stale = self.is_stale(self.entries.get(id)?, now);
        if stale {
            self.remove(id);
            return None;
        }
        let entry = self.entries.get_mut(id)?;
        entry.last_access = now;
        Some(entry.tile.clone())
    }

    /// Insert a freshly decoded tile
    pub fn insert(&mut self, id: TileId, tile: Arc<GeometryTile>, now: Instant) {
        let bytes = tile.byte_size();
        if let Some(old) = self.entries.insert(
            id,
            TileCacheEntry {
                tile,
                bytes,
                last_access: now,
            },
        ) {
            self.resident_bytes -= old.bytes;
        }
        self.resident_bytes += bytes;
    }

    pub fn contains(&self, id: &TileId) -> bool {
        self.entries.contains_key(id)
    }

    pub fn remove(&mut self, id: &TileId) -> Option<Arc<GeometryTile>> {
        let entry = self.entries.remove(id)?;
        self.resident_bytes -= entry.bytes;
        Some(entry.tile)
    }

    /// Drop every tile of a model
    pub fn remove_model(&mut self, model: &crate::model::ModelId) -> usize {
        let ids: Vec<TileId> = self.entries.keys().filter(|id| &id.model == model).cloned().collect();
        for id in &ids {
            self.remove(id);
        }
        ids.len()
    }

    /// Evict every entry unread for longer than `max_ram_time`
    pub fn sweep(&mut self, now: Instant) -> usize {
        let stale: Vec<TileId> = self
            .entries
            .iter()
            .filter(|(_, e)| self.is_stale(e, now))
            .map(|(id, _)| id.clone())
            .collect();
        for id in &stale {
            self.remove(id);
        }
        if !stale.is_empty() {
            log::debug!("Tile cache evicted {} tiles, {} bytes resident", stale.len(), self.resident_bytes);
        }
        stale.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Decoded bytes currently held
    pub fn resident_bytes(&self) -> usize {
        self.resident_bytes
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.resident_bytes = 0;
    }
}
