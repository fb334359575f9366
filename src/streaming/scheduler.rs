//! Stream scheduler
//!
//! Turns culler demand into fragments. Per model, requested geometries are
//! mapped to their tile files, files are fetched highest priority first
//! (through the [`GeometryCache`] when possible) and every requested geometry
//! found in a file becomes up to two fragments, one per alpha partition.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tokio::sync::{mpsc, watch};

use crate::core::config::CacheSettings;
use crate::culling::demand::CullerDemand;
use crate::model::{GeometryId, GeometryInstances, ItemId, ModelId, StreamLoaderSettings, StreamedGeometries};
use crate::streaming::cache::GeometryCache;
use crate::streaming::fragment::{FragmentKey, FragmentState, StreamedFragment, Transparency};
use crate::streaming::priority::FilePlan;
use crate::streaming::sink::SinkRegistry;
use crate::streaming::source::TileSource;
use crate::streaming::tile::{GeometryBuffers, GeometryTile, TileId, TileSerializer};

/// Item filters: model → geometry → items
pub type ItemFilter = BTreeMap<ModelId, BTreeMap<GeometryId, Vec<ItemId>>>;

/// Sent for every geometry whose fragments all exist
pub type LoadedNotice = (ModelId, GeometryId);

const PARTITIONS: [Transparency; 2] = [Transparency::Opaque, Transparency::Transparent];

/// Raised once when the scheduler is being torn down.
///
/// Loads check it between steps, and a fetch in progress is abandoned as
/// soon as it is raised.
#[derive(Clone, Debug)]
pub struct DisposeSignal {
    tx: Arc<watch::Sender<bool>>,
}

impl DisposeSignal {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn raise(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_raised(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolves once [`DisposeSignal::raise`] has been called
    pub async fn raised(&self) {
        let mut rx = self.tx.subscribe();
        while !*rx.borrow_and_update() {
            if rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

impl Default for DisposeSignal {
    fn default() -> Self {
        Self::new()
    }
}

struct ModelEntry {
    geometries: StreamedGeometries,
    instances: GeometryInstances,
    /// Items filtered out per geometry, applied to fragments created later
    hidden_items: BTreeMap<GeometryId, BTreeSet<ItemId>>,
    /// Geometries culled away
    hidden_meshes: BTreeSet<GeometryId>,
}

/// Counters for logging
#[derive(Clone, Debug, Default, Serialize)]
pub struct SchedulerStats {
    pub models: usize,
    pub fragments: usize,
    pub cached_tiles: usize,
    pub resident_bytes: usize,
    pub tiles_fetched: u64,
    pub cache_hits: u64,
    pub tiles_missing: u64,
    pub tiles_malformed: u64,
}

pub struct StreamScheduler {
    models: BTreeMap<ModelId, ModelEntry>,
    fragments: BTreeMap<FragmentKey, FragmentState>,
    cache: GeometryCache,
    source: Arc<dyn TileSource>,
    serializer: Arc<dyn TileSerializer>,
    sinks: SinkRegistry,
    disposing: DisposeSignal,
    loaded_tx: Option<mpsc::UnboundedSender<LoadedNotice>>,
    stats: SchedulerStats,
}

impl StreamScheduler {
    pub fn new(
        cache: &CacheSettings,
        source: Arc<dyn TileSource>,
        serializer: Arc<dyn TileSerializer>,
        sinks: SinkRegistry,
    ) -> Self {
        Self {
            models: BTreeMap::new(),
            fragments: BTreeMap::new(),
            cache: GeometryCache::new(cache.max_ram_time()),
            source,
            serializer,
            sinks,
            disposing: DisposeSignal::new(),
            loaded_tx: None,
            stats: SchedulerStats::default(),
        }
    }

    /// Report fully loaded geometries on this channel
    pub fn on_loaded(&mut self, tx: mpsc::UnboundedSender<LoadedNotice>) {
        self.loaded_tx = Some(tx);
    }

    /// Signal checked between the steps of a load. Raising it from outside
    /// makes an ongoing round return early.
    pub fn disposing(&self) -> DisposeSignal {
        self.disposing.clone()
    }

    fn is_disposing(&self) -> bool {
        self.disposing.is_raised()
    }

    pub fn cache(&self) -> &GeometryCache {
        &self.cache
    }

    pub fn fragment(&self, key: &FragmentKey) -> Option<&FragmentState> {
        self.fragments.get(key)
    }

    pub fn fragment_count(&self) -> usize {
        self.fragments.len()
    }

    pub fn has_model(&self, model: &ModelId) -> bool {
        self.models.contains_key(model)
    }

    /// Register a model's descriptors. Re-adding replaces the old model.
    pub fn add_model(&mut self, model: ModelId, settings: &StreamLoaderSettings) {
        if self.models.contains_key(&model) {
            self.remove_model(&model);
        }
        let instances = settings.instances_by_geometry();
        log::info!(
            "Streaming model {}: {} geometries, {} instances",
            model,
            settings.geometries.len(),
            instances.values().map(Vec::len).sum::<usize>()
        );
        self.models.insert(
            model,
            ModelEntry {
                geometries: settings.geometries.clone(),
                instances,
                hidden_items: BTreeMap::new(),
                hidden_meshes: BTreeSet::new(),
            },
        );
    }

    /// Destroy a model's fragments and forget its descriptors
    pub fn remove_model(&mut self, model: &ModelId) {
        self.models.remove(model);
        let keys: Vec<FragmentKey> = self
            .fragments
            .keys()
            .filter(|k| &k.model == model)
            .cloned()
            .collect();
        for key in &keys {
            self.fragments.remove(key);
        }
        self.cache.remove_model(model);
        self.sinks.fragments_deleted(&keys);
        log::info!("Removed model {} ({} fragments)", model, keys.len());
    }

    /// Apply one round of culler demand. Returns the number of fragments created.
    pub async fn apply_demand(&mut self, demand: &CullerDemand, now: Instant) -> usize {
        if self.is_disposing() {
            return 0;
        }
        self.cache.sweep(now);

        for (model, geometries) in &demand.to_show {
            self.set_mesh_visibility(model, geometries, true);
        }
        for (model, geometries) in &demand.to_hide {
            self.set_mesh_visibility(model, geometries, false);
        }
        for (model, geometries) in &demand.to_remove {
            // Resident fragments stay; the culler simply stops requesting them
            log::debug!("Model {}: {} geometries unseen, kept resident", model, geometries.len());
        }

        let mut created = 0;
        for (model, requested) in &demand.to_load {
            if self.is_disposing() {
                break;
            }
            created += self.load_found_geometries(model, requested, now).await;
        }
        created
    }

    /// Fetch the files holding `requested` and instantiate their fragments
    pub async fn load_found_geometries(
        &mut self,
        model: &ModelId,
        requested: &BTreeMap<GeometryId, u64>,
        now: Instant,
    ) -> usize {
        let Some(entry) = self.models.get(model) else {
            log::warn!("Load requested for unknown model {}", model);
            return 0;
        };

        let mut wanted = BTreeMap::new();
        let mut complete = Vec::new();
        for (&geometry, &priority) in requested {
            let Some(instances) = entry.instances.get(&geometry) else {
                log::warn!("Model {}: geometry {} has no instances, skipped", model, geometry);
                continue;
            };
            let missing = PARTITIONS.iter().any(|&t| {
                instances.iter().any(|i| Transparency::of(i) == t)
                    && !self.fragments.contains_key(&FragmentKey::new(model.clone(), geometry, t))
            });
            if missing {
                wanted.insert(geometry, priority);
            } else {
                complete.push(geometry);
            }
        }
        for geometry in complete {
            self.notify_loaded(model, geometry);
        }

        let Some(entry) = self.models.get(model) else {
            return 0;
        };
        let mut plan = FilePlan::build(&wanted, &entry.geometries);
        for geometry in &plan.unresolved {
            log::warn!("Model {}: geometry {} has no tile file, skipped", model, geometry);
        }
        log::debug!(
            "Model {}: {} geometries requested across {} files",
            model,
            plan.requested.len(),
            plan.len()
        );

        let mut created = 0;
        let mut found = BTreeSet::new();
        while let Some(file) = plan.pop() {
            let id = TileId::new(model.clone(), file.file);
            let Some(tile) = self.resolve_tile(&id, now).await else {
                if self.is_disposing() {
                    return created;
                }
                continue;
            };

            let mut fragments = Vec::new();
            for (geometry, buffers) in tile.iter() {
                if !plan.requested.contains(&geometry) {
                    continue;
                }
                if self.is_disposing() {
                    return created;
                }
                fragments.extend(self.instantiate(model, geometry, buffers));
                found.insert(geometry);
            }

            created += fragments.len();
            for state in &fragments {
                self.fragments.insert(state.key().clone(), state.clone());
            }
            self.sinks.fragments_loaded(&fragments);
            for geometry in fragments.iter().map(|f| f.key().geometry).collect::<BTreeSet<_>>() {
                self.notify_loaded(model, geometry);
            }
        }

        if let Some(entry) = self.models.get(model) {
            for geometry in plan.requested.difference(&found) {
                let listed = entry.geometries.get(geometry).and_then(|g| g.geometry_file.as_ref());
                if let Some(file) = listed {
                    log::debug!("Model {}: geometry {} not available from {} yet", model, geometry, file);
                }
            }
        }
        created
    }

    /// Cached tile, or fetch and decode it. `None` when unavailable or invalid.
    async fn resolve_tile(&mut self, id: &TileId, now: Instant) -> Option<Arc<GeometryTile>> {
        if let Some(tile) = self.cache.get(id, now) {
            self.stats.cache_hits += 1;
            return Some(tile);
        }

        let source = self.source.clone();
        let disposing = self.disposing.clone();
        let fetched = tokio::select! {
            fetched = source.fetch(id) => fetched,
            _ = disposing.raised() => {
                log::debug!("Fetch of tile {} abandoned on dispose", id);
                return None;
            }
        };
        let bytes = match fetched {
            Ok(Some(bytes)) => bytes,
            Ok(None) => {
                self.stats.tiles_missing += 1;
                log::debug!("Tile {} not available from {} source", id, source.name());
                return None;
            }
            Err(e) => {
                self.stats.tiles_missing += 1;
                log::warn!("Fetching tile {} failed: {}", id, e);
                return None;
            }
        };
        if self.is_disposing() {
            return None;
        }

        let tile = match self.serializer.import(&bytes) {
            Ok(tile) => Arc::new(tile),
            Err(e) => {
                self.stats.tiles_malformed += 1;
                log::warn!("Skipping malformed tile {}: {}", id, e);
                return None;
            }
        };
        if self.is_disposing() {
            return None;
        }

        self.stats.tiles_fetched += 1;
        self.cache.insert(id.clone(), tile.clone(), now);
        Some(tile)
    }

    /// Build the missing fragments of one geometry
    fn instantiate(&self, model: &ModelId, geometry: GeometryId, buffers: &GeometryBuffers) -> Vec<FragmentState> {
        let Some(entry) = self.models.get(model) else {
            return Vec::new();
        };
        let Some(instances) = entry.instances.get(&geometry) else {
            return Vec::new();
        };
        let hidden = entry.hidden_items.get(&geometry).cloned().unwrap_or_default();
        let visible = !entry.hidden_meshes.contains(&geometry);

        let mut created = Vec::new();
        for transparency in PARTITIONS {
            let key = FragmentKey::new(model.clone(), geometry, transparency);
            if self.fragments.contains_key(&key) {
                continue;
            }
            let partition: Vec<_> = instances
                .iter()
                .filter(|i| Transparency::of(i) == transparency)
                .collect();
            if partition.is_empty() {
                continue;
            }
            let fragment = StreamedFragment::build(key, buffers.clone(), partition);
            created.push(FragmentState::new(fragment, hidden.clone(), visible));
        }
        created
    }

    fn notify_loaded(&self, model: &ModelId, geometry: GeometryId) {
        if let Some(tx) = &self.loaded_tx {
            let _ = tx.send((model.clone(), geometry));
        }
    }

    /// Culling decision for whole geometries
    pub fn set_mesh_visibility(&mut self, model: &ModelId, geometries: &BTreeSet<GeometryId>, visible: bool) {
        let Some(entry) = self.models.get_mut(model) else {
            return;
        };
        for &geometry in geometries {
            if visible {
                entry.hidden_meshes.remove(&geometry);
            } else {
                entry.hidden_meshes.insert(geometry);
            }
        }
        for (key, state) in self.fragments.iter_mut() {
            if &key.model == model && geometries.contains(&key.geometry) {
                state.visible = visible;
            }
        }
        self.sinks.mesh_visibility(model, geometries, visible);
    }

    /// Show or hide items. Recorded per geometry so fragments created later
    /// start with the same filter.
    pub fn set_visibility(&mut self, visible: bool, filter: &ItemFilter) {
        for (model, geometries) in filter {
            let Some(entry) = self.models.get_mut(model) else {
                log::warn!("Visibility filter for unknown model {}", model);
                continue;
            };
            for (&geometry, items) in geometries {
                let hidden = entry.hidden_items.entry(geometry).or_default();
                for &item in items {
                    if visible {
                        hidden.remove(&item);
                    } else {
                        hidden.insert(item);
                    }
                }

                for transparency in PARTITIONS {
                    let key = FragmentKey::new(model.clone(), geometry, transparency);
                    let Some(state) = self.fragments.get_mut(&key) else {
                        continue;
                    };
                    for &item in items {
                        if visible {
                            state.hidden.remove(&item);
                        } else {
                            state.hidden.insert(item);
                        }
                    }
                    self.sinks.item_visibility(&key, items, visible);
                }
            }
        }
    }

    pub fn stats(&self) -> SchedulerStats {
        SchedulerStats {
            models: self.models.len(),
            fragments: self.fragments.len(),
            cached_tiles: self.cache.len(),
            resident_bytes: self.cache.resident_bytes(),
            ..self.stats.clone()
        }
    }

    /// Stop loading and tear everything down
    pub fn dispose(&mut self) {
        self.disposing.raise();
        let keys: Vec<FragmentKey> = self.fragments.keys().cloned().collect();
        self.fragments.clear();
        self.sinks.fragments_deleted(&keys);
        self.models.clear();
        self.cache.clear();
        log::info!("Stream scheduler disposed");
    }
}
