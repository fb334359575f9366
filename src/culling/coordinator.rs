//! Culler coordinator
//!
//! Owns the color-code map and the visibility snapshots. Each round sends
//! the newest camera pose to the visibility worker, waits for the decoded
//! colors and turns the difference with the previous state into demand.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::watch;

use crate::core::camera::CameraPose;
use crate::core::config::CullerSettings;
use crate::core::time::{RoundStats, RoundTimer};
use crate::core::types::{Mat4, Result};
use crate::culling::color::{ColorCode, ColorCodec};
use crate::culling::demand::CullerDemand;
use crate::culling::protocol::ProxyFrame;
use crate::culling::proxy::{ProxyGeometry, ProxyInstance, ProxyMaterial, ProxyMaterials, ProxyMesh};
use crate::culling::renderer::VisibilityRendererHandle;
use crate::model::{GeometryId, GeometryInstances, ItemId, ModelId, StreamedGeometries};

/// Priority given to geometries that are never culled
const UNCULLED_PRIORITY: u64 = 1;

/// Shared camera input. Setting a pose never blocks; rounds always read the
/// newest one.
#[derive(Clone, Debug)]
pub struct CameraFeed {
    tx: Arc<watch::Sender<CameraPose>>,
}

impl CameraFeed {
    pub fn new(initial: CameraPose) -> Self {
        Self {
            tx: Arc::new(watch::Sender::new(initial)),
        }
    }

    pub fn set(&self, pose: CameraPose) {
        self.tx.send_replace(pose);
    }

    pub fn get(&self) -> CameraPose {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<CameraPose> {
        self.tx.subscribe()
    }
}

/// A geometry tracked by the culler
#[derive(Clone, Debug, PartialEq)]
pub struct TrackedInstance {
    pub code: ColorCode,
    pub model: ModelId,
    pub geometry: GeometryId,
    /// Host items whose opaque instances the proxy stands for
    pub owners: Vec<ItemId>,
}

/// Colors decoded from one round, with pixel counts
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct VisibilitySnapshot {
    pub colors: HashMap<ColorCode, u32>,
}

impl VisibilitySnapshot {
    pub fn contains(&self, code: ColorCode) -> bool {
        self.colors.contains_key(&code)
    }

    pub fn len(&self) -> usize {
        self.colors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.colors.is_empty()
    }
}

#[derive(Clone, Copy, Debug, Default)]
struct CodeState {
    last_seen: Option<Instant>,
    shown: bool,
    loaded: bool,
    lost_reported: bool,
}

#[derive(Debug, Default)]
struct ModelTracking {
    codes: Vec<ColorCode>,
    /// Geometries with no opaque instance, streamed without culling
    unculled: BTreeSet<GeometryId>,
    unculled_shown: bool,
    unculled_loaded: BTreeSet<GeometryId>,
}

/// Counters for logging and the demo
#[derive(Clone, Copy, Debug, Default, serde::Serialize)]
pub struct CullerStats {
    pub tracked: usize,
    pub visible: usize,
    pub shown: usize,
    pub loaded: usize,
    pub rounds: RoundStats,
}

/// Drives visibility rounds and emits demand
pub struct CullerCoordinator {
    settings: CullerSettings,
    enabled: bool,
    needs_update: bool,
    codec: ColorCodec,
    tracked: HashMap<ColorCode, TrackedInstance>,
    by_geometry: HashMap<(ModelId, GeometryId), ColorCode>,
    states: HashMap<ColorCode, CodeState>,
    models: BTreeMap<ModelId, ModelTracking>,
    previous: VisibilitySnapshot,
    current: VisibilitySnapshot,
    camera: watch::Receiver<CameraPose>,
    renderer: VisibilityRendererHandle,
    proxy_cube: Arc<ProxyGeometry>,
    timer: RoundTimer,
}

impl CullerCoordinator {
    pub fn new(settings: CullerSettings, renderer: VisibilityRendererHandle, camera: watch::Receiver<CameraPose>) -> Self {
        Self {
            enabled: settings.enabled,
            settings,
            needs_update: false,
            codec: ColorCodec::new(),
            tracked: HashMap::new(),
            by_geometry: HashMap::new(),
            states: HashMap::new(),
            models: BTreeMap::new(),
            previous: VisibilitySnapshot::default(),
            current: VisibilitySnapshot::default(),
            camera,
            renderer,
            proxy_cube: Arc::new(ProxyGeometry::unit_cube()),
            timer: RoundTimer::new(),
        }
    }

    pub fn settings(&self) -> &CullerSettings {
        &self.settings
    }

    pub fn renderer(&self) -> &VisibilityRendererHandle {
        &self.renderer
    }

    pub fn needs_update(&self) -> bool {
        self.needs_update
    }

    /// Request a round on the next tick
    pub fn set_needs_update(&mut self) {
        self.needs_update = true;
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn tracked(&self, code: ColorCode) -> Option<&TrackedInstance> {
        self.tracked.get(&code)
    }

    pub fn code_of(&self, model: &ModelId, geometry: GeometryId) -> Option<ColorCode> {
        self.by_geometry.get(&(model.clone(), geometry)).copied()
    }

    pub fn tracked_count(&self) -> usize {
        self.tracked.len()
    }

    pub fn previous_snapshot(&self) -> &VisibilitySnapshot {
        &self.previous
    }

    pub fn current_snapshot(&self) -> &VisibilitySnapshot {
        &self.current
    }

    /// Register a model: one tracked proxy per geometry with opaque instances.
    ///
    /// Each proxy is the geometry's bounding box, placed with the opaque
    /// instance transforms. Geometries whose instances are all transparent
    /// are not culled and get requested on the next round.
    pub fn add_model(
        &mut self,
        model: &ModelId,
        geometries: &StreamedGeometries,
        instances: &GeometryInstances,
    ) -> Result<()> {
        if self.models.contains_key(model) {
            log::warn!("Model {} already tracked, replacing", model);
            self.remove_model(model);
        }

        let mut tracking = ModelTracking::default();
        let mut meshes = Vec::new();

        for (&geometry, list) in instances {
            let Some(descriptor) = geometries.get(&geometry) else {
                log::warn!("Model {}: no descriptor for geometry {}, not tracked", model, geometry);
                continue;
            };

            let opaque: Vec<_> = list.iter().filter(|i| i.is_opaque()).collect();
            if opaque.is_empty() {
                tracking.unculled.insert(geometry);
                continue;
            }

            let code = match self.codec.allocate() {
                Ok(code) => code,
                Err(e) => {
                    // Keep what was allocated so far consistent
                    for code in &tracking.codes {
                        self.forget(*code);
                    }
                    return Err(e);
                }
            };

            let cube = descriptor.bounding_box.unit_cube_transform();
            meshes.push(ProxyMesh {
                code,
                geometry: self.proxy_cube.clone(),
                materials: ProxyMaterials::Single(ProxyMaterial::OPAQUE),
                instances: opaque
                    .iter()
                    .map(|i| ProxyInstance {
                        item: i.item,
                        transform: i.transform * cube,
                    })
                    .collect(),
                mesh_matrix: Mat4::IDENTITY,
            });

            let mut owners: Vec<ItemId> = opaque.iter().map(|i| i.item).collect();
            owners.sort_unstable();
            owners.dedup();
            self.tracked.insert(
                code,
                TrackedInstance {
                    code,
                    model: model.clone(),
                    geometry,
                    owners,
                },
            );
            self.by_geometry.insert((model.clone(), geometry), code);
            self.states.insert(code, CodeState::default());
            tracking.codes.push(code);
        }

        log::info!(
            "Culler tracking model {}: {} proxies, {} unculled geometries",
            model,
            tracking.codes.len(),
            tracking.unculled.len()
        );

        if let Err(e) = self.renderer.add_model(model.clone(), meshes) {
            for code in &tracking.codes {
                self.forget(*code);
            }
            return Err(e);
        }
        self.models.insert(model.clone(), tracking);
        self.needs_update = true;
        Ok(())
    }

    fn forget(&mut self, code: ColorCode) {
        if let Some(t) = self.tracked.remove(&code) {
            self.by_geometry.remove(&(t.model, t.geometry));
        }
        self.states.remove(&code);
        self.codec.release(code);
    }

    /// Drop every tracked instance of a model and release its codes
    pub fn remove_model(&mut self, model: &ModelId) {
        let Some(tracking) = self.models.remove(model) else {
            return;
        };
        for code in tracking.codes {
            self.forget(code);
            self.previous.colors.remove(&code);
            self.current.colors.remove(&code);
        }
        if let Err(e) = self.renderer.remove_model(model.clone()) {
            log::warn!("Could not remove proxies of {}: {}", model, e);
        }
        self.needs_update = true;
    }

    /// A fragment for this geometry exists, stop requesting it
    pub fn mark_loaded(&mut self, model: &ModelId, geometry: GeometryId) {
        if let Some(code) = self.code_of(model, geometry) {
            if let Some(state) = self.states.get_mut(&code) {
                state.loaded = true;
            }
        } else if let Some(tracking) = self.models.get_mut(model) {
            if tracking.unculled.contains(&geometry) {
                tracking.unculled_loaded.insert(geometry);
            }
        }
    }

    /// Mirror an item filter in the proxy scene
    pub fn set_item_visibility(&mut self, model: &ModelId, items: &BTreeMap<GeometryId, Vec<ItemId>>, visible: bool) {
        for (&geometry, ids) in items {
            let Some(code) = self.code_of(model, geometry) else {
                continue;
            };
            if let Err(e) = self.renderer.set_instance_visibility(code, ids.clone(), visible) {
                log::warn!("Could not update proxy visibility of {}: {}", code, e);
            }
        }
        self.needs_update = true;
    }

    /// Run a round if one is due: forced, flagged, or the camera moved.
    ///
    /// Returns `Ok(None)` when nothing was due. A failed round leaves the
    /// update flag set so the next tick retries.
    pub async fn update_visibility(&mut self, force: bool) -> Result<Option<CullerDemand>> {
        if !self.enabled {
            return Ok(None);
        }
        let camera_moved = self.camera.has_changed().unwrap_or(false);
        if !(force || self.needs_update || camera_moved) {
            return Ok(None);
        }

        let pose = *self.camera.borrow_and_update();
        let started = Instant::now();
        let reply = match self.renderer.update(pose).await {
            Ok(reply) => reply,
            Err(e) => {
                self.needs_update = true;
                return Err(e);
            }
        };
        self.timer.record(started.elapsed());

        let demand = self.handle_visibility_result(reply.colors, Instant::now());
        self.needs_update = self.has_pending_work();

        log::debug!(
            "Visibility round: {} colors, load {}, show {}, hide {}, remove {} ({:.1} ms)",
            self.current.len(),
            demand.load_count(),
            demand.to_show.values().map(BTreeSet::len).sum::<usize>(),
            demand.to_hide.values().map(BTreeSet::len).sum::<usize>(),
            demand.to_remove.values().map(BTreeSet::len).sum::<usize>(),
            self.timer.last().as_secs_f32() * 1000.0
        );
        Ok(Some(demand))
    }

    /// Diff decoded colors against the tracked state.
    pub fn handle_visibility_result(&mut self, colors: HashMap<ColorCode, u32>, now: Instant) -> CullerDemand {
        let mut demand = CullerDemand::default();
        let threshold = self.settings.threshold;
        let max_hidden = self.settings.max_hidden_time();
        let max_lost = self.settings.max_lost_time();

        let mut visible: BTreeMap<ColorCode, u32> = BTreeMap::new();
        for (&code, &pixels) in &colors {
            if pixels > threshold && self.tracked.contains_key(&code) {
                visible.insert(code, pixels);
            }
        }

        for (&code, &pixels) in &visible {
            let Some(tracked) = self.tracked.get(&code) else {
                continue;
            };
            let state = self.states.entry(code).or_default();
            state.last_seen = Some(now);
            state.lost_reported = false;
            if !state.shown {
                state.shown = true;
                demand.add_show(&tracked.model, tracked.geometry);
            }
            if !state.loaded {
                demand.add_load(&tracked.model, tracked.geometry, pixels as u64);
            }
        }

        let mut codes: Vec<ColorCode> = self.states.keys().copied().collect();
        codes.sort();
        for code in codes {
            if visible.contains_key(&code) {
                continue;
            }
            let (Some(tracked), Some(state)) = (self.tracked.get(&code), self.states.get_mut(&code)) else {
                continue;
            };
            let unseen_for = state
                .last_seen
                .map_or(Duration::MAX, |t| now.saturating_duration_since(t));

            if state.shown && unseen_for >= max_hidden {
                state.shown = false;
                demand.add_hide(&tracked.model, tracked.geometry);
            }
            if state.last_seen.is_some() && !state.lost_reported && unseen_for > max_lost {
                state.lost_reported = true;
                demand.add_remove(&tracked.model, tracked.geometry);
            }
        }

        for (model, tracking) in self.models.iter_mut() {
            for &geometry in &tracking.unculled {
                if !tracking.unculled_loaded.contains(&geometry) {
                    demand.add_load(model, geometry, UNCULLED_PRIORITY);
                }
                if !tracking.unculled_shown {
                    demand.add_show(model, geometry);
                }
            }
            tracking.unculled_shown = true;
        }

        self.previous = std::mem::replace(
            &mut self.current,
            VisibilitySnapshot {
                colors: visible.into_iter().collect(),
            },
        );
        demand
    }

    /// Something still needs another round even if the camera stays put:
    /// a visible geometry not loaded yet, or a lost one whose timers run.
    fn has_pending_work(&self) -> bool {
        let unloaded_visible = self
            .current
            .colors
            .keys()
            .any(|code| self.states.get(code).is_some_and(|s| !s.loaded));
        let timers = self.states.iter().any(|(code, s)| {
            !self.current.contains(*code) && (s.shown || (s.last_seen.is_some() && !s.lost_reported))
        });
        let unculled = self
            .models
            .values()
            .any(|t| t.unculled.len() > t.unculled_loaded.len());
        unloaded_visible || timers || unculled
    }

    /// Render the proxy scene from the current pose, for debugging
    pub async fn capture(&self) -> Result<ProxyFrame> {
        let pose = *self.camera.borrow();
        self.renderer.capture(pose).await
    }

    pub fn stats(&self) -> CullerStats {
        CullerStats {
            tracked: self.tracked.len(),
            visible: self.current.len(),
            shown: self.states.values().filter(|s| s.shown).count(),
            loaded: self.states.values().filter(|s| s.loaded).count(),
            rounds: self.timer.stats(),
        }
    }

    /// Stop the worker and forget everything
    pub fn dispose(&mut self) {
        self.enabled = false;
        self.renderer.shutdown();
        self.tracked.clear();
        self.by_geometry.clear();
        self.states.clear();
        self.models.clear();
        self.previous = VisibilitySnapshot::default();
        self.current = VisibilitySnapshot::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::camera::ProxyProjection;
    use crate::core::error::Error;
    use crate::core::types::Vec3;
    use crate::culling::protocol::RenderSurface;
    use crate::math::Aabb;
    use crate::model::{StreamedGeometry, StreamedInstance};

    fn geometries(ids: &[GeometryId]) -> StreamedGeometries {
        ids.iter()
            .map(|&id| {
                (
                    id,
                    StreamedGeometry {
                        geometry_file: Some(format!("tile_{}.bst", id)),
                        bounding_box: Aabb::new(Vec3::ZERO, Vec3::ONE),
                    },
                )
            })
            .collect()
    }

    fn instances(ids: &[GeometryId], alpha: f32) -> GeometryInstances {
        ids.iter()
            .map(|&id| {
                (
                    id,
                    vec![StreamedInstance {
                        item: id * 10,
                        transform: Mat4::from_translation(Vec3::new(id as f32 * 2.0, 0.0, 0.0)),
                        color: [1.0, 1.0, 1.0, alpha],
                    }],
                )
            })
            .collect()
    }

    fn coordinator(settings: CullerSettings) -> (CullerCoordinator, CameraFeed) {
        let feed = CameraFeed::new(CameraPose::default());
        let renderer = VisibilityRendererHandle::spawn(ProxyProjection::default()).unwrap();
        (CullerCoordinator::new(settings, renderer, feed.subscribe()), feed)
    }

    fn seen(c: &CullerCoordinator, model: &ModelId, ids: &[GeometryId], pixels: u32) -> HashMap<ColorCode, u32> {
        ids.iter().map(|&g| (c.code_of(model, g).unwrap(), pixels)).collect()
    }

    #[tokio::test]
    async fn test_diff_show_and_hide() {
        let (mut c, _feed) = coordinator(CullerSettings::default());
        let m = ModelId::from("m");
        c.add_model(&m, &geometries(&[1, 2, 3, 4]), &instances(&[1, 2, 3, 4], 1.0)).unwrap();
        let now = Instant::now();

        let first = c.handle_visibility_result(seen(&c, &m, &[1, 2, 3], 10), now);
        assert_eq!(first.to_show[&m], BTreeSet::from([1, 2, 3]));
        assert!(first.to_hide.is_empty());

        let second = c.handle_visibility_result(seen(&c, &m, &[2, 3, 4], 10), now + Duration::from_millis(10));
        assert_eq!(second.to_show[&m], BTreeSet::from([4]));
        assert_eq!(second.to_hide[&m], BTreeSet::from([1]));
        assert_eq!(c.previous_snapshot().len(), 3);
        assert!(c.current_snapshot().contains(c.code_of(&m, 4).unwrap()));
    }

    #[tokio::test]
    async fn test_load_until_marked() {
        let (mut c, _feed) = coordinator(CullerSettings::default());
        let m = ModelId::from("m");
        c.add_model(&m, &geometries(&[1]), &instances(&[1], 1.0)).unwrap();
        let now = Instant::now();

        let d = c.handle_visibility_result(seen(&c, &m, &[1], 42), now);
        assert_eq!(d.load_priority(&m, 1), Some(42));

        // Not loaded yet: requested again, but shown only once
        let d = c.handle_visibility_result(seen(&c, &m, &[1], 7), now);
        assert_eq!(d.load_priority(&m, 1), Some(7));
        assert!(d.to_show.is_empty());

        c.mark_loaded(&m, 1);
        let d = c.handle_visibility_result(seen(&c, &m, &[1], 7), now);
        assert!(d.to_load.is_empty());
    }

    #[tokio::test]
    async fn test_threshold_filters_small_codes() {
        let settings = CullerSettings {
            threshold: 50,
            ..Default::default()
        };
        let (mut c, _feed) = coordinator(settings);
        let m = ModelId::from("m");
        c.add_model(&m, &geometries(&[1, 2]), &instances(&[1, 2], 1.0)).unwrap();

        let mut colors = seen(&c, &m, &[1], 50);
        colors.extend(seen(&c, &m, &[2], 51));
        // Untracked colors are ignored too
        colors.insert(ColorCode::from_rgb(200, 0, 0), 1000);

        let d = c.handle_visibility_result(colors, Instant::now());
        assert_eq!(d.load_count(), 1);
        assert_eq!(d.load_priority(&m, 2), Some(51));
    }

    #[tokio::test]
    async fn test_hidden_and_lost_timers() {
        let settings = CullerSettings {
            max_hidden_time_ms: 3000,
            max_lost_time_ms: 30_000,
            ..Default::default()
        };
        let (mut c, _feed) = coordinator(settings);
        let m = ModelId::from("m");
        c.add_model(&m, &geometries(&[1]), &instances(&[1], 1.0)).unwrap();
        let t0 = Instant::now();

        c.handle_visibility_result(seen(&c, &m, &[1], 10), t0);

        let d = c.handle_visibility_result(HashMap::new(), t0 + Duration::from_millis(2999));
        assert!(d.to_hide.is_empty());
        let d = c.handle_visibility_result(HashMap::new(), t0 + Duration::from_millis(3000));
        assert!(d.hides(&m, 1));
        let d = c.handle_visibility_result(HashMap::new(), t0 + Duration::from_millis(3500));
        assert!(d.to_hide.is_empty());

        let d = c.handle_visibility_result(HashMap::new(), t0 + Duration::from_secs(30));
        assert!(d.to_remove.is_empty());
        let d = c.handle_visibility_result(HashMap::new(), t0 + Duration::from_millis(30_001));
        assert_eq!(d.to_remove[&m], BTreeSet::from([1]));
        // Reported once
        let d = c.handle_visibility_result(HashMap::new(), t0 + Duration::from_secs(40));
        assert!(d.to_remove.is_empty());
    }

    #[tokio::test]
    async fn test_transparent_geometry_unculled() {
        let (mut c, _feed) = coordinator(CullerSettings::default());
        let m = ModelId::from("m");
        c.add_model(&m, &geometries(&[1, 9]), &{
            let mut i = instances(&[1], 1.0);
            i.extend(instances(&[9], 0.4));
            i
        })
        .unwrap();

        assert!(c.code_of(&m, 9).is_none());
        assert_eq!(c.tracked_count(), 1);

        let d = c.handle_visibility_result(HashMap::new(), Instant::now());
        assert_eq!(d.load_priority(&m, 9), Some(UNCULLED_PRIORITY));
        assert!(d.shows(&m, 9));

        let d = c.handle_visibility_result(HashMap::new(), Instant::now());
        assert!(!d.shows(&m, 9));
        assert_eq!(d.load_priority(&m, 9), Some(UNCULLED_PRIORITY));

        c.mark_loaded(&m, 9);
        let d = c.handle_visibility_result(HashMap::new(), Instant::now());
        assert!(d.is_empty());
    }

    #[tokio::test]
    async fn test_remove_model_releases_codes() {
        let (mut c, _feed) = coordinator(CullerSettings::default());
        let m = ModelId::from("m");
        c.add_model(&m, &geometries(&[1, 2]), &instances(&[1, 2], 1.0)).unwrap();
        let code = c.code_of(&m, 1).unwrap();
        c.handle_visibility_result(seen(&c, &m, &[1], 5), Instant::now());

        c.remove_model(&m);
        assert_eq!(c.tracked_count(), 0);
        assert!(c.tracked(code).is_none());
        assert!(c.current_snapshot().is_empty());

        let d = c.handle_visibility_result([(code, 100)].into_iter().collect(), Instant::now());
        assert!(d.is_empty());
    }

    #[tokio::test]
    async fn test_add_model_to_closed_renderer_releases_codes() {
        let (mut c, _feed) = coordinator(CullerSettings::default());
        c.renderer().shutdown();
        while !c.renderer().is_closed() {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }

        let m = ModelId::from("m");
        let result = c.add_model(&m, &geometries(&[1, 2]), &instances(&[1, 2], 1.0));
        assert!(matches!(result, Err(Error::RendererClosed)));
        assert_eq!(c.tracked_count(), 0);
        assert!(c.code_of(&m, 1).is_none());
        assert_eq!(c.codec.live_count(), 0);
    }

    #[tokio::test]
    async fn test_owners_are_unique() {
        let (mut c, _feed) = coordinator(CullerSettings::default());
        let m = ModelId::from("m");
        let place = |item: ItemId, x: f32| StreamedInstance {
            item,
            transform: Mat4::from_translation(Vec3::new(x, 0.0, 0.0)),
            color: [1.0; 4],
        };
        let instances: GeometryInstances =
            BTreeMap::from([(1, vec![place(10, 0.0), place(11, 2.0), place(10, 4.0)])]);
        c.add_model(&m, &geometries(&[1]), &instances).unwrap();

        let tracked = c.tracked(c.code_of(&m, 1).unwrap()).unwrap();
        assert_eq!(tracked.owners, vec![10, 11]);
    }

    #[tokio::test]
    async fn test_round_runs_only_when_due() {
        let (mut c, feed) = coordinator(CullerSettings::default());
        c.renderer()
            .init(RenderSurface::Software { width: 32, height: 32 }, 1.0)
            .unwrap();

        assert!(c.update_visibility(false).await.unwrap().is_none());
        assert!(c.update_visibility(true).await.unwrap().is_some());

        feed.set(CameraPose::look_at(Vec3::new(0.0, 0.0, 5.0), Vec3::ZERO));
        assert!(c.update_visibility(false).await.unwrap().is_some());
        assert!(c.update_visibility(false).await.unwrap().is_none());
        assert_eq!(c.stats().rounds.round_count, 2);
    }

    #[tokio::test]
    async fn test_failed_round_keeps_flag() {
        let (mut c, _feed) = coordinator(CullerSettings::default());
        c.set_needs_update();
        // Worker never initialised: the round fails but stays pending
        assert!(c.update_visibility(false).await.is_err());
        assert!(c.needs_update());
    }

    #[tokio::test]
    async fn test_end_to_end_visibility_round() {
        let (mut c, feed) = coordinator(CullerSettings::default());
        c.renderer()
            .init(RenderSurface::Software { width: 64, height: 64 }, 1.0)
            .unwrap();
        let m = ModelId::from("m");
        c.add_model(&m, &geometries(&[1]), &instances(&[1], 1.0)).unwrap();

        feed.set(CameraPose::look_at(Vec3::new(2.5, 0.5, 6.0), Vec3::new(2.5, 0.5, 0.0)));
        let demand = c.update_visibility(false).await.unwrap().unwrap();
        assert!(demand.shows(&m, 1));
        assert!(demand.load_priority(&m, 1).unwrap() > 0);
        // Still unloaded, so another round is wanted
        assert!(c.needs_update());
    }
}
