//! Consumers of streaming events
//!
//! The scheduler never touches a host scene directly. Every change goes out
//! through a [`SinkRegistry`] to the registered [`FragmentSink`]s, in
//! registration order.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex};

use crate::core::error::Error;
use crate::core::types::Result;
use crate::model::{GeometryId, ItemId, ModelId};
use crate::streaming::fragment::{FragmentKey, FragmentState};

/// Receives fragment lifecycle and visibility events
pub trait FragmentSink: Send {
    /// New fragments, with their initial visibility
    fn fragments_loaded(&mut self, fragments: &[FragmentState]) -> Result<()>;

    fn fragments_deleted(&mut self, keys: &[FragmentKey]) -> Result<()>;

    /// Culling turned whole geometries on or off
    fn mesh_visibility(&mut self, model: &ModelId, geometries: &BTreeSet<GeometryId>, visible: bool) -> Result<()>;

    /// The host filtered items of one fragment
    fn item_visibility(&mut self, key: &FragmentKey, items: &[ItemId], visible: bool) -> Result<()>;
}

/// Ordered list of sinks. A failing sink is logged and skipped.
#[derive(Default)]
pub struct SinkRegistry {
    sinks: Vec<Box<dyn FragmentSink>>,
}

impl SinkRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, sink: Box<dyn FragmentSink>) {
        self.sinks.push(sink);
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }

    fn each(&mut self, event: &str, mut f: impl FnMut(&mut dyn FragmentSink) -> Result<()>) {
        for (i, sink) in self.sinks.iter_mut().enumerate() {
            if let Err(e) = f(sink.as_mut()) {
                log::warn!("Sink {} failed on {}: {}", i, event, e);
            }
        }
    }

    pub fn fragments_loaded(&mut self, fragments: &[FragmentState]) {
        if !fragments.is_empty() {
            self.each("fragments_loaded", |s| s.fragments_loaded(fragments));
        }
    }

    pub fn fragments_deleted(&mut self, keys: &[FragmentKey]) {
        if !keys.is_empty() {
            self.each("fragments_deleted", |s| s.fragments_deleted(keys));
        }
    }

    pub fn mesh_visibility(&mut self, model: &ModelId, geometries: &BTreeSet<GeometryId>, visible: bool) {
        if !geometries.is_empty() {
            self.each("mesh_visibility", |s| s.mesh_visibility(model, geometries, visible));
        }
    }

    pub fn item_visibility(&mut self, key: &FragmentKey, items: &[ItemId], visible: bool) {
        if !items.is_empty() {
            self.each("item_visibility", |s| s.item_visibility(key, items, visible));
        }
    }
}

/// In-memory scene mirror. Clones share the same contents.
#[derive(Clone, Default)]
pub struct LiveScene {
    inner: Arc<Mutex<BTreeMap<FragmentKey, FragmentState>>>,
}

impl LiveScene {
    pub fn new() -> Self {
        Self::default()
    }

    fn with<T>(&self, f: impl FnOnce(&mut BTreeMap<FragmentKey, FragmentState>) -> T) -> Result<T> {
        let mut guard = self
            .inner
            .lock()
            .map_err(|_| Error::Visibility("live scene lock poisoned".into()))?;
        Ok(f(&mut guard))
    }

    pub fn len(&self) -> usize {
        self.with(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn keys(&self) -> Vec<FragmentKey> {
        self.with(|m| m.keys().cloned().collect()).unwrap_or_default()
    }

    pub fn get(&self, key: &FragmentKey) -> Option<FragmentState> {
        self.with(|m| m.get(key).cloned()).ok().flatten()
    }

    /// Fragments currently drawn
    pub fn visible_count(&self) -> usize {
        self.with(|m| m.values().filter(|f| f.visible).count()).unwrap_or(0)
    }

    /// Instances currently drawn, after item filters
    pub fn visible_instances(&self) -> usize {
        self.with(|m| {
            m.values()
                .filter(|f| f.visible)
                .flat_map(|f| f.fragment.items.iter().filter(|i| !f.hidden.contains(&i.item)))
                .map(|i| i.transforms.len())
                .sum()
        })
        .unwrap_or(0)
    }

    pub fn resident_bytes(&self) -> usize {
        self.with(|m| m.values().map(|f| f.fragment.byte_size()).sum())
            .unwrap_or(0)
    }
}

impl FragmentSink for LiveScene {
    fn fragments_loaded(&mut self, fragments: &[FragmentState]) -> Result<()> {
        self.with(|m| {
            for f in fragments {
                m.insert(f.key().clone(), f.clone());
            }
        })
    }

    fn fragments_deleted(&mut self, keys: &[FragmentKey]) -> Result<()> {
        self.with(|m| {
            for key in keys {
                m.remove(key);
            }
        })
    }

    fn mesh_visibility(&mut self, model: &ModelId, geometries: &BTreeSet<GeometryId>, visible: bool) -> Result<()> {
        self.with(|m| {
            for (key, state) in m.iter_mut() {
                if &key.model == model && geometries.contains(&key.geometry) {
                    state.visible = visible;
                }
            }
        })
    }

    fn item_visibility(&mut self, key: &FragmentKey, items: &[ItemId], visible: bool) -> Result<()> {
        self.with(|m| {
            if let Some(state) = m.get_mut(key) {
                for &item in items {
                    if visible {
                        state.hidden.remove(&item);
                    } else {
                        state.hidden.insert(item);
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{Mat4, Vec3};
    use crate::model::StreamedInstance;
    use crate::streaming::fragment::{StreamedFragment, Transparency};
    use crate::streaming::tile::GeometryBuffers;

    fn state(geometry: GeometryId) -> FragmentState {
        let instances = [
            StreamedInstance {
                item: 1,
                transform: Mat4::IDENTITY,
                color: [1.0; 4],
            },
            StreamedInstance {
                item: 2,
                transform: Mat4::IDENTITY,
                color: [1.0; 4],
            },
        ];
        let key = FragmentKey::new(ModelId::from("m"), geometry, Transparency::Opaque);
        FragmentState::new(
            StreamedFragment::build(key, GeometryBuffers::cuboid(Vec3::ONE), &instances),
            BTreeSet::new(),
            true,
        )
    }

    struct Failing;

    impl FragmentSink for Failing {
        fn fragments_loaded(&mut self, _: &[FragmentState]) -> Result<()> {
            Err(Error::Visibility("sink down".into()))
        }
        fn fragments_deleted(&mut self, _: &[FragmentKey]) -> Result<()> {
            Err(Error::Visibility("sink down".into()))
        }
        fn mesh_visibility(&mut self, _: &ModelId, _: &BTreeSet<GeometryId>, _: bool) -> Result<()> {
            Err(Error::Visibility("sink down".into()))
        }
        fn item_visibility(&mut self, _: &FragmentKey, _: &[ItemId], _: bool) -> Result<()> {
            Err(Error::Visibility("sink down".into()))
        }
    }

    #[test]
    fn test_failing_sink_does_not_stop_others() {
        let scene = LiveScene::new();
        let mut registry = SinkRegistry::new();
        registry.register(Box::new(Failing));
        registry.register(Box::new(scene.clone()));

        registry.fragments_loaded(&[state(0), state(1)]);
        assert_eq!(scene.len(), 2);
        assert_eq!(scene.visible_instances(), 4);
    }

    #[test]
    fn test_live_scene_visibility() {
        let mut scene = LiveScene::new();
        scene.fragments_loaded(&[state(0), state(1)]).unwrap();

        scene
            .mesh_visibility(&ModelId::from("m"), &BTreeSet::from([1]), false)
            .unwrap();
        assert_eq!(scene.visible_count(), 1);

        let key = FragmentKey::new(ModelId::from("m"), 0, Transparency::Opaque);
        scene.item_visibility(&key, &[2], false).unwrap();
        assert_eq!(scene.visible_instances(), 1);
        assert_eq!(scene.get(&key).unwrap().hidden, BTreeSet::from([2]));

        scene.fragments_deleted(&[key]).unwrap();
        assert_eq!(scene.keys().len(), 1);
        assert!(scene.resident_bytes() > 0);
    }
}
