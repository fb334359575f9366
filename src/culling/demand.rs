//! Demand signals produced by a visibility round

use std::collections::{BTreeMap, BTreeSet};

use crate::model::{GeometryId, ModelId};

/// `model → geometry → priority`; priority only orders fetching
pub type GeometryDemand = BTreeMap<ModelId, BTreeMap<GeometryId, u64>>;

/// `model → geometries`
pub type GeometrySet = BTreeMap<ModelId, BTreeSet<GeometryId>>;

/// What one visibility round asks the streamer to do
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CullerDemand {
    /// Visible but not loaded yet, weighted by on-screen pixels
    pub to_load: GeometryDemand,
    /// Unseen for longer than the lost timeout
    pub to_remove: GeometrySet,
    /// Became visible this round
    pub to_show: GeometrySet,
    /// Stopped being visible
    pub to_hide: GeometrySet,
}

impl CullerDemand {
    pub fn is_empty(&self) -> bool {
        self.to_load.is_empty()
            && self.to_remove.is_empty()
            && self.to_show.is_empty()
            && self.to_hide.is_empty()
    }

    /// Add `priority` to a geometry's load weight
    pub fn add_load(&mut self, model: &ModelId, geometry: GeometryId, priority: u64) {
        *self
            .to_load
            .entry(model.clone())
            .or_default()
            .entry(geometry)
            .or_insert(0) += priority;
    }

    pub fn add_show(&mut self, model: &ModelId, geometry: GeometryId) {
        self.to_show.entry(model.clone()).or_default().insert(geometry);
    }

    pub fn add_hide(&mut self, model: &ModelId, geometry: GeometryId) {
        self.to_hide.entry(model.clone()).or_default().insert(geometry);
    }

    pub fn add_remove(&mut self, model: &ModelId, geometry: GeometryId) {
        self.to_remove.entry(model.clone()).or_default().insert(geometry);
    }

    /// Fold a later round into this one.
    ///
    /// Load requests are replaced by the newer round's. Show and hide
    /// changes are applied in order, so the later decision for a geometry
    /// wins.
    pub fn merge(&mut self, newer: CullerDemand) {
        self.to_load = newer.to_load;
        for (model, geometries) in newer.to_remove {
            self.to_remove.entry(model).or_default().extend(geometries);
        }
        for (model, geometries) in newer.to_show {
            for geometry in geometries {
                unset(&mut self.to_hide, &model, geometry);
                self.add_show(&model, geometry);
            }
        }
        for (model, geometries) in newer.to_hide {
            for geometry in geometries {
                unset(&mut self.to_show, &model, geometry);
                self.add_hide(&model, geometry);
            }
        }
    }

    /// Total number of geometries requested for loading
    pub fn load_count(&self) -> usize {
        self.to_load.values().map(BTreeMap::len).sum()
    }

    /// Priority of one requested geometry
    pub fn load_priority(&self, model: &ModelId, geometry: GeometryId) -> Option<u64> {
        self.to_load.get(model)?.get(&geometry).copied()
    }

    pub fn shows(&self, model: &ModelId, geometry: GeometryId) -> bool {
        self.to_show.get(model).is_some_and(|s| s.contains(&geometry))
    }

    pub fn hides(&self, model: &ModelId, geometry: GeometryId) -> bool {
        self.to_hide.get(model).is_some_and(|s| s.contains(&geometry))
    }
}

fn unset(set: &mut GeometrySet, model: &ModelId, geometry: GeometryId) {
    if let Some(geometries) = set.get_mut(model) {
        geometries.remove(&geometry);
        if geometries.is_empty() {
            set.remove(model);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_priorities_accumulate() {
        let model = ModelId::from("m");
        let mut demand = CullerDemand::default();
        assert!(demand.is_empty());

        demand.add_load(&model, 4, 10);
        demand.add_load(&model, 4, 5);
        demand.add_load(&model, 2, 1);

        assert_eq!(demand.load_priority(&model, 4), Some(15));
        assert_eq!(demand.load_count(), 2);
        assert!(!demand.is_empty());
        assert_eq!(demand.load_priority(&ModelId::from("x"), 4), None);
    }

    #[test]
    fn test_sets() {
        let model = ModelId::from("m");
        let mut demand = CullerDemand::default();
        demand.add_show(&model, 1);
        demand.add_hide(&model, 2);
        assert!(demand.shows(&model, 1));
        assert!(!demand.shows(&model, 2));
        assert!(demand.hides(&model, 2));
    }

    #[test]
    fn test_merge_keeps_latest_decision() {
        let model = ModelId::from("m");
        let mut pending = CullerDemand::default();
        pending.add_load(&model, 1, 10);
        pending.add_hide(&model, 2);
        pending.add_show(&model, 3);
        pending.add_remove(&model, 7);

        let mut newer = CullerDemand::default();
        newer.add_load(&model, 4, 3);
        newer.add_show(&model, 2);

        pending.merge(newer);
        assert_eq!(pending.load_priority(&model, 1), None);
        assert_eq!(pending.load_priority(&model, 4), Some(3));
        assert!(pending.shows(&model, 2));
        assert!(!pending.hides(&model, 2));
        assert!(pending.shows(&model, 3));
        assert!(pending.to_hide.is_empty());
        assert!(pending.to_remove[&model].contains(&7));

        let mut hide = CullerDemand::default();
        hide.add_hide(&model, 3);
        pending.merge(hide);
        assert!(pending.hides(&model, 3));
        assert!(!pending.shows(&model, 3));
        assert!(pending.to_load.is_empty());
    }
}
