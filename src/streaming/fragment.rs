//! Renderable fragments built from decoded tiles

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use crate::core::types::Mat4;
use crate::model::{GeometryId, ItemId, ModelId, StreamedInstance};
use crate::streaming::tile::GeometryBuffers;

/// Which alpha partition a fragment draws
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Transparency {
    Opaque,
    Transparent,
}

impl Transparency {
    pub fn of(instance: &StreamedInstance) -> Self {
        if instance.is_opaque() {
            Self::Opaque
        } else {
            Self::Transparent
        }
    }
}

/// At most one fragment exists per key
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FragmentKey {
    pub model: ModelId,
    pub geometry: GeometryId,
    pub transparency: Transparency,
}

impl FragmentKey {
    pub fn new(model: ModelId, geometry: GeometryId, transparency: Transparency) -> Self {
        Self {
            model,
            geometry,
            transparency,
        }
    }
}

impl fmt::Display for FragmentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let suffix = match self.transparency {
            Transparency::Opaque => "opaque",
            Transparency::Transparent => "transparent",
        };
        write!(f, "{}#{}:{}", self.model, self.geometry, suffix)
    }
}

/// All placements of one geometry that belong to one item
#[derive(Clone, Debug, PartialEq)]
pub struct FragmentItem {
    pub item: ItemId,
    pub transforms: Vec<Mat4>,
    pub colors: Vec<[f32; 4]>,
}

/// Geometry buffers plus every instance of one transparency partition
#[derive(Clone, Debug)]
pub struct StreamedFragment {
    pub key: FragmentKey,
    pub buffers: GeometryBuffers,
    pub items: Vec<FragmentItem>,
}

impl StreamedFragment {
    /// Group instances by item, keeping first-seen item order
    pub fn build<'a>(
        key: FragmentKey,
        buffers: GeometryBuffers,
        instances: impl IntoIterator<Item = &'a StreamedInstance>,
    ) -> Self {
        let mut items: Vec<FragmentItem> = Vec::new();
        for instance in instances {
            match items.iter_mut().find(|i| i.item == instance.item) {
                Some(entry) => {
                    entry.transforms.push(instance.transform);
                    entry.colors.push(instance.color);
                }
                None => items.push(FragmentItem {
                    item: instance.item,
                    transforms: vec![instance.transform],
                    colors: vec![instance.color],
                }),
            }
        }
        Self { key, buffers, items }
    }

    pub fn instance_count(&self) -> usize {
        self.items.iter().map(|i| i.transforms.len()).sum()
    }

    pub fn item_ids(&self) -> impl Iterator<Item = ItemId> + '_ {
        self.items.iter().map(|i| i.item)
    }

    pub fn byte_size(&self) -> usize {
        self.buffers.byte_size() + self.instance_count() * (size_of::<Mat4>() + size_of::<[f32; 4]>())
    }
}

/// A live fragment and its visibility state
#[derive(Clone, Debug)]
pub struct FragmentState {
    pub fragment: Arc<StreamedFragment>,
    /// Items filtered out by the host
    pub hidden: BTreeSet<ItemId>,
    /// Mesh-level visibility from culling
    pub visible: bool,
}

impl FragmentState {
    pub fn new(fragment: StreamedFragment, hidden: BTreeSet<ItemId>, visible: bool) -> Self {
        Self {
            fragment: Arc::new(fragment),
            hidden,
            visible,
        }
    }

    pub fn key(&self) -> &FragmentKey {
        &self.fragment.key
    }

    /// Items drawn when the mesh is visible
    pub fn shown_items(&self) -> impl Iterator<Item = ItemId> + '_ {
        self.fragment.item_ids().filter(|id| !self.hidden.contains(id))
    }
}
