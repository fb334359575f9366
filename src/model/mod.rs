//! Model descriptors consumed by the streamer
//!
//! A streamed model is described by two tables produced upstream together
//! with its tiles: the assets (items with their geometry instances) and the
//! geometries (which tile file holds each one, plus its bounding box).

pub mod synthetic;

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::core::error::Error;
use crate::core::types::{Mat4, Result};
use crate::math::Aabb;

pub use synthetic::{SyntheticBuilding, SyntheticModel};

/// Geometry identifier, unique within a model
pub type GeometryId = u32;

/// Item (asset) identifier, unique within a model
pub type ItemId = u32;

/// Model identifier
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModelId(String);

impl ModelId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Fresh random id for models that don't bring their own
    pub fn random() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ModelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ModelId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// One placement of a geometry inside an asset
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StreamedGeometryInstance {
    /// Column-major 4x4 transform
    pub transformation: [f32; 16],
    pub geometry_id: GeometryId,
    /// RGBA, alpha 1 means opaque
    pub color: [f32; 4],
}

/// An item of the model and the geometries it is made of
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StreamedAsset {
    pub id: ItemId,
    pub geometries: Vec<StreamedGeometryInstance>,
}

/// Where a geometry lives and how big it is
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StreamedGeometry {
    /// Tile file holding the buffers; geometries without one are never fetched
    pub geometry_file: Option<String>,
    pub bounding_box: Aabb,
}

pub type StreamedGeometries = BTreeMap<GeometryId, StreamedGeometry>;

/// Everything needed to stream one model
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct StreamLoaderSettings {
    pub assets: Vec<StreamedAsset>,
    pub geometries: StreamedGeometries,
}

impl StreamLoaderSettings {
    /// Load descriptors from a JSON file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        serde_json::from_str(&text)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let text = serde_json::to_string(self).map_err(|e| Error::Config(e.to_string()))?;
        std::fs::write(path, text)?;
        Ok(())
    }

    /// World bounds of every placed geometry, `None` for an empty model
    pub fn bounds(&self) -> Option<Aabb> {
        let mut bounds: Option<Aabb> = None;
        for placement in self.assets.iter().flat_map(|a| &a.geometries) {
            let Some(geometry) = self.geometries.get(&placement.geometry_id) else {
                continue;
            };
            let placed = geometry
                .bounding_box
                .transformed(&Mat4::from_cols_array(&placement.transformation));
            bounds = Some(match bounds {
                Some(b) => b.merged(&placed),
                None => placed,
            });
        }
        bounds
    }

    /// Regroup the asset table by geometry.
    ///
    /// Instances referencing a geometry missing from the geometry table are
    /// dropped with a warning.
    pub fn instances_by_geometry(&self) -> GeometryInstances {
        let mut out: GeometryInstances = BTreeMap::new();
        for asset in &self.assets {
            for placement in &asset.geometries {
                if !self.geometries.contains_key(&placement.geometry_id) {
                    log::warn!(
                        "Item {} references unknown geometry {}, skipped",
                        asset.id,
                        placement.geometry_id
                    );
                    continue;
                }
                out.entry(placement.geometry_id).or_default().push(StreamedInstance {
                    item: asset.id,
                    transform: Mat4::from_cols_array(&placement.transformation),
                    color: placement.color,
                });
            }
        }
        out
    }
}

/// A single placed instance of a geometry
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct StreamedInstance {
    pub item: ItemId,
    pub transform: Mat4,
    pub color: [f32; 4],
}

impl StreamedInstance {
    pub fn is_opaque(&self) -> bool {
        self.color[3] == 1.0
    }
}

/// Instances of every geometry of a model
pub type GeometryInstances = BTreeMap<GeometryId, Vec<StreamedInstance>>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::Vec3;

    fn settings() -> StreamLoaderSettings {
        let mut geometries = StreamedGeometries::new();
        geometries.insert(
            1,
            StreamedGeometry {
                geometry_file: Some("tile_0.bst".into()),
                bounding_box: Aabb::new(Vec3::ZERO, Vec3::ONE),
            },
        );
        let at = |x: f32| Mat4::from_translation(Vec3::new(x, 0.0, 0.0)).to_cols_array();
        StreamLoaderSettings {
            assets: vec![
                StreamedAsset {
                    id: 10,
                    geometries: vec![
                        StreamedGeometryInstance {
                            transformation: at(0.0),
                            geometry_id: 1,
                            color: [1.0, 1.0, 1.0, 1.0],
                        },
                        StreamedGeometryInstance {
                            transformation: at(1.0),
                            geometry_id: 99,
                            color: [1.0, 1.0, 1.0, 1.0],
                        },
                    ],
                },
                StreamedAsset {
                    id: 11,
                    geometries: vec![StreamedGeometryInstance {
                        transformation: at(2.0),
                        geometry_id: 1,
                        color: [0.2, 0.4, 1.0, 0.3],
                    }],
                },
            ],
            geometries,
        }
    }

    #[test]
    fn test_instances_by_geometry() {
        let by_geometry = settings().instances_by_geometry();
        assert_eq!(by_geometry.len(), 1);

        let instances = &by_geometry[&1];
        assert_eq!(instances.len(), 2);
        assert_eq!(instances[0].item, 10);
        assert!(instances[0].is_opaque());
        assert_eq!(instances[1].item, 11);
        assert!(!instances[1].is_opaque());
        assert_eq!(instances[1].transform.w_axis.x, 2.0);
    }

    #[test]
    fn test_settings_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.json");
        settings().save(&path).unwrap();

        let loaded = StreamLoaderSettings::load(&path).unwrap();
        assert_eq!(loaded.assets, settings().assets);
        assert_eq!(loaded.geometries[&1].geometry_file.as_deref(), Some("tile_0.bst"));
    }

    #[test]
    fn test_model_id() {
        assert_eq!(ModelId::from("a").to_string(), "a");
        assert_ne!(ModelId::random(), ModelId::random());
        let json = serde_json::to_string(&ModelId::new("m")).unwrap();
        assert_eq!(json, "\"m\"");
    }
}
