//! Proxy scene: color-coded stand-ins of the real geometry

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use crate::core::types::Mat4;
use crate::culling::color::ColorCode;
use crate::model::{ItemId, ModelId};
use crate::streaming::tile::GeometryBuffers;

/// Transparency of a proxied material
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ProxyMaterial {
    pub transparent: bool,
    pub opacity: f32,
}

impl ProxyMaterial {
    pub const OPAQUE: ProxyMaterial = ProxyMaterial {
        transparent: false,
        opacity: 1.0,
    };

    /// Materials you can see through neither occlude nor count as seen
    pub fn is_see_through(&self) -> bool {
        self.transparent && self.opacity < 1.0
    }
}

/// Either one material for the whole mesh or one per index group
#[derive(Clone, Debug, PartialEq)]
pub enum ProxyMaterials {
    Single(ProxyMaterial),
    PerGroup(Vec<ProxyMaterial>),
}

/// Index range drawn with one material
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GeometryGroup {
    pub start: u32,
    pub count: u32,
    pub material_index: usize,
}

/// Positions and indices of a proxied mesh
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ProxyGeometry {
    pub position: Vec<f32>,
    pub index: Vec<u32>,
    /// Empty means the whole index buffer is one group
    pub groups: Vec<GeometryGroup>,
}

impl ProxyGeometry {
    /// Unit cube `[0, 1]³`, the stand-in for geometry that isn't loaded yet
    pub fn unit_cube() -> Self {
        let cube = GeometryBuffers::cuboid(crate::core::types::Vec3::ONE);
        Self {
            position: cube.position,
            index: cube.index,
            groups: Vec::new(),
        }
    }
}

/// One placement inside an instanced proxy mesh
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ProxyInstance {
    pub item: ItemId,
    pub transform: Mat4,
}

/// An instanced mesh to mirror in the proxy scene
#[derive(Clone, Debug)]
pub struct ProxyMesh {
    pub code: ColorCode,
    pub geometry: Arc<ProxyGeometry>,
    pub materials: ProxyMaterials,
    /// Empty means a single instance at the identity
    pub instances: Vec<ProxyInstance>,
    pub mesh_matrix: Mat4,
}

/// A proxy mesh after material filtering
#[derive(Debug)]
struct ProxyEntry {
    model: ModelId,
    geometry: Arc<ProxyGeometry>,
    /// Index ranges with a non see-through material
    ranges: Vec<(u32, u32)>,
    /// World transforms and their items
    instances: Vec<ProxyInstance>,
    hidden: HashSet<ItemId>,
}

/// Everything the rasterizer draws for one color
pub struct DrawBatch<'a> {
    pub code: ColorCode,
    pub geometry: &'a ProxyGeometry,
    pub ranges: &'a [(u32, u32)],
    pub transforms: Vec<Mat4>,
}

/// Color-coded scene owned by the visibility renderer
#[derive(Debug, Default)]
pub struct ProxyScene {
    entries: BTreeMap<ColorCode, ProxyEntry>,
    revision: u64,
}

impl ProxyScene {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bumped on every change, lets rasterizers cache uploads
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, code: ColorCode) -> bool {
        self.entries.contains_key(&code)
    }

    /// Add the meshes of a model. Returns how many were kept; meshes made
    /// only of see-through materials are left out.
    pub fn add_model(&mut self, model: &ModelId, meshes: Vec<ProxyMesh>) -> usize {
        let mut added = 0;
        for mesh in meshes {
            let Some(ranges) = visible_ranges(&mesh.geometry, &mesh.materials) else {
                log::debug!("Proxy {} is fully transparent, excluded", mesh.code);
                continue;
            };

            let instances = if mesh.instances.is_empty() {
                vec![ProxyInstance {
                    item: 0,
                    transform: mesh.mesh_matrix,
                }]
            } else {
                mesh.instances
                    .iter()
                    .map(|i| ProxyInstance {
                        item: i.item,
                        transform: mesh.mesh_matrix * i.transform,
                    })
                    .collect()
            };

            let previous = self.entries.insert(
                mesh.code,
                ProxyEntry {
                    model: model.clone(),
                    geometry: mesh.geometry,
                    ranges,
                    instances,
                    hidden: HashSet::new(),
                },
            );
            if previous.is_some() {
                log::warn!("Proxy color {} registered twice, replaced", mesh.code);
            }
            added += 1;
        }
        self.revision += 1;
        added
    }

    /// Drop every proxy of a model, returns how many were removed
    pub fn remove_model(&mut self, model: &ModelId) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, e| &e.model != model);
        self.revision += 1;
        before - self.entries.len()
    }

    /// Show or hide the instances of `items` drawn with `code`
    pub fn set_instance_visibility(&mut self, code: ColorCode, items: &[ItemId], visible: bool) {
        let Some(entry) = self.entries.get_mut(&code) else {
            return;
        };
        for item in items {
            if visible {
                entry.hidden.remove(item);
            } else {
                entry.hidden.insert(*item);
            }
        }
        self.revision += 1;
    }

    /// Draw batches in color order, entries with no visible instance skipped
    pub fn batches(&self) -> impl Iterator<Item = DrawBatch<'_>> {
        self.entries.iter().filter_map(|(code, entry)| {
            let transforms: Vec<Mat4> = entry
                .instances
                .iter()
                .filter(|i| !entry.hidden.contains(&i.item))
                .map(|i| i.transform)
                .collect();
            if transforms.is_empty() || entry.ranges.is_empty() {
                return None;
            }
            Some(DrawBatch {
                code: *code,
                geometry: &entry.geometry,
                ranges: &entry.ranges,
                transforms,
            })
        })
    }
}

/// Index ranges to draw, `None` when every material is see-through
fn visible_ranges(geometry: &ProxyGeometry, materials: &ProxyMaterials) -> Option<Vec<(u32, u32)>> {
    let whole = (0, geometry.index.len() as u32);
    match materials {
        ProxyMaterials::Single(m) => (!m.is_see_through()).then(|| vec![whole]),
        ProxyMaterials::PerGroup(list) => {
            if list.iter().all(ProxyMaterial::is_see_through) {
                return None;
            }
            if geometry.groups.is_empty() {
                return Some(vec![whole]);
            }
            let ranges = geometry
                .groups
                .iter()
                .filter(|g| list.get(g.material_index).is_some_and(|m| !m.is_see_through()))
                .map(|g| {
                    let start = g.start.min(whole.1);
                    (start, g.count.min(whole.1 - start))
                })
                .collect();
            Some(ranges)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::Vec3;

    const GLASS: ProxyMaterial = ProxyMaterial {
        transparent: true,
        opacity: 0.3,
    };

    fn mesh(code: u8, materials: ProxyMaterials) -> ProxyMesh {
        ProxyMesh {
            code: ColorCode::from_rgb(0, 0, code),
            geometry: Arc::new(ProxyGeometry::unit_cube()),
            materials,
            instances: vec![
                ProxyInstance {
                    item: 1,
                    transform: Mat4::IDENTITY,
                },
                ProxyInstance {
                    item: 2,
                    transform: Mat4::from_translation(Vec3::X * 3.0),
                },
            ],
            mesh_matrix: Mat4::from_translation(Vec3::Y),
        }
    }

    #[test]
    fn test_transparent_meshes_excluded() {
        let mut scene = ProxyScene::new();
        let model = ModelId::from("m");
        let added = scene.add_model(
            &model,
            vec![
                mesh(1, ProxyMaterials::Single(ProxyMaterial::OPAQUE)),
                mesh(2, ProxyMaterials::Single(GLASS)),
                mesh(3, ProxyMaterials::PerGroup(vec![GLASS, GLASS])),
                mesh(4, ProxyMaterials::PerGroup(vec![GLASS, ProxyMaterial::OPAQUE])),
            ],
        );
        assert_eq!(added, 2);
        assert!(scene.contains(ColorCode::from_rgb(0, 0, 1)));
        assert!(!scene.contains(ColorCode::from_rgb(0, 0, 2)));
        assert!(!scene.contains(ColorCode::from_rgb(0, 0, 3)));
        assert!(scene.contains(ColorCode::from_rgb(0, 0, 4)));
    }

    #[test]
    fn test_transparent_groups_not_drawn() {
        let mut geometry = ProxyGeometry::unit_cube();
        geometry.groups = vec![
            GeometryGroup {
                start: 0,
                count: 18,
                material_index: 0,
            },
            GeometryGroup {
                start: 18,
                count: 18,
                material_index: 1,
            },
        ];
        let ranges = visible_ranges(
            &geometry,
            &ProxyMaterials::PerGroup(vec![GLASS, ProxyMaterial::OPAQUE]),
        )
        .unwrap();
        assert_eq!(ranges, vec![(18, 18)]);
    }

    #[test]
    fn test_mesh_matrix_applied() {
        let mut scene = ProxyScene::new();
        scene.add_model(
            &ModelId::from("m"),
            vec![mesh(1, ProxyMaterials::Single(ProxyMaterial::OPAQUE))],
        );
        let batch = scene.batches().next().unwrap();
        assert_eq!(batch.transforms.len(), 2);
        assert_eq!(batch.transforms[1].transform_point3(Vec3::ZERO), Vec3::new(3.0, 1.0, 0.0));
    }

    #[test]
    fn test_instance_visibility() {
        let mut scene = ProxyScene::new();
        let code = ColorCode::from_rgb(0, 0, 1);
        scene.add_model(
            &ModelId::from("m"),
            vec![mesh(1, ProxyMaterials::Single(ProxyMaterial::OPAQUE))],
        );

        let rev = scene.revision();
        scene.set_instance_visibility(code, &[1], false);
        assert!(scene.revision() > rev);
        assert_eq!(scene.batches().next().unwrap().transforms.len(), 1);

        scene.set_instance_visibility(code, &[2], false);
        assert_eq!(scene.batches().count(), 0);

        scene.set_instance_visibility(code, &[1, 2], true);
        assert_eq!(scene.batches().next().unwrap().transforms.len(), 2);
    }

    #[test]
    fn test_remove_model() {
        let mut scene = ProxyScene::new();
        scene.add_model(&ModelId::from("a"), vec![mesh(1, ProxyMaterials::Single(ProxyMaterial::OPAQUE))]);
        scene.add_model(&ModelId::from("b"), vec![mesh(2, ProxyMaterials::Single(ProxyMaterial::OPAQUE))]);
        assert_eq!(scene.remove_model(&ModelId::from("a")), 1);
        assert_eq!(scene.len(), 1);
        assert!(scene.contains(ColorCode::from_rgb(0, 0, 2)));
    }
}
