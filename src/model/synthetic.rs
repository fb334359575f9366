//! Synthetic building generator
//!
//! Produces a model description plus its tiles without any upstream
//! converter: a grid of floors with columns, slabs, one room block per bay
//! and a glass facade. Used by the demo, `pack_tiles` and the benches.

use std::collections::BTreeMap;

use crate::core::types::{Mat4, Vec3};
use crate::math::Aabb;
use crate::model::{
    GeometryId, ItemId, StreamLoaderSettings, StreamedAsset, StreamedGeometry,
    StreamedGeometryInstance,
};
use crate::streaming::tile::{GeometryBuffers, GeometryTile};

const CONCRETE: [f32; 4] = [0.7, 0.7, 0.68, 1.0];
const ROOM: [f32; 4] = [0.85, 0.6, 0.4, 1.0];
const GLASS: [f32; 4] = [0.5, 0.7, 0.9, 0.35];

const COLUMN: GeometryId = 0;
const GLASS_PANEL: GeometryId = 1;

/// Parameters of the generated building
#[derive(Clone, Debug)]
pub struct SyntheticBuilding {
    pub floors: u32,
    pub bays_x: u32,
    pub bays_z: u32,
    /// Bay width in meters
    pub bay_size: f32,
    pub floor_height: f32,
    /// How many geometries share a tile file
    pub geometries_per_file: usize,
    /// Add transparent facade panels
    pub glazing: bool,
}

impl Default for SyntheticBuilding {
    fn default() -> Self {
        Self {
            floors: 6,
            bays_x: 4,
            bays_z: 3,
            bay_size: 6.0,
            floor_height: 3.5,
            geometries_per_file: 8,
            glazing: true,
        }
    }
}

/// A generated model: descriptors plus tile content per file name
#[derive(Clone, Debug)]
pub struct SyntheticModel {
    pub settings: StreamLoaderSettings,
    pub tiles: BTreeMap<String, GeometryTile>,
}

impl SyntheticModel {
    /// Bounding box of the whole building
    pub fn bounds(&self) -> Aabb {
        self.settings.bounds().unwrap_or_default()
    }
}

struct Builder {
    meshes: BTreeMap<GeometryId, GeometryBuffers>,
    assets: Vec<StreamedAsset>,
    next_item: ItemId,
}

impl Builder {
    fn place(&mut self, geometry_id: GeometryId, at: Vec3, color: [f32; 4]) {
        let id = self.next_item;
        self.next_item += 1;
        self.assets.push(StreamedAsset {
            id,
            geometries: vec![StreamedGeometryInstance {
                transformation: Mat4::from_translation(at).to_cols_array(),
                geometry_id,
                color,
            }],
        });
    }
}

impl SyntheticBuilding {
    pub fn build(&self) -> SyntheticModel {
        let mut b = Builder {
            meshes: BTreeMap::new(),
            assets: Vec::new(),
            next_item: 1,
        };

        let width = self.bays_x as f32 * self.bay_size;
        let depth = self.bays_z as f32 * self.bay_size;
        let slab = 0.3;

        b.meshes.insert(
            COLUMN,
            GeometryBuffers::cuboid(Vec3::new(0.4, self.floor_height - slab, 0.4)),
        );
        if self.glazing {
            b.meshes.insert(
                GLASS_PANEL,
                GeometryBuffers::cuboid(Vec3::new(self.bay_size, self.floor_height - slab, 0.05)),
            );
        }

        let mut next_geometry: GeometryId = 2;
        for floor in 0..self.floors {
            let y = floor as f32 * self.floor_height;

            let slab_id = next_geometry;
            next_geometry += 1;
            b.meshes.insert(slab_id, GeometryBuffers::cuboid(Vec3::new(width, slab, depth)));
            b.place(slab_id, Vec3::new(0.0, y, 0.0), CONCRETE);

            for ix in 0..=self.bays_x {
                for iz in 0..=self.bays_z {
                    let at = Vec3::new(
                        ix as f32 * self.bay_size - 0.2,
                        y + slab,
                        iz as f32 * self.bay_size - 0.2,
                    );
                    b.place(COLUMN, at, CONCRETE);
                }
            }

            // One room block per bay, each with its own geometry
            for ix in 0..self.bays_x {
                for iz in 0..self.bays_z {
                    let room_id = next_geometry;
                    next_geometry += 1;
                    let inset = self.bay_size * 0.2;
                    let size = Vec3::new(
                        self.bay_size - 2.0 * inset,
                        (self.floor_height - slab) * 0.8,
                        self.bay_size - 2.0 * inset,
                    );
                    b.meshes.insert(room_id, GeometryBuffers::cuboid(size));
                    let at = Vec3::new(
                        ix as f32 * self.bay_size + inset,
                        y + slab,
                        iz as f32 * self.bay_size + inset,
                    );
                    b.place(room_id, at, ROOM);
                }
            }

            if self.glazing {
                for ix in 0..self.bays_x {
                    let x = ix as f32 * self.bay_size;
                    b.place(GLASS_PANEL, Vec3::new(x, y + slab, -0.3), GLASS);
                    b.place(GLASS_PANEL, Vec3::new(x, y + slab, depth + 0.25), GLASS);
                }
            }
        }

        let per_file = self.geometries_per_file.max(1);
        let mut geometries = BTreeMap::new();
        let mut tiles: BTreeMap<String, GeometryTile> = BTreeMap::new();
        for (n, (id, mesh)) in b.meshes.into_iter().enumerate() {
            let file = format!("tile_{}.bst", n / per_file);
            geometries.insert(
                id,
                StreamedGeometry {
                    geometry_file: Some(file.clone()),
                    bounding_box: Aabb::from_positions(&mesh.position).unwrap_or_default(),
                },
            );
            tiles.entry(file).or_default().insert(id, mesh);
        }

        SyntheticModel {
            settings: StreamLoaderSettings {
                assets: b.assets,
                geometries,
            },
            tiles,
        }
    }
}
