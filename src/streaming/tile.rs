//! Geometry tile format
//!
//! A tile holds the buffers of a subset of a model's geometries. On disk:
//!
//! ```text
//! "BSTL" | version: u16 LE | lz4 (size prepended) of an rkyv archive
//! ```

use std::collections::BTreeMap;
use std::fmt;

use rkyv::{Archive, Deserialize, Serialize};

use crate::core::error::Error;
use crate::core::types::{Result, Vec3};
use crate::model::{GeometryId, ModelId};

/// File magic
pub const TILE_MAGIC: [u8; 4] = *b"BSTL";

/// Current format version
pub const TILE_VERSION: u16 = 1;

const HEADER_LEN: usize = TILE_MAGIC.len() + 2;

/// Identifies one geometry file of one model
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TileId {
    pub model: ModelId,
    pub file: String,
}

impl TileId {
    pub fn new(model: ModelId, file: impl Into<String>) -> Self {
        Self {
            model,
            file: file.into(),
        }
    }
}

impl fmt::Display for TileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.model, self.file)
    }
}

/// Vertex and index buffers of one geometry
#[derive(Clone, Debug, Default, PartialEq)]
pub struct GeometryBuffers {
    /// xyz triples
    pub position: Vec<f32>,
    pub index: Vec<u32>,
    /// xyz triples, one per vertex
    pub normal: Vec<f32>,
}

impl GeometryBuffers {
    pub fn vertex_count(&self) -> usize {
        self.position.len() / 3
    }

    pub fn byte_size(&self) -> usize {
        (self.position.len() + self.normal.len()) * 4 + self.index.len() * 4
    }

    /// Axis-aligned box mesh with flat normals, corner at the origin
    pub fn cuboid(size: Vec3) -> Self {
        // (normal, four corners in unit-cube space, counter-clockwise seen from outside)
        const FACES: [([f32; 3], [[f32; 3]; 4]); 6] = [
            ([1.0, 0.0, 0.0], [[1.0, 0.0, 0.0], [1.0, 1.0, 0.0], [1.0, 1.0, 1.0], [1.0, 0.0, 1.0]]),
            ([-1.0, 0.0, 0.0], [[0.0, 0.0, 1.0], [0.0, 1.0, 1.0], [0.0, 1.0, 0.0], [0.0, 0.0, 0.0]]),
            ([0.0, 1.0, 0.0], [[0.0, 1.0, 0.0], [0.0, 1.0, 1.0], [1.0, 1.0, 1.0], [1.0, 1.0, 0.0]]),
            ([0.0, -1.0, 0.0], [[0.0, 0.0, 1.0], [0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [1.0, 0.0, 1.0]]),
            ([0.0, 0.0, 1.0], [[1.0, 0.0, 1.0], [1.0, 1.0, 1.0], [0.0, 1.0, 1.0], [0.0, 0.0, 1.0]]),
            ([0.0, 0.0, -1.0], [[0.0, 0.0, 0.0], [0.0, 1.0, 0.0], [1.0, 1.0, 0.0], [1.0, 0.0, 0.0]]),
        ];

        let mut buffers = GeometryBuffers::default();
        for (normal, corners) in FACES {
            let base = buffers.vertex_count() as u32;
            for c in corners {
                buffers.position.extend_from_slice(&[c[0] * size.x, c[1] * size.y, c[2] * size.z]);
                buffers.normal.extend_from_slice(&normal);
            }
            buffers
                .index
                .extend_from_slice(&[base, base + 1, base + 2, base, base + 2, base + 3]);
        }
        buffers
    }

    fn validate(&self, id: GeometryId) -> Result<()> {
        if self.position.len() % 3 != 0 {
            return Err(Error::Tile(format!("geometry {}: position length not a multiple of 3", id)));
        }
        if !self.normal.is_empty() && self.normal.len() != self.position.len() {
            return Err(Error::Tile(format!("geometry {}: normal/position length mismatch", id)));
        }
        let vertices = self.vertex_count() as u32;
        if self.index.iter().any(|&i| i >= vertices) {
            return Err(Error::Tile(format!("geometry {}: index out of range", id)));
        }
        Ok(())
    }
}

/// Decoded content of one tile file
#[derive(Clone, Debug, Default, PartialEq)]
pub struct GeometryTile {
    geometries: BTreeMap<GeometryId, GeometryBuffers>,
}

impl GeometryTile {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, id: GeometryId, buffers: GeometryBuffers) {
        self.geometries.insert(id, buffers);
    }

    pub fn get(&self, id: GeometryId) -> Option<&GeometryBuffers> {
        self.geometries.get(&id)
    }

    pub fn contains(&self, id: GeometryId) -> bool {
        self.geometries.contains_key(&id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (GeometryId, &GeometryBuffers)> {
        self.geometries.iter().map(|(id, b)| (*id, b))
    }

    pub fn len(&self) -> usize {
        self.geometries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.geometries.is_empty()
    }

    /// Decoded size in bytes
    pub fn byte_size(&self) -> usize {
        self.geometries.values().map(GeometryBuffers::byte_size).sum()
    }
}

#[derive(Archive, Deserialize, Serialize)]
struct TileEntry {
    geometry_id: u32,
    position: Vec<f32>,
    index: Vec<u32>,
    normal: Vec<f32>,
}

#[derive(Archive, Deserialize, Serialize)]
struct TileArchive {
    entries: Vec<TileEntry>,
}

/// Turns tile bytes into geometry tables and back
pub trait TileSerializer: Send + Sync {
    fn import(&self, bytes: &[u8]) -> Result<GeometryTile>;
    fn export(&self, tile: &GeometryTile) -> Result<Vec<u8>>;
}

/// Default serializer: header + LZ4-compressed rkyv archive
#[derive(Clone, Copy, Debug, Default)]
pub struct CompressedTileSerializer;

impl TileSerializer for CompressedTileSerializer {
    fn import(&self, bytes: &[u8]) -> Result<GeometryTile> {
        if bytes.len() < HEADER_LEN || bytes[..4] != TILE_MAGIC {
            return Err(Error::Tile("missing tile header".into()));
        }
        let version = u16::from_le_bytes([bytes[4], bytes[5]]);
        if version != TILE_VERSION {
            return Err(Error::Tile(format!("unsupported tile version {}", version)));
        }

        let decompressed = lz4_flex::decompress_size_prepended(&bytes[HEADER_LEN..])
            .map_err(|e| Error::Tile(format!("LZ4 decompression failed: {}", e)))?;

        // rkyv needs an aligned buffer
        let mut aligned = rkyv::util::AlignedVec::<16>::with_capacity(decompressed.len());
        aligned.extend_from_slice(&decompressed);
        let archive = rkyv::from_bytes::<TileArchive, rkyv::rancor::Error>(&aligned)
            .map_err(|e| Error::Tile(e.to_string()))?;

        let mut tile = GeometryTile::new();
        for entry in archive.entries {
            let buffers = GeometryBuffers {
                position: entry.position,
                index: entry.index,
                normal: entry.normal,
            };
            // A bad geometry only costs itself, not its siblings
            if let Err(e) = buffers.validate(entry.geometry_id) {
                log::warn!("Skipping malformed geometry in tile: {}", e);
                continue;
            }
            tile.insert(entry.geometry_id, buffers);
        }
        Ok(tile)
    }

    fn export(&self, tile: &GeometryTile) -> Result<Vec<u8>> {
        let archive = TileArchive {
            entries: tile
                .iter()
                .map(|(id, b)| TileEntry {
                    geometry_id: id,
                    position: b.position.clone(),
                    index: b.index.clone(),
                    normal: b.normal.clone(),
                })
                .collect(),
        };

        let serialized = rkyv::to_bytes::<rkyv::rancor::Error>(&archive)
            .map_err(|e| Error::Tile(e.to_string()))?;

        let mut out = Vec::with_capacity(HEADER_LEN + serialized.len() / 2);
        out.extend_from_slice(&TILE_MAGIC);
        out.extend_from_slice(&TILE_VERSION.to_le_bytes());
        out.extend_from_slice(&lz4_flex::compress_prepend_size(&serialized));
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_tile() -> GeometryTile {
        let mut tile = GeometryTile::new();
        tile.insert(4, GeometryBuffers::cuboid(Vec3::new(1.0, 2.0, 3.0)));
        tile.insert(
            9,
            GeometryBuffers {
                position: vec![0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0],
                index: vec![0, 1, 2],
                normal: vec![0.0, 0.0, 1.0, 0.0, 0.0, 1.0, 0.0, 0.0, 1.0],
            },
        );
        tile
    }

    #[test]
    fn test_cuboid() {
        let cube = GeometryBuffers::cuboid(Vec3::new(2.0, 1.0, 1.0));
        assert_eq!(cube.vertex_count(), 24);
        assert_eq!(cube.index.len(), 36);
        assert_eq!(cube.normal.len(), cube.position.len());
        let max_x = cube.position.chunks(3).map(|p| p[0]).fold(0.0f32, f32::max);
        assert_eq!(max_x, 2.0);
    }

    #[test]
    fn test_export_import() {
        let serializer = CompressedTileSerializer;
        let tile = sample_tile();
        let bytes = serializer.export(&tile).unwrap();
        assert_eq!(&bytes[..4], b"BSTL");

        let imported = serializer.import(&bytes).unwrap();
        assert_eq!(imported, tile);
        assert_eq!(imported.len(), 2);
        assert!(imported.contains(9));
        assert!(!imported.contains(5));
    }

    #[test]
    fn test_import_rejects_garbage() {
        let serializer = CompressedTileSerializer;
        assert!(matches!(serializer.import(b"nope"), Err(Error::Tile(_))));

        let mut bytes = serializer.export(&sample_tile()).unwrap();
        bytes[4] = 0xFF;
        assert!(matches!(serializer.import(&bytes), Err(Error::Tile(_))));

        let mut truncated = serializer.export(&sample_tile()).unwrap();
        truncated.truncate(truncated.len() / 2);
        assert!(serializer.import(&truncated).is_err());
    }

    #[test]
    fn test_import_skips_bad_geometry() {
        let serializer = CompressedTileSerializer;
        let mut tile = GeometryTile::new();
        tile.insert(1, GeometryBuffers::cuboid(Vec3::ONE));
        tile.insert(
            2,
            GeometryBuffers {
                position: vec![0.0; 9],
                index: vec![0, 1, 7],
                normal: vec![],
            },
        );
        let bytes = serializer.export(&tile).unwrap();
        let imported = serializer.import(&bytes).unwrap();
        assert_eq!(imported.len(), 1);
        assert!(imported.contains(1));
        assert!(!imported.contains(2));
    }

    #[test]
    fn test_tile_id_display() {
        let id = TileId::new(ModelId::from("tower"), "tile_2.bst");
        assert_eq!(id.to_string(), "tower/tile_2.bst");
    }
}
