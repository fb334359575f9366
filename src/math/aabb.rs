//! Axis-aligned bounding box

use serde::{Deserialize, Serialize};

use crate::core::types::{Mat4, Vec3};

/// Axis-aligned bounding box defined by min and max corners
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Aabb {
    /// Create AABB from min and max corners
    pub fn new(min: Vec3, max: Vec3) -> Self {
        Self { min, max }
    }

    /// Smallest box containing every point, `None` for an empty slice
    pub fn from_points(points: impl IntoIterator<Item = Vec3>) -> Option<Self> {
        let mut iter = points.into_iter();
        let first = iter.next()?;
        let mut aabb = Aabb::new(first, first);
        for p in iter {
            aabb.expand(p);
        }
        Some(aabb)
    }

    /// Box around a flat `[x, y, z, x, y, z, ...]` position buffer
    pub fn from_positions(position: &[f32]) -> Option<Self> {
        Self::from_points(
            position
                .chunks_exact(3)
                .map(|p| Vec3::new(p[0], p[1], p[2])),
        )
    }

    /// Get center point
    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    /// Get size (max - min)
    pub fn size(&self) -> Vec3 {
        self.max - self.min
    }

    /// Check if point is inside AABB
    pub fn contains_point(&self, p: Vec3) -> bool {
        p.cmpge(self.min).all() && p.cmple(self.max).all()
    }

    /// Expand AABB to include point
    pub fn expand(&mut self, point: Vec3) {
        self.min = self.min.min(point);
        self.max = self.max.max(point);
    }

    /// Return merged AABB containing both
    pub fn merged(&self, other: &Aabb) -> Aabb {
        Aabb {
            min: self.min.min(other.min),
            max: self.max.max(other.max),
        }
    }

    /// Box containing this one after `transform`
    pub fn transformed(&self, transform: &Mat4) -> Aabb {
        let mut out: Option<Aabb> = None;
        for i in 0..8u8 {
            let corner = Vec3::new(
                if i & 1 != 0 { self.max.x } else { self.min.x },
                if i & 2 != 0 { self.max.y } else { self.min.y },
                if i & 4 != 0 { self.max.z } else { self.min.z },
            );
            let p = transform.transform_point3(corner);
            match out.as_mut() {
                Some(aabb) => aabb.expand(p),
                None => out = Some(Aabb::new(p, p)),
            }
        }
        out.unwrap_or(*self)
    }

    /// Matrix mapping the unit cube `[0, 1]³` onto this box.
    ///
    /// Degenerate axes get a tiny thickness so flat elements (slabs, panels)
    /// still cover pixels when seen edge-on.
    pub fn unit_cube_transform(&self) -> Mat4 {
        let size = self.size().max(Vec3::splat(1e-3));
        Mat4::from_translation(self.min) * Mat4::from_scale(size)
    }
}
