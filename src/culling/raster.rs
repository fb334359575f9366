//! Proxy rasterizers
//!
//! The visibility renderer only needs a color buffer with depth-tested flat
//! colors. [`SoftwareRasterizer`] produces one on the CPU; the GPU path lives
//! in [`crate::culling::gpu`].

use crate::core::types::{Mat4, Result, Vec3, Vec4};
use crate::culling::proxy::ProxyScene;

/// Something that can draw a proxy scene into an RGBA8 buffer
pub trait ProxyRasterizer: Send {
    /// Target size in pixels
    fn size(&self) -> (u32, u32);

    /// Draw every batch of `scene` with `view_proj`, return tightly packed
    /// RGBA8 rows, top row first. Background is `0, 0, 0, 0`.
    fn render(&mut self, scene: &ProxyScene, view_proj: Mat4) -> Result<Vec<u8>>;

    fn name(&self) -> &'static str;
}

/// Slack on barycentric tests so shared edges leave no cracks
const EDGE_EPSILON: f32 = 1e-5;

/// CPU rasterizer: near-plane clipping, edge functions and a z-buffer
pub struct SoftwareRasterizer {
    width: u32,
    height: u32,
    color: Vec<u8>,
    depth: Vec<f32>,
}

/// Vertex after projection: screen x, y (pixels) and depth 0..1
#[derive(Clone, Copy)]
struct ScreenVertex {
    x: f32,
    y: f32,
    z: f32,
}

impl SoftwareRasterizer {
    pub fn new(width: u32, height: u32) -> Self {
        let pixels = (width * height) as usize;
        Self {
            width,
            height,
            color: vec![0; pixels * 4],
            depth: vec![1.0; pixels],
        }
    }

    fn clear(&mut self) {
        self.color.fill(0);
        self.depth.fill(1.0);
    }

    fn to_screen(&self, clip: Vec4) -> ScreenVertex {
        let ndc = clip.truncate() / clip.w;
        ScreenVertex {
            x: (ndc.x * 0.5 + 0.5) * self.width as f32,
            y: (0.5 - ndc.y * 0.5) * self.height as f32,
            z: ndc.z,
        }
    }

    fn draw_triangle(&mut self, clip: [Vec4; 3], rgba: [u8; 4]) {
        let polygon = clip_near(&clip);
        if polygon.len() < 3 {
            return;
        }
        let screen: Vec<ScreenVertex> = polygon.iter().map(|c| self.to_screen(*c)).collect();
        for i in 1..screen.len() - 1 {
            self.fill(screen[0], screen[i], screen[i + 1], rgba);
        }
    }

    fn fill(&mut self, a: ScreenVertex, b: ScreenVertex, c: ScreenVertex, rgba: [u8; 4]) {
        let area = edge(a, b, c.x, c.y);
        if area.abs() < 1e-12 {
            return;
        }

        let min_x = a.x.min(b.x).min(c.x).floor().max(0.0) as i64;
        let max_x = a.x.max(b.x).max(c.x).ceil().min(self.width as f32) as i64;
        let min_y = a.y.min(b.y).min(c.y).floor().max(0.0) as i64;
        let max_y = a.y.max(b.y).max(c.y).ceil().min(self.height as f32) as i64;

        for py in min_y..max_y {
            for px in min_x..max_x {
                let sx = px as f32 + 0.5;
                let sy = py as f32 + 0.5;
                // Barycentrics; dividing by area makes them positive for both windings
                let w0 = edge(b, c, sx, sy) / area;
                let w1 = edge(c, a, sx, sy) / area;
                let w2 = edge(a, b, sx, sy) / area;
                if w0 < -EDGE_EPSILON || w1 < -EDGE_EPSILON || w2 < -EDGE_EPSILON {
                    continue;
                }

                let z = w0 * a.z + w1 * b.z + w2 * c.z;
                if !(0.0..=1.0).contains(&z) {
                    continue;
                }
                let idx = py as usize * self.width as usize + px as usize;
                if z < self.depth[idx] {
                    self.depth[idx] = z;
                    self.color[idx * 4..idx * 4 + 4].copy_from_slice(&rgba);
                }
            }
        }
    }
}

impl ProxyRasterizer for SoftwareRasterizer {
    fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn render(&mut self, scene: &ProxyScene, view_proj: Mat4) -> Result<Vec<u8>> {
        self.clear();

        for batch in scene.batches() {
            let rgba = [batch.code.r(), batch.code.g(), batch.code.b(), 255];
            let position = &batch.geometry.position;
            let index = &batch.geometry.index;
            let vertex = |i: u32| -> Option<Vec3> {
                let i = i as usize * 3;
                position.get(i..i + 3).map(Vec3::from_slice)
            };

            for transform in &batch.transforms {
                let mvp = view_proj * *transform;
                for &(start, count) in batch.ranges {
                    let end = (start + count).min(index.len() as u32) as usize;
                    let Some(range) = index.get(start as usize..end) else {
                        continue;
                    };
                    for tri in range.chunks_exact(3) {
                        let (Some(p0), Some(p1), Some(p2)) =
                            (vertex(tri[0]), vertex(tri[1]), vertex(tri[2]))
                        else {
                            continue;
                        };
                        self.draw_triangle(
                            [mvp * p0.extend(1.0), mvp * p1.extend(1.0), mvp * p2.extend(1.0)],
                            rgba,
                        );
                    }
                }
            }
        }

        Ok(self.color.clone())
    }

    fn name(&self) -> &'static str {
        "software"
    }
}

fn edge(a: ScreenVertex, b: ScreenVertex, x: f32, y: f32) -> f32 {
    (b.x - a.x) * (y - a.y) - (b.y - a.y) * (x - a.x)
}

/// Clip a triangle against the near plane (`z >= 0` in clip space)
fn clip_near(tri: &[Vec4; 3]) -> Vec<Vec4> {
    let mut out = Vec::with_capacity(4);
    for i in 0..3 {
        let cur = tri[i];
        let next = tri[(i + 1) % 3];
        let cur_in = cur.z >= 0.0;
        let next_in = next.z >= 0.0;
        if cur_in {
            out.push(cur);
        }
        if cur_in != next_in {
            let t = cur.z / (cur.z - next.z);
            out.push(cur + (next - cur) * t);
        }
    }
    // The near plane sits in front of w = 0, so surviving vertices have w > 0
    out.retain(|v| v.w > 1e-6);
    out
}
