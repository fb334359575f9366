//! Messages between the coordinator and the visibility worker
//!
//! Nothing but these payloads crosses the thread boundary. Commands without
//! a reply are fire-and-forget; `Update` and `Capture` answer on a oneshot.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::path::Path;

use tokio::sync::oneshot;

use crate::core::camera::CameraPose;
use crate::core::error::Error;
use crate::core::types::Result;
use crate::culling::color::ColorCode;
use crate::culling::proxy::ProxyMesh;
use crate::culling::raster::ProxyRasterizer;
use crate::model::{ItemId, ModelId};

/// Drawing surface handed to the worker on init
pub enum RenderSurface {
    /// Headless wgpu target
    Gpu {
        width: u32,
        height: u32,
        /// Use the software rasterizer if no adapter is found
        software_fallback: bool,
    },
    /// CPU rasterizer
    Software { width: u32, height: u32 },
    /// A rasterizer built by the caller and moved into the worker
    Rasterizer(Box<dyn ProxyRasterizer>),
}

impl fmt::Debug for RenderSurface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Gpu { width, height, software_fallback } => f
                .debug_struct("Gpu")
                .field("width", width)
                .field("height", height)
                .field("software_fallback", software_fallback)
                .finish(),
            Self::Software { width, height } => f
                .debug_struct("Software")
                .field("width", width)
                .field("height", height)
                .finish(),
            Self::Rasterizer(r) => write!(f, "Rasterizer({})", r.name()),
        }
    }
}

/// Result of one visibility pass: pixel count per color seen
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct VisibilityReply {
    pub colors: HashMap<ColorCode, u32>,
}

impl VisibilityReply {
    /// Colors in their `"r-g-b"` form, sorted
    pub fn color_strings(&self) -> BTreeSet<String> {
        self.colors.keys().map(ColorCode::to_string).collect()
    }
}

/// Raw proxy frame, for debugging
#[derive(Clone, Debug)]
pub struct ProxyFrame {
    pub width: u32,
    pub height: u32,
    /// RGBA8, top row first
    pub pixels: Vec<u8>,
}

impl ProxyFrame {
    pub fn color_at(&self, x: u32, y: u32) -> Option<ColorCode> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let i = ((y * self.width + x) * 4) as usize;
        let px = self.pixels.get(i..i + 3)?;
        Some(ColorCode::from_rgb(px[0], px[1], px[2]))
    }

    /// Write as PNG. Alpha is forced opaque so the codes are visible.
    pub fn save_png(&self, path: impl AsRef<Path>) -> Result<()> {
        let mut rgba = self.pixels.clone();
        for px in rgba.chunks_exact_mut(4) {
            px[3] = 255;
        }
        let image = image::RgbaImage::from_raw(self.width, self.height, rgba)
            .ok_or_else(|| Error::Visibility("frame size does not match pixel buffer".into()))?;
        image
            .save(path.as_ref())
            .map_err(|e| Error::Visibility(format!("{}: {}", path.as_ref().display(), e)))
    }
}

/// Commands accepted by the visibility worker
pub enum RendererCommand {
    Init {
        surface: RenderSurface,
        pixel_density: f32,
    },
    AddModel {
        model: ModelId,
        meshes: Vec<ProxyMesh>,
    },
    RemoveModel {
        model: ModelId,
    },
    SetInstanceVisibility {
        code: ColorCode,
        items: Vec<ItemId>,
        visible: bool,
    },
    Update {
        pose: CameraPose,
        reply: oneshot::Sender<Result<VisibilityReply>>,
    },
    Capture {
        pose: CameraPose,
        reply: oneshot::Sender<Result<ProxyFrame>>,
    },
    Shutdown,
}

impl fmt::Debug for RendererCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Init { surface, pixel_density } => {
                write!(f, "Init({:?}, density {})", surface, pixel_density)
            }
            Self::AddModel { model, meshes } => write!(f, "AddModel({}, {} meshes)", model, meshes.len()),
            Self::RemoveModel { model } => write!(f, "RemoveModel({})", model),
            Self::SetInstanceVisibility { code, items, visible } => {
                write!(f, "SetInstanceVisibility({}, {} items, {})", code, items.len(), visible)
            }
            Self::Update { pose, .. } => write!(f, "Update({:?})", pose.position),
            Self::Capture { pose, .. } => write!(f, "Capture({:?})", pose.position),
            Self::Shutdown => write!(f, "Shutdown"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_color_strings() {
        let mut colors = HashMap::new();
        colors.insert(ColorCode::from_rgb(3, 0, 0), 12);
        colors.insert(ColorCode::from_rgb(0, 0, 1), 1);
        let reply = VisibilityReply { colors };
        let strings: Vec<String> = reply.color_strings().into_iter().collect();
        assert_eq!(strings, vec!["0-0-1".to_string(), "3-0-0".to_string()]);
    }

    #[test]
    fn test_frame_png() {
        let frame = ProxyFrame {
            width: 2,
            height: 1,
            pixels: vec![0, 0, 1, 255, 7, 0, 0, 0],
        };
        assert_eq!(frame.color_at(1, 0), Some(ColorCode::from_rgb(7, 0, 0)));
        assert_eq!(frame.color_at(2, 0), None);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("proxy.png");
        frame.save_png(&path).unwrap();
        let loaded = image::open(&path).unwrap().to_rgba8();
        assert_eq!(loaded.get_pixel(1, 0).0, [7, 0, 0, 255]);
    }
}
