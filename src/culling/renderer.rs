//! Visibility renderer worker
//!
//! Runs on its own OS thread with its own rasterizer. The coordinator talks
//! to it only through [`VisibilityRendererHandle`].

use std::sync::{Arc, Mutex};
use std::thread;

use tokio::sync::{mpsc, oneshot};

use crate::core::camera::{CameraPose, ProxyProjection};
use crate::core::error::Error;
use crate::core::types::Result;
use crate::culling::color::{ColorCode, ColorCodec};
use crate::culling::gpu::GpuRasterizer;
use crate::culling::protocol::{ProxyFrame, RenderSurface, RendererCommand, VisibilityReply};
use crate::culling::proxy::{ProxyMesh, ProxyScene};
use crate::culling::raster::{ProxyRasterizer, SoftwareRasterizer};
use crate::model::{ItemId, ModelId};

/// Worker lifecycle
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RendererState {
    Uninitialized,
    Ready,
    Rendering,
}

struct VisibilityWorker {
    state: Arc<Mutex<RendererState>>,
    rasterizer: Option<Box<dyn ProxyRasterizer>>,
    scene: ProxyScene,
    projection: ProxyProjection,
    pixel_density: f32,
}

impl VisibilityWorker {
    fn set_state(&self, state: RendererState) {
        if let Ok(mut s) = self.state.lock() {
            *s = state;
        }
    }

    /// Returns false once the worker should stop
    fn handle(&mut self, cmd: RendererCommand) -> bool {
        log::trace!("Visibility worker: {:?}", cmd);
        match cmd {
            RendererCommand::Init { surface, pixel_density } => self.init(surface, pixel_density),
            RendererCommand::AddModel { model, meshes } => {
                let total = meshes.len();
                let added = self.scene.add_model(&model, meshes);
                log::debug!("Proxy model {}: {} of {} meshes added", model, added, total);
            }
            RendererCommand::RemoveModel { model } => {
                let removed = self.scene.remove_model(&model);
                log::debug!("Proxy model {}: {} meshes removed", model, removed);
            }
            RendererCommand::SetInstanceVisibility { code, items, visible } => {
                self.scene.set_instance_visibility(code, &items, visible);
            }
            RendererCommand::Update { pose, reply } => {
                let result = self.draw(&pose).map(|pixels| VisibilityReply {
                    colors: ColorCodec::decode_counts(&pixels),
                });
                // The coordinator may have given up on this round
                reply.send(result).ok();
            }
            RendererCommand::Capture { pose, reply } => {
                let result = self.draw(&pose).and_then(|pixels| {
                    let (width, height) = self.size()?;
                    Ok(ProxyFrame { width, height, pixels })
                });
                reply.send(result).ok();
            }
            RendererCommand::Shutdown => return false,
        }
        true
    }

    fn init(&mut self, surface: RenderSurface, pixel_density: f32) {
        self.pixel_density = pixel_density;
        let rasterizer: Option<Box<dyn ProxyRasterizer>> = match surface {
            RenderSurface::Gpu { width, height, software_fallback } => match GpuRasterizer::new(width, height) {
                Ok(gpu) => Some(Box::new(gpu)),
                Err(e) if software_fallback => {
                    log::warn!("GPU visibility pass unavailable ({}), using software rasterizer", e);
                    Some(Box::new(SoftwareRasterizer::new(width, height)))
                }
                Err(e) => {
                    log::error!("GPU visibility pass unavailable: {}", e);
                    None
                }
            },
            RenderSurface::Software { width, height } => Some(Box::new(SoftwareRasterizer::new(width, height))),
            RenderSurface::Rasterizer(r) => Some(r),
        };

        match rasterizer {
            Some(r) => {
                let (w, h) = r.size();
                log::info!(
                    "Visibility renderer ready: {} {}x{} (pixel density {})",
                    r.name(),
                    w,
                    h,
                    pixel_density
                );
                self.rasterizer = Some(r);
                self.set_state(RendererState::Ready);
            }
            None => {
                self.rasterizer = None;
                self.set_state(RendererState::Uninitialized);
            }
        }
    }

    fn size(&self) -> Result<(u32, u32)> {
        self.rasterizer
            .as_ref()
            .map(|r| r.size())
            .ok_or_else(|| Error::Visibility("renderer not initialized".into()))
    }

    fn draw(&mut self, pose: &CameraPose) -> Result<Vec<u8>> {
        let Some(rasterizer) = self.rasterizer.as_mut() else {
            return Err(Error::Visibility("renderer not initialized".into()));
        };
        let (w, h) = rasterizer.size();
        let view_proj = self
            .projection
            .view_projection(pose, w as f32 / h.max(1) as f32);

        if let Ok(mut s) = self.state.lock() {
            *s = RendererState::Rendering;
        }
        let result = rasterizer.render(&self.scene, view_proj);
        self.set_state(RendererState::Ready);
        result
    }
}

/// Handle to the visibility worker thread
///
/// Dropping the handle stops the worker; in-flight replies are abandoned.
pub struct VisibilityRendererHandle {
    tx: mpsc::UnboundedSender<RendererCommand>,
    state: Arc<Mutex<RendererState>>,
}

impl VisibilityRendererHandle {
    /// Spawn the worker thread. It starts `Uninitialized`; call [`Self::init`].
    pub fn spawn(projection: ProxyProjection) -> Result<Self> {
        let (tx, mut rx) = mpsc::unbounded_channel::<RendererCommand>();
        let state = Arc::new(Mutex::new(RendererState::Uninitialized));

        let mut worker = VisibilityWorker {
            state: state.clone(),
            rasterizer: None,
            scene: ProxyScene::new(),
            projection,
            pixel_density: 1.0,
        };

        thread::Builder::new()
            .name("visibility-renderer".into())
            .spawn(move || {
                while let Some(cmd) = rx.blocking_recv() {
                    if !worker.handle(cmd) {
                        break;
                    }
                }
                log::debug!("Visibility worker stopped");
            })?;

        Ok(Self { tx, state })
    }

    pub fn state(&self) -> RendererState {
        self.state
            .lock()
            .map(|s| *s)
            .unwrap_or(RendererState::Uninitialized)
    }

    fn send(&self, cmd: RendererCommand) -> Result<()> {
        self.tx.send(cmd).map_err(|_| Error::RendererClosed)
    }

    pub fn init(&self, surface: RenderSurface, pixel_density: f32) -> Result<()> {
        self.send(RendererCommand::Init { surface, pixel_density })
    }

    pub fn add_model(&self, model: ModelId, meshes: Vec<ProxyMesh>) -> Result<()> {
        self.send(RendererCommand::AddModel { model, meshes })
    }

    pub fn remove_model(&self, model: ModelId) -> Result<()> {
        self.send(RendererCommand::RemoveModel { model })
    }

    pub fn set_instance_visibility(&self, code: ColorCode, items: Vec<ItemId>, visible: bool) -> Result<()> {
        self.send(RendererCommand::SetInstanceVisibility { code, items, visible })
    }

    /// Render the proxy scene from `pose` and decode what it saw
    pub async fn update(&self, pose: CameraPose) -> Result<VisibilityReply> {
        let (reply, rx) = oneshot::channel();
        self.send(RendererCommand::Update { pose, reply })?;
        rx.await.map_err(|_| Error::RendererClosed)?
    }

    /// Render the proxy scene from `pose` and return the raw frame
    pub async fn capture(&self, pose: CameraPose) -> Result<ProxyFrame> {
        let (reply, rx) = oneshot::channel();
        self.send(RendererCommand::Capture { pose, reply })?;
        rx.await.map_err(|_| Error::RendererClosed)?
    }

    /// Stop the worker without waiting for it
    pub fn shutdown(&self) {
        self.tx.send(RendererCommand::Shutdown).ok();
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

impl Drop for VisibilityRendererHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{Mat4, Vec3};
    use crate::culling::proxy::{ProxyGeometry, ProxyInstance, ProxyMaterial, ProxyMaterials};

    /// Returns a fixed frame whatever the scene
    struct ScriptedRasterizer {
        frame: Vec<u8>,
    }

    impl ProxyRasterizer for ScriptedRasterizer {
        fn size(&self) -> (u32, u32) {
            (2, 2)
        }

        fn render(&mut self, _scene: &ProxyScene, _view_proj: Mat4) -> Result<Vec<u8>> {
            Ok(self.frame.clone())
        }

        fn name(&self) -> &'static str {
            "scripted"
        }
    }

    struct FailingRasterizer;

    impl ProxyRasterizer for FailingRasterizer {
        fn size(&self) -> (u32, u32) {
            (1, 1)
        }

        fn render(&mut self, _scene: &ProxyScene, _view_proj: Mat4) -> Result<Vec<u8>> {
            Err(Error::Gpu("device lost".into()))
        }

        fn name(&self) -> &'static str {
            "failing"
        }
    }

    #[tokio::test]
    async fn test_update_before_init_is_recoverable() {
        let renderer = VisibilityRendererHandle::spawn(ProxyProjection::default()).unwrap();
        let err = renderer.update(CameraPose::default()).await.unwrap_err();
        assert!(matches!(err, Error::Visibility(_)));
        assert_eq!(renderer.state(), RendererState::Uninitialized);
    }

    #[tokio::test]
    async fn test_scripted_frame_decoded() {
        let renderer = VisibilityRendererHandle::spawn(ProxyProjection::default()).unwrap();
        let frame = vec![
            3, 0, 0, 255, //
            3, 0, 0, 255, //
            0, 0, 0, 0, //
            0, 0, 5, 255,
        ];
        renderer
            .init(RenderSurface::Rasterizer(Box::new(ScriptedRasterizer { frame })), 2.0)
            .unwrap();

        let reply = renderer.update(CameraPose::default()).await.unwrap();
        assert_eq!(reply.colors.len(), 2);
        assert_eq!(reply.colors[&ColorCode::from_rgb(3, 0, 0)], 2);
        assert_eq!(renderer.state(), RendererState::Ready);
    }

    #[tokio::test]
    async fn test_render_failure_keeps_worker_alive() {
        let renderer = VisibilityRendererHandle::spawn(ProxyProjection::default()).unwrap();
        renderer
            .init(RenderSurface::Rasterizer(Box::new(FailingRasterizer)), 1.0)
            .unwrap();
        assert!(matches!(renderer.update(CameraPose::default()).await, Err(Error::Gpu(_))));
        assert!(matches!(renderer.update(CameraPose::default()).await, Err(Error::Gpu(_))));
        assert_eq!(renderer.state(), RendererState::Ready);
    }

    #[tokio::test]
    async fn test_software_surface_sees_model() {
        let renderer = VisibilityRendererHandle::spawn(ProxyProjection::default()).unwrap();
        renderer
            .init(RenderSurface::Software { width: 64, height: 64 }, 1.0)
            .unwrap();

        let code = ColorCode::from_rgb(0, 0, 1);
        let mesh = ProxyMesh {
            code,
            geometry: Arc::new(ProxyGeometry::unit_cube()),
            materials: ProxyMaterials::Single(ProxyMaterial::OPAQUE),
            instances: vec![ProxyInstance {
                item: 7,
                transform: Mat4::from_translation(Vec3::splat(-1.0)) * Mat4::from_scale(Vec3::splat(2.0)),
            }],
            mesh_matrix: Mat4::IDENTITY,
        };
        let model = ModelId::from("m");
        renderer.add_model(model.clone(), vec![mesh]).unwrap();

        let pose = CameraPose::look_at(Vec3::new(0.0, 0.0, 6.0), Vec3::ZERO);
        let reply = renderer.update(pose).await.unwrap();
        assert!(reply.colors[&code] > 0);

        renderer.set_instance_visibility(code, vec![7], false).unwrap();
        assert!(renderer.update(pose).await.unwrap().colors.is_empty());

        renderer.set_instance_visibility(code, vec![7], true).unwrap();
        let frame = renderer.capture(pose).await.unwrap();
        assert_eq!(frame.color_at(32, 32), Some(code));

        renderer.remove_model(model).unwrap();
        assert!(renderer.update(pose).await.unwrap().colors.is_empty());
    }

    #[tokio::test]
    async fn test_shutdown_closes_channel() {
        let renderer = VisibilityRendererHandle::spawn(ProxyProjection::default()).unwrap();
        renderer.shutdown();
        let result = renderer.update(CameraPose::default()).await;
        assert!(matches!(result, Err(Error::RendererClosed)));
    }
}
