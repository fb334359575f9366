//! Tile streamer
//!
//! Wires a [`CullerCoordinator`] to a scheduler task. The host feeds camera
//! poses through [`TileStreamer::camera`] and either calls
//! [`TileStreamer::update`] itself or lets [`TileStreamer::run`] tick at the
//! configured interval.

use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;

use crate::core::camera::CameraPose;
use crate::core::config::{RendererBackend, RendererSettings, StreamerConfig};
use crate::core::types::Result;
use crate::culling::coordinator::{CameraFeed, CullerCoordinator, CullerStats};
use crate::culling::demand::CullerDemand;
use crate::culling::protocol::{ProxyFrame, RenderSurface};
use crate::culling::renderer::VisibilityRendererHandle;
use crate::model::{ModelId, StreamLoaderSettings};
use crate::streaming::scheduler::{ItemFilter, LoadedNotice, SchedulerStats, StreamScheduler};
use crate::streaming::sink::SinkRegistry;
use crate::streaming::source::TileSource;
use crate::streaming::task::SchedulerTask;
use crate::streaming::tile::CompressedTileSerializer;

/// Combined counters of both engines
#[derive(Clone, Debug, Serialize)]
pub struct StreamerStats {
    pub culler: CullerStats,
    pub scheduler: SchedulerStats,
}

fn surface_for(settings: &RendererSettings) -> RenderSurface {
    match settings.backend {
        RendererBackend::Gpu => RenderSurface::Gpu {
            width: settings.width,
            height: settings.height,
            software_fallback: settings.software_fallback,
        },
        RendererBackend::Software => RenderSurface::Software {
            width: settings.width,
            height: settings.height,
        },
    }
}

pub struct TileStreamer {
    config: StreamerConfig,
    camera: CameraFeed,
    coordinator: CullerCoordinator,
    scheduler: SchedulerTask,
    loaded_rx: mpsc::UnboundedReceiver<LoadedNotice>,
    models: BTreeSet<ModelId>,
}

impl TileStreamer {
    /// Build a streamer with the surface described by `config.renderer`.
    ///
    /// Must be called inside a tokio runtime.
    pub fn new(config: StreamerConfig, source: Arc<dyn TileSource>, sinks: SinkRegistry) -> Result<Self> {
        let surface = surface_for(&config.renderer);
        Self::with_surface(config, surface, source, sinks)
    }

    /// Build a streamer drawing the proxies on an explicit surface
    pub fn with_surface(
        config: StreamerConfig,
        surface: RenderSurface,
        source: Arc<dyn TileSource>,
        sinks: SinkRegistry,
    ) -> Result<Self> {
        let renderer = VisibilityRendererHandle::spawn(config.renderer.projection)?;
        renderer.init(surface, config.renderer.pixel_density)?;

        let camera = CameraFeed::new(CameraPose::default());
        let coordinator = CullerCoordinator::new(config.culler.clone(), renderer, camera.subscribe());

        let (loaded_tx, loaded_rx) = mpsc::unbounded_channel();
        let mut scheduler = StreamScheduler::new(&config.cache, source, Arc::new(CompressedTileSerializer), sinks);
        scheduler.on_loaded(loaded_tx);

        log::info!(
            "Tile streamer started ({}x{} proxy target, {} ms interval)",
            config.renderer.width,
            config.renderer.height,
            config.culler.update_interval_ms
        );

        Ok(Self {
            config,
            camera,
            coordinator,
            scheduler: SchedulerTask::spawn(scheduler),
            loaded_rx,
            models: BTreeSet::new(),
        })
    }

    pub fn config(&self) -> &StreamerConfig {
        &self.config
    }

    /// Camera input; clone it freely, the newest pose wins
    pub fn camera(&self) -> CameraFeed {
        self.camera.clone()
    }

    pub fn coordinator(&self) -> &CullerCoordinator {
        &self.coordinator
    }

    pub fn models(&self) -> impl Iterator<Item = &ModelId> {
        self.models.iter()
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.coordinator.set_enabled(enabled);
    }

    /// Start streaming a model
    pub fn load_model(&mut self, model: ModelId, settings: StreamLoaderSettings) -> Result<()> {
        let instances = settings.instances_by_geometry();
        self.coordinator.add_model(&model, &settings.geometries, &instances)?;
        self.scheduler.add_model(model.clone(), settings)?;
        self.models.insert(model);
        Ok(())
    }

    /// Stop tracking a model and delete its fragments
    pub fn remove_model(&mut self, model: &ModelId) -> Result<()> {
        self.coordinator.remove_model(model);
        self.models.remove(model);
        self.scheduler.remove_model(model.clone())
    }

    /// Show or hide items in both the proxy scene and the fragments
    pub fn set_visibility(&mut self, visible: bool, filter: ItemFilter) -> Result<()> {
        for (model, geometries) in &filter {
            self.coordinator.set_item_visibility(model, geometries, visible);
        }
        self.scheduler.set_visibility(visible, filter)
    }

    fn drain_loaded(&mut self) {
        while let Ok((model, geometry)) = self.loaded_rx.try_recv() {
            self.coordinator.mark_loaded(&model, geometry);
        }
    }

    /// Run one visibility round if due and hand its demand to the scheduler.
    ///
    /// Returns the demand of the round, `None` when no round was due.
    pub async fn update(&mut self, force: bool) -> Result<Option<CullerDemand>> {
        self.drain_loaded();
        let Some(demand) = self.coordinator.update_visibility(force).await? else {
            return Ok(None);
        };
        if !demand.is_empty() {
            self.scheduler.demand(demand.clone())?;
        }
        Ok(Some(demand))
    }

    /// Tick at the configured interval until `shutdown` resolves. Ticks that
    /// fall due during a round are skipped.
    pub async fn run(&mut self, shutdown: impl Future<Output = ()>) {
        let period = self.config.culler.update_interval().max(Duration::from_millis(1));
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = interval.tick() => {
                    if let Err(e) = self.update(false).await {
                        log::warn!("Visibility round failed: {}", e);
                    }
                }
            }
        }
    }

    /// Wait until the scheduler has processed all demand sent so far
    pub async fn flush(&mut self) -> Result<()> {
        self.scheduler.barrier().await?;
        self.drain_loaded();
        Ok(())
    }

    pub async fn stats(&self) -> Result<StreamerStats> {
        Ok(StreamerStats {
            culler: self.coordinator.stats(),
            scheduler: self.scheduler.stats().await?,
        })
    }

    /// Proxy frame from the current camera pose
    pub async fn capture(&self) -> Result<ProxyFrame> {
        self.coordinator.capture().await
    }

    /// Stop both engines. Loads in progress return early.
    pub fn dispose(&mut self) {
        self.coordinator.dispose();
        self.scheduler.dispose();
        self.models.clear();
    }
}
