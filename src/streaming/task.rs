//! Scheduler task
//!
//! The [`StreamScheduler`] lives inside one tokio task and is driven by
//! commands, so loads never overlap and callers never wait on a fetch.
//! At most one demand waits behind the running one; later rounds are merged
//! into it.

use std::sync::{Arc, Mutex};
use std::time::Instant;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::core::error::Error;
use crate::core::types::Result;
use crate::culling::demand::CullerDemand;
use crate::model::{ModelId, StreamLoaderSettings};
use crate::streaming::scheduler::{DisposeSignal, ItemFilter, SchedulerStats, StreamScheduler};

/// The demand waiting to be applied, if any
type DemandSlot = Arc<Mutex<Option<CullerDemand>>>;

/// Messages understood by the scheduler task
#[derive(Debug)]
pub enum SchedulerCommand {
    /// Apply whatever is in the demand slot
    Demand,
    AddModel {
        model: ModelId,
        settings: Box<StreamLoaderSettings>,
    },
    RemoveModel(ModelId),
    SetVisibility {
        visible: bool,
        filter: ItemFilter,
    },
    /// Answered once every earlier command has been handled
    Barrier(oneshot::Sender<()>),
    Stats(oneshot::Sender<SchedulerStats>),
    Dispose,
}

/// Handle to a running scheduler task
pub struct SchedulerTask {
    tx: mpsc::UnboundedSender<SchedulerCommand>,
    pending: DemandSlot,
    disposing: DisposeSignal,
    handle: Option<JoinHandle<()>>,
}

impl SchedulerTask {
    /// Move the scheduler into a task on the current runtime.
    ///
    /// Panics if called outside a tokio runtime context.
    pub fn spawn(scheduler: StreamScheduler) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let pending = DemandSlot::default();
        let disposing = scheduler.disposing();
        let handle = tokio::spawn(Self::run(scheduler, rx, pending.clone()));
        Self {
            tx,
            pending,
            disposing,
            handle: Some(handle),
        }
    }

    async fn run(
        mut scheduler: StreamScheduler,
        mut rx: mpsc::UnboundedReceiver<SchedulerCommand>,
        pending: DemandSlot,
    ) {
        while let Some(cmd) = rx.recv().await {
            match cmd {
                SchedulerCommand::Demand => {
                    let taken = pending.lock().ok().and_then(|mut slot| slot.take());
                    let Some(demand) = taken else {
                        continue;
                    };
                    let started = Instant::now();
                    let created = scheduler.apply_demand(&demand, started).await;
                    if created > 0 {
                        log::debug!(
                            "Created {} fragments in {:.1} ms",
                            created,
                            started.elapsed().as_secs_f32() * 1000.0
                        );
                    }
                }
                SchedulerCommand::AddModel { model, settings } => scheduler.add_model(model, &settings),
                SchedulerCommand::RemoveModel(model) => scheduler.remove_model(&model),
                SchedulerCommand::SetVisibility { visible, filter } => scheduler.set_visibility(visible, &filter),
                SchedulerCommand::Barrier(reply) => {
                    reply.send(()).ok();
                }
                SchedulerCommand::Stats(reply) => {
                    reply.send(scheduler.stats()).ok();
                }
                SchedulerCommand::Dispose => {
                    scheduler.dispose();
                    break;
                }
            }
        }
        log::debug!("Scheduler task finished");
    }

    fn send(&self, cmd: SchedulerCommand) -> Result<()> {
        self.tx.send(cmd).map_err(|_| Error::SchedulerClosed)
    }

    /// Queue a round's demand. If an earlier demand has not been picked up
    /// yet, the two are merged and no new command is sent.
    pub fn demand(&self, demand: CullerDemand) -> Result<()> {
        if self.is_closed() {
            return Err(Error::SchedulerClosed);
        }
        let mut slot = self.pending.lock().map_err(|_| Error::SchedulerClosed)?;
        match slot.as_mut() {
            Some(waiting) => {
                waiting.merge(demand);
                Ok(())
            }
            None => {
                *slot = Some(demand);
                self.send(SchedulerCommand::Demand)
            }
        }
    }

    pub fn add_model(&self, model: ModelId, settings: StreamLoaderSettings) -> Result<()> {
        self.send(SchedulerCommand::AddModel {
            model,
            settings: Box::new(settings),
        })
    }

    pub fn remove_model(&self, model: ModelId) -> Result<()> {
        self.send(SchedulerCommand::RemoveModel(model))
    }

    pub fn set_visibility(&self, visible: bool, filter: ItemFilter) -> Result<()> {
        self.send(SchedulerCommand::SetVisibility { visible, filter })
    }

    /// Wait until everything sent so far has been processed
    pub async fn barrier(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.send(SchedulerCommand::Barrier(tx))?;
        rx.await.map_err(|_| Error::SchedulerClosed)
    }

    pub async fn stats(&self) -> Result<SchedulerStats> {
        let (tx, rx) = oneshot::channel();
        self.send(SchedulerCommand::Stats(tx))?;
        rx.await.map_err(|_| Error::SchedulerClosed)
    }

    /// Abort the current load and tear the scheduler down
    pub fn dispose(&self) {
        self.disposing.raise();
        self.tx.send(SchedulerCommand::Dispose).ok();
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Wait for the task to exit after [`SchedulerTask::dispose`]
    pub async fn join(mut self) {
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                log::error!("Scheduler task panicked: {}", e);
            }
        }
    }
}

impl Drop for SchedulerTask {
    fn drop(&mut self) {
        if self.handle.is_some() {
            self.dispose();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::CacheSettings;
    use crate::model::SyntheticBuilding;
    use crate::streaming::sink::{LiveScene, SinkRegistry};
    use crate::streaming::source::{MemoryTileSource, TileFuture, TileSource};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use crate::streaming::tile::{CompressedTileSerializer, TileId, TileSerializer};

    fn building() -> crate::model::SyntheticModel {
        SyntheticBuilding {
            floors: 2,
            bays_x: 2,
            bays_z: 2,
            ..Default::default()
        }
        .build()
    }

    fn spawn() -> (SchedulerTask, LiveScene, mpsc::UnboundedReceiver<(ModelId, u32)>) {
        let building = building();
        let source = MemoryTileSource::new();
        for (file, tile) in &building.tiles {
            let bytes = CompressedTileSerializer.export(tile).unwrap();
            source.insert(TileId::new(ModelId::from("b"), file), bytes);
        }
        spawn_with(Arc::new(source))
    }

    fn spawn_with(
        source: Arc<dyn TileSource>,
    ) -> (SchedulerTask, LiveScene, mpsc::UnboundedReceiver<(ModelId, u32)>) {
        let building = building();
        let model = ModelId::from("b");

        let scene = LiveScene::new();
        let mut sinks = SinkRegistry::new();
        sinks.register(Box::new(scene.clone()));
        let mut scheduler = StreamScheduler::new(
            &CacheSettings::default(),
            source,
            Arc::new(CompressedTileSerializer),
            sinks,
        );
        let (tx, rx) = mpsc::unbounded_channel();
        scheduler.on_loaded(tx);

        let task = SchedulerTask::spawn(scheduler);
        task.add_model(model, building.settings).unwrap();
        (task, scene, rx)
    }

    #[tokio::test]
    async fn test_commands_processed_in_order() {
        let (task, scene, mut rx) = spawn();
        let mut demand = CullerDemand::default();
        demand.add_load(&ModelId::from("b"), 0, 10);
        task.demand(demand).unwrap();
        task.barrier().await.unwrap();

        assert_eq!(scene.len(), 1);
        assert_eq!(rx.try_recv().unwrap(), (ModelId::from("b"), 0));

        let stats = task.stats().await.unwrap();
        assert_eq!(stats.models, 1);
        assert_eq!(stats.fragments, 1);
        assert_eq!(stats.tiles_fetched, 1);
    }

    #[tokio::test]
    async fn test_dispose_closes_task() {
        let (task, scene, _rx) = spawn();
        let mut demand = CullerDemand::default();
        demand.add_load(&ModelId::from("b"), 0, 10);
        task.demand(demand).unwrap();
        task.barrier().await.unwrap();

        task.dispose();
        assert!(matches!(task.barrier().await, Err(Error::SchedulerClosed)));
        assert!(scene.is_empty());
        task.join().await;
    }

    /// Counts fetches; never has the tile
    struct SlowMissing {
        fetches: Arc<AtomicUsize>,
        delay: Option<Duration>,
    }

    impl TileSource for SlowMissing {
        fn fetch<'a>(&'a self, _id: &'a TileId) -> TileFuture<'a> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            let delay = self.delay;
            Box::pin(async move {
                match delay {
                    Some(delay) => tokio::time::sleep(delay).await,
                    None => std::future::pending::<()>().await,
                }
                Ok(None)
            })
        }

        fn name(&self) -> &'static str {
            "slow"
        }
    }

    fn load_column() -> CullerDemand {
        let mut demand = CullerDemand::default();
        demand.add_load(&ModelId::from("b"), 0, 10);
        demand
    }

    #[tokio::test]
    async fn test_rapid_demands_are_merged() {
        let fetches = Arc::new(AtomicUsize::new(0));
        let source = SlowMissing {
            fetches: fetches.clone(),
            delay: Some(Duration::from_millis(20)),
        };
        let (task, _scene, _rx) = spawn_with(Arc::new(source));

        for _ in 0..40 {
            task.demand(load_column()).unwrap();
        }
        task.barrier().await.unwrap();
        assert_eq!(fetches.load(Ordering::SeqCst), 1);

        // One running, one waiting, the rest merged into the waiting one
        task.demand(load_column()).unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        for _ in 0..40 {
            task.demand(load_column()).unwrap();
        }
        task.barrier().await.unwrap();
        assert_eq!(fetches.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_dispose_interrupts_stuck_fetch() {
        let fetches = Arc::new(AtomicUsize::new(0));
        let source = SlowMissing {
            fetches: fetches.clone(),
            delay: None,
        };
        let (task, scene, _rx) = spawn_with(Arc::new(source));
        task.demand(load_column()).unwrap();
        while fetches.load(Ordering::SeqCst) == 0 {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }

        task.dispose();
        tokio::time::timeout(Duration::from_secs(5), task.join()).await.unwrap();
        assert!(scene.is_empty());
    }
}
