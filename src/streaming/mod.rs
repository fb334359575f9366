//! Geometry streaming: tile format, sources, cache, scheduling and fragments

pub mod cache;
pub mod fragment;
pub mod priority;
pub mod scheduler;
pub mod sink;
pub mod source;
pub mod task;
pub mod tile;

pub use cache::GeometryCache;
pub use fragment::{FragmentItem, FragmentKey, FragmentState, StreamedFragment, Transparency};
pub use priority::{FilePlan, FilePriority};
pub use scheduler::{DisposeSignal, ItemFilter, LoadedNotice, SchedulerStats, StreamScheduler};
pub use sink::{FragmentSink, LiveScene, SinkRegistry};
pub use source::{DirectoryTileSource, MemoryTileSource, RemoteTileSource, TileFuture, TileSource};
pub use task::{SchedulerCommand, SchedulerTask};
pub use tile::{
    CompressedTileSerializer, GeometryBuffers, GeometryTile, TileId, TileSerializer, TILE_MAGIC, TILE_VERSION,
};
