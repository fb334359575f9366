//! Headless streaming demo
//!
//! Usage: cargo run --release -- [OPTIONS]
//!
//! Options:
//!   --config <FILE>     Streamer config (JSON); defaults otherwise
//!   --model <FILE>      Model descriptors written by `pack_tiles`
//!   --model-id <ID>     Model id used for tile lookups (default: file stem)
//!   --tiles <DIR>       Read tiles from `<DIR>/<model>/<file>`
//!   --remote <ADDR>     Fetch tiles from a `tile_server`
//!   --floors <N>        Floors of the synthetic building (default: 12)
//!   --rounds <N>        Camera positions to visit (default: 24)
//!   --capture <FILE>    Write the last proxy frame as PNG
//!
//! Without `--model` a synthetic building is generated and served from memory.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use bimstream::TileStreamer;
use bimstream::core::camera::CameraPose;
use bimstream::core::config::{SourceSettings, StreamerConfig};
use bimstream::core::logging;
use bimstream::model::{ModelId, StreamLoaderSettings, SyntheticBuilding};
use bimstream::streaming::source::{self, MemoryTileSource, TileSource};
use bimstream::streaming::{CompressedTileSerializer, LiveScene, SinkRegistry, TileId, TileSerializer};

#[tokio::main]
async fn main() {
    logging::init_with_timestamps();
    log::info!("bimstream demo starting...");

    let args: Vec<String> = std::env::args().collect();
    if let Err(e) = run(&args).await {
        log::error!("{}", e);
        std::process::exit(1);
    }
}

async fn run(args: &[String]) -> bimstream::core::Result<()> {
    let mut config = match parse_path_arg(args, "--config") {
        Some(path) => StreamerConfig::load(&path)?,
        None => StreamerConfig::default(),
    };
    if let Some(root) = parse_path_arg(args, "--tiles") {
        config.source = SourceSettings::Directory { root };
    }
    if let Some(addr) = parse_str_arg(args, "--remote") {
        config.source = SourceSettings::remote(addr);
    }
    let rounds = parse_usize_arg(args, "--rounds").unwrap_or(24);

    let (model, settings, source) = match parse_path_arg(args, "--model") {
        Some(path) => {
            let settings = StreamLoaderSettings::load(&path)?;
            let model = parse_str_arg(args, "--model-id")
                .map(ModelId::new)
                .unwrap_or_else(|| model_id_from_path(&path));
            (model, settings, source::from_settings(&config.source))
        }
        None => synthetic(args, &config)?,
    };

    let Some(bounds) = settings.bounds() else {
        log::warn!("Model {} has no placed geometry", model);
        return Ok(());
    };
    log::info!(
        "Model {}: {} items, {} geometries, {} source",
        model,
        settings.assets.len(),
        settings.geometries.len(),
        source.name()
    );

    let scene = LiveScene::new();
    let mut sinks = SinkRegistry::new();
    sinks.register(Box::new(scene.clone()));

    let mut streamer = TileStreamer::new(config, source, sinks)?;
    streamer.load_model(model, settings)?;
    let camera = streamer.camera();

    let radius = bounds.size().length() * 0.9;
    let height = bounds.size().y * 0.6;
    let started = Instant::now();

    for round in 0..rounds {
        let angle = round as f32 / rounds.max(1) as f32 * std::f32::consts::TAU;
        camera.set(CameraPose::orbit(bounds.center(), radius, height, angle));

        match streamer.update(false).await {
            Ok(Some(demand)) => log::debug!("Round {}: {} geometries requested", round, demand.load_count()),
            Ok(None) => {}
            Err(e) => log::warn!("Round {} failed: {}", round, e),
        }
        streamer.flush().await?;

        let stats = streamer.stats().await?;
        log::info!(
            "Round {:>3}: {} visible / {} tracked, {} fragments ({} shown, {} instances), {} tiles cached ({:.1} KiB), last pass {:.1} ms",
            round,
            stats.culler.visible,
            stats.culler.tracked,
            scene.len(),
            scene.visible_count(),
            scene.visible_instances(),
            stats.scheduler.cached_tiles,
            stats.scheduler.resident_bytes as f32 / 1024.0,
            stats.culler.rounds.last_ms
        );
    }

    let stats = streamer.stats().await?;
    log::info!(
        "Done in {:.2} s: {}",
        started.elapsed().as_secs_f32(),
        serde_json::to_string(&stats).unwrap_or_default()
    );

    if let Some(path) = parse_path_arg(args, "--capture") {
        let frame = streamer.capture().await?;
        frame.save_png(&path)?;
        log::info!("Proxy frame written to {}", path.display());
    }

    streamer.dispose();
    Ok(())
}

/// Generate a building and serve its tiles from memory
fn synthetic(
    args: &[String],
    config: &StreamerConfig,
) -> bimstream::core::Result<(ModelId, StreamLoaderSettings, Arc<dyn TileSource>)> {
    let building = SyntheticBuilding {
        floors: parse_u32_arg(args, "--floors").unwrap_or(12),
        ..Default::default()
    }
    .build();
    let model = ModelId::new("synthetic");

    let source: Arc<dyn TileSource> = match config.source {
        SourceSettings::Memory => {
            let memory = MemoryTileSource::new();
            for (file, tile) in &building.tiles {
                memory.insert(TileId::new(model.clone(), file), CompressedTileSerializer.export(tile)?);
            }
            Arc::new(memory)
        }
        ref other => source::from_settings(other),
    };
    Ok((model, building.settings, source))
}

fn model_id_from_path(path: &Path) -> ModelId {
    let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or("model");
    ModelId::new(stem)
}

fn parse_path_arg(args: &[String], flag: &str) -> Option<PathBuf> {
    parse_str_arg(args, flag).map(PathBuf::from)
}

fn parse_u32_arg(args: &[String], flag: &str) -> Option<u32> {
    args.iter().position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .and_then(|s| s.parse().ok())
}

fn parse_usize_arg(args: &[String], flag: &str) -> Option<usize> {
    args.iter().position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .and_then(|s| s.parse().ok())
}

fn parse_str_arg(args: &[String], flag: &str) -> Option<String> {
    args.iter().position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .cloned()
}
