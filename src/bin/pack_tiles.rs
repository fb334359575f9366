//! Tile packer binary - writes a synthetic building as a tile directory.
//!
//! Usage: cargo run --release --bin pack_tiles -- [OPTIONS]
//!
//! Options:
//!   --out <DIR>           Output root (default: "tiles")
//!   --name <ID>           Model id / subdirectory (default: "tower")
//!   --floors <N>          Floors (default: 12)
//!   --bays-x <N>          Bays along X (default: 4)
//!   --bays-z <N>          Bays along Z (default: 3)
//!   --per-file <N>        Geometries per tile file (default: 8)
//!   --no-glazing          Skip the glass facade
//!
//! Output structure:
//!   <out>/
//!     <name>.json           # StreamLoaderSettings descriptors
//!     <name>/
//!       tile_0.bst
//!       ...

use std::path::PathBuf;
use std::time::Instant;

use bimstream::core::logging;
use bimstream::model::{ModelId, SyntheticBuilding};
use bimstream::streaming::source::DirectoryTileSource;
use bimstream::streaming::{CompressedTileSerializer, TileId, TileSerializer};

#[tokio::main]
async fn main() {
    logging::init_with_timestamps();

    let args: Vec<String> = std::env::args().collect();
    let out = parse_str_arg(&args, "--out").map(PathBuf::from).unwrap_or_else(|| PathBuf::from("tiles"));
    let name = parse_str_arg(&args, "--name").unwrap_or_else(|| "tower".to_string());
    let defaults = SyntheticBuilding::default();
    let building = SyntheticBuilding {
        floors: parse_u32_arg(&args, "--floors").unwrap_or(12),
        bays_x: parse_u32_arg(&args, "--bays-x").unwrap_or(defaults.bays_x),
        bays_z: parse_u32_arg(&args, "--bays-z").unwrap_or(defaults.bays_z),
        geometries_per_file: parse_usize_arg(&args, "--per-file").unwrap_or(defaults.geometries_per_file),
        glazing: !args.iter().any(|a| a == "--no-glazing"),
        ..defaults
    };

    println!("=== bimstream tile packer ===");
    println!("Model:  {}", name);
    println!("Floors: {}, bays {} x {}", building.floors, building.bays_x, building.bays_z);
    println!("Output: {}", out.display());
    println!();

    let started = Instant::now();
    let model = building.build();
    let id = ModelId::new(name.clone());
    let store = DirectoryTileSource::new(&out);

    let mut bytes_written = 0usize;
    for (file, tile) in &model.tiles {
        let bytes = match CompressedTileSerializer.export(tile) {
            Ok(bytes) => bytes,
            Err(e) => {
                log::error!("Failed to encode {}: {}", file, e);
                std::process::exit(1);
            }
        };
        if let Err(e) = store.store(&TileId::new(id.clone(), file), &bytes).await {
            log::error!("Failed to write {}: {}", file, e);
            std::process::exit(1);
        }
        bytes_written += bytes.len();
    }

    let descriptor = out.join(format!("{}.json", name));
    if let Err(e) = model.settings.save(&descriptor) {
        log::error!("Failed to write {}: {}", descriptor.display(), e);
        std::process::exit(1);
    }

    println!(
        "Wrote {} tiles ({:.1} KiB) for {} items and {} geometries in {:.2} s",
        model.tiles.len(),
        bytes_written as f32 / 1024.0,
        model.settings.assets.len(),
        model.settings.geometries.len(),
        started.elapsed().as_secs_f32()
    );
    println!();
    println!("To stream this model:");
    println!("  cargo run --release -- --model {} --tiles {}", descriptor.display(), out.display());
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
