//! Tile server binary - serves a tile directory over TCP.
//!
//! Usage: cargo run --release --bin tile_server -- [OPTIONS]
//!
//! Options:
//!   --root <DIR>      Tile directory, laid out as `<DIR>/<model>/<file>` (default: "tiles")
//!   --bind <ADDR>     Listen address (default: 127.0.0.1:9743)

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::Mutex;

use bimstream::core::logging;
use bimstream::streaming::source::path_component;
use bimstream_tiles::{TileProvider, TileServer, DEFAULT_PORT};

/// Reads tiles straight from disk on every request
struct DirectoryProvider {
    root: PathBuf,
}

impl DirectoryProvider {
    /// Model ids and file names are single path components
    fn component(name: &str) -> io::Result<&str> {
        path_component(name)
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, format!("invalid name {:?}", name)))
    }
}

impl TileProvider for DirectoryProvider {
    fn tile(&mut self, model: &str, file: &str) -> io::Result<Option<Vec<u8>>> {
        let path = self.root.join(Self::component(model)?).join(Self::component(file)?);
        match std::fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn list(&mut self, model: &str) -> io::Result<Vec<String>> {
        let dir = self.root.join(Self::component(model)?);
        let mut files = Vec::new();
        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                files.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        files.sort();
        Ok(files)
    }
}

#[tokio::main]
async fn main() {
    logging::init_with_timestamps();

    let args: Vec<String> = std::env::args().collect();
    let root = parse_str_arg(&args, "--root").map(PathBuf::from).unwrap_or_else(|| PathBuf::from("tiles"));
    let bind = parse_str_arg(&args, "--bind").unwrap_or_else(|| format!("127.0.0.1:{}", DEFAULT_PORT));

    if !root.is_dir() {
        log::error!("Tile directory {} does not exist", root.display());
        std::process::exit(1);
    }
    log::info!("Serving tiles from {}", root.display());

    let provider: Arc<Mutex<dyn TileProvider>> = Arc::new(Mutex::new(DirectoryProvider { root }));
    let _server = TileServer::start_on(provider, bind);

    if let Err(e) = tokio::signal::ctrl_c().await {
        log::error!("Failed to wait for Ctrl-C: {}", e);
    }
    log::info!("Tile server shutting down");
}

fn parse_str_arg(args: &[String], flag: &str) -> Option<String> {
    args.iter().position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .cloned()
}
