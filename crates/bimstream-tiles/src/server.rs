//! TCP tile server

use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::sync::Mutex;

use crate::protocol::{TileCommand, TileResponse};

/// Trait that the tile store implements to answer tile commands
pub trait TileProvider: Send + Sync + 'static {
    /// Raw bytes of a geometry file, `None` when the model has no such file
    fn tile(&mut self, model: &str, file: &str) -> std::io::Result<Option<Vec<u8>>>;

    /// Names of all geometry files of a model
    fn list(&mut self, model: &str) -> std::io::Result<Vec<String>>;
}

/// Tile server handle - keep this alive to keep the server running
pub struct TileServer {
    handle: tokio::task::JoinHandle<()>,
}

impl TileServer {
    /// Start the tile server on the given port.
    /// Returns immediately -- server runs in background.
    pub fn start(provider: Arc<Mutex<dyn TileProvider>>, port: u16) -> Self {
        Self::start_on(provider, format!("127.0.0.1:{}", port))
    }

    /// Start the tile server on an explicit address such as `0.0.0.0:9743`.
    pub fn start_on(provider: Arc<Mutex<dyn TileProvider>>, addr: String) -> Self {
        let handle = tokio::spawn(async move {
            let listener = match TcpListener::bind(&addr).await {
                Ok(l) => {
                    log::info!("Tile server listening on {}", addr);
                    l
                }
                Err(e) => {
                    log::error!("Failed to bind tile server on {}: {}", addr, e);
                    return;
                }
            };
            serve(listener, provider).await;
        });

        Self { handle }
    }

    /// Serve on an already bound listener (useful with port 0).
    pub fn from_listener(listener: TcpListener, provider: Arc<Mutex<dyn TileProvider>>) -> Self {
        let handle = tokio::spawn(serve(listener, provider));
        Self { handle }
    }
}

impl Drop for TileServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn serve(listener: TcpListener, provider: Arc<Mutex<dyn TileProvider>>) {
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                log::debug!("Tile client connected from {}", peer);
                let provider = provider.clone();
                tokio::spawn(async move {
                    handle_connection(stream, provider).await;
                    log::debug!("Tile client disconnected: {}", peer);
                });
            }
            Err(e) => {
                log::error!("Tile server accept error: {}", e);
            }
        }
    }
}

async fn handle_connection(stream: tokio::net::TcpStream, provider: Arc<Mutex<dyn TileProvider>>) {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut line = String::new();

    loop {
        line.clear();
        match reader.read_line(&mut line).await {
            Ok(0) => break, // Connection closed
            Ok(_) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }

                let response = match serde_json::from_str::<TileCommand>(trimmed) {
                    Ok(cmd) => {
                        log::debug!("Tile command: {:?}", cmd);
                        let mut p = provider.lock().await;
                        answer(&mut *p, cmd)
                    }
                    Err(e) => TileResponse::error(format!("Invalid command JSON: {}", e)),
                };

                let mut resp_json = serde_json::to_string(&response).unwrap_or_else(|e| {
                    format!(
                        "{{\"status\":\"error\",\"message\":\"Serialize error: {}\"}}",
                        e
                    )
                });
                resp_json.push('\n');

                if let Err(e) = writer.write_all(resp_json.as_bytes()).await {
                    log::error!("Tile server write error: {}", e);
                    break;
                }
                if let Err(e) = writer.flush().await {
                    log::error!("Tile server flush error: {}", e);
                    break;
                }
            }
            Err(e) => {
                log::error!("Tile server read error: {}", e);
                break;
            }
        }
    }
}

fn answer(provider: &mut dyn TileProvider, cmd: TileCommand) -> TileResponse {
    match cmd {
        TileCommand::Ping => TileResponse::pong(),
        TileCommand::FetchTile { model, file } => match provider.tile(&model, &file) {
            Ok(Some(bytes)) => TileResponse::tile(file, &bytes),
            Ok(None) => TileResponse::not_found(file),
            Err(e) => TileResponse::error(format!("Failed to read {}/{}: {}", model, file, e)),
        },
        TileCommand::ListTiles { model } => match provider.list(&model) {
            Ok(files) => TileResponse::ok(crate::protocol::ResponseData::Tiles { model, files }),
            Err(e) => TileResponse::error(format!("Failed to list {}: {}", model, e)),
        },
    }
}
