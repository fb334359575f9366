//! TCP tile client

use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

use crate::protocol::{ResponseData, TileCommand, TileResponse, decode_tile_bytes};

/// Errors raised while talking to a tile server
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed response: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid tile payload: {0}")]
    Payload(#[from] base64::DecodeError),

    #[error("Server error: {0}")]
    Server(String),

    #[error("Connection closed before a response arrived")]
    Closed,

    #[error("No response within {0:?}")]
    Timeout(Duration),

    #[error("Unexpected response: {0}")]
    Unexpected(String),
}

/// Default limit for one request, connect included
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Client for a [`crate::TileServer`]
///
/// Every request opens its own connection, so one client can be shared by
/// concurrent fetches without locking.
#[derive(Clone, Debug)]
pub struct TileClient {
    addr: String,
    timeout: Duration,
}

impl TileClient {
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Server address
    pub fn addr(&self) -> &str {
        &self.addr
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Fetch a geometry file. `Ok(None)` when the server does not have it.
    pub async fn fetch(&self, model: &str, file: &str) -> Result<Option<Vec<u8>>, ClientError> {
        let cmd = TileCommand::FetchTile {
            model: model.to_string(),
            file: file.to_string(),
        };
        match self.request(&cmd).await? {
            ResponseData::Tile { bytes_base64, .. } => Ok(Some(decode_tile_bytes(&bytes_base64)?)),
            ResponseData::NotFound { .. } => Ok(None),
            other => Err(ClientError::Unexpected(format!("{:?}", other))),
        }
    }

    /// List the geometry files of a model.
    pub async fn list(&self, model: &str) -> Result<Vec<String>, ClientError> {
        let cmd = TileCommand::ListTiles {
            model: model.to_string(),
        };
        match self.request(&cmd).await? {
            ResponseData::Tiles { files, .. } => Ok(files),
            other => Err(ClientError::Unexpected(format!("{:?}", other))),
        }
    }

    /// Health check
    pub async fn ping(&self) -> Result<(), ClientError> {
        match self.request(&TileCommand::Ping).await? {
            ResponseData::Pong { .. } => Ok(()),
            other => Err(ClientError::Unexpected(format!("{:?}", other))),
        }
    }

    async fn request(&self, cmd: &TileCommand) -> Result<ResponseData, ClientError> {
        tokio::time::timeout(self.timeout, self.exchange(cmd))
            .await
            .map_err(|_| ClientError::Timeout(self.timeout))?
    }

    async fn exchange(&self, cmd: &TileCommand) -> Result<ResponseData, ClientError> {
        let stream = TcpStream::connect(&self.addr).await?;
        let (reader, mut writer) = stream.into_split();

        let mut line = serde_json::to_string(cmd)?;
        line.push('\n');
        writer.write_all(line.as_bytes()).await?;
        writer.flush().await?;

        let mut reader = BufReader::new(reader);
        let mut response = String::new();
        if reader.read_line(&mut response).await? == 0 {
            return Err(ClientError::Closed);
        }

        match serde_json::from_str::<TileResponse>(response.trim())? {
            TileResponse::Ok { data } => Ok(data),
            TileResponse::Error { message } => Err(ClientError::Server(message)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::{TileProvider, TileServer};
    use std::collections::HashMap;
    use std::sync::Arc;
    use tokio::net::TcpListener;
    use tokio::sync::Mutex;

    struct MapProvider {
        tiles: HashMap<(String, String), Vec<u8>>,
    }

    impl TileProvider for MapProvider {
        fn tile(&mut self, model: &str, file: &str) -> std::io::Result<Option<Vec<u8>>> {
            Ok(self.tiles.get(&(model.to_string(), file.to_string())).cloned())
        }

        fn list(&mut self, model: &str) -> std::io::Result<Vec<String>> {
            let mut files: Vec<String> = self
                .tiles
                .keys()
                .filter(|(m, _)| m == model)
                .map(|(_, f)| f.clone())
                .collect();
            files.sort();
            Ok(files)
        }
    }

    async fn start_server() -> (TileServer, TileClient) {
        let mut tiles = HashMap::new();
        tiles.insert(("m".to_string(), "a.bst".to_string()), vec![1, 2, 3]);
        tiles.insert(("m".to_string(), "b.bst".to_string()), vec![9; 64]);
        let provider: Arc<Mutex<dyn TileProvider>> = Arc::new(Mutex::new(MapProvider { tiles }));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = TileServer::from_listener(listener, provider);
        (server, TileClient::new(addr.to_string()))
    }

    #[tokio::test]
    async fn test_fetch_existing_and_missing() {
        let (_server, client) = start_server().await;

        client.ping().await.unwrap();
        assert_eq!(client.fetch("m", "a.bst").await.unwrap(), Some(vec![1, 2, 3]));
        assert_eq!(client.fetch("m", "zzz.bst").await.unwrap(), None);
        assert_eq!(client.fetch("other", "a.bst").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_list_tiles() {
        let (_server, client) = start_server().await;
        let files = client.list("m").await.unwrap();
        assert_eq!(files, vec!["a.bst".to_string(), "b.bst".to_string()]);
    }

    #[tokio::test]
    async fn test_connection_refused_is_io_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client = TileClient::new(addr.to_string());
        let err = client.fetch("m", "a.bst").await.unwrap_err();
        assert!(matches!(err, ClientError::Io(_)));
    }

    #[tokio::test]
    async fn test_silent_server_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        // Accept and hold the connection without answering
        let silent = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(30)).await;
            drop(stream);
        });

        let client = TileClient::new(addr.to_string()).with_timeout(Duration::from_millis(100));
        let err = client.fetch("m", "a.bst").await.unwrap_err();
        assert!(matches!(err, ClientError::Timeout(_)));
        silent.abort();
    }
}
