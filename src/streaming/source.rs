//! Where tile bytes come from

use std::collections::HashMap;
use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use bimstream_tiles::TileClient;

use crate::core::config::SourceSettings;
use crate::core::error::Error;
use crate::core::types::Result;
use crate::streaming::tile::TileId;

/// Future returned by [`TileSource::fetch`]
pub type TileFuture<'a> = Pin<Box<dyn Future<Output = Result<Option<Vec<u8>>>> + Send + 'a>>;

/// Provider of raw tile bytes.
///
/// `Ok(None)` means the file is not available right now; the scheduler asks
/// again on a later round.
pub trait TileSource: Send + Sync {
    fn fetch<'a>(&'a self, id: &'a TileId) -> TileFuture<'a>;

    fn name(&self) -> &'static str;
}

/// Build the source described by the config
pub fn from_settings(settings: &SourceSettings) -> Arc<dyn TileSource> {
    match settings {
        SourceSettings::Memory => Arc::new(MemoryTileSource::new()),
        SourceSettings::Directory { root } => Arc::new(DirectoryTileSource::new(root.clone())),
        SourceSettings::Remote { addr, timeout_ms } => Arc::new(
            RemoteTileSource::new(addr.clone()).with_timeout(Duration::from_millis(*timeout_ms)),
        ),
    }
}

/// Tiles registered by the host. Cloning shares the store.
#[derive(Clone, Default)]
pub struct MemoryTileSource {
    tiles: Arc<RwLock<HashMap<TileId, Arc<Vec<u8>>>>>,
}

impl MemoryTileSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, id: TileId, bytes: Vec<u8>) {
        if let Ok(mut tiles) = self.tiles.write() {
            tiles.insert(id, Arc::new(bytes));
        }
    }

    pub fn remove(&self, id: &TileId) -> bool {
        self.tiles.write().map(|mut t| t.remove(id).is_some()).unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.tiles.read().map(|t| t.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl TileSource for MemoryTileSource {
    fn fetch<'a>(&'a self, id: &'a TileId) -> TileFuture<'a> {
        let bytes = self
            .tiles
            .read()
            .ok()
            .and_then(|t| t.get(id).map(|b| b.as_ref().clone()));
        Box::pin(async move { Ok(bytes) })
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

/// A model id or file name usable as one path component
pub fn path_component(name: &str) -> Option<&str> {
    if name.is_empty() || name.contains(['/', '\\']) || name == "." || name == ".." {
        return None;
    }
    Some(name)
}

/// Get the file path for a tile: `<root>/<model>/<file>`.
/// `None` when either part would leave its directory.
pub fn tile_path(root: &Path, id: &TileId) -> Option<PathBuf> {
    let model = path_component(id.model.as_str())?;
    let file = path_component(&id.file)?;
    Some(root.join(model).join(file))
}

/// Tiles stored as files under a root directory
#[derive(Clone, Debug)]
pub struct DirectoryTileSource {
    root: PathBuf,
}

impl DirectoryTileSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Write a tile, creating the model directory if needed
    pub async fn store(&self, id: &TileId, bytes: &[u8]) -> Result<()> {
        let path = tile_path(&self.root, id).ok_or_else(|| Error::Tile(format!("invalid tile path {}", id)))?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, bytes).await?;
        Ok(())
    }
}

impl TileSource for DirectoryTileSource {
    fn fetch<'a>(&'a self, id: &'a TileId) -> TileFuture<'a> {
        Box::pin(async move {
            let Some(path) = tile_path(&self.root, id) else {
                log::warn!("Rejected tile path {}", id);
                return Ok(None);
            };
            match tokio::fs::read(&path).await {
                Ok(bytes) => Ok(Some(bytes)),
                Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
                Err(e) => Err(e.into()),
            }
        })
    }

    fn name(&self) -> &'static str {
        "directory"
    }
}

/// Tiles fetched from a `tile_server`
#[derive(Clone, Debug)]
pub struct RemoteTileSource {
    client: TileClient,
}

impl RemoteTileSource {
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            client: TileClient::new(addr),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.client = self.client.with_timeout(timeout);
        self
    }

    pub fn client(&self) -> &TileClient {
        &self.client
    }
}

impl TileSource for RemoteTileSource {
    fn fetch<'a>(&'a self, id: &'a TileId) -> TileFuture<'a> {
        Box::pin(async move {
            match self.client.fetch(id.model.as_str(), &id.file).await {
                Ok(bytes) => Ok(bytes),
                Err(e) => {
                    log::error!("Fetching {} from {} failed: {}", id, self.client.addr(), e);
                    Ok(None)
                }
            }
        })
    }

    fn name(&self) -> &'static str {
        "remote"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ModelId;

    fn id(file: &str) -> TileId {
        TileId::new(ModelId::from("tower"), file)
    }

    #[tokio::test]
    async fn test_memory_source() {
        let source = MemoryTileSource::new();
        source.insert(id("a.bst"), vec![1, 2, 3]);

        assert_eq!(source.fetch(&id("a.bst")).await.unwrap(), Some(vec![1, 2, 3]));
        assert_eq!(source.fetch(&id("b.bst")).await.unwrap(), None);

        let shared = source.clone();
        assert!(shared.remove(&id("a.bst")));
        assert!(source.is_empty());
    }

    #[tokio::test]
    async fn test_directory_source() {
        let dir = tempfile::tempdir().unwrap();
        let source = DirectoryTileSource::new(dir.path());
        source.store(&id("tile_0.bst"), &[7; 32]).await.unwrap();

        assert!(dir.path().join("tower").join("tile_0.bst").exists());
        assert_eq!(source.fetch(&id("tile_0.bst")).await.unwrap(), Some(vec![7; 32]));
        assert_eq!(source.fetch(&id("tile_1.bst")).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_directory_source_stays_in_root() {
        let outer = tempfile::tempdir().unwrap();
        std::fs::write(outer.path().join("secret.bst"), [1u8; 4]).unwrap();
        let root = outer.path().join("tiles");
        std::fs::create_dir_all(root.join("tower")).unwrap();
        let source = DirectoryTileSource::new(&root);

        assert_eq!(source.fetch(&id("../../secret.bst")).await.unwrap(), None);
        assert_eq!(source.fetch(&id("..")).await.unwrap(), None);
        let escaping = TileId::new(ModelId::from(".."), "secret.bst");
        assert_eq!(source.fetch(&escaping).await.unwrap(), None);
        assert!(source.store(&id("../x.bst"), &[0]).await.is_err());
    }

    #[test]
    fn test_path_component() {
        assert_eq!(path_component("tile_0.bst"), Some("tile_0.bst"));
        assert_eq!(path_component("a/b"), None);
        assert_eq!(path_component("..\\x"), None);
        assert_eq!(path_component(""), None);
        assert_eq!(path_component("."), None);
    }

    #[tokio::test]
    async fn test_remote_source_unreachable_is_missing() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let source = RemoteTileSource::new(addr.to_string());
        assert_eq!(source.fetch(&id("a.bst")).await.unwrap(), None);
    }

    struct OneTile;

    impl bimstream_tiles::TileProvider for OneTile {
        fn tile(&mut self, model: &str, file: &str) -> io::Result<Option<Vec<u8>>> {
            Ok((model == "tower" && file == "a.bst").then(|| vec![4, 5, 6]))
        }

        fn list(&mut self, _model: &str) -> io::Result<Vec<String>> {
            Ok(vec!["a.bst".into()])
        }
    }

    #[tokio::test]
    async fn test_remote_source_fetches_from_server() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let provider: Arc<tokio::sync::Mutex<dyn bimstream_tiles::TileProvider>> =
            Arc::new(tokio::sync::Mutex::new(OneTile));
        let _server = bimstream_tiles::TileServer::from_listener(listener, provider);

        let source = RemoteTileSource::new(addr.to_string());
        assert_eq!(source.fetch(&id("a.bst")).await.unwrap(), Some(vec![4, 5, 6]));
        assert_eq!(source.fetch(&id("b.bst")).await.unwrap(), None);
    }

    #[test]
    fn test_from_settings() {
        let source = from_settings(&SourceSettings::Directory { root: "/tmp/tiles".into() });
        assert_eq!(source.name(), "directory");
        assert_eq!(from_settings(&SourceSettings::Memory).name(), "memory");
    }
}
