//! Remote tile transport for bimstream - TCP tile server and client
//!
//! Serve a tile store from your app:
//! ```ignore
//! let provider = Arc::new(Mutex::new(MyProvider::new()));
//! let _server = TileServer::start(provider, 9743);
//! ```
//!
//! Fetch from another process:
//! ```ignore
//! let client = TileClient::new("127.0.0.1:9743");
//! let bytes = client.fetch("model-a", "tile_0.bst").await?;
//! ```

pub mod client;
pub mod protocol;
pub mod server;

pub use client::{ClientError, DEFAULT_TIMEOUT, TileClient};
pub use protocol::*;
pub use server::{TileProvider, TileServer};

/// Default tile server port
pub const DEFAULT_PORT: u16 = 9743;
