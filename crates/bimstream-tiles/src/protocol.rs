//! Tile protocol - JSON command/response definitions
//!
//! One JSON document per line in each direction. Tile payloads travel as
//! base64 text so the framing stays line-oriented.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};

/// Commands sent from a tile client to the tile server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "cmd", content = "params")]
pub enum TileCommand {
    /// Fetch the raw bytes of one geometry file of a model
    FetchTile { model: String, file: String },
    /// List the geometry files available for a model
    ListTiles { model: String },
    /// Ping (health check)
    Ping,
}

/// Responses from the tile server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status")]
pub enum TileResponse {
    #[serde(rename = "ok")]
    Ok { data: ResponseData },
    #[serde(rename = "error")]
    Error { message: String },
}

/// Response data variants
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum ResponseData {
    Pong { message: String },
    Tile { file: String, bytes_base64: String },
    NotFound { file: String },
    Tiles { model: String, files: Vec<String> },
}

impl TileResponse {
    pub fn ok(data: ResponseData) -> Self {
        Self::Ok { data }
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Self::Error {
            message: msg.into(),
        }
    }

    pub fn pong() -> Self {
        Self::ok(ResponseData::Pong {
            message: "pong".into(),
        })
    }

    /// Wrap raw tile bytes
    pub fn tile(file: impl Into<String>, bytes: &[u8]) -> Self {
        Self::ok(ResponseData::Tile {
            file: file.into(),
            bytes_base64: STANDARD.encode(bytes),
        })
    }

    pub fn not_found(file: impl Into<String>) -> Self {
        Self::ok(ResponseData::NotFound { file: file.into() })
    }
}

/// Decode the payload of a `Tile` response
pub fn decode_tile_bytes(bytes_base64: &str) -> Result<Vec<u8>, base64::DecodeError> {
    STANDARD.decode(bytes_base64)
}
