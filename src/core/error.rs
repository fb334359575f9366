//! Error types for bimstream

use thiserror::Error;

/// Main error type for the streaming subsystem
#[derive(Debug, Error)]
pub enum Error {
    #[error("GPU error: {0}")]
    Gpu(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Tile error: {0}")]
    Tile(String),

    /// A visibility round could not be completed; the next tick retries.
    #[error("Visibility error: {0}")]
    Visibility(String),

    #[error("Visibility renderer is not running")]
    RendererClosed,

    #[error("Stream scheduler is not running")]
    SchedulerClosed,

    #[error("All {0} color codes are assigned to live instances")]
    ColorSpaceExhausted(u32),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Remote tile source error: {0}")]
    Remote(#[from] bimstream_tiles::ClientError),
}
