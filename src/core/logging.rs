//! Logging initialization

/// Initialize the logging system
///
/// Uses env_logger with default filter level of `info`.
/// Override with RUST_LOG environment variable, e.g.
/// `RUST_LOG=bimstream::streaming=debug` to trace every fetched tile.
///
/// # Example
/// ```
/// bimstream::core::logging::init();
/// log::info!("Streamer started");
/// ```
pub fn init() {
    builder().init();
}

/// Like [`init`], with millisecond timestamps. Used by the binaries, where
/// round latency is the interesting part of the log.
pub fn init_with_timestamps() {
    builder().format_timestamp_millis().init();
}

fn builder() -> env_logger::Builder {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
}
