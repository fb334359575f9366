//! Streamer configuration
//!
//! Every section has working defaults, so a config file only needs the
//! fields it changes:
//! ```json
//! { "culler": { "threshold": 20 }, "cache": { "max_ram_time_ms": 10000 } }
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::camera::ProxyProjection;
use crate::core::error::Error;
use crate::core::types::Result;

/// Top-level configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamerConfig {
    pub culler: CullerSettings,
    pub renderer: RendererSettings,
    pub cache: CacheSettings,
    pub source: SourceSettings,
}

impl StreamerConfig {
    /// Load from a JSON file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        serde_json::from_str(&text)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))
    }

    /// Write as pretty JSON
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let text = serde_json::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))?;
        std::fs::write(path, text)?;
        Ok(())
    }
}

/// Visibility round timing and thresholds
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct CullerSettings {
    /// Disabled cullers never start a round
    pub enabled: bool,
    /// Interval between update checks
    pub update_interval_ms: u64,
    /// Codes covering this many pixels or fewer count as not visible
    pub threshold: u32,
    /// How long a shown geometry must stay unseen before it is hidden
    pub max_hidden_time_ms: u64,
    /// How long a geometry must stay unseen before it is reported for removal
    pub max_lost_time_ms: u64,
}

impl Default for CullerSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            update_interval_ms: 1000,
            threshold: 0,
            max_hidden_time_ms: 0,
            max_lost_time_ms: 30_000,
        }
    }
}

impl CullerSettings {
    pub fn update_interval(&self) -> Duration {
        Duration::from_millis(self.update_interval_ms)
    }

    pub fn max_hidden_time(&self) -> Duration {
        Duration::from_millis(self.max_hidden_time_ms)
    }

    pub fn max_lost_time(&self) -> Duration {
        Duration::from_millis(self.max_lost_time_ms)
    }
}

/// Which rasterizer draws the proxy scene
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RendererBackend {
    #[default]
    Gpu,
    Software,
}

/// Off-screen proxy target
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RendererSettings {
    pub backend: RendererBackend,
    /// Use the software rasterizer when no GPU adapter is available
    pub software_fallback: bool,
    pub width: u32,
    pub height: u32,
    pub pixel_density: f32,
    pub projection: ProxyProjection,
}

impl Default for RendererSettings {
    fn default() -> Self {
        Self {
            backend: RendererBackend::Gpu,
            software_fallback: true,
            width: 512,
            height: 512,
            pixel_density: 1.0,
            projection: ProxyProjection::default(),
        }
    }
}

impl RendererSettings {
    pub fn aspect(&self) -> f32 {
        self.width as f32 / self.height.max(1) as f32
    }
}

/// Decoded tile cache
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    /// Tiles not read for longer than this are evicted
    pub max_ram_time_ms: u64,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            max_ram_time_ms: 5000,
        }
    }
}

impl CacheSettings {
    pub fn max_ram_time(&self) -> Duration {
        Duration::from_millis(self.max_ram_time_ms)
    }
}

/// Where geometry files come from
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SourceSettings {
    /// Tiles are registered in memory by the host
    #[default]
    Memory,
    /// `<root>/<model>/<file>`
    Directory { root: PathBuf },
    /// A `tile_server` at `addr`. Requests slower than `timeout_ms` count
    /// as unavailable.
    Remote {
        addr: String,
        #[serde(default = "default_remote_timeout_ms")]
        timeout_ms: u64,
    },
}

fn default_remote_timeout_ms() -> u64 {
    10_000
}

impl SourceSettings {
    pub fn remote(addr: impl Into<String>) -> Self {
        Self::Remote {
            addr: addr.into(),
            timeout_ms: default_remote_timeout_ms(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = StreamerConfig::default();
        assert_eq!(config.culler.update_interval(), Duration::from_secs(1));
        assert_eq!(config.culler.threshold, 0);
        assert_eq!(config.culler.max_lost_time(), Duration::from_secs(30));
        assert_eq!(config.renderer.width, 512);
        assert_eq!(config.cache.max_ram_time(), Duration::from_secs(5));
        assert!(matches!(config.source, SourceSettings::Memory));
    }

    #[test]
    fn test_partial_json() {
        let json = r#"{
            "culler": { "threshold": 50, "max_hidden_time_ms": 3000 },
            "renderer": { "backend": "software", "width": 128 },
            "source": { "kind": "remote", "addr": "10.0.0.2:9743" }
        }"#;
        let config: StreamerConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.culler.threshold, 50);
        assert_eq!(config.culler.max_hidden_time(), Duration::from_secs(3));
        assert_eq!(config.culler.update_interval_ms, 1000);
        assert_eq!(config.renderer.backend, RendererBackend::Software);
        assert_eq!(config.renderer.width, 128);
        assert_eq!(config.renderer.height, 512);
        match config.source {
            SourceSettings::Remote { addr, timeout_ms } => {
                assert_eq!(addr, "10.0.0.2:9743");
                assert_eq!(timeout_ms, 10_000);
            }
            other => panic!("unexpected source {:?}", other),
        }
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("streamer.json");

        let mut config = StreamerConfig::default();
        config.cache.max_ram_time_ms = 1234;
        config.source = SourceSettings::Directory {
            root: PathBuf::from("/tiles"),
        };
        config.save(&path).unwrap();

        let loaded = StreamerConfig::load(&path).unwrap();
        assert_eq!(loaded.cache.max_ram_time_ms, 1234);
        assert!(matches!(loaded.source, SourceSettings::Directory { .. }));
    }

    #[test]
    fn test_load_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(StreamerConfig::load(&path), Err(Error::Config(_))));
    }
}
