use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LoadConfigError {
    #[error("config build error: {0}")]
    Build(#[from] config::ConfigError),
}

/// Tunables for the traversal/scheduler/cache layers. Loaded from defaults,
/// layered with an optional `tilecore.toml` / `tilecore.local.toml`, then
/// `TILECORE__*` environment variables, the same layering the teacher's
/// `load_config` applies to its own `Config`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreConfig {
    /// Bound on concurrently-executing `RequestQueue` tasks.
    pub max_concurrent_requests: usize,
    /// Default TTL, in milliseconds, for cache entries that don't specify one.
    pub default_cache_ttl_ms: u64,
    /// Screen-space-error threshold (pixels) that triggers subdivision.
    pub sse_threshold: f64,
    /// Maximum quadtree subdivision level.
    pub max_subdivision_level: u32,
    /// Frames a node may go unseen before it is marked for cleanup.
    pub cleanup_after_frames: u64,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            max_concurrent_requests: 8,
            default_cache_ttl_ms: 60_000,
            sse_threshold: 16.0,
            max_subdivision_level: 24,
            cleanup_after_frames: 240,
        }
    }
}

pub fn load_config() -> Result<CoreConfig, LoadConfigError> {
    let _ = dotenvy::dotenv();

    let defaults = CoreConfig::default();

    let builder = config::Config::builder()
        .set_default("max_concurrent_requests", defaults.max_concurrent_requests as i64)?
        .set_default("default_cache_ttl_ms", defaults.default_cache_ttl_ms as i64)?
        .set_default("sse_threshold", defaults.sse_threshold)?
        .set_default("max_subdivision_level", defaults.max_subdivision_level as i64)?
        .set_default("cleanup_after_frames", defaults.cleanup_after_frames as i64)?
        .add_source(config::File::with_name("tilecore").required(false))
        .add_source(config::File::with_name("tilecore.local").required(false))
        .add_source(
            config::Environment::with_prefix("TILECORE")
                .separator("__")
                .try_parsing(true),
        );

    let cfg = builder.build()?;
    tracing::debug!(?cfg, "core config loaded");

    Ok(cfg.try_deserialize()?)
}
