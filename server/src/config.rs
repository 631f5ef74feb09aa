use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;

use packbattle_execution::EngineConfig;

pub const DEFAULT_HTTP_RATE_LIMIT_PER_SECOND: u64 = 100;
pub const DEFAULT_HTTP_RATE_LIMIT_BURST: u32 = 200;
pub const DEFAULT_HTTP_BODY_LIMIT_BYTES: usize = 256 * 1024;
pub const DEFAULT_BOX_CACHE_TTL_MS: u64 = 30_000;

#[derive(Clone, Debug, Serialize)]
pub struct ServerConfig {
    /// SQLite state file. State lives in memory when unset.
    pub database: Option<PathBuf>,
    /// YAML catalog loaded at startup.
    pub catalog: Option<PathBuf>,
    pub deterministic_seed: Option<u64>,
    pub house_edge_bps: u16,
    /// Zero disables the box cache.
    pub box_cache_ttl_ms: u64,
    pub http_rate_limit_per_second: Option<u64>,
    pub http_rate_limit_burst: Option<u32>,
    pub http_body_limit_bytes: Option<usize>,
    pub allowed_origins: Vec<String>,
    pub allow_no_origin: bool,
    #[serde(skip)]
    pub admin_token: Option<String>,
    #[serde(skip)]
    pub metrics_token: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            database: None,
            catalog: None,
            deterministic_seed: None,
            house_edge_bps: 0,
            box_cache_ttl_ms: DEFAULT_BOX_CACHE_TTL_MS,
            http_rate_limit_per_second: Some(DEFAULT_HTTP_RATE_LIMIT_PER_SECOND),
            http_rate_limit_burst: Some(DEFAULT_HTTP_RATE_LIMIT_BURST),
            http_body_limit_bytes: Some(DEFAULT_HTTP_BODY_LIMIT_BYTES),
            allowed_origins: Vec::new(),
            allow_no_origin: false,
            admin_token: None,
            metrics_token: None,
        }
    }
}

impl ServerConfig {
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            seed: self.deterministic_seed,
            house_edge_bps: self.house_edge_bps,
            box_cache_ttl: Duration::from_millis(self.box_cache_ttl_ms),
        }
    }
}
