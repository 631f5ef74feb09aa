//! HTTP service for packbattle.
//!
//! [`Server`] owns the engine and the service configuration; [`Api`] exposes
//! it over axum. Engine calls are synchronous and run on the blocking pool.

use anyhow::{Context, Result};
use packbattle_execution::{
    Backend, Catalog, Clock, Engine, MemoryCatalog, Memory, Sqlite, SystemClock,
};
use std::sync::Arc;

mod api;
pub use api::Api;

pub mod catalog_file;
mod config;
pub use config::{
    ServerConfig, DEFAULT_BOX_CACHE_TTL_MS, DEFAULT_HTTP_BODY_LIMIT_BYTES,
    DEFAULT_HTTP_RATE_LIMIT_BURST, DEFAULT_HTTP_RATE_LIMIT_PER_SECOND,
};
mod metrics;
pub use metrics::{HttpMetricsSnapshot, LatencySnapshot};
use metrics::HttpMetrics;

pub struct Server {
    engine: Engine<Backend>,
    config: ServerConfig,
    http_metrics: HttpMetrics,
}

impl Server {
    pub fn new(engine: Engine<Backend>, config: ServerConfig) -> Self {
        Self {
            engine,
            config,
            http_metrics: HttpMetrics::default(),
        }
    }

    /// Opens the configured store and catalog.
    pub fn from_config(config: ServerConfig) -> Result<Self> {
        let backend = match &config.database {
            Some(path) => {
                let db = Sqlite::open(path)
                    .with_context(|| format!("failed to open database {}", path.display()))?;
                tracing::info!(path = %path.display(), "using sqlite state");
                Backend::Sqlite(db)
            }
            None => {
                tracing::warn!("no database configured; state is kept in memory");
                Backend::Memory(Memory::default())
            }
        };
        let catalog: Arc<dyn Catalog> = match &config.catalog {
            Some(path) => Arc::new(catalog_file::load(path)?),
            None => Arc::new(MemoryCatalog::new()),
        };
        Ok(Self::with_parts(backend, catalog, Arc::new(SystemClock), config))
    }

    pub fn with_parts(
        backend: Backend,
        catalog: Arc<dyn Catalog>,
        clock: Arc<dyn Clock>,
        config: ServerConfig,
    ) -> Self {
        let engine = Engine::new(backend, catalog, clock, config.engine_config());
        Self::new(engine, config)
    }

    pub fn engine(&self) -> &Engine<Backend> {
        &self.engine
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn http_metrics_snapshot(&self) -> HttpMetricsSnapshot {
        self.http_metrics.snapshot()
    }

    pub(crate) fn http_metrics(&self) -> &HttpMetrics {
        &self.http_metrics
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use packbattle_types::Actor;
    use std::io::Write;

    #[test]
    fn test_from_config_persists_state() {
        let dir = tempfile::tempdir().unwrap();
        let mut catalog = tempfile::NamedTempFile::new_in(dir.path()).unwrap();
        catalog
            .write_all(
                br#"
boxes:
  - id: 4
    name: Single
    price: 3
    cards:
      - {provider: manual, id: 1, name: Only, pullRate: 100, coinValue: 9, rarity: rare}
"#,
            )
            .unwrap();
        let config = ServerConfig {
            database: Some(dir.path().join("state.db")),
            catalog: Some(catalog.path().to_path_buf()),
            deterministic_seed: Some(1),
            ..ServerConfig::default()
        };

        {
            let server = Server::from_config(config.clone()).unwrap();
            server
                .engine()
                .grant(&Actor::admin("ops"), "alice", 10, "seed")
                .unwrap();
            let opened = server
                .engine()
                .open_packs(&Actor::user("alice"), 4, 2, "k1")
                .unwrap();
            assert_eq!(opened.remaining_coins, 4);
        }

        let server = Server::from_config(config).unwrap();
        assert_eq!(server.engine().balance("alice").unwrap().available, 4);
        assert_eq!(server.engine().inventory("alice").unwrap().len(), 2);
    }

    #[test]
    fn test_missing_catalog_file_fails() {
        let config = ServerConfig {
            catalog: Some("/definitely/not/here.yaml".into()),
            ..ServerConfig::default()
        };
        let err = Server::from_config(config).err().unwrap();
        assert!(err.to_string().contains("failed to read catalog"));
    }
}
