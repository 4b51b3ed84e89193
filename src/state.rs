//! Shared application state / 共享应用状态

use sqlx::SqlitePool;
use std::sync::Arc;

use kotocard_backend::cache::{CacheStore, MemoryCache};
use kotocard_backend::config;
use kotocard_backend::search::coverage::BackfillState;

/// Everything a request handler can reach. Wrapped in an `Arc` by `main`;
/// the engine stages themselves stay stateless. / 处理器可见的全部共享状态
pub struct AppState {
    pub db: SqlitePool,
    pub cache: Arc<dyn CacheStore>,
    pub backfill: Arc<BackfillState>,
}

impl AppState {
    pub fn new(db: SqlitePool) -> Self {
        let cfg = config::config();
        Self {
            db,
            cache: Arc::new(MemoryCache::new(
                cfg.cache.results_ttl_secs,
                cfg.cache.suggest_ttl_secs,
                cfg.cache.max_entries,
            )),
            backfill: Arc::new(BackfillState::new()),
        }
    }
}
