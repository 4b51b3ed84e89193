//! Strategy selector / 查询策略选择
//!
//! Picks how the subtitle-coverage constraint is expressed. The coverage
//! index only pays off once it is substantially populated; an under-filled
//! index would silently under-match, so below the configured row threshold
//! the executor joins `subtitles` directly and a backfill is kicked off
//! detached so later requests can take the indexed path.
//! 索引未填充到阈值前走字幕直连，同时后台启动回填

use sqlx::SqlitePool;
use std::sync::Arc;

use crate::search::coverage::{self, BackfillState};
use crate::search::executor::SearchFilters;

/// Chosen execution path / 选定的执行路径
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryStrategy {
    /// Availability + main-language existence only / 快速浏览
    QuickBrowse,
    /// Filters present but none touch subtitle coverage / 无覆盖谓词
    NoCoverage,
    /// Coverage via the card_languages index with a count-match check
    /// 覆盖索引加速路径
    CoverageIndex,
    /// Coverage via a direct subtitles lookup, correct at any index fill
    /// 字幕直连回退路径
    DirectJoin,
}

/// Decide the strategy for one request. The fill observation is a single
/// cheap count; on observation failure the join path is chosen because it
/// never depends on index state. / 为单个请求选择策略
pub async fn choose_strategy(
    pool: &SqlitePool,
    backfill: &Arc<BackfillState>,
    filters: &SearchFilters,
) -> QueryStrategy {
    if filters.subtitle_langs.is_empty() {
        return if filters.is_quick_browse() {
            QueryStrategy::QuickBrowse
        } else {
            QueryStrategy::NoCoverage
        };
    }

    let cfg = crate::config::config();
    match coverage::indexed_row_count(pool).await {
        Ok(rows) if rows as u64 >= cfg.search.coverage_min_rows => QueryStrategy::CoverageIndex,
        Ok(rows) => {
            tracing::debug!(
                "coverage index holds {} row(s), below threshold {}; using subtitle join",
                rows,
                cfg.search.coverage_min_rows
            );
            coverage::spawn_backfill_if_idle(pool, backfill, cfg.search.backfill_chunk_size);
            QueryStrategy::DirectJoin
        }
        Err(e) => {
            tracing::warn!("coverage fill observation failed: {}", e);
            QueryStrategy::DirectJoin
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::run_migrations;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn test_pool() -> SqlitePool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        run_migrations(&pool).await.unwrap();
        pool
    }

    #[tokio::test]
    async fn no_coverage_filter_skips_the_observation() {
        let pool = test_pool().await;
        let backfill = Arc::new(BackfillState::new());

        let browse = SearchFilters::default();
        assert_eq!(
            choose_strategy(&pool, &backfill, &browse).await,
            QueryStrategy::QuickBrowse
        );

        let filtered = SearchFilters {
            min_difficulty: Some(10),
            ..Default::default()
        };
        assert_eq!(
            choose_strategy(&pool, &backfill, &filtered).await,
            QueryStrategy::NoCoverage
        );
    }

    #[tokio::test]
    async fn underfilled_index_falls_back_and_spawns_backfill() {
        let pool = test_pool().await;
        let backfill = Arc::new(BackfillState::new());
        let filters = SearchFilters {
            subtitle_langs: vec!["en".into()],
            ..Default::default()
        };

        // Empty index is far below the default threshold of 100
        // 空索引远低于默认阈值
        let strategy = choose_strategy(&pool, &backfill, &filters).await;
        assert_eq!(strategy, QueryStrategy::DirectJoin);
        // The detached backfill claimed the running flag / 后台回填已占用运行标志
        assert!(!backfill.try_start() || backfill.get_progress().last_done_time.is_some());
    }

    #[tokio::test]
    async fn filled_index_takes_the_indexed_path() {
        let pool = test_pool().await;
        let backfill = Arc::new(BackfillState::new());
        for i in 0..120 {
            sqlx::query("INSERT INTO card_languages (card_id, language) VALUES (?, 'en')")
                .bind(format!("c{}", i))
                .execute(&pool)
                .await
                .unwrap();
        }
        let filters = SearchFilters {
            subtitle_langs: vec!["en".into()],
            ..Default::default()
        };
        assert_eq!(
            choose_strategy(&pool, &backfill, &filters).await,
            QueryStrategy::CoverageIndex
        );
    }
}
