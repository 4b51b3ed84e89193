//! Coverage index maintainer / 覆盖索引维护
//!
//! Keeps `card_languages` (which subtitle languages exist per card)
//! consistent with the `subtitles` table without ever blocking writers.
//! The index is allowed to lag; every entry it holds must exist in
//! `subtitles` with non-empty text. Per-card rows are always replaced as a
//! full set inside one transaction (delete-then-insert), so resync is
//! idempotent. Maintenance failures are logged and never surfaced to the
//! search path.
//! 索引允许滞后但不允许超前；每卡行集始终在单事务内整体替换

use parking_lot::RwLock;
use sqlx::SqlitePool;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// Ids per resync transaction, keeps bind counts well under SQLite's limit
/// 单事务ID数，保证绑定参数数量安全
const RESYNC_CHUNK: usize = 400;

const WATERMARK_KEY: &str = "backfill_watermark";

/// Backfill progress snapshot / 回填进度快照
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct BackfillProgress {
    pub is_running: bool,
    pub last_watermark: Option<String>,
    pub rows_inserted: u64,
    pub error: Option<String>,
    pub last_done_time: Option<i64>,
}

/// Backfill state shared between requests and the detached task
/// 请求与后台任务共享的回填状态
pub struct BackfillState {
    running: AtomicBool,
    rows_inserted: AtomicU64,
    progress: RwLock<BackfillProgress>,
}

impl BackfillState {
    pub fn new() -> Self {
        Self {
            running: AtomicBool::new(false),
            rows_inserted: AtomicU64::new(0),
            progress: RwLock::new(BackfillProgress::default()),
        }
    }

    /// Claim the run; only one backfill may be active / 仅允许一个回填在运行
    pub fn try_start(&self) -> bool {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return false;
        }
        self.rows_inserted.store(0, Ordering::SeqCst);
        let mut progress = self.progress.write();
        progress.is_running = true;
        progress.rows_inserted = 0;
        progress.error = None;
        true
    }

    pub fn record_window(&self, watermark: &str, inserted: u64) {
        let total = self.rows_inserted.fetch_add(inserted, Ordering::SeqCst) + inserted;
        let mut progress = self.progress.write();
        progress.last_watermark = Some(watermark.to_string());
        progress.rows_inserted = total;
    }

    pub fn finish(&self, error: Option<String>) {
        self.running.store(false, Ordering::SeqCst);
        let mut progress = self.progress.write();
        progress.is_running = false;
        progress.error = error;
        progress.last_done_time = Some(chrono::Utc::now().timestamp());
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn get_progress(&self) -> BackfillProgress {
        self.progress.read().clone()
    }
}

impl Default for BackfillState {
    fn default() -> Self {
        Self::new()
    }
}

/// Replace the coverage rows of one card from its subtitles / 重建单卡覆盖行
pub async fn resync_card(pool: &SqlitePool, card_id: &str) -> Result<(), sqlx::Error> {
    let mut tx = pool.begin().await?;
    sqlx::query("DELETE FROM card_languages WHERE card_id = ?")
        .bind(card_id)
        .execute(&mut *tx)
        .await?;
    sqlx::query(
        "INSERT OR IGNORE INTO card_languages (card_id, language)
         SELECT DISTINCT card_id, language FROM subtitles
         WHERE card_id = ? AND text <> ''",
    )
    .bind(card_id)
    .execute(&mut *tx)
    .await?;
    tx.commit().await?;
    Ok(())
}

/// Replace the coverage rows of a batch of cards, one transaction per chunk
/// 批量重建覆盖行，按块分事务
pub async fn resync_cards(pool: &SqlitePool, card_ids: &[String]) -> Result<(), sqlx::Error> {
    for chunk in card_ids.chunks(RESYNC_CHUNK) {
        let placeholders = vec!["?"; chunk.len()].join(", ");
        let mut tx = pool.begin().await?;

        let delete_sql = format!("DELETE FROM card_languages WHERE card_id IN ({})", placeholders);
        let mut query = sqlx::query(&delete_sql);
        for id in chunk {
            query = query.bind(id);
        }
        query.execute(&mut *tx).await?;

        let insert_sql = format!(
            "INSERT OR IGNORE INTO card_languages (card_id, language)
             SELECT DISTINCT card_id, language FROM subtitles
             WHERE card_id IN ({}) AND text <> ''",
            placeholders
        );
        let mut query = sqlx::query(&insert_sql);
        for id in chunk {
            query = query.bind(id);
        }
        query.execute(&mut *tx).await?;

        tx.commit().await?;
    }
    Ok(())
}

/// Fire-and-forget resync used by mutation hooks: errors are logged, the
/// caller never waits and never fails / 变更钩子用的分离式重建
pub fn resync_cards_detached(pool: SqlitePool, card_ids: Vec<String>) {
    if card_ids.is_empty() {
        return;
    }
    tokio::spawn(async move {
        if let Err(e) = resync_cards(&pool, &card_ids).await {
            tracing::warn!("coverage resync failed for {} card(s): {}", card_ids.len(), e);
        }
    });
}

/// One set-based copy of all distinct (card, language) pairs. Pairs already
/// present are ignored. / 一次性整表回填，已存在的行被忽略
pub async fn bulk_backfill(pool: &SqlitePool) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        "INSERT OR IGNORE INTO card_languages (card_id, language)
         SELECT DISTINCT s.card_id, s.language FROM subtitles s WHERE s.text <> ''",
    )
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}

/// Outcome of one chunked-backfill window / 单个回填窗口的结果
#[derive(Debug, Clone)]
pub struct WindowOutcome {
    pub watermark: String,
    pub inserted: u64,
}

/// Process the next ascending-identity window above the stored watermark and
/// advance it. `None` means no cards remain. Safe to interrupt between
/// windows: a stale watermark only re-derives already-correct rows.
/// 处理水位线之上的下一个窗口；窗口之间可随时中断
pub async fn run_backfill_window(
    pool: &SqlitePool,
    chunk_size: u32,
) -> Result<Option<WindowOutcome>, sqlx::Error> {
    let watermark = load_watermark(pool).await?;

    let upper: Option<String> = match &watermark {
        Some(mark) => {
            sqlx::query_scalar(
                "SELECT MAX(id) FROM (SELECT id FROM cards WHERE id > ? ORDER BY id LIMIT ?)",
            )
            .bind(mark)
            .bind(chunk_size as i64)
            .fetch_one(pool)
            .await?
        }
        None => {
            sqlx::query_scalar("SELECT MAX(id) FROM (SELECT id FROM cards ORDER BY id LIMIT ?)")
                .bind(chunk_size as i64)
                .fetch_one(pool)
                .await?
        }
    };
    let Some(upper) = upper else {
        return Ok(None);
    };

    let inserted = match &watermark {
        Some(mark) => {
            sqlx::query(
                "INSERT OR IGNORE INTO card_languages (card_id, language)
                 SELECT DISTINCT s.card_id, s.language FROM subtitles s
                 WHERE s.text <> '' AND s.card_id > ? AND s.card_id <= ?",
            )
            .bind(mark)
            .bind(&upper)
            .execute(pool)
            .await?
            .rows_affected()
        }
        None => {
            sqlx::query(
                "INSERT OR IGNORE INTO card_languages (card_id, language)
                 SELECT DISTINCT s.card_id, s.language FROM subtitles s
                 WHERE s.text <> '' AND s.card_id <= ?",
            )
            .bind(&upper)
            .execute(pool)
            .await?
            .rows_affected()
        }
    };

    save_watermark(pool, &upper).await?;
    Ok(Some(WindowOutcome { watermark: upper, inserted }))
}

/// Resumable whole-corpus backfill in fixed-size windows / 分块全量回填
pub async fn chunked_backfill(
    pool: &SqlitePool,
    chunk_size: u32,
    state: &BackfillState,
) -> Result<u64, sqlx::Error> {
    let mut total = 0u64;
    while let Some(outcome) = run_backfill_window(pool, chunk_size).await? {
        state.record_window(&outcome.watermark, outcome.inserted);
        total += outcome.inserted;
    }
    clear_watermark(pool).await?;
    Ok(total)
}

/// Start a backfill in the background when none is running. Never blocks or
/// fails the caller; the bulk copy is tried first, the chunked walk is the
/// fallback. Returns whether this call claimed the run.
/// 后台启动回填：先整表后分块，绝不阻塞调用方
pub fn spawn_backfill_if_idle(pool: &SqlitePool, state: &Arc<BackfillState>, chunk_size: u32) -> bool {
    if !state.try_start() {
        return false;
    }
    let pool = pool.clone();
    let state = Arc::clone(state);
    tokio::spawn(async move {
        tracing::info!("coverage backfill started");
        let result = match bulk_backfill(&pool).await {
            Ok(inserted) => {
                // A full bulk pass makes any leftover watermark stale / 整表成功后清除旧水位线
                if let Err(e) = clear_watermark(&pool).await {
                    tracing::warn!("failed to clear backfill watermark: {}", e);
                }
                Ok(inserted)
            }
            Err(e) => {
                tracing::warn!("bulk coverage backfill failed, falling back to chunked: {}", e);
                chunked_backfill(&pool, chunk_size, &state).await
            }
        };
        match result {
            Ok(inserted) => {
                tracing::info!("coverage backfill finished, {} row(s) inserted", inserted);
                state.finish(None);
            }
            Err(e) => {
                tracing::error!("coverage backfill failed: {}", e);
                state.finish(Some(e.to_string()));
            }
        }
    });
    true
}

/// Current coverage-index row count / 覆盖索引当前行数
pub async fn indexed_row_count(pool: &SqlitePool) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar("SELECT COUNT(*) FROM card_languages")
        .fetch_one(pool)
        .await
}

/// Enabled cards eligible for indexing / 可被索引的可用卡片数
pub async fn eligible_card_count(pool: &SqlitePool) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar("SELECT COUNT(*) FROM cards WHERE enabled = 1")
        .fetch_one(pool)
        .await
}

async fn load_watermark(pool: &SqlitePool) -> Result<Option<String>, sqlx::Error> {
    sqlx::query_scalar("SELECT value FROM coverage_meta WHERE key = ?")
        .bind(WATERMARK_KEY)
        .fetch_optional(pool)
        .await
}

async fn save_watermark(pool: &SqlitePool, watermark: &str) -> Result<(), sqlx::Error> {
    sqlx::query("INSERT OR REPLACE INTO coverage_meta (key, value) VALUES (?, ?)")
        .bind(WATERMARK_KEY)
        .bind(watermark)
        .execute(pool)
        .await?;
    Ok(())
}

async fn clear_watermark(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    sqlx::query("DELETE FROM coverage_meta WHERE key = ?")
        .bind(WATERMARK_KEY)
        .execute(pool)
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::run_migrations;
    use sqlx::sqlite::SqlitePoolOptions;
    use std::collections::BTreeSet;

    async fn test_pool() -> SqlitePool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        run_migrations(&pool).await.unwrap();
        // Parent rows for the card fixtures; the FK chain rejects orphans
        // 卡片夹具的父行，外键链拒绝孤儿行
        sqlx::query(
            "INSERT INTO contents (id, slug, title, main_language, created_at, updated_at)
             VALUES ('ct1', 'ct1', 'ct1', 'ja', '', '')",
        )
        .execute(&pool)
        .await
        .unwrap();
        sqlx::query(
            "INSERT INTO episodes (id, content_id, number, created_at, updated_at)
             VALUES ('e1', 'ct1', 1, '', '')",
        )
        .execute(&pool)
        .await
        .unwrap();
        pool
    }

    async fn insert_card(pool: &SqlitePool, id: &str) {
        sqlx::query(
            "INSERT INTO cards (id, episode_id, content_id, sentence, created_at, updated_at)
             VALUES (?, 'e1', 'ct1', '', '', '')",
        )
        .bind(id)
        .execute(pool)
        .await
        .unwrap();
    }

    async fn insert_subtitle(pool: &SqlitePool, card_id: &str, language: &str, text: &str) {
        sqlx::query("INSERT OR REPLACE INTO subtitles (card_id, language, text) VALUES (?, ?, ?)")
            .bind(card_id)
            .bind(language)
            .bind(text)
            .execute(pool)
            .await
            .unwrap();
    }

    async fn coverage_set(pool: &SqlitePool) -> BTreeSet<(String, String)> {
        sqlx::query_as::<_, (String, String)>(
            "SELECT card_id, language FROM card_languages ORDER BY card_id, language",
        )
        .fetch_all(pool)
        .await
        .unwrap()
        .into_iter()
        .collect()
    }

    async fn subtitle_set(pool: &SqlitePool) -> BTreeSet<(String, String)> {
        sqlx::query_as::<_, (String, String)>(
            "SELECT DISTINCT card_id, language FROM subtitles WHERE text <> ''",
        )
        .fetch_all(pool)
        .await
        .unwrap()
        .into_iter()
        .collect()
    }

    #[tokio::test]
    async fn resync_matches_subtitles_exactly() {
        let pool = test_pool().await;
        insert_card(&pool, "c1").await;
        insert_subtitle(&pool, "c1", "ja", "猫が好き").await;
        insert_subtitle(&pool, "c1", "en", "I like cats").await;
        insert_subtitle(&pool, "c1", "vi", "").await; // empty text must not index

        resync_card(&pool, "c1").await.unwrap();

        let expected: BTreeSet<_> = [("c1", "en"), ("c1", "ja")]
            .iter()
            .map(|(c, l)| (c.to_string(), l.to_string()))
            .collect();
        assert_eq!(coverage_set(&pool).await, expected);
        assert_eq!(coverage_set(&pool).await, subtitle_set(&pool).await);
    }

    #[tokio::test]
    async fn resync_is_idempotent() {
        let pool = test_pool().await;
        insert_card(&pool, "c1").await;
        insert_subtitle(&pool, "c1", "en", "hello").await;

        resync_card(&pool, "c1").await.unwrap();
        let first = coverage_set(&pool).await;
        resync_card(&pool, "c1").await.unwrap();
        assert_eq!(coverage_set(&pool).await, first);
    }

    #[tokio::test]
    async fn resync_drops_stale_entries() {
        let pool = test_pool().await;
        insert_card(&pool, "c1").await;
        insert_subtitle(&pool, "c1", "en", "hello").await;
        insert_subtitle(&pool, "c1", "ja", "こんにちは").await;
        resync_card(&pool, "c1").await.unwrap();

        sqlx::query("DELETE FROM subtitles WHERE card_id = 'c1' AND language = 'ja'")
            .execute(&pool)
            .await
            .unwrap();
        resync_card(&pool, "c1").await.unwrap();

        assert_eq!(coverage_set(&pool).await, subtitle_set(&pool).await);
    }

    #[tokio::test]
    async fn resync_cards_handles_batches() {
        let pool = test_pool().await;
        let mut ids = Vec::new();
        for i in 0..5 {
            let id = format!("c{}", i);
            insert_card(&pool, &id).await;
            insert_subtitle(&pool, &id, "en", "text").await;
            ids.push(id);
        }
        resync_cards(&pool, &ids).await.unwrap();
        assert_eq!(coverage_set(&pool).await.len(), 5);
    }

    #[tokio::test]
    async fn bulk_backfill_copies_all_pairs() {
        let pool = test_pool().await;
        for i in 0..4 {
            let id = format!("c{}", i);
            insert_card(&pool, &id).await;
            insert_subtitle(&pool, &id, "en", "x").await;
            insert_subtitle(&pool, &id, "ja", "y").await;
        }
        let inserted = bulk_backfill(&pool).await.unwrap();
        assert_eq!(inserted, 8);
        assert_eq!(coverage_set(&pool).await, subtitle_set(&pool).await);

        // Second run inserts nothing / 第二次运行不再插入
        assert_eq!(bulk_backfill(&pool).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn chunked_backfill_resumes_from_watermark() {
        let pool = test_pool().await;
        for i in 0..5 {
            let id = format!("c{}", i);
            insert_card(&pool, &id).await;
            insert_subtitle(&pool, &id, "en", "x").await;
        }

        // First window only, then "interrupt" / 先跑一个窗口再模拟中断
        let outcome = run_backfill_window(&pool, 2).await.unwrap().unwrap();
        assert_eq!(outcome.watermark, "c1");
        assert_eq!(coverage_set(&pool).await.len(), 2);
        assert_eq!(load_watermark(&pool).await.unwrap().as_deref(), Some("c1"));

        // Resume to completion / 从水位线续跑到完成
        let state = BackfillState::new();
        let resumed = chunked_backfill(&pool, 2, &state).await.unwrap();
        assert_eq!(resumed, 3);
        assert_eq!(coverage_set(&pool).await, subtitle_set(&pool).await);
        assert!(load_watermark(&pool).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn chunked_backfill_from_stale_watermark_is_safe() {
        let pool = test_pool().await;
        for i in 0..4 {
            let id = format!("c{}", i);
            insert_card(&pool, &id).await;
            insert_subtitle(&pool, &id, "en", "x").await;
        }
        // Stale watermark pointing mid-corpus while rows below already exist
        // 水位线过期且线下行已存在
        bulk_backfill(&pool).await.unwrap();
        save_watermark(&pool, "c1").await.unwrap();

        let state = BackfillState::new();
        chunked_backfill(&pool, 2, &state).await.unwrap();
        assert_eq!(coverage_set(&pool).await, subtitle_set(&pool).await);
    }

    #[test]
    fn backfill_state_allows_single_runner() {
        let state = BackfillState::new();
        assert!(state.try_start());
        assert!(!state.try_start());
        state.finish(None);
        assert!(state.try_start());
        assert!(state.get_progress().is_running);
    }
}
