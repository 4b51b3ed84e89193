use anyhow::Result;
use sqlx::SqlitePool;

/// Run database migrations / 运行数据库迁移
///
/// Only creates tables when absent, never drops data / 只在表不存在时创建
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    // WAL mode for concurrent readers during background maintenance / WAL模式
    sqlx::query("PRAGMA journal_mode=WAL").execute(pool).await?;
    sqlx::query("PRAGMA busy_timeout=10000").execute(pool).await?;
    sqlx::query("PRAGMA synchronous=NORMAL").execute(pool).await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS contents (
            id TEXT PRIMARY KEY,
            slug TEXT NOT NULL UNIQUE,
            title TEXT NOT NULL,
            main_language TEXT NOT NULL,
            enabled INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS episodes (
            id TEXT PRIMARY KEY,
            content_id TEXT NOT NULL,
            number INTEGER NOT NULL,
            title TEXT,
            enabled INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            FOREIGN KEY (content_id) REFERENCES contents(id) ON DELETE CASCADE
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS cards (
            id TEXT PRIMARY KEY,
            episode_id TEXT NOT NULL,
            content_id TEXT NOT NULL,
            seq INTEGER NOT NULL DEFAULT 0,
            start_ms INTEGER NOT NULL DEFAULT 0,
            end_ms INTEGER NOT NULL DEFAULT 0,
            duration_ms INTEGER NOT NULL DEFAULT 0,
            image_key TEXT,
            audio_key TEXT,
            sentence TEXT NOT NULL DEFAULT '',
            sentence_norm TEXT NOT NULL DEFAULT '',
            kind TEXT NOT NULL DEFAULT 'sentence',
            length INTEGER NOT NULL DEFAULT 0,
            difficulty INTEGER,
            enabled INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            FOREIGN KEY (episode_id) REFERENCES episodes(id) ON DELETE CASCADE
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_cards_content ON cards(content_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_cards_episode ON cards(episode_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_cards_difficulty ON cards(difficulty)")
        .execute(pool)
        .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS subtitles (
            card_id TEXT NOT NULL,
            language TEXT NOT NULL,
            text TEXT NOT NULL DEFAULT '',
            PRIMARY KEY (card_id, language)
        ) WITHOUT ROWID
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_subtitles_language ON subtitles(language)")
        .execute(pool)
        .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS difficulty_levels (
            card_id TEXT NOT NULL,
            framework TEXT NOT NULL,
            level TEXT NOT NULL,
            language TEXT NOT NULL,
            PRIMARY KEY (card_id, framework, language)
        ) WITHOUT ROWID
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_levels_framework ON difficulty_levels(framework, level)")
        .execute(pool)
        .await?;

    // Derived coverage index: which subtitle languages exist per card.
    // Rebuilt by search::coverage, allowed to lag behind subtitles.
    // 派生覆盖索引，允许滞后于字幕表
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS card_languages (
            card_id TEXT NOT NULL,
            language TEXT NOT NULL,
            PRIMARY KEY (card_id, language)
        ) WITHOUT ROWID
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_card_languages_language ON card_languages(language, card_id)")
        .execute(pool)
        .await?;

    // Backfill watermark and other maintenance metadata / 回填水位线等维护元数据
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS coverage_meta (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Precomputed term frequencies feeding autocomplete / 自动补全词频表
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS word_frequency (
            language TEXT NOT NULL,
            term TEXT NOT NULL,
            freq INTEGER NOT NULL DEFAULT 0,
            PRIMARY KEY (language, term)
        ) WITHOUT ROWID
        "#,
    )
    .execute(pool)
    .await?;

    // Owned by the review-scheduling collaborator; the engine only reads
    // review_count for the per-user filter / 复习状态表仅被本引擎读取
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS review_states (
            user_id TEXT NOT NULL,
            card_id TEXT NOT NULL,
            review_count INTEGER NOT NULL DEFAULT 0,
            updated_at TEXT NOT NULL DEFAULT '',
            PRIMARY KEY (user_id, card_id)
        ) WITHOUT ROWID
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Delete a card and everything hanging off it in one transaction:
/// subtitles, level rows, coverage entries, then the card itself.
/// 在单个事务内级联删除卡片及其附属行
pub async fn delete_card_cascade(pool: &SqlitePool, card_id: &str) -> Result<bool> {
    let mut tx = pool.begin().await?;

    sqlx::query("DELETE FROM subtitles WHERE card_id = ?")
        .bind(card_id)
        .execute(&mut *tx)
        .await?;
    sqlx::query("DELETE FROM difficulty_levels WHERE card_id = ?")
        .bind(card_id)
        .execute(&mut *tx)
        .await?;
    sqlx::query("DELETE FROM card_languages WHERE card_id = ?")
        .bind(card_id)
        .execute(&mut *tx)
        .await?;
    let deleted = sqlx::query("DELETE FROM cards WHERE id = ?")
        .bind(card_id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;
    Ok(deleted.rows_affected() > 0)
}
