//! Query executor / 查询执行器
//!
//! Composes the predicate set in one fixed clause order and binds an ordered
//! parameter list matching it exactly. Values never appear inline in the SQL
//! text; every value travels as a bound parameter, and placeholder count is
//! checked against the bound list before execution.
//! 谓词按固定顺序组装，值一律走绑定参数，执行前校验占位符数量

use once_cell::sync::Lazy;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use std::collections::HashMap;

use crate::models::Card;
use crate::search::planner::QueryStrategy;
use crate::search::text::TextPredicate;

/// Sentinel total when the search path skips the count query / 未计数哨兵值
pub const TOTAL_UNCOUNTED: i64 = -1;

/// Engine errors surfaced to the API layer / 引擎错误
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("store error: {0}")]
    Store(#[from] sqlx::Error),
    /// Clause/parameter drift is a bug, never silently mis-bind
    /// 占位符与参数数量不一致属于编码错误，立即报告
    #[error("sql parameter mismatch: {expected} placeholder(s), {actual} bound value(s)")]
    ParameterMismatch { expected: usize, actual: usize },
}

/// Ordered bind value / 有序绑定值
#[derive(Debug, Clone)]
pub enum SqlParam {
    Text(String),
    Int(i64),
}

/// Level labels per framework, easiest first. Numeric bounds from requests
/// are 1-based positions in these tables. / 各体系等级表，由易到难
pub static LEVEL_FRAMEWORKS: Lazy<HashMap<&'static str, &'static [&'static str]>> =
    Lazy::new(|| {
        let mut map: HashMap<&'static str, &'static [&'static str]> = HashMap::new();
        map.insert("jlpt", &["N5", "N4", "N3", "N2", "N1"]);
        map.insert("cefr", &["A1", "A2", "B1", "B2", "C1", "C2"]);
        map
    });

/// Map numeric level bounds to a label allow-list. Unknown frameworks and
/// empty ranges yield `None` (the clause is dropped, not "match nothing").
/// 数值区间映射为标签列表；未知体系或空区间返回None
pub fn level_allow_list(framework: &str, min: Option<u32>, max: Option<u32>) -> Option<Vec<String>> {
    let labels = LEVEL_FRAMEWORKS.get(framework.to_lowercase().as_str())?;
    let len = labels.len() as u32;
    let lo = min.unwrap_or(1).clamp(1, len);
    let hi = max.unwrap_or(len).clamp(1, len);
    if lo > hi {
        return None;
    }
    Some(
        labels[(lo - 1) as usize..hi as usize]
            .iter()
            .map(|s| s.to_string())
            .collect(),
    )
}

/// Per-user review-count cap / 按用户复习次数上限过滤
#[derive(Debug, Clone)]
pub struct ReviewFilter {
    pub user_id: String,
    pub max_reviews: i64,
}

/// Proficiency-level allow-list after numeric mapping / 等级过滤
#[derive(Debug, Clone)]
pub struct LevelFilter {
    pub framework: String,
    pub labels: Vec<String>,
}

/// Normalized filter set consumed by the planner and executor
/// 规整后的过滤条件集
#[derive(Debug, Clone, Default)]
pub struct SearchFilters {
    pub predicate: Option<TextPredicate>,
    /// Main language of the content item / 内容主语言
    pub language: Option<String>,
    /// Required subtitle-language coverage; empty = no coverage filter
    /// 要求的字幕语言覆盖，空表示不过滤
    pub subtitle_langs: Vec<String>,
    pub content_ids: Vec<String>,
    pub min_difficulty: Option<i64>,
    pub max_difficulty: Option<i64>,
    pub levels: Option<LevelFilter>,
    pub min_length: Option<i64>,
    pub max_length: Option<i64>,
    pub min_duration_ms: Option<i64>,
    pub max_duration_ms: Option<i64>,
    pub review: Option<ReviewFilter>,
}

impl SearchFilters {
    /// True when only availability and main language constrain the query
    /// 仅有可用性与主语言约束时为真
    pub fn is_quick_browse(&self) -> bool {
        self.predicate.is_none()
            && self.subtitle_langs.is_empty()
            && self.content_ids.is_empty()
            && self.min_difficulty.is_none()
            && self.max_difficulty.is_none()
            && self.levels.is_none()
            && self.min_length.is_none()
            && self.max_length.is_none()
            && self.min_duration_ms.is_none()
            && self.max_duration_ms.is_none()
            && self.review.is_none()
    }
}

/// Accumulates WHERE clauses with their parameters in declaration order
/// 按声明顺序累积子句与参数
pub struct QueryBuilder {
    clauses: Vec<String>,
    params: Vec<SqlParam>,
}

impl QueryBuilder {
    pub fn new() -> Self {
        Self {
            clauses: Vec::new(),
            params: Vec::new(),
        }
    }

    pub fn push(&mut self, clause: impl Into<String>, params: Vec<SqlParam>) {
        self.clauses.push(clause.into());
        self.params.extend(params);
    }

    pub fn where_sql(&self) -> String {
        if self.clauses.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", self.clauses.join(" AND "))
        }
    }

    pub fn into_params(self) -> Vec<SqlParam> {
        self.params
    }
}

impl Default for QueryBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn placeholder_list(n: usize) -> String {
    vec!["?"; n].join(", ")
}

/// Build the WHERE clause set for one request. Clause order is fixed:
/// availability, main-language existence, coverage, content allow-list,
/// difficulty, level, length, duration, review count, free text.
/// 子句顺序固定，不随请求内容变化
fn build_query(filters: &SearchFilters, strategy: QueryStrategy, max_content_ids: usize) -> QueryBuilder {
    let mut builder = QueryBuilder::new();

    // 1. availability across card, content and episode / 三层可用性
    builder.push("c.enabled = 1 AND ct.enabled = 1 AND e.enabled = 1", vec![]);

    // 2. main-language existence; `sentence` is the denormalized snapshot of
    //    the main-language subtitle / 主语言字幕存在性
    builder.push("c.sentence <> ''", vec![]);
    if let Some(language) = &filters.language {
        builder.push("ct.main_language = ?", vec![SqlParam::Text(language.clone())]);
    }

    // 3. subtitle-language coverage, shaped by the chosen strategy / 覆盖过滤
    if !filters.subtitle_langs.is_empty() {
        let langs = &filters.subtitle_langs;
        let mut params: Vec<SqlParam> =
            langs.iter().map(|l| SqlParam::Text(l.clone())).collect();
        params.push(SqlParam::Int(langs.len() as i64));
        match strategy {
            QueryStrategy::CoverageIndex => {
                builder.push(
                    format!(
                        "c.id IN (SELECT cl.card_id FROM card_languages cl \
                         WHERE cl.language IN ({}) \
                         GROUP BY cl.card_id HAVING COUNT(DISTINCT cl.language) = ?)",
                        placeholder_list(langs.len())
                    ),
                    params,
                );
            }
            QueryStrategy::DirectJoin => {
                builder.push(
                    format!(
                        "(SELECT COUNT(DISTINCT s.language) FROM subtitles s \
                         WHERE s.card_id = c.id AND s.language IN ({}) AND s.text <> '') = ?",
                        placeholder_list(langs.len())
                    ),
                    params,
                );
            }
            // The planner never picks these with a coverage filter present
            // 规划器不会在需要覆盖时选择这两个策略
            QueryStrategy::QuickBrowse | QueryStrategy::NoCoverage => {}
        }
    }

    // 4. content-id allow-list, capped / 内容ID白名单（有上限）
    if !filters.content_ids.is_empty() {
        let ids: Vec<&String> = filters.content_ids.iter().take(max_content_ids).collect();
        builder.push(
            format!("c.content_id IN ({})", placeholder_list(ids.len())),
            ids.into_iter().map(|i| SqlParam::Text(i.clone())).collect(),
        );
    }

    // 5. difficulty range; NULL difficulty never satisfies a bound / 难度区间
    if let Some(min) = filters.min_difficulty {
        builder.push("c.difficulty >= ?", vec![SqlParam::Int(min)]);
    }
    if let Some(max) = filters.max_difficulty {
        builder.push("c.difficulty <= ?", vec![SqlParam::Int(max)]);
    }

    // 6. proficiency-level allow-list / 等级白名单
    if let Some(level) = &filters.levels {
        if !level.labels.is_empty() {
            let mut params = vec![SqlParam::Text(level.framework.clone())];
            params.extend(level.labels.iter().map(|l| SqlParam::Text(l.clone())));
            builder.push(
                format!(
                    "c.id IN (SELECT dl.card_id FROM difficulty_levels dl \
                     WHERE dl.framework = ? AND dl.level IN ({}))",
                    placeholder_list(level.labels.len())
                ),
                params,
            );
        }
    }

    // 7. sentence length / 句长
    if let Some(min) = filters.min_length {
        builder.push("c.length >= ?", vec![SqlParam::Int(min)]);
    }
    if let Some(max) = filters.max_length {
        builder.push("c.length <= ?", vec![SqlParam::Int(max)]);
    }

    // 8. audio duration / 音频时长
    if let Some(min) = filters.min_duration_ms {
        builder.push("c.duration_ms >= ?", vec![SqlParam::Int(min)]);
    }
    if let Some(max) = filters.max_duration_ms {
        builder.push("c.duration_ms <= ?", vec![SqlParam::Int(max)]);
    }

    // 9. per-user review-count cap; cards never reviewed count as zero
    //    未复习过的卡按零次计
    if let Some(review) = &filters.review {
        builder.push(
            "COALESCE((SELECT rs.review_count FROM review_states rs \
             WHERE rs.user_id = ? AND rs.card_id = c.id), 0) <= ?",
            vec![
                SqlParam::Text(review.user_id.clone()),
                SqlParam::Int(review.max_reviews),
            ],
        );
    }

    // 10. free-text predicate over the normalized sentence / 规整句文本谓词
    if let Some(predicate) = &filters.predicate {
        let (clause, pattern) = predicate.like_clause("c.sentence_norm");
        builder.push(clause, vec![SqlParam::Text(pattern)]);
    }

    builder
}

/// Over-fetch window feeding the diversifier / 供多样化使用的多取窗口
pub fn fetch_limit(page_size: u32, ceiling: u32) -> u32 {
    (page_size * 3).clamp(page_size, ceiling.max(page_size))
}

fn bind_params<'q>(
    mut query: sqlx::query::QueryAs<'q, sqlx::Sqlite, Card, sqlx::sqlite::SqliteArguments<'q>>,
    params: &[SqlParam],
) -> sqlx::query::QueryAs<'q, sqlx::Sqlite, Card, sqlx::sqlite::SqliteArguments<'q>> {
    for param in params {
        query = match param {
            SqlParam::Text(s) => query.bind(s.clone()),
            SqlParam::Int(n) => query.bind(*n),
        };
    }
    query
}

fn bind_row_params<'q>(
    mut query: sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>>,
    params: &[SqlParam],
) -> sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>> {
    for param in params {
        query = match param {
            SqlParam::Text(s) => query.bind(s.clone()),
            SqlParam::Int(n) => query.bind(*n),
        };
    }
    query
}

/// No pattern text ever appears inline, so counting `?` in the statement is
/// an exact placeholder count. / 语句内不含内联文本，问号计数即占位符数
fn assert_bind_parity(sql: &str, params: &[SqlParam]) -> Result<(), EngineError> {
    let expected = sql.matches('?').count();
    if expected != params.len() {
        return Err(EngineError::ParameterMismatch {
            expected,
            actual: params.len(),
        });
    }
    Ok(())
}

/// Raw match window in stable identity order / 按稳定ID序的原始匹配窗口
#[derive(Debug)]
pub struct MatchWindow {
    pub cards: Vec<Card>,
    /// Always [`TOTAL_UNCOUNTED`] on the search path / 搜索路径恒为哨兵值
    pub total: i64,
}

const SELECT_CARDS: &str = "SELECT c.* FROM cards c \
     JOIN contents ct ON ct.id = c.content_id \
     JOIN episodes e ON e.id = c.episode_id";

/// Execute the window query for one page. The window is over-sized for the
/// diversifier and capped at the configured ceiling; the exact total is not
/// computed here. / 执行单页窗口查询，总数不在此路径计算
pub async fn fetch_window(
    pool: &SqlitePool,
    filters: &SearchFilters,
    strategy: QueryStrategy,
    page: u32,
    page_size: u32,
) -> Result<MatchWindow, EngineError> {
    let cfg = crate::config::config();
    let builder = build_query(filters, strategy, cfg.search.max_content_ids);

    let limit = fetch_limit(page_size, cfg.search.fetch_ceiling);
    let offset = (page.max(1) - 1) as i64 * page_size as i64;

    let sql = format!(
        "{}{} ORDER BY c.id ASC LIMIT ? OFFSET ?",
        SELECT_CARDS,
        builder.where_sql()
    );
    let mut params = builder.into_params();
    params.push(SqlParam::Int(limit as i64));
    params.push(SqlParam::Int(offset));
    assert_bind_parity(&sql, &params)?;

    let query = bind_params(sqlx::query_as::<_, Card>(&sql), &params);
    let cards = query.fetch_all(pool).await?;

    Ok(MatchWindow {
        cards,
        total: TOTAL_UNCOUNTED,
    })
}

/// Exact per-content counts over the same predicate set / 按内容精确计数
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ContentCount {
    pub content_id: String,
    pub count: i64,
}

pub async fn counts_by_content(
    pool: &SqlitePool,
    filters: &SearchFilters,
    strategy: QueryStrategy,
) -> Result<Vec<ContentCount>, EngineError> {
    let cfg = crate::config::config();
    let builder = build_query(filters, strategy, cfg.search.max_content_ids);

    let sql = format!(
        "SELECT c.content_id, COUNT(*) AS cnt FROM cards c \
         JOIN contents ct ON ct.id = c.content_id \
         JOIN episodes e ON e.id = c.episode_id{} \
         GROUP BY c.content_id ORDER BY cnt DESC, c.content_id ASC",
        builder.where_sql()
    );
    let params = builder.into_params();
    assert_bind_parity(&sql, &params)?;

    let rows: Vec<SqliteRow> = bind_row_params(sqlx::query(&sql), &params)
        .fetch_all(pool)
        .await?;
    let counts = rows
        .into_iter()
        .map(|row| {
            Ok(ContentCount {
                content_id: row.try_get("content_id")?,
                count: row.try_get("cnt")?,
            })
        })
        .collect::<Result<Vec<_>, sqlx::Error>>()?;
    Ok(counts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::run_migrations;
    use crate::search::text::{build_predicate, normalize_sentence};
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

    async fn seed_content(pool: &SqlitePool, id: &str, main_language: &str) {
        sqlx::query(
            "INSERT INTO contents (id, slug, title, main_language, created_at, updated_at)
             VALUES (?, ?, ?, ?, '', '')",
        )
        .bind(id)
        .bind(id)
        .bind(id)
        .bind(main_language)
        .execute(pool)
        .await
        .unwrap();
        sqlx::query(
            "INSERT INTO episodes (id, content_id, number, created_at, updated_at)
             VALUES (?, ?, 1, '', '')",
        )
        .bind(format!("{}-e1", id))
        .bind(id)
        .execute(pool)
        .await
        .unwrap();
    }

    async fn seed_card(pool: &SqlitePool, id: &str, content_id: &str, sentence: &str) {
        sqlx::query(
            "INSERT INTO cards (id, episode_id, content_id, sentence, sentence_norm,
                                length, difficulty, duration_ms, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, 50, 1500, '', '')",
        )
        .bind(id)
        .bind(format!("{}-e1", content_id))
        .bind(content_id)
        .bind(sentence)
        .bind(normalize_sentence(sentence))
        .bind(sentence.chars().count() as i64)
        .execute(pool)
        .await
        .unwrap();
    }

    async fn seed_subtitle(pool: &SqlitePool, card_id: &str, language: &str, text: &str) {
        sqlx::query("INSERT OR REPLACE INTO subtitles (card_id, language, text) VALUES (?, ?, ?)")
            .bind(card_id)
            .bind(language)
            .bind(text)
            .execute(pool)
            .await
            .unwrap();
    }

    fn ids(window: &MatchWindow) -> Vec<String> {
        window.cards.iter().map(|c| c.id.clone()).collect()
    }

    #[test]
    fn level_bounds_map_to_labels() {
        assert_eq!(
            level_allow_list("jlpt", Some(2), Some(4)),
            Some(vec!["N4".into(), "N3".into(), "N2".into()])
        );
        assert_eq!(
            level_allow_list("CEFR", None, Some(2)),
            Some(vec!["A1".into(), "A2".into()])
        );
        // Out-of-range bounds clamp instead of failing / 越界收缩而不报错
        assert_eq!(
            level_allow_list("jlpt", Some(0), Some(99)).map(|v| v.len()),
            Some(5)
        );
        assert_eq!(level_allow_list("hsk", Some(1), Some(3)), None);
        assert_eq!(level_allow_list("jlpt", Some(4), Some(2)), None);
    }

    #[test]
    fn fetch_limit_is_clamped() {
        assert_eq!(fetch_limit(10, 75), 30);
        assert_eq!(fetch_limit(30, 75), 75);
        assert_eq!(fetch_limit(50, 75), 75);
        assert_eq!(fetch_limit(2, 75), 6);
    }

    #[test]
    fn parameter_mismatch_is_fatal() {
        let sql = "SELECT 1 WHERE a = ? AND b = ? AND c = ?";
        let params = vec![SqlParam::Int(1), SqlParam::Int(2)];
        match assert_bind_parity(sql, &params) {
            Err(EngineError::ParameterMismatch { expected, actual }) => {
                assert_eq!(expected, 3);
                assert_eq!(actual, 2);
            }
            other => panic!("expected parameter mismatch, got {:?}", other.err()),
        }
    }

    #[test]
    fn clause_order_is_stable() {
        let filters = SearchFilters {
            predicate: build_predicate("hello", 8),
            language: Some("ja".into()),
            subtitle_langs: vec!["en".into()],
            content_ids: vec!["ct1".into()],
            min_difficulty: Some(10),
            ..Default::default()
        };
        let builder = build_query(&filters, QueryStrategy::CoverageIndex, 100);
        let sql = builder.where_sql();
        let coverage_at = sql.find("card_languages").unwrap();
        let content_at = sql.find("c.content_id IN").unwrap();
        let difficulty_at = sql.find("c.difficulty >=").unwrap();
        let text_at = sql.find("sentence_norm").unwrap();
        assert!(coverage_at < content_at);
        assert!(content_at < difficulty_at);
        assert!(difficulty_at < text_at);
    }

    #[tokio::test]
    async fn coverage_requires_every_requested_language() {
        let pool = test_pool().await;
        seed_content(&pool, "ct1", "ja").await;
        seed_card(&pool, "c1", "ct1", "sentence one").await;
        seed_subtitle(&pool, "c1", "en", "hello").await;
        seed_subtitle(&pool, "c1", "vi", "xin chao").await;
        crate::search::coverage::resync_card(&pool, "c1").await.unwrap();

        let mut filters = SearchFilters {
            subtitle_langs: vec!["vi".into(), "ja".into()],
            ..Default::default()
        };
        // {en,vi} card must not satisfy {vi,ja} on either path / 两路径一致排除
        for strategy in [QueryStrategy::CoverageIndex, QueryStrategy::DirectJoin] {
            let window = fetch_window(&pool, &filters, strategy, 1, 25).await.unwrap();
            assert!(window.cards.is_empty(), "strategy {:?}", strategy);
        }

        filters.subtitle_langs = vec!["vi".into()];
        for strategy in [QueryStrategy::CoverageIndex, QueryStrategy::DirectJoin] {
            let window = fetch_window(&pool, &filters, strategy, 1, 25).await.unwrap();
            assert_eq!(ids(&window), vec!["c1"], "strategy {:?}", strategy);
        }
    }

    #[tokio::test]
    async fn strategies_return_identical_match_sets() {
        let pool = test_pool().await;
        seed_content(&pool, "ct1", "ja").await;
        seed_content(&pool, "ct2", "ja").await;
        for (card, content, langs) in [
            ("c1", "ct1", vec!["en", "vi"]),
            ("c2", "ct1", vec!["en"]),
            ("c3", "ct2", vec!["en", "vi", "ja"]),
            ("c4", "ct2", vec!["vi"]),
        ] {
            seed_card(&pool, card, content, "some words here").await;
            for lang in langs {
                seed_subtitle(&pool, card, lang, "text").await;
            }
        }
        crate::search::coverage::bulk_backfill(&pool).await.unwrap();

        let filters = SearchFilters {
            subtitle_langs: vec!["en".into(), "vi".into()],
            ..Default::default()
        };
        let indexed = fetch_window(&pool, &filters, QueryStrategy::CoverageIndex, 1, 25)
            .await
            .unwrap();
        let joined = fetch_window(&pool, &filters, QueryStrategy::DirectJoin, 1, 25)
            .await
            .unwrap();
        assert_eq!(ids(&indexed), vec!["c1", "c3"]);
        assert_eq!(ids(&indexed), ids(&joined));
    }

    #[tokio::test]
    async fn window_respects_filters_and_order() {
        let pool = test_pool().await;
        seed_content(&pool, "ct1", "ja").await;
        seed_card(&pool, "c1", "ct1", "the cat sat down").await;
        seed_card(&pool, "c2", "ct1", "a cataclysm happened").await;
        seed_card(&pool, "c3", "ct1", "the cat ran away").await;
        sqlx::query("UPDATE cards SET enabled = 0 WHERE id = 'c3'")
            .execute(&pool)
            .await
            .unwrap();

        let filters = SearchFilters {
            predicate: build_predicate("cat", 8),
            ..Default::default()
        };
        let window = fetch_window(&pool, &filters, QueryStrategy::NoCoverage, 1, 25)
            .await
            .unwrap();
        // whole-word match only, disabled card dropped / 仅整词匹配且排除停用卡
        assert_eq!(ids(&window), vec!["c1"]);
        assert_eq!(window.total, TOTAL_UNCOUNTED);
    }

    #[tokio::test]
    async fn null_difficulty_fails_range_bounds() {
        let pool = test_pool().await;
        seed_content(&pool, "ct1", "ja").await;
        seed_card(&pool, "c1", "ct1", "words").await;
        sqlx::query("UPDATE cards SET difficulty = NULL WHERE id = 'c1'")
            .execute(&pool)
            .await
            .unwrap();

        let filters = SearchFilters {
            min_difficulty: Some(0),
            ..Default::default()
        };
        let window = fetch_window(&pool, &filters, QueryStrategy::NoCoverage, 1, 25)
            .await
            .unwrap();
        assert!(window.cards.is_empty());
    }

    #[tokio::test]
    async fn counts_group_by_content() {
        let pool = test_pool().await;
        seed_content(&pool, "ct1", "ja").await;
        seed_content(&pool, "ct2", "ja").await;
        seed_card(&pool, "c1", "ct1", "alpha beta").await;
        seed_card(&pool, "c2", "ct1", "beta gamma").await;
        seed_card(&pool, "c3", "ct2", "beta delta").await;

        let filters = SearchFilters {
            predicate: build_predicate("beta", 8),
            ..Default::default()
        };
        let counts = counts_by_content(&pool, &filters, QueryStrategy::NoCoverage)
            .await
            .unwrap();
        assert_eq!(counts.len(), 2);
        assert_eq!(counts[0].content_id, "ct1");
        assert_eq!(counts[0].count, 2);
        assert_eq!(counts[1].content_id, "ct2");
        assert_eq!(counts[1].count, 1);
    }
}
