//! Search pipeline / 检索管线
//!
//! Orchestrates one request: normalize the raw parameters, consult the
//! result cache, pick a strategy, execute the window query, hydrate,
//! diversify, then write the response back to the cache detached. The
//! pipeline itself is stateless; shared state lives in the pool, the cache
//! and the backfill flag. / 管线本身无状态，共享状态在池、缓存与回填标志中

use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use std::str::FromStr;
use std::sync::Arc;

use crate::cache::{cache_key, CacheNamespace, CacheStore};
use crate::models::CardResult;
use crate::search::coverage::BackfillState;
use crate::search::diversify::diversify;
use crate::search::executor::{
    self, level_allow_list, ContentCount, EngineError, LevelFilter, ReviewFilter, SearchFilters,
};
use crate::search::hydrate::hydrate_window;
use crate::search::planner::choose_strategy;
use crate::search::text::build_predicate;

/// Raw request parameters. Everything arrives as optional text and is
/// coerced leniently; a malformed value degrades to "filter absent" instead
/// of rejecting the request. / 原始请求参数，非法值一律降级为未过滤
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SearchRequest {
    pub q: Option<String>,
    pub language: Option<String>,
    pub subtitle_langs: Option<String>,
    pub content_ids: Option<String>,
    pub min_difficulty: Option<String>,
    pub max_difficulty: Option<String>,
    pub framework: Option<String>,
    pub min_level: Option<String>,
    pub max_level: Option<String>,
    pub min_length: Option<String>,
    pub max_length: Option<String>,
    pub min_duration_ms: Option<String>,
    pub max_duration_ms: Option<String>,
    pub user_id: Option<String>,
    pub max_reviews: Option<String>,
    pub page: Option<String>,
    pub page_size: Option<String>,
}

/// Fully normalized form of one request / 规整后的请求
#[derive(Debug, Clone)]
pub struct NormalizedQuery {
    pub filters: SearchFilters,
    /// Languages the hydrator fetches beyond each card's main language
    /// 补水时在主语言之外附带的语言
    pub extra_langs: Vec<String>,
    pub page: u32,
    pub page_size: u32,
    cache_pairs: Vec<(&'static str, String)>,
}

impl NormalizedQuery {
    pub fn cache_key(&self) -> String {
        cache_key(&self.cache_pairs)
    }

    /// Key for a sibling operation sharing the same filters / 同过滤条件的衍生键
    pub fn cache_key_tagged(&self, op: &str) -> String {
        let mut pairs: Vec<(&'static str, String)> = self
            .cache_pairs
            .iter()
            .filter(|(k, _)| *k != "page" && *k != "size")
            .cloned()
            .collect();
        pairs.push(("op", op.to_string()));
        cache_key(&pairs)
    }
}

fn parse_num<T: FromStr>(value: &Option<String>) -> Option<T> {
    value.as_deref().and_then(|v| v.trim().parse().ok())
}

/// Non-negative numeric filter; negatives are malformed, not "match less"
/// 数值过滤仅接受非负值
fn parse_bound(value: &Option<String>) -> Option<i64> {
    parse_num::<i64>(value).filter(|v| *v >= 0)
}

fn clean_token(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(|v| v.trim().to_lowercase())
        .filter(|v| !v.is_empty())
}

fn split_list(value: &Option<String>) -> Vec<String> {
    let Some(raw) = value.as_deref() else {
        return Vec::new();
    };
    let mut out: Vec<String> = Vec::new();
    for part in raw.split(',') {
        let part = part.trim();
        if !part.is_empty() && !out.iter().any(|p| p == part) {
            out.push(part.to_string());
        }
    }
    out
}

/// Normalize one raw request into filters, paging and a cache identity.
/// The same input always yields the same cache key. / 规整请求并生成缓存键
pub fn normalize_request(req: &SearchRequest) -> NormalizedQuery {
    let cfg = crate::config::config();

    let predicate = req
        .q
        .as_deref()
        .and_then(|q| build_predicate(q, cfg.search.max_query_tokens));
    let language = clean_token(&req.language);

    // Coverage is a set; sort for a stable clause and cache key / 集合语义，排序定序
    let mut subtitle_langs: Vec<String> = split_list(&req.subtitle_langs)
        .into_iter()
        .map(|l| l.to_lowercase())
        .collect();
    subtitle_langs.sort();
    subtitle_langs.dedup();

    let mut content_ids = split_list(&req.content_ids);
    content_ids.truncate(cfg.search.max_content_ids);

    let levels = clean_token(&req.framework).and_then(|framework| {
        let labels = level_allow_list(
            &framework,
            parse_num::<u32>(&req.min_level),
            parse_num::<u32>(&req.max_level),
        )?;
        Some(LevelFilter { framework, labels })
    });

    let review = match (
        req.user_id.as_deref().map(str::trim).filter(|u| !u.is_empty()),
        parse_bound(&req.max_reviews),
    ) {
        (Some(user_id), Some(max_reviews)) => Some(ReviewFilter {
            user_id: user_id.to_string(),
            max_reviews,
        }),
        _ => None,
    };

    let page = parse_num::<u32>(&req.page).unwrap_or(1).max(1);
    let page_size = parse_num::<u32>(&req.page_size)
        .unwrap_or(cfg.search.page_size_default)
        .clamp(1, cfg.search.page_size_max);

    let filters = SearchFilters {
        predicate,
        language,
        subtitle_langs: subtitle_langs.clone(),
        content_ids,
        min_difficulty: parse_bound(&req.min_difficulty),
        max_difficulty: parse_bound(&req.max_difficulty),
        levels,
        min_length: parse_bound(&req.min_length),
        max_length: parse_bound(&req.max_length),
        min_duration_ms: parse_bound(&req.min_duration_ms),
        max_duration_ms: parse_bound(&req.max_duration_ms),
        review,
    };

    let mut cache_pairs: Vec<(&'static str, String)> = Vec::new();
    if let Some(p) = &filters.predicate {
        // Regime tag keeps word and script patterns apart / 词式与串式加标签区分
        let tag = match p.regime {
            crate::search::text::MatchRegime::Words => "w",
            crate::search::text::MatchRegime::Script => "s",
        };
        cache_pairs.push(("q", format!("{}:{}", tag, p.pattern)));
    }
    if let Some(l) = &filters.language {
        cache_pairs.push(("lang", l.clone()));
    }
    cache_pairs.push(("subs", filters.subtitle_langs.join(",")));
    cache_pairs.push(("contents", filters.content_ids.join(",")));
    if let Some(v) = filters.min_difficulty {
        cache_pairs.push(("mind", v.to_string()));
    }
    if let Some(v) = filters.max_difficulty {
        cache_pairs.push(("maxd", v.to_string()));
    }
    if let Some(l) = &filters.levels {
        cache_pairs.push(("levels", format!("{}:{}", l.framework, l.labels.join(","))));
    }
    if let Some(v) = filters.min_length {
        cache_pairs.push(("minl", v.to_string()));
    }
    if let Some(v) = filters.max_length {
        cache_pairs.push(("maxl", v.to_string()));
    }
    if let Some(v) = filters.min_duration_ms {
        cache_pairs.push(("mindur", v.to_string()));
    }
    if let Some(v) = filters.max_duration_ms {
        cache_pairs.push(("maxdur", v.to_string()));
    }
    if let Some(r) = &filters.review {
        cache_pairs.push(("user", r.user_id.clone()));
        cache_pairs.push(("maxrev", r.max_reviews.to_string()));
    }
    cache_pairs.push(("page", page.to_string()));
    cache_pairs.push(("size", page_size.to_string()));

    NormalizedQuery {
        extra_langs: subtitle_langs,
        filters,
        page,
        page_size,
        cache_pairs,
    }
}

/// Search response payload / 搜索响应
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResponse {
    pub cards: Vec<CardResult>,
    /// `-1` when the exact total was not computed / 未计数时为-1
    pub total: i64,
    pub page: u32,
    pub page_size: u32,
    #[serde(default)]
    pub cached: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_age_secs: Option<i64>,
}

impl SearchResponse {
    /// Well-formed empty payload, used by failure envelopes / 失败时的空载荷
    pub fn empty() -> Self {
        let cfg = crate::config::config();
        Self {
            cards: Vec::new(),
            total: executor::TOTAL_UNCOUNTED,
            page: 1,
            page_size: cfg.search.page_size_default,
            cached: false,
            cache_age_secs: None,
        }
    }
}

/// Run the full pipeline for one search request / 执行一次完整检索
pub async fn run_search(
    pool: &SqlitePool,
    cache: &Arc<dyn CacheStore>,
    backfill: &Arc<BackfillState>,
    req: &SearchRequest,
) -> Result<SearchResponse, EngineError> {
    let normalized = normalize_request(req);
    let key = normalized.cache_key();

    if let Some(hit) = cache.get(CacheNamespace::Results, &key).await {
        match serde_json::from_value::<SearchResponse>(hit.payload) {
            Ok(mut response) => {
                response.cached = true;
                response.cache_age_secs = Some(hit.age_secs);
                return Ok(response);
            }
            // Any cache problem is a miss, never a failure / 缓存异常按未命中处理
            Err(e) => tracing::warn!("cached search payload failed to decode: {}", e),
        }
    }

    let strategy = choose_strategy(pool, backfill, &normalized.filters).await;
    tracing::debug!("search strategy: {:?}", strategy);

    let window = executor::fetch_window(
        pool,
        &normalized.filters,
        strategy,
        normalized.page,
        normalized.page_size,
    )
    .await?;
    let total = window.total;

    let hydrated = hydrate_window(pool, window.cards, &normalized.extra_langs).await?;
    let mut cards = diversify(hydrated, normalized.page_size as usize);
    cards.truncate(normalized.page_size as usize);

    let response = SearchResponse {
        cards,
        total,
        page: normalized.page,
        page_size: normalized.page_size,
        cached: false,
        cache_age_secs: None,
    };

    // Detached cache write; the response never waits on it / 分离式缓存写入
    match serde_json::to_value(&response) {
        Ok(payload) => {
            let cache = Arc::clone(cache);
            tokio::spawn(async move {
                cache.put(CacheNamespace::Results, key, payload).await;
            });
        }
        Err(e) => tracing::warn!("search response not cacheable: {}", e),
    }

    Ok(response)
}

/// Per-content counts response / 按内容计数响应
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CountsResponse {
    pub counts: Vec<ContentCount>,
    /// True when the exact count was not requested / 未显式要求精确计数
    pub skipped: bool,
    #[serde(default)]
    pub cached: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_age_secs: Option<i64>,
}

/// Exact per-content counts, opt-in. Without `exact` the query is skipped
/// entirely for latency reasons. / 按内容精确计数，默认跳过
pub async fn run_counts(
    pool: &SqlitePool,
    cache: &Arc<dyn CacheStore>,
    backfill: &Arc<BackfillState>,
    req: &SearchRequest,
    exact: bool,
) -> Result<CountsResponse, EngineError> {
    if !exact {
        return Ok(CountsResponse {
            counts: Vec::new(),
            skipped: true,
            cached: false,
            cache_age_secs: None,
        });
    }

    let normalized = normalize_request(req);
    let key = normalized.cache_key_tagged("counts");

    if let Some(hit) = cache.get(CacheNamespace::Suggest, &key).await {
        match serde_json::from_value::<CountsResponse>(hit.payload) {
            Ok(mut response) => {
                response.cached = true;
                response.cache_age_secs = Some(hit.age_secs);
                return Ok(response);
            }
            Err(e) => tracing::warn!("cached counts payload failed to decode: {}", e),
        }
    }

    let strategy = choose_strategy(pool, backfill, &normalized.filters).await;
    let counts = executor::counts_by_content(pool, &normalized.filters, strategy).await?;

    let response = CountsResponse {
        counts,
        skipped: false,
        cached: false,
        cache_age_secs: None,
    };
    match serde_json::to_value(&response) {
        Ok(payload) => {
            let cache = Arc::clone(cache);
            tokio::spawn(async move {
                cache.put(CacheNamespace::Suggest, key, payload).await;
            });
        }
        Err(e) => tracing::warn!("counts response not cacheable: {}", e),
    }
    Ok(response)
}
