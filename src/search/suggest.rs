//! Autocomplete suggestions / 自动补全
//!
//! Ranked term completions from the precomputed `word_frequency` table. When
//! the table has nothing for a prefix (fresh deployment or a language the
//! ingestion job has not counted yet), terms are derived live from a bounded
//! scan of subtitle text. Results share the longer-TTL cache namespace with
//! count queries. / 词频表缺数据时从字幕文本有界扫描现场推导

use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::sync::Arc;

use crate::cache::{cache_key, CacheNamespace, CacheStore};
use crate::search::executor::EngineError;
use crate::search::text::{contains_script, escape_like, normalize_prefix, normalize_sentence};

/// Suggestions returned per request / 每次返回的建议数
const SUGGEST_LIMIT: usize = 10;
/// Subtitle rows scanned by the live fallback / 现场回退扫描的行数上限
const LIVE_SCAN_ROWS: i64 = 300;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SuggestRequest {
    pub q: Option<String>,
    pub language: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TermSuggestion {
    pub term: String,
    pub freq: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuggestResponse {
    pub terms: Vec<TermSuggestion>,
    #[serde(default)]
    pub cached: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_age_secs: Option<i64>,
}

impl SuggestResponse {
    fn empty() -> Self {
        Self {
            terms: Vec::new(),
            cached: false,
            cache_age_secs: None,
        }
    }
}

fn rank(mut terms: Vec<TermSuggestion>) -> Vec<TermSuggestion> {
    terms.sort_by(|a, b| b.freq.cmp(&a.freq).then_with(|| a.term.cmp(&b.term)));
    terms.truncate(SUGGEST_LIMIT);
    terms
}

async fn table_lookup(
    pool: &SqlitePool,
    prefix: &str,
    language: Option<&str>,
) -> Result<Vec<TermSuggestion>, sqlx::Error> {
    let pattern = format!("{}%", escape_like(prefix));
    let rows: Vec<(String, i64)> = match language {
        Some(lang) => {
            sqlx::query_as(
                "SELECT term, freq FROM word_frequency \
                 WHERE language = ? AND term LIKE ? ESCAPE '\\' \
                 ORDER BY freq DESC, term ASC LIMIT ?",
            )
            .bind(lang)
            .bind(&pattern)
            .bind(SUGGEST_LIMIT as i64)
            .fetch_all(pool)
            .await?
        }
        // No language given: aggregate over all of them / 未指定语言时跨语言聚合
        None => {
            sqlx::query_as(
                "SELECT term, SUM(freq) AS freq FROM word_frequency \
                 WHERE term LIKE ? ESCAPE '\\' \
                 GROUP BY term ORDER BY freq DESC, term ASC LIMIT ?",
            )
            .bind(&pattern)
            .bind(SUGGEST_LIMIT as i64)
            .fetch_all(pool)
            .await?
        }
    };
    Ok(rows
        .into_iter()
        .map(|(term, freq)| TermSuggestion { term, freq })
        .collect())
}

/// Derive completions from subtitle text when the frequency table is empty
/// for this prefix. Bounded scan, never a full-table pass.
/// 词频表无数据时的有界现场推导
async fn live_fallback(
    pool: &SqlitePool,
    prefix: &str,
    language: Option<&str>,
) -> Result<Vec<TermSuggestion>, sqlx::Error> {
    let pattern = format!("%{}%", escape_like(prefix));
    let texts: Vec<String> = match language {
        Some(lang) => {
            sqlx::query_scalar(
                "SELECT text FROM subtitles \
                 WHERE language = ? AND text LIKE ? ESCAPE '\\' LIMIT ?",
            )
            .bind(lang)
            .bind(&pattern)
            .bind(LIVE_SCAN_ROWS)
            .fetch_all(pool)
            .await?
        }
        None => {
            sqlx::query_scalar("SELECT text FROM subtitles WHERE text LIKE ? ESCAPE '\\' LIMIT ?")
                .bind(&pattern)
                .bind(LIVE_SCAN_ROWS)
                .fetch_all(pool)
                .await?
        }
    };

    if contains_script(prefix) {
        // Script text has no word boundaries; report the prefix itself with
        // its occurrence count / 无词界文字只统计前缀本身的出现次数
        let count = texts
            .iter()
            .filter(|t| normalize_sentence(t).contains(prefix))
            .count() as i64;
        if count == 0 {
            return Ok(Vec::new());
        }
        return Ok(vec![TermSuggestion {
            term: prefix.to_string(),
            freq: count,
        }]);
    }

    let mut counts: HashMap<String, i64> = HashMap::new();
    for text in &texts {
        for token in normalize_sentence(text).split_whitespace() {
            if token.starts_with(prefix) {
                *counts.entry(token.to_string()).or_insert(0) += 1;
            }
        }
    }
    Ok(counts
        .into_iter()
        .map(|(term, freq)| TermSuggestion { term, freq })
        .collect())
}

/// Run one suggest request. Prefixes shorter than two characters return an
/// empty list without touching the store. / 前缀短于两字符直接返回空
pub async fn run_suggest(
    pool: &SqlitePool,
    cache: &Arc<dyn CacheStore>,
    req: &SuggestRequest,
) -> Result<SuggestResponse, EngineError> {
    let Some(prefix) = req.q.as_deref().and_then(normalize_prefix) else {
        return Ok(SuggestResponse::empty());
    };
    if prefix.chars().count() < 2 {
        return Ok(SuggestResponse::empty());
    }
    let language = req
        .language
        .as_deref()
        .map(|l| l.trim().to_lowercase())
        .filter(|l| !l.is_empty());

    let key = cache_key(&[
        ("op", "suggest".to_string()),
        ("q", prefix.clone()),
        ("lang", language.clone().unwrap_or_default()),
    ]);
    if let Some(hit) = cache.get(CacheNamespace::Suggest, &key).await {
        match serde_json::from_value::<SuggestResponse>(hit.payload) {
            Ok(mut response) => {
                response.cached = true;
                response.cache_age_secs = Some(hit.age_secs);
                return Ok(response);
            }
            Err(e) => tracing::warn!("cached suggest payload failed to decode: {}", e),
        }
    }

    let mut terms = table_lookup(pool, &prefix, language.as_deref()).await?;
    if terms.is_empty() {
        terms = live_fallback(pool, &prefix, language.as_deref()).await?;
    }

    let response = SuggestResponse {
        terms: rank(terms),
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
        Err(e) => tracing::warn!("suggest response not cacheable: {}", e),
    }
    Ok(response)
}
