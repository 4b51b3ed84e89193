//! Result hydrator / 结果补水
//!
//! Attaches subtitles (requested languages only) and proficiency-level rows
//! to a window of matched cards. Work is split into fixed-size identity
//! batches per main-language group; batches run concurrently under a bounded
//! fan-out so a wide window cannot overwhelm the store. Absent rows hydrate
//! to empty values, never to an error.
//! 按主语言分组、定长分批并发补水；缺失数据补空值而非报错

use futures::stream::{self, StreamExt};
use sqlx::SqlitePool;
use std::collections::HashMap;

use crate::models::{Card, CardResult, DifficultyLevel, LevelEntry, Subtitle};
use crate::search::executor::EngineError;

fn placeholder_list(n: usize) -> String {
    vec!["?"; n].join(", ")
}

/// One batch worth of secondary rows / 单批次的二级数据
struct BatchRows {
    subtitles: Vec<Subtitle>,
    levels: Vec<DifficultyLevel>,
}

async fn fetch_batch(
    pool: SqlitePool,
    card_ids: Vec<String>,
    languages: Vec<String>,
) -> Result<BatchRows, sqlx::Error> {
    let subtitle_sql = format!(
        "SELECT card_id, language, text FROM subtitles \
         WHERE card_id IN ({}) AND language IN ({}) AND text <> ''",
        placeholder_list(card_ids.len()),
        placeholder_list(languages.len())
    );
    let mut query = sqlx::query_as::<_, Subtitle>(&subtitle_sql);
    for id in &card_ids {
        query = query.bind(id.clone());
    }
    for lang in &languages {
        query = query.bind(lang.clone());
    }
    let subtitles = query.fetch_all(&pool).await?;

    let level_sql = format!(
        "SELECT card_id, framework, level, language FROM difficulty_levels \
         WHERE card_id IN ({})",
        placeholder_list(card_ids.len())
    );
    let mut query = sqlx::query_as::<_, DifficultyLevel>(&level_sql);
    for id in &card_ids {
        query = query.bind(id.clone());
    }
    let levels = query.fetch_all(&pool).await?;

    Ok(BatchRows { subtitles, levels })
}

/// Hydrate a match window with explicit batch and concurrency bounds
/// 以显式批量与并发参数补水
pub async fn hydrate_with(
    pool: &SqlitePool,
    cards: Vec<Card>,
    extra_langs: &[String],
    batch_size: usize,
    concurrency: usize,
) -> Result<Vec<CardResult>, EngineError> {
    if cards.is_empty() {
        return Ok(Vec::new());
    }

    // Main language per content item, one lookup for the whole window
    // 整个窗口一次性查出各内容的主语言
    let mut content_ids: Vec<String> = cards.iter().map(|c| c.content_id.clone()).collect();
    content_ids.sort();
    content_ids.dedup();
    let sql = format!(
        "SELECT id, main_language FROM contents WHERE id IN ({})",
        placeholder_list(content_ids.len())
    );
    let mut query = sqlx::query_as::<_, (String, String)>(&sql);
    for id in &content_ids {
        query = query.bind(id.clone());
    }
    let main_by_content: HashMap<String, String> =
        query.fetch_all(pool).await?.into_iter().collect();

    // Group card ids by main language so each group fetches exactly its own
    // language set / 按主语言分组，每组只取自己的语言集合
    let mut groups: HashMap<String, Vec<String>> = HashMap::new();
    for card in &cards {
        let main = main_by_content
            .get(&card.content_id)
            .cloned()
            .unwrap_or_default();
        groups.entry(main).or_default().push(card.id.clone());
    }

    let mut batches = Vec::new();
    for (main, ids) in groups {
        let mut languages: Vec<String> = Vec::with_capacity(extra_langs.len() + 1);
        if !main.is_empty() {
            languages.push(main);
        }
        for lang in extra_langs {
            if !lang.is_empty() && !languages.contains(lang) {
                languages.push(lang.clone());
            }
        }
        if languages.is_empty() {
            // No language to fetch text for; levels still hydrate / 仍需补等级
            languages.push(String::new());
        }
        for chunk in ids.chunks(batch_size.max(1)) {
            batches.push(fetch_batch(pool.clone(), chunk.to_vec(), languages.clone()));
        }
    }

    let fetched: Vec<Result<BatchRows, sqlx::Error>> = stream::iter(batches)
        .buffer_unordered(concurrency.max(1))
        .collect()
        .await;

    let mut subtitle_map: HashMap<String, HashMap<String, String>> = HashMap::new();
    let mut level_map: HashMap<String, Vec<LevelEntry>> = HashMap::new();
    for batch in fetched {
        let batch = batch?;
        for row in batch.subtitles {
            subtitle_map
                .entry(row.card_id)
                .or_default()
                .insert(row.language, row.text);
        }
        for row in batch.levels {
            level_map.entry(row.card_id.clone()).or_default().push(LevelEntry {
                framework: row.framework,
                level: row.level,
                language: row.language,
            });
        }
    }

    // Join back in window order / 按窗口顺序回接
    let results = cards
        .into_iter()
        .map(|card| {
            let id = card.id.clone();
            let mut result = CardResult::from_card(card);
            if let Some(subs) = subtitle_map.remove(&id) {
                result.subtitles = subs;
            }
            if let Some(mut levels) = level_map.remove(&id) {
                levels.sort_by(|a, b| {
                    a.framework.cmp(&b.framework).then_with(|| a.language.cmp(&b.language))
                });
                result.levels = levels;
            }
            result
        })
        .collect();
    Ok(results)
}

/// Hydrate using the configured batch size and fan-out / 按配置补水
pub async fn hydrate_window(
    pool: &SqlitePool,
    cards: Vec<Card>,
    extra_langs: &[String],
) -> Result<Vec<CardResult>, EngineError> {
    let cfg = crate::config::config();
    hydrate_with(
        pool,
        cards,
        extra_langs,
        cfg.search.hydrate_batch_size,
        cfg.search.hydrate_concurrency,
    )
    .await
}
