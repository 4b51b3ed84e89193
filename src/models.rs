use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Card: the atomic retrievable unit, one subtitle-aligned fragment / 卡片
///
/// `sentence` is the display snapshot of the main-language subtitle;
/// `sentence_norm` is the match form produced by `search::text::normalize_sentence`.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Card {
    pub id: String,
    pub episode_id: String,
    pub content_id: String,
    pub seq: i64,
    pub start_ms: i64,
    pub end_ms: i64,
    pub duration_ms: i64,
    pub image_key: Option<String>,
    pub audio_key: Option<String>,
    pub sentence: String,
    #[serde(skip_serializing)]
    pub sentence_norm: String,
    pub kind: String,
    pub length: i64,
    pub difficulty: Option<i64>,
    pub enabled: bool,
    pub created_at: String,
    pub updated_at: String,
}

/// Subtitle row: at most one per (card, language) / 字幕行
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Subtitle {
    pub card_id: String,
    pub language: String,
    pub text: String,
}

/// Proficiency level row for one framework / 等级行
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct DifficultyLevel {
    pub card_id: String,
    pub framework: String,
    pub level: String,
    pub language: String,
}

/// A card hydrated with its requested subtitles and level rows / 补全后的卡片
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CardResult {
    pub id: String,
    pub content_id: String,
    pub episode_id: String,
    pub seq: i64,
    pub start_ms: i64,
    pub end_ms: i64,
    pub duration_ms: i64,
    pub image_key: Option<String>,
    pub audio_key: Option<String>,
    pub sentence: String,
    pub kind: String,
    pub length: i64,
    pub difficulty: Option<i64>,
    /// language code -> subtitle text, only requested languages / 仅包含请求的语言
    pub subtitles: HashMap<String, String>,
    pub levels: Vec<LevelEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LevelEntry {
    pub framework: String,
    pub level: String,
    pub language: String,
}

impl CardResult {
    /// Build the response shape from a raw card row; secondary data is
    /// attached by the hydrator afterwards / 由原始行构建，二级数据由补水器填充
    pub fn from_card(card: Card) -> Self {
        Self {
            id: card.id,
            content_id: card.content_id,
            episode_id: card.episode_id,
            seq: card.seq,
            start_ms: card.start_ms,
            end_ms: card.end_ms,
            duration_ms: card.duration_ms,
            image_key: card.image_key,
            audio_key: card.audio_key,
            sentence: card.sentence,
            kind: card.kind,
            length: card.length,
            difficulty: card.difficulty,
            subtitles: HashMap::new(),
            levels: Vec::new(),
        }
    }
}
