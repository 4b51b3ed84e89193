//! Text normalizer and query builder / 文本归一化与查询谓词构建
//!
//! Turns a raw user query into a LIKE pattern plus the regime it was built
//! under. Two regimes / 两种匹配模式：
//! - Words: space-delimited languages; punctuation stripped, tokens capped,
//!   matched whole-word against `' ' || sentence_norm || ' '`
//! - Script: logographic/syllabic scripts (kanji/kana, hanzi, hangul);
//!   whitespace removed, bracketed reading annotations stripped, matched as
//!   a substring of `sentence_norm`
//!
//! Everything here is a pure function of its input / 纯函数，无副作用

use once_cell::sync::Lazy;
use regex::Regex;

/// Inline reading annotations: `漢字[かんじ]` or full-width `漢字［かんじ］`
/// 行内注音标注
static READING_ANNOTATION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[\[［][^\]］]*[\]］]").expect("reading annotation regex"));

/// Which tokenization regime produced a predicate / 谓词的构建模式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchRegime {
    /// Space-delimited whole-word / phrase matching / 空格分词模式
    Words,
    /// Script-aware substring matching / 文字感知子串模式
    Script,
}

/// An opaque predicate ready for binding into a LIKE clause / 可绑定的谓词
///
/// `pattern` is always bound as a parameter, never interpolated; `%` and `_`
/// inside user text are escaped with `\` (clause side uses `ESCAPE '\'`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextPredicate {
    pub pattern: String,
    pub regime: MatchRegime,
}

impl TextPredicate {
    /// Render the clause for a normalized-sentence column, returning the
    /// pattern to bind. Word patterns match against the space-padded column
    /// so edge tokens hit the `% token %` form. / 返回子句与待绑定的模式
    pub fn like_clause(&self, column: &str) -> (String, String) {
        let clause = match self.regime {
            MatchRegime::Words => format!("' ' || {} || ' ' LIKE ? ESCAPE '\\'", column),
            MatchRegime::Script => format!("{} LIKE ? ESCAPE '\\'", column),
        };
        (clause, self.pattern.clone())
    }
}

/// Check if text contains logographic/syllabic script codepoints
/// 检测文本是否包含CJK字符
pub fn contains_script(text: &str) -> bool {
    text.chars().any(|c| {
        matches!(c,
            '\u{4e00}'..='\u{9fff}' |  // CJK Unified Ideographs
            '\u{3400}'..='\u{4dbf}' |  // CJK Extension A
            '\u{3040}'..='\u{309f}' |  // Hiragana
            '\u{30a0}'..='\u{30ff}' |  // Katakana
            '\u{ac00}'..='\u{d7af}'    // Hangul Syllables
        )
    })
}

/// Escape LIKE wildcards in user-supplied text / 转义LIKE通配符
pub fn escape_like(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Build the free-text predicate for a raw query / 构建自由文本谓词
///
/// Returns `None` when the cleaned query has no usable tokens; callers must
/// treat that as "no text filter", not "match nothing".
/// 清洗后无可用词时返回None，调用方必须视为"无文本过滤"
pub fn build_predicate(raw: &str, max_tokens: usize) -> Option<TextPredicate> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if contains_script(raw) {
        script_predicate(raw)
    } else {
        words_predicate(raw, max_tokens)
    }
}

/// Script regime: these scripts are not space-delimited, so whitespace is
/// removed outright and the rest becomes one substring phrase
/// 文字模式：去除全部空白后整体作为子串短语
fn script_predicate(raw: &str) -> Option<TextPredicate> {
    let stripped = READING_ANNOTATION.replace_all(raw, "");
    let cleaned: String = stripped
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect::<String>()
        .to_lowercase();
    if cleaned.is_empty() {
        return None;
    }
    Some(TextPredicate {
        pattern: format!("%{}%", escape_like(&cleaned)),
        regime: MatchRegime::Script,
    })
}

/// Words regime: strip punctuation, collapse whitespace, cap token count.
/// One token becomes a whole-word predicate, several an ordered phrase; a
/// quoted input is the phrase verbatim with punctuation stripped inside.
/// 空格模式：去标点、折叠空白、截断词数
fn words_predicate(raw: &str, max_tokens: usize) -> Option<TextPredicate> {
    let body = strip_quotes(raw);
    let cleaned: String = body
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect::<String>()
        .to_lowercase();

    let tokens: Vec<&str> = cleaned
        .split_whitespace()
        .take(max_tokens.max(1))
        .collect();
    if tokens.is_empty() {
        return None;
    }

    // Space padding makes the bound pattern whole-word at both ends when
    // matched against ' ' || sentence_norm || ' ' / 两端空格保证整词匹配
    Some(TextPredicate {
        pattern: format!("% {} %", tokens.join(" ")),
        regime: MatchRegime::Words,
    })
}

fn strip_quotes(raw: &str) -> &str {
    let bytes = raw.as_bytes();
    if raw.len() >= 2 && bytes[0] == b'"' && bytes[raw.len() - 1] == b'"' {
        &raw[1..raw.len() - 1]
    } else {
        raw
    }
}

/// Canonical corpus-side normalization, the producer of `cards.sentence_norm`
/// and the live-suggest term source. Applies the same pipeline queries go
/// through so predicates and corpus text always agree.
/// 语料侧归一化，与查询侧使用同一套清洗流程
pub fn normalize_sentence(text: &str) -> String {
    if contains_script(text) {
        READING_ANNOTATION
            .replace_all(text, "")
            .chars()
            .filter(|c| !c.is_whitespace())
            .collect::<String>()
            .to_lowercase()
    } else {
        text.chars()
            .map(|c| if c.is_alphanumeric() { c } else { ' ' })
            .collect::<String>()
            .to_lowercase()
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Normalize an autocomplete prefix: first usable token, lowercased,
/// punctuation stripped / 归一化自动补全前缀
pub fn normalize_prefix(raw: &str) -> Option<String> {
    let cleaned: String = raw
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect::<String>()
        .to_lowercase();
    cleaned.split_whitespace().next().map(|t| t.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn two_word_query_builds_phrase() {
        let p = build_predicate("hello world", 8).unwrap();
        assert_eq!(p.pattern, "% hello world %");
        assert_eq!(p.regime, MatchRegime::Words);
    }

    #[test]
    fn single_token_is_whole_word() {
        let p = build_predicate("Hello!", 8).unwrap();
        assert_eq!(p.pattern, "% hello %");
    }

    #[test]
    fn one_char_query_is_accepted_for_search() {
        let p = build_predicate("a", 8).unwrap();
        assert_eq!(p.pattern, "% a %");
    }

    #[test]
    fn all_punctuation_yields_none() {
        assert!(build_predicate("!!! ...?", 8).is_none());
        assert!(build_predicate("   ", 8).is_none());
        assert!(build_predicate("", 8).is_none());
    }

    #[test]
    fn quoted_input_is_verbatim_phrase() {
        let p = build_predicate("\"hello, world\"", 8).unwrap();
        assert_eq!(p.pattern, "% hello world %");
    }

    #[test]
    fn token_count_is_capped() {
        let p = build_predicate("a b c d e f g h i j", 8).unwrap();
        assert_eq!(p.pattern, "% a b c d e f g h %");
    }

    #[test]
    fn script_query_strips_reading_annotations() {
        let p = build_predicate("漢字[かんじ]を読む", 8).unwrap();
        assert_eq!(p.pattern, "%漢字を読む%");
        assert_eq!(p.regime, MatchRegime::Script);
    }

    #[test]
    fn script_query_strips_fullwidth_annotations_and_whitespace() {
        let p = build_predicate("日本 語［にほんご］ を学ぶ", 8).unwrap();
        assert_eq!(p.pattern, "%日本語を学ぶ%");
    }

    #[test]
    fn annotation_only_script_query_yields_none() {
        assert!(build_predicate("[かんじ]", 8).is_none());
    }

    #[test]
    fn like_wildcards_are_escaped() {
        let p = build_predicate("100%達成", 8).unwrap();
        assert_eq!(p.pattern, "%100\\%達成%");
    }

    #[test]
    fn normalize_sentence_words_regime() {
        assert_eq!(normalize_sentence("Hello, world!"), "hello world");
        assert_eq!(normalize_sentence("  It's   fine.  "), "it s fine");
    }

    #[test]
    fn normalize_sentence_script_regime() {
        assert_eq!(normalize_sentence("漢字[かんじ]を 読む。"), "漢字を読む。");
    }

    #[test]
    fn normalized_corpus_matches_whole_word_pattern() {
        // The padded pattern and the padded corpus form must agree / 两侧约定一致
        let norm = normalize_sentence("Hello, world!");
        let padded = format!(" {} ", norm);
        let p = build_predicate("hello", 8).unwrap();
        let needle = p.pattern.trim_matches('%');
        assert!(padded.contains(needle));
    }

    #[test]
    fn prefix_normalization() {
        assert_eq!(normalize_prefix("Hel"), Some("hel".to_string()));
        assert_eq!(normalize_prefix("  \"wor"), Some("wor".to_string()));
        assert_eq!(normalize_prefix("?!"), None);
        assert_eq!(normalize_prefix("読む"), Some("読む".to_string()));
    }
}
