//! Card retrieval engine / 卡片检索引擎
//!
//! Pipeline layout / 管线结构：
//! - `text` normalizes free-text queries and corpus sentences into one
//!   matching form (word regime for space-delimited languages, substring
//!   regime for CJK text)
//! - `planner` picks how the subtitle-coverage constraint is executed,
//!   reading the coverage index fill
//! - `executor` composes the fixed-order predicate set and runs the
//!   over-fetched window query
//! - `hydrate` attaches subtitles and proficiency levels in bounded
//!   concurrent batches
//! - `diversify` round-robins a page across content items
//! - `coverage` maintains the derived card_languages index out-of-band
//! - `pipeline` and `suggest` front the whole thing behind the result cache
//!
//! Call direction is API → pipeline → stages; stages never call upward.
//! 调用方向单向：API → 管线 → 各阶段

pub mod coverage;
pub mod diversify;
pub mod executor;
pub mod hydrate;
pub mod pipeline;
pub mod planner;
pub mod suggest;
pub mod text;

pub use coverage::{BackfillProgress, BackfillState};
pub use executor::{ContentCount, EngineError, SearchFilters, TOTAL_UNCOUNTED};
pub use pipeline::{run_counts, run_search, CountsResponse, SearchRequest, SearchResponse};
pub use planner::QueryStrategy;
pub use suggest::{run_suggest, SuggestRequest, SuggestResponse};
pub use text::{build_predicate, normalize_sentence, MatchRegime, TextPredicate};
