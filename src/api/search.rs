//! Search endpoints / 搜索接口
//!
//! Thin handlers over the library pipeline: extract parameters, run, wrap in
//! the response envelope. Engine failures are logged and mapped to a failure
//! envelope with an empty payload; malformed parameters never reject a
//! request. / 薄处理器：参数一律宽松解析，引擎错误映射为失败信封

use axum::extract::{Query, State};
use axum::Json;
use serde::Deserialize;
use std::sync::Arc;

use kotocard_backend::search::pipeline::{
    run_counts, run_search, CountsResponse, SearchRequest, SearchResponse,
};
use kotocard_backend::search::suggest::{run_suggest, SuggestRequest, SuggestResponse};

use crate::api::ApiResponse;
use crate::state::AppState;

/// GET /api/search - 检索卡片
pub async fn search(
    State(state): State<Arc<AppState>>,
    Query(req): Query<SearchRequest>,
) -> Json<ApiResponse<SearchResponse>> {
    match run_search(&state.db, &state.cache, &state.backfill, &req).await {
        Ok(response) => Json(ApiResponse::success(response)),
        Err(e) => {
            tracing::error!("search failed: {}", e);
            Json(ApiResponse::failure("search failed", SearchResponse::empty()))
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CountFlags {
    pub exact: Option<String>,
}

/// GET /api/search/counts - 按内容计数（需显式exact=true）
pub async fn counts(
    State(state): State<Arc<AppState>>,
    Query(req): Query<SearchRequest>,
    Query(flags): Query<CountFlags>,
) -> Json<ApiResponse<CountsResponse>> {
    let exact = matches!(flags.exact.as_deref(), Some("true") | Some("1"));
    match run_counts(&state.db, &state.cache, &state.backfill, &req, exact).await {
        Ok(response) => Json(ApiResponse::success(response)),
        Err(e) => {
            tracing::error!("counts failed: {}", e);
            Json(ApiResponse::failure(
                "counts failed",
                CountsResponse {
                    counts: Vec::new(),
                    skipped: true,
                    cached: false,
                    cache_age_secs: None,
                },
            ))
        }
    }
}

/// GET /api/search/suggest - 自动补全
pub async fn suggest(
    State(state): State<Arc<AppState>>,
    Query(req): Query<SuggestRequest>,
) -> Json<ApiResponse<SuggestResponse>> {
    match run_suggest(&state.db, &state.cache, &req).await {
        Ok(response) => Json(ApiResponse::success(response)),
        Err(e) => {
            tracing::error!("suggest failed: {}", e);
            Json(ApiResponse::failure(
                "suggest failed",
                SuggestResponse {
                    terms: Vec::new(),
                    cached: false,
                    cache_age_secs: None,
                },
            ))
        }
    }
}
