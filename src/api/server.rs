//! Service endpoints / 服务接口

use axum::extract::State;
use axum::Json;
use serde_json::{json, Value};
use std::sync::Arc;

use kotocard_backend::search::coverage;

use crate::state::AppState;

/// GET /api/health - 健康检查
///
/// Liveness plus the corpus and coverage counters operators watch. Counter
/// failures degrade to `-1`, the endpoint itself always answers.
/// 计数失败降级为-1，接口本身始终应答
pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<Value> {
    let cards = coverage::eligible_card_count(&state.db).await.unwrap_or(-1);
    let coverage_rows = coverage::indexed_row_count(&state.db).await.unwrap_or(-1);
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "build_time": env!("BUILD_TIME"),
        "cards": cards,
        "coverage_rows": coverage_rows,
        "backfill_running": state.backfill.is_running(),
    }))
}
