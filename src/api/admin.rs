//! Maintenance endpoints / 维护接口
//!
//! Ingestion hooks and operator controls for the coverage index. Access
//! control sits in the fronting gateway, not here.
//! 覆盖索引的运维与写入钩子，鉴权由前置网关负责

use axum::extract::{Path, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use kotocard_backend::db;
use kotocard_backend::search::coverage::{self, BackfillProgress};

use crate::api::ApiResponse;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct CoverageStatus {
    pub indexed_rows: i64,
    pub eligible_cards: i64,
    pub backfill: BackfillProgress,
}

/// GET /api/admin/coverage/status - 覆盖索引状态
pub async fn coverage_status(
    State(state): State<Arc<AppState>>,
) -> Json<ApiResponse<CoverageStatus>> {
    let indexed_rows = match coverage::indexed_row_count(&state.db).await {
        Ok(n) => n,
        Err(e) => {
            tracing::error!("coverage status query failed: {}", e);
            return Json(ApiResponse::error("coverage status unavailable"));
        }
    };
    let eligible_cards = match coverage::eligible_card_count(&state.db).await {
        Ok(n) => n,
        Err(e) => {
            tracing::error!("coverage status query failed: {}", e);
            return Json(ApiResponse::error("coverage status unavailable"));
        }
    };
    Json(ApiResponse::success(CoverageStatus {
        indexed_rows,
        eligible_cards,
        backfill: state.backfill.get_progress(),
    }))
}

#[derive(Debug, Serialize)]
pub struct BackfillStarted {
    /// False when a backfill was already running / 已有回填在运行时为false
    pub started: bool,
}

/// POST /api/admin/coverage/backfill - 触发全量回填
pub async fn start_backfill(State(state): State<Arc<AppState>>) -> Json<ApiResponse<BackfillStarted>> {
    let cfg = kotocard_backend::config::config();
    let started = coverage::spawn_backfill_if_idle(
        &state.db,
        &state.backfill,
        cfg.search.backfill_chunk_size,
    );
    Json(ApiResponse::success(BackfillStarted { started }))
}

#[derive(Debug, Deserialize)]
pub struct ResyncRequest {
    pub card_ids: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct ResyncScheduled {
    pub scheduled: usize,
}

/// POST /api/admin/coverage/resync - 重建指定卡片的覆盖行
///
/// Fire-and-forget, same as the ingestion mutation hook: the response only
/// acknowledges scheduling. / 分离执行，响应仅确认已排队
pub async fn resync(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ResyncRequest>,
) -> Json<ApiResponse<ResyncScheduled>> {
    let scheduled = req.card_ids.len();
    coverage::resync_cards_detached(state.db.clone(), req.card_ids);
    Json(ApiResponse::success(ResyncScheduled { scheduled }))
}

#[derive(Debug, Serialize)]
pub struct CardDeleted {
    pub deleted: bool,
}

/// DELETE /api/admin/cards/:id - 级联删除卡片
pub async fn delete_card(
    State(state): State<Arc<AppState>>,
    Path(card_id): Path<String>,
) -> Json<ApiResponse<CardDeleted>> {
    match db::delete_card_cascade(&state.db, &card_id).await {
        Ok(true) => {
            // Mutation hook: keep the coverage index converging even though
            // the cascade already removed this card's rows / 变更后触发重建钩子
            coverage::resync_cards_detached(state.db.clone(), vec![card_id]);
            Json(ApiResponse::success(CardDeleted { deleted: true }))
        }
        Ok(false) => Json(ApiResponse::error("card not found")),
        Err(e) => {
            tracing::error!("card delete failed: {}", e);
            Json(ApiResponse::failure("card delete failed", CardDeleted { deleted: false }))
        }
    }
}
