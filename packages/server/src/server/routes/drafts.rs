use axum::extract::{Extension, Query};
use axum::Json;
use serde::Deserialize;

use crate::domains::leads::{DraftListing, DraftStatus};
use crate::server::app::AppState;
use crate::server::error::{ApiError, ApiResult};

#[derive(Debug, Deserialize)]
pub struct DraftsQuery {
    pub status: Option<String>,
}

/// GET /drafts?status=pending_review
///
/// Drafts newest first with their lead's domain.
pub async fn list_drafts_handler(
    Extension(state): Extension<AppState>,
    Query(query): Query<DraftsQuery>,
) -> ApiResult<Json<Vec<DraftListing>>> {
    let status = query
        .status
        .as_deref()
        .map(str::parse::<DraftStatus>)
        .transpose()
        .map_err(|e| ApiError::bad_request(e.to_string()))?;

    let drafts = state
        .deps
        .lead_store
        .list_drafts(status)
        .await
        .map_err(anyhow::Error::from)?;
    Ok(Json(drafts))
}
