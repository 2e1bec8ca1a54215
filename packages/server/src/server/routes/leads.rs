use axum::extract::rejection::JsonRejection;
use axum::extract::{Extension, Path};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::common::LeadId;
use crate::domains::leads::actions::{parse_domains, submit_leads, SubmittedLead};
use crate::domains::leads::LeadDetail;
use crate::server::app::AppState;
use crate::server::error::{ApiError, ApiResult};

#[derive(Debug, Deserialize)]
pub struct CreateLeadsRequest {
    pub domains: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct CreateLeadsResponse {
    pub leads: Vec<SubmittedLead>,
}

/// POST /leads
///
/// Creates a NEW lead and enqueues its scrape for each unknown domain;
/// known domains come back unchanged. Responds 202 since processing is
/// asynchronous.
pub async fn create_leads_handler(
    Extension(state): Extension<AppState>,
    body: Result<Json<CreateLeadsRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<CreateLeadsResponse>)> {
    let Json(request) = body.map_err(|e| ApiError::bad_request(e.body_text()))?;
    let domains = parse_domains(&request.domains).map_err(|e| ApiError::bad_request(e.to_string()))?;

    let leads = submit_leads(&domains, &state.deps).await?;
    Ok((StatusCode::ACCEPTED, Json(CreateLeadsResponse { leads })))
}

/// GET /leads/:id
pub async fn get_lead_handler(
    Extension(state): Extension<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<LeadDetail>> {
    let lead_id = LeadId::parse(&id).map_err(|_| ApiError::bad_request("invalid lead id"))?;

    let detail = state
        .deps
        .lead_store
        .lead_detail(lead_id)
        .await
        .map_err(anyhow::Error::from)?
        .ok_or_else(|| ApiError::not_found(format!("lead {} not found", lead_id)))?;

    Ok(Json(detail))
}
