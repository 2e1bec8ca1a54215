use axum::extract::Extension;
use axum::Json;
use serde::Serialize;

use crate::domains::leads::ALL_QUEUES;
use crate::kernel::jobs::JobCounts;
use crate::server::app::AppState;
use crate::server::error::ApiResult;

#[derive(Debug, Serialize)]
pub struct QueueStats {
    pub queue: &'static str,
    #[serde(flatten)]
    pub counts: JobCounts,
}

/// GET /queues
pub async fn queue_stats_handler(
    Extension(state): Extension<AppState>,
) -> ApiResult<Json<Vec<QueueStats>>> {
    let mut stats = Vec::with_capacity(ALL_QUEUES.len());
    for queue in ALL_QUEUES {
        let counts = state.deps.job_queue.counts(queue).await?;
        stats.push(QueueStats { queue, counts });
    }
    Ok(Json(stats))
}
