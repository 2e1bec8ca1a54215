//! Application setup and server configuration.

use axum::{
    extract::Extension,
    http::{header::CONTENT_TYPE, Method},
    routing::{get, post},
    Router,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::kernel::ServerDeps;
use crate::server::routes::{
    create_leads_handler, get_lead_handler, health_handler, list_drafts_handler,
    queue_stats_handler,
};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub deps: ServerDeps,
}

/// Build the Axum application router
pub fn build_app(deps: ServerDeps) -> Router {
    let app_state = AppState { deps };

    // CORS configuration - allow any origin for the review tooling
    let cors = CorsLayer::new()
        .allow_origin(tower_http::cors::Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([CONTENT_TYPE]);

    Router::new()
        .route("/leads", post(create_leads_handler))
        .route("/leads/:id", get(get_lead_handler))
        .route("/drafts", get(list_drafts_handler))
        .route("/queues", get(queue_stats_handler))
        .route("/health", get(health_handler))
        // Middleware layers (applied in reverse order - last added runs first)
        .layer(Extension(app_state))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use crate::domains::leads::jobs::SCRAPING_QUEUE;
    use crate::kernel::TestDependencies;

    async fn send(app: Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, body)
    }

    fn post_leads(body: &str) -> Request<Body> {
        Request::post("/leads")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_create_leads_enqueues_scrape() {
        let test = TestDependencies::new();
        let app = build_app(test.server_deps());

        let (status, body) = send(
            app,
            post_leads(&json!({ "domains": ["Example.com"] }).to_string()),
        )
        .await;

        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(body["leads"][0]["domain"], "example.com");
        assert_eq!(body["leads"][0]["status"], "NEW");
        assert_eq!(body["leads"][0]["created"], true);
        assert_eq!(test.job_queue.len(SCRAPING_QUEUE), 1);
    }

    #[tokio::test]
    async fn test_create_leads_rejects_bad_input() {
        let test = TestDependencies::new();

        for body in [r#"{"domains": []}"#, r#"{"domains": ["  "]}"#, r#"{"nope": 1}"#, "not json"] {
            let (status, payload) = send(build_app(test.server_deps()), post_leads(body)).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "{}", body);
            assert_eq!(payload["error_code"], "BAD_REQUEST");
        }
        assert_eq!(test.job_queue.len(SCRAPING_QUEUE), 0);
    }

    #[tokio::test]
    async fn test_get_lead() {
        let test = TestDependencies::new();
        let deps = test.server_deps();
        let (lead, _) = deps.lead_store.create_or_find_lead("example.com").await.unwrap();

        let (status, body) = send(
            build_app(deps.clone()),
            Request::get(format!("/leads/{}", lead.id)).body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["domain"], "example.com");
        assert_eq!(body["scraped_data"], Value::Null);
        assert_eq!(body["email_drafts"], json!([]));

        let (status, _) = send(
            build_app(deps.clone()),
            Request::get(format!("/leads/{}", uuid::Uuid::new_v4()))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = send(
            build_app(deps),
            Request::get("/leads/not-a-uuid").body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_list_drafts_validates_status() {
        let test = TestDependencies::new();

        let (status, body) = send(
            build_app(test.server_deps()),
            Request::get("/drafts?status=pending_review").body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!([]));

        let (status, _) = send(
            build_app(test.server_deps()),
            Request::get("/drafts?status=archived").body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_queue_stats_and_health() {
        let test = TestDependencies::new();

        let (status, body) = send(
            build_app(test.server_deps()),
            Request::get("/queues").body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.as_array().unwrap().len(), 3);
        assert_eq!(body[0]["queue"], "scraping-queue");
        assert_eq!(body[0]["waiting"], 0);

        let (status, body) = send(
            build_app(test.server_deps()),
            Request::get("/health").body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
    }
}
