//! Route handlers for the gateway API.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;

use outreach_core::error::OutreachError;
use outreach_core::types::{DeliveryAttempt, DispatchSummary, Job};
use outreach_dispatch::{schedule_campaign, CampaignRequest, ScheduledCampaign};

use super::server::AppState;

/// Handler error: an internal error with an HTTP status.
pub enum ApiError {
    NotFound(String),
    Internal(OutreachError),
}

impl From<OutreachError> for ApiError {
    fn from(e: OutreachError) -> Self {
        ApiError::Internal(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(what) => (StatusCode::NOT_FOUND, what),
            ApiError::Internal(e) => {
                let status = match &e {
                    OutreachError::Validation(_) => StatusCode::BAD_REQUEST,
                    OutreachError::Provider(_) => StatusCode::BAD_GATEWAY,
                    _ => StatusCode::INTERNAL_SERVER_ERROR,
                };
                if status == StatusCode::INTERNAL_SERVER_ERROR {
                    tracing::error!("Request failed: {e}");
                }
                (status, e.to_string())
            }
        };
        (status, Json(serde_json::json!({"ok": false, "error": message}))).into_response()
    }
}

/// Liveness check (public).
pub async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "ok": true,
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

#[derive(Debug, Deserialize)]
pub struct DispatchParams {
    /// Override the configured batch size for this invocation.
    pub limit: Option<u32>,
}

/// Run one dispatcher invocation and return the per-job summary.
/// Safe to trigger from overlapping crons; claims keep the work disjoint.
pub async fn trigger_dispatch(
    State(state): State<Arc<AppState>>,
    Query(params): Query<DispatchParams>,
) -> Result<Json<DispatchSummary>, ApiError> {
    // The override can shrink a batch but never exceed the configured size.
    let limit = params.limit.map(|l| l.min(state.batch_size));
    let summary = state.dispatcher.run_once(limit).await?;
    Ok(Json(summary))
}

/// Create a campaign: validate the cadence and materialize its jobs.
pub async fn create_campaign(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CampaignRequest>,
) -> Result<(StatusCode, Json<ScheduledCampaign>), ApiError> {
    let scheduled = schedule_campaign(&state.store, state.max_attempts, request)?;
    Ok((StatusCode::CREATED, Json(scheduled)))
}

/// All jobs belonging to a campaign, in occurrence order.
pub async fn campaign_jobs(
    State(state): State<Arc<AppState>>,
    Path(campaign_id): Path<String>,
) -> Result<Json<Vec<Job>>, ApiError> {
    Ok(Json(state.store.jobs_for_campaign(&campaign_id)?))
}

/// Cancel a campaign's remaining pending jobs.
pub async fn cancel_campaign(
    State(state): State<Arc<AppState>>,
    Path(campaign_id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let cancelled = state.store.cancel_campaign(&campaign_id)?;
    tracing::info!("Campaign {campaign_id}: cancelled {cancelled} pending job(s)");
    Ok(Json(serde_json::json!({
        "campaignId": campaign_id,
        "cancelled": cancelled,
    })))
}

pub async fn get_job(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<String>,
) -> Result<Json<Job>, ApiError> {
    state
        .store
        .get(&job_id)?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("no job with id {job_id}")))
}

/// Delivery audit trail for one job, oldest attempt first.
pub async fn job_attempts(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<String>,
) -> Result<Json<Vec<DeliveryAttempt>>, ApiError> {
    if state.store.get(&job_id)?.is_none() {
        return Err(ApiError::NotFound(format!("no job with id {job_id}")));
    }
    Ok(Json(state.store.attempts_for(&job_id)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use axum::Router;
    use outreach_core::config::OutreachConfig;
    use outreach_providers::MockProvider;
    use outreach_store::JobStore;
    use tower::ServiceExt;

    const SECRET: &str = "s3cret";

    fn app() -> Router {
        let mut config = OutreachConfig::default();
        config.gateway.dispatch_secret = SECRET.into();
        let store = Arc::new(JobStore::in_memory().unwrap());
        super::super::build_router(AppState::new(
            store,
            Arc::new(MockProvider::new()),
            &config,
        ))
    }

    fn campaign_body(id: &str, cadence: &str) -> String {
        serde_json::json!({
            "campaignId": id,
            "recipient": "agent@example.com",
            "subject": "Quarterly review",
            "content": "<p>Hello</p>",
            "cadenceType": cadence,
            "scheduledAt": "2024-03-01T09:00:00Z",
        })
        .to_string()
    }

    fn post(uri: &str, body: String) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("X-Dispatch-Secret", SECRET)
            .header("content-type", "application/json")
            .body(Body::from(body))
            .unwrap()
    }

    fn get_req(uri: &str) -> Request<Body> {
        Request::builder()
            .uri(uri)
            .header("X-Dispatch-Secret", SECRET)
            .body(Body::empty())
            .unwrap()
    }

    async fn json_body(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health_is_public() {
        let response = app()
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["ok"], true);
    }

    #[tokio::test]
    async fn test_api_requires_secret() {
        let response = app()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/v1/dispatch")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = app()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/v1/dispatch")
                    .header("X-Dispatch-Secret", "wrong")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_create_campaign_and_list_jobs() {
        let app = app();
        let response = app
            .clone()
            .oneshot(post("/api/v1/campaigns", campaign_body("c1", "weekly")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let body = json_body(response).await;
        assert_eq!(body["campaignId"], "c1");
        assert_eq!(body["jobIds"].as_array().unwrap().len(), 1);

        let response = app
            .oneshot(get_req("/api/v1/campaigns/c1/jobs"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let jobs = json_body(response).await;
        assert_eq!(jobs.as_array().unwrap().len(), 1);
        assert_eq!(jobs[0]["status"], "pending");
    }

    #[tokio::test]
    async fn test_invalid_cadence_is_rejected() {
        let response = app()
            .oneshot(post("/api/v1/campaigns", campaign_body("c1", "fortnightly")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = json_body(response).await;
        assert_eq!(body["ok"], false);
    }

    #[tokio::test]
    async fn test_job_not_found() {
        let response = app()
            .oneshot(get_req("/api/v1/jobs/no-such-job"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = app()
            .oneshot(get_req("/api/v1/jobs/no-such-job/attempts"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_dispatch_processes_due_jobs() {
        let app = app();
        // scheduledAt is in the past, so the job is immediately due
        app.clone()
            .oneshot(post("/api/v1/campaigns", campaign_body("c1", "single")))
            .await
            .unwrap();

        let response = app
            .clone()
            .oneshot(post("/api/v1/dispatch", String::new()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let summary = json_body(response).await;
        assert_eq!(summary["processed"], 1);
        assert_eq!(summary["results"][0]["status"], "sent");

        // the job's audit trail is visible through the API
        let job_id = summary["results"][0]["id"].as_str().unwrap().to_string();
        let response = app
            .oneshot(get_req(&format!("/api/v1/jobs/{job_id}/attempts")))
            .await
            .unwrap();
        let attempts = json_body(response).await;
        assert_eq!(attempts.as_array().unwrap().len(), 1);
        assert_eq!(attempts[0]["status"], "success");
    }

    #[tokio::test]
    async fn test_cancel_campaign() {
        let app = app();
        app.clone()
            .oneshot(post("/api/v1/campaigns", campaign_body("c1", "weekly")))
            .await
            .unwrap();

        let response = app
            .clone()
            .oneshot(post("/api/v1/campaigns/c1/cancel", String::new()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["cancelled"], 1);

        // cancelled jobs never dispatch
        let response = app
            .oneshot(post("/api/v1/dispatch", String::new()))
            .await
            .unwrap();
        let summary = json_body(response).await;
        assert_eq!(summary["processed"], 0);
    }
}
