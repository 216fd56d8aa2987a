use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use insight_agent::{AnalysisOrchestrator, SyncFailure};
use insight_core::domain::customer::{AnalysisResult, CustomerId, ProfileSummary};
use insight_core::errors::{AnalysisError, InterfaceError};
use insight_db::repositories::OrderSource;
use serde::{Deserialize, Serialize};
use tracing::{info_span, warn, Instrument};
use uuid::Uuid;

#[derive(Clone)]
pub struct ApiState {
    orchestrator: Arc<AnalysisOrchestrator>,
    orders: Arc<dyn OrderSource>,
}

impl ApiState {
    pub fn new(orchestrator: Arc<AnalysisOrchestrator>, orders: Arc<dyn OrderSource>) -> Self {
        Self { orchestrator, orders }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct AnalysisQuery {
    #[serde(default)]
    pub force: bool,
}

#[derive(Debug, Serialize)]
pub struct SyncResponse {
    pub customers: Vec<ProfileSummary>,
    pub failures: Vec<SyncFailureView>,
}

#[derive(Debug, Serialize)]
pub struct SyncFailureView {
    pub name: String,
    pub phone_number: String,
    pub error_class: &'static str,
    pub message: String,
}

impl From<&SyncFailure> for SyncFailureView {
    fn from(failure: &SyncFailure) -> Self {
        Self {
            name: failure.name.clone(),
            phone_number: failure.phone_number.clone(),
            error_class: failure.error.class(),
            message: failure.error.to_string(),
        }
    }
}

/// Client-facing error payload. Internal detail stays in the logs.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: &'static str,
    pub message: &'static str,
    pub correlation_id: String,
}

/// Interface error rendered as a JSON response.
#[derive(Debug)]
pub struct ApiError {
    error_class: &'static str,
    interface: InterfaceError,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.interface.status_code())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = ErrorBody {
            error: self.error_class,
            message: self.interface.user_message(),
            correlation_id: self.interface.correlation_id().to_string(),
        };
        (status, Json(body)).into_response()
    }
}

fn api_error(error: AnalysisError, correlation_id: &str) -> ApiError {
    warn!(
        event_name = "api.request.failed",
        correlation_id,
        error_class = error.class(),
        error = %error,
        "request failed"
    );
    ApiError { error_class: error.class(), interface: error.into_interface(correlation_id) }
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/api/v1/customers/sync", post(sync_customers))
        .route("/api/v1/customers/{id}/analysis", get(customer_analysis))
        .with_state(state)
}

pub async fn sync_customers(State(state): State<ApiState>) -> Result<Json<SyncResponse>, ApiError> {
    let correlation_id = Uuid::new_v4().to_string();
    let span = info_span!("api.sync", correlation_id = %correlation_id);

    async {
        let report = state
            .orchestrator
            .trigger_sync(state.orders.as_ref())
            .await
            .map_err(|error| api_error(error, &correlation_id))?;
        let customers =
            report.summaries.load().await.map_err(|error| api_error(error, &correlation_id))?;

        Ok::<_, ApiError>(Json(SyncResponse {
            customers,
            failures: report.failures.iter().map(SyncFailureView::from).collect(),
        }))
    }
    .instrument(span)
    .await
}

pub async fn customer_analysis(
    Path(id): Path<i64>,
    Query(query): Query<AnalysisQuery>,
    State(state): State<ApiState>,
) -> Result<Json<AnalysisResult>, ApiError> {
    let correlation_id = Uuid::new_v4().to_string();
    let span = info_span!("api.analysis", correlation_id = %correlation_id, customer_id = id);

    state
        .orchestrator
        .get_analysis(CustomerId(id), query.force)
        .instrument(span)
        .await
        .map(Json)
        .map_err(|error| api_error(error, &correlation_id))
}
