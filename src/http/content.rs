// Rate content - static metrics, provider alerts, legislative updates

use axum::{
    extract::{Query, State},
    Json,
};
use serde::Deserialize;
use serde_json::Value;

use super::{auth::SubscriberSession, ApiResponse, AppState};
use crate::entities::content::{list_alerts, list_bills, Bill, ContentFilter, ProviderAlert};
use crate::error::{AppError, AppResult};
use crate::metrics::{load_metric, MetricKind};

async fn serve_metric(state: &AppState, kind: MetricKind) -> AppResult<Json<Value>> {
    let dir = state.config.static_data_dir.clone();
    let loaded = tokio::task::spawn_blocking(move || load_metric(&dir, kind))
        .await
        .map_err(|e| AppError::Internal(format!("metrics task failed: {e}")))??;

    loaded
        .map(Json)
        .ok_or_else(|| AppError::not_found("Metrics data not available"))
}

/// GET /api/state-metrics
pub async fn state_metrics(State(state): State<AppState>) -> AppResult<Json<Value>> {
    serve_metric(&state, MetricKind::StateMetrics).await
}

/// GET /api/enhanced-metrics
pub async fn enhanced_metrics(State(state): State<AppState>) -> AppResult<Json<Value>> {
    serve_metric(&state, MetricKind::EnhancedMetrics).await
}

/// GET /api/recent-rate-changes
pub async fn recent_rate_changes(State(state): State<AppState>) -> AppResult<Json<Value>> {
    serve_metric(&state, MetricKind::RecentRateChanges).await
}

#[derive(Debug, Deserialize, Default)]
pub struct ContentQuery {
    pub state: Option<String>,
    pub search: Option<String>,
    pub limit: Option<usize>,
}

impl From<ContentQuery> for ContentFilter {
    fn from(query: ContentQuery) -> Self {
        ContentFilter {
            state: query.state.filter(|s| !s.trim().is_empty()),
            search: query.search,
            limit: query.limit.unwrap_or(0),
        }
    }
}

/// GET /api/provider-alerts
pub async fn provider_alerts(
    State(state): State<AppState>,
    _session: SubscriberSession,
    Query(query): Query<ContentQuery>,
) -> AppResult<Json<ApiResponse<Vec<ProviderAlert>>>> {
    let conn = state.db()?;
    let alerts = list_alerts(&conn, &query.into())?;
    Ok(ApiResponse::ok(alerts))
}

/// GET /api/legislative-updates
pub async fn legislative_updates(
    State(state): State<AppState>,
    _session: SubscriberSession,
    Query(query): Query<ContentQuery>,
) -> AppResult<Json<ApiResponse<Vec<Bill>>>> {
    let conn = state.db()?;
    let bills = list_bills(&conn, &query.into())?;
    Ok(ApiResponse::ok(bills))
}
