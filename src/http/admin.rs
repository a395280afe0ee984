// Admin dashboard endpoints
//
// Everything except check-access requires an `AdminSession`.

use axum::{
    extract::{Path, Query, State},
    http::{header::CONTENT_TYPE, HeaderMap},
    Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::info;

use super::{auth::AdminSession, ApiResponse, AppState};
use crate::db::{get_events_for_entity, get_recent_events, record_event, Event};
use crate::entities::accounts::{self, UserSummary};
use crate::entities::admin::{check_admin_access, AdminAccess, AdminUser};
use crate::entities::community::{self as posts, Post};
use crate::entities::content::{self, Bill, ContentKind, ProviderAlert};
use crate::error::{AppError, AppResult};
use crate::marketing::{plan_recipients, send_campaign, Campaign, CampaignReport};
use crate::progress::UploadProgress;
use crate::upload::{normalize_keys, parse_rows, prepare_row, upsert_rows_shared, UploadSummary};

#[derive(Debug, Deserialize)]
pub struct CheckAccessRequest {
    pub email: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckAccessResponse {
    pub success: bool,
    pub is_admin: bool,
    pub admin_user: Option<AdminUser>,
}

/// POST /api/admin/check-access - lets the dashboard decide what to render
pub async fn check_access(
    State(state): State<AppState>,
    Json(request): Json<CheckAccessRequest>,
) -> AppResult<Json<CheckAccessResponse>> {
    let conn = state.db()?;
    let response = match check_admin_access(&conn, &request.email)? {
        AdminAccess::Granted(admin) => CheckAccessResponse {
            success: true,
            is_admin: true,
            admin_user: Some(admin),
        },
        AdminAccess::Inactive(_) | AdminAccess::Unknown => CheckAccessResponse {
            success: true,
            is_admin: false,
            admin_user: None,
        },
    };
    Ok(Json(response))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateDatabaseQuery {
    #[serde(rename = "type")]
    pub kind: String,
    pub upload_id: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateDatabaseResponse {
    pub success: bool,
    pub upload_id: String,
    #[serde(flatten)]
    pub summary: UploadSummary,
}

/// POST /api/admin/update-database?type=billtrack|provider_alerts
pub async fn update_database(
    State(state): State<AppState>,
    session: AdminSession,
    Query(query): Query<UpdateDatabaseQuery>,
    headers: HeaderMap,
    body: String,
) -> AppResult<Json<UpdateDatabaseResponse>> {
    let kind = ContentKind::parse(&query.kind)
        .ok_or_else(|| AppError::bad_request(format!("Unknown upload type: {}", query.kind)))?;

    let content_type = headers.get(CONTENT_TYPE).and_then(|v| v.to_str().ok());
    let parsed = parse_rows(&body, content_type).map_err(|e| AppError::bad_request(format!("{e:#}")))?;
    if parsed.rows.is_empty() {
        return Err(AppError::bad_request("Upload contains no rows"));
    }

    let upload_id = parsed
        .upload_id
        .or(query.upload_id)
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    // Written off the async runtime; the connection lock is released between
    // chunks so upload-progress polls see the upload advance.
    let db = state.db.clone();
    let progress = state.progress.clone();
    let chunk_rows = state.config.upload_chunk_rows;
    let task_id = upload_id.clone();
    let rows = parsed.rows;
    let summary = tokio::task::spawn_blocking(move || {
        upsert_rows_shared(&db, kind, rows, Some((progress.as_ref(), task_id.as_str())), chunk_rows)
    })
    .await
    .map_err(|e| AppError::Internal(format!("upload task failed: {e}")))??;

    let conn = state.db()?;
    record_event(
        &conn,
        "bulk_upload",
        kind.entity_type(),
        &upload_id,
        json!({
            "table": kind.table(),
            "inserted": summary.inserted_count,
            "updated": summary.updated_count,
            "skipped": summary.skipped_count,
        }),
        &session.admin.email,
    );

    Ok(Json(UpdateDatabaseResponse {
        success: true,
        upload_id,
        summary,
    }))
}

/// GET /api/admin/upload-progress/:upload_id
pub async fn upload_progress(
    State(state): State<AppState>,
    _session: AdminSession,
    Path(upload_id): Path<String>,
) -> AppResult<Json<ApiResponse<UploadProgress>>> {
    state
        .progress
        .get(&upload_id)
        .map(ApiResponse::ok)
        .ok_or_else(|| AppError::not_found(format!("No upload in progress with id {upload_id}")))
}

/// Split the identifying field off an edit payload and prepare the rest.
fn edit_fields(
    kind: ContentKind,
    body: Map<String, Value>,
    key: &str,
) -> AppResult<(Value, Map<String, Value>)> {
    let mut body = normalize_keys(body);
    let id = body
        .remove(key)
        .filter(|v| !v.is_null())
        .ok_or_else(|| AppError::bad_request(format!("Missing required field: {key}")))?;

    kind.check_fields(&body).map_err(AppError::BadRequest)?;
    Ok((id, prepare_row(kind, body, Utc::now())))
}

/// PUT /api/admin/update-bill {url, ...fields}
pub async fn update_bill(
    State(state): State<AppState>,
    session: AdminSession,
    Json(body): Json<Map<String, Value>>,
) -> AppResult<Json<ApiResponse<Bill>>> {
    let (url, fields) = edit_fields(ContentKind::Bills, body, "url")?;
    let url = url
        .as_str()
        .map(str::trim)
        .filter(|u| !u.is_empty())
        .ok_or_else(|| AppError::bad_request("url must be a non-empty string"))?
        .to_string();

    let conn = state.db()?;
    let bill = content::update_bill(&conn, &url, &fields)
        .map_err(|e| AppError::from_write(e, "Update conflicts with an existing bill"))?
        .ok_or_else(|| AppError::not_found(format!("No bill with url {url}")))?;

    record_event(
        &conn,
        "bill_updated",
        ContentKind::Bills.entity_type(),
        &bill.id.to_string(),
        Value::Object(fields),
        &session.admin.email,
    );
    info!(url = %url, admin = %session.admin.email, "bill updated");
    Ok(ApiResponse::ok(bill))
}

/// PUT /api/admin/update-provider-alert {id, ...fields}
pub async fn update_provider_alert(
    State(state): State<AppState>,
    session: AdminSession,
    Json(body): Json<Map<String, Value>>,
) -> AppResult<Json<ApiResponse<ProviderAlert>>> {
    let (id, fields) = edit_fields(ContentKind::ProviderAlerts, body, "id")?;
    let id = id
        .as_i64()
        .or_else(|| id.as_str().and_then(|s| s.trim().parse().ok()))
        .ok_or_else(|| AppError::bad_request("id must be an integer"))?;

    let conn = state.db()?;
    let alert = content::update_alert(&conn, id, &fields)
        .map_err(|e| {
            AppError::from_write(
                e,
                "Another alert already has this state, subject and announcement date",
            )
        })?
        .ok_or_else(|| AppError::not_found(format!("No provider alert with id {id}")))?;

    record_event(
        &conn,
        "provider_alert_updated",
        ContentKind::ProviderAlerts.entity_type(),
        &id.to_string(),
        Value::Object(fields),
        &session.admin.email,
    );
    Ok(ApiResponse::ok(alert))
}

/// GET /api/admin/users
pub async fn list_users(
    State(state): State<AppState>,
    _session: AdminSession,
) -> AppResult<Json<ApiResponse<Vec<UserSummary>>>> {
    let conn = state.db()?;
    Ok(ApiResponse::ok(accounts::list_users(&conn)?))
}

#[derive(Debug, Deserialize)]
pub struct PostFlags {
    pub pinned: Option<bool>,
    pub trending: Option<bool>,
}

/// PUT /api/admin/community/posts/:id/flags
pub async fn set_post_flags(
    State(state): State<AppState>,
    session: AdminSession,
    Path(id): Path<i64>,
    Json(flags): Json<PostFlags>,
) -> AppResult<Json<ApiResponse<Post>>> {
    let conn = state.db()?;
    let post = posts::set_post_flags(&conn, id, flags.pinned, flags.trending)?
        .ok_or_else(|| AppError::not_found(format!("Post {id} not found")))?;

    record_event(
        &conn,
        "post_flags_set",
        "community_post",
        &id.to_string(),
        json!({ "pinned": post.is_pinned, "trending": post.is_trending }),
        &session.admin.email,
    );
    Ok(ApiResponse::ok(post))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketingResponse {
    pub success: bool,
    #[serde(flatten)]
    pub report: CampaignReport,
}

/// POST /api/admin/marketing-email
pub async fn marketing_email(
    State(state): State<AppState>,
    session: AdminSession,
    Json(campaign): Json<Campaign>,
) -> AppResult<Json<MarketingResponse>> {
    if campaign.subject.trim().is_empty() || campaign.html.trim().is_empty() {
        return Err(AppError::bad_request("subject and html are required"));
    }

    let (recipients, opted_out) = {
        let conn = state.db()?;
        plan_recipients(&conn, &campaign)?
    };

    let report = send_campaign(
        state.email.as_ref(),
        &campaign,
        recipients,
        opted_out,
        &state.config.app_base_url,
        &state.config.unsubscribe_secret,
    )
    .await
    .map_err(|e| AppError::Internal(format!("{e:#}")))?;

    {
        let conn = state.db()?;
        record_event(
            &conn,
            "marketing_email_sent",
            "campaign",
            &campaign.subject,
            json!({
                "sent": report.sent_count,
                "failed": report.failed_count,
                "skipped": report.skipped_count,
            }),
            &session.admin.email,
        );
    }

    Ok(Json(MarketingResponse {
        success: report.failed_count == 0,
        report,
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventsQuery {
    pub entity_type: String,
    pub entity_id: Option<String>,
    pub limit: Option<usize>,
}

/// GET /api/admin/events?entityType=&entityId= - audit trail
pub async fn events(
    State(state): State<AppState>,
    _session: AdminSession,
    Query(query): Query<EventsQuery>,
) -> AppResult<Json<ApiResponse<Vec<Event>>>> {
    let conn = state.db()?;
    let events = match &query.entity_id {
        Some(id) => get_events_for_entity(&conn, &query.entity_type, id)?,
        None => get_recent_events(&conn, &query.entity_type, query.limit.unwrap_or(50).min(500))?,
    };
    Ok(ApiResponse::ok(events))
}
