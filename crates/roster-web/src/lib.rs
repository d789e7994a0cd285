//! Axum JSON API for the user-initiated roster actions.

use std::sync::Arc;

use axum::{
    extract::{Path as AxumPath, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{Local, NaiveDate};
use roster_core::{Plan, PlanData, ServiceRule, PLAN_STATUS_DRAFT};
use roster_directory::DirectoryApi;
use roster_storage::{IntentJournal, Repository, StoreError};
use roster_sync::export::export_plan;
use roster_sync::rules::{
    audit_plan, rule_for_slot, validate_plan_json, validate_plan_value, PlanValidationError,
};
use roster_sync::{
    default_period, load_editor, load_meeting, load_meetings_overview, load_settings, RosterRules,
    SyncConfig, SyncPipeline,
};
use serde::Deserialize;
use serde_json::{json, Value as JsonValue};
use thiserror::Error;
use tokio::net::TcpListener;
use tracing::{error, info};

pub const CRATE_NAME: &str = "roster-web";

#[derive(Clone)]
pub struct AppState {
    pub repo: Repository,
    pub directory: Arc<dyn DirectoryApi>,
    pub rules: Arc<RosterRules>,
    pub journal: IntentJournal,
    pub preacher_group_id: String,
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    Upstream(String),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { .. } => Self::NotFound(err.to_string()),
            StoreError::Rejected { .. } => Self::Validation(err.to_string()),
            StoreError::Http(_) | StoreError::Auth(_) => Self::Upstream(err.to_string()),
            StoreError::Decode { .. } => Self::Internal(err.into()),
        }
    }
}

impl From<PlanValidationError> for ApiError {
    fn from(err: PlanValidationError) -> Self {
        Self::Validation(err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::Upstream(_) => StatusCode::BAD_GATEWAY,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            error!(error = %self, "request failed");
        }
        (status, Json(json!({"success": false, "error": format!("{self:#}")}))).into_response()
    }
}

type ApiResult = Result<Json<JsonValue>, ApiError>;

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/api/sync-members", post(sync_members_handler))
        .route("/api/plans", get(list_plans_handler).post(create_plan_handler))
        .route("/api/plans/{id}", get(get_plan_handler).delete(delete_plan_handler))
        .route("/api/plans/{id}/save", post(save_plan_handler))
        .route("/api/plans/{id}/audit", get(audit_plan_handler))
        .route("/api/plans/{id}/export", post(export_plan_handler))
        .route("/api/editor", get(editor_handler))
        .route("/api/settings", get(settings_handler))
        .route("/api/permitted-services", get(permitted_services_handler))
        .route("/api/meetings", get(list_meetings_handler))
        .route("/api/meetings/{id}", get(get_meeting_handler))
        .with_state(Arc::new(state))
}

pub async fn serve_from_env() -> anyhow::Result<()> {
    let config = SyncConfig::from_env();
    let state = AppState {
        repo: config.connect_store().await?,
        directory: Arc::new(config.connect_directory()?),
        rules: Arc::new(config.load_rules()?),
        journal: IntentJournal::new(config.journal_dir.clone()),
        preacher_group_id: config.preacher_group_id.clone(),
    };
    let listener = TcpListener::bind(("0.0.0.0", config.web_port)).await?;
    info!(port = config.web_port, "roster api listening");
    axum::serve(listener, app(state)).await?;
    Ok(())
}

async fn health_handler() -> Json<JsonValue> {
    Json(json!({"status": "ok"}))
}

async fn sync_members_handler(State(state): State<Arc<AppState>>) -> ApiResult {
    let pipeline = SyncPipeline::new(state.repo.clone(), state.directory.clone(), state.rules.clone());
    let summary = pipeline
        .run_member_sync()
        .await
        .map_err(|err| ApiError::Upstream(format!("{err:#}")))?;
    Ok(Json(json!({"success": true, "summary": summary})))
}

async fn list_plans_handler(State(state): State<Arc<AppState>>) -> ApiResult {
    let plans = state.repo.plans().await?;
    Ok(Json(json!({"success": true, "plans": plans})))
}

#[derive(Debug, Deserialize)]
struct CreatePlanBody {
    period_start: NaiveDate,
    period_end: NaiveDate,
}

async fn create_plan_handler(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CreatePlanBody>,
) -> ApiResult {
    if body.period_end < body.period_start {
        return Err(ApiError::Validation("period_end is before period_start".to_string()));
    }
    let plan = state
        .repo
        .create_plan(&Plan {
            id: String::new(),
            period_start: body.period_start.to_string(),
            period_end: body.period_end.to_string(),
            data: PlanData::new(),
            formatting: json!({}),
            status: PLAN_STATUS_DRAFT.to_string(),
            updated: None,
        })
        .await?;
    info!(plan_id = %plan.id, "plan created");
    Ok(Json(json!({"success": true, "plan": plan})))
}

async fn get_plan_handler(State(state): State<Arc<AppState>>, AxumPath(id): AxumPath<String>) -> ApiResult {
    let plan = state.repo.plan(&id).await?;
    Ok(Json(json!({"success": true, "plan": plan})))
}

async fn delete_plan_handler(State(state): State<Arc<AppState>>, AxumPath(id): AxumPath<String>) -> ApiResult {
    state.repo.delete_plan(&id).await?;
    Ok(Json(json!({"success": true})))
}

#[derive(Debug, Deserialize)]
struct SavePlanBody {
    /// Grid as a JSON object or as the serialized string the editor form posts.
    data: JsonValue,
    #[serde(default)]
    formatting: JsonValue,
}

async fn save_plan_handler(
    State(state): State<Arc<AppState>>,
    AxumPath(id): AxumPath<String>,
    Json(body): Json<SavePlanBody>,
) -> ApiResult {
    let data = match &body.data {
        JsonValue::String(text) => validate_plan_json(text)?,
        other => validate_plan_value(other)?,
    };
    let formatting = match body.formatting {
        JsonValue::String(text) => serde_json::from_str(&text)
            .map_err(|err| ApiError::Validation(format!("formatting is not valid JSON: {err}")))?,
        JsonValue::Null => json!({}),
        other => other,
    };
    let plan = state.repo.save_plan(&id, &data, &formatting).await?;
    Ok(Json(json!({"success": true, "plan": plan})))
}

/// Stored rules, or the configured defaults while none are stored.
async fn effective_rules(state: &AppState) -> Result<Vec<ServiceRule>, ApiError> {
    let stored = state.repo.service_rules().await?;
    Ok(if stored.is_empty() {
        state.rules.default_rules.clone()
    } else {
        stored
    })
}

async fn preacher_members(state: &AppState) -> Result<Vec<roster_core::StoredMember>, ApiError> {
    let group = state.repo.group_by_ct_id(&state.preacher_group_id).await?;
    Ok(state.repo.members_in_group(&group.id).await?)
}

fn parse_period(plan: &Plan) -> Result<(NaiveDate, NaiveDate), ApiError> {
    let parse = |raw: &str| {
        let day = raw.get(..10).unwrap_or(raw);
        NaiveDate::parse_from_str(day, "%Y-%m-%d")
            .map_err(|_| ApiError::Validation(format!("plan period date {raw:?} is not a date")))
    };
    Ok((parse(&plan.period_start)?, parse(&plan.period_end)?))
}

async fn audit_plan_handler(State(state): State<Arc<AppState>>, AxumPath(id): AxumPath<String>) -> ApiResult {
    let plan = state.repo.plan(&id).await?;
    let (start, end) = parse_period(&plan)?;
    let rules = effective_rules(&state).await?;
    let members = preacher_members(&state).await?;
    let editor = load_editor(
        state.directory.as_ref(),
        &state.rules,
        &rules,
        &state.preacher_group_id,
        start,
        end,
    )
    .await;
    if let Some(message) = editor.error {
        return Err(ApiError::Upstream(message));
    }
    let slots = editor.slots.into_iter().map(|s| s.slot).collect::<Vec<_>>();
    let issues = audit_plan(&plan.data, &slots, &members, &rules, &state.rules.holidays);
    Ok(Json(json!({"success": true, "issues": issues})))
}

async fn export_plan_handler(State(state): State<Arc<AppState>>, AxumPath(id): AxumPath<String>) -> ApiResult {
    let plan = state.repo.plan(&id).await?;
    let members = preacher_members(&state).await?;
    let report = export_plan(
        &state.journal,
        &plan,
        &members,
        &state.rules.services,
        state.directory.as_ref(),
    )
    .await?;
    Ok(Json(json!({"success": true, "report": report})))
}

#[derive(Debug, Default, Deserialize)]
struct EditorQuery {
    month: Option<NaiveDate>,
    start: Option<NaiveDate>,
    end: Option<NaiveDate>,
}

async fn editor_handler(State(state): State<Arc<AppState>>, Query(query): Query<EditorQuery>) -> ApiResult {
    let (start, end) = match (query.start, query.end) {
        (Some(start), Some(end)) => (start, end),
        _ => default_period(query.month.unwrap_or_else(|| Local::now().date_naive())),
    };
    let rules = effective_rules(&state).await?;
    let data = load_editor(
        state.directory.as_ref(),
        &state.rules,
        &rules,
        &state.preacher_group_id,
        start,
        end,
    )
    .await;
    Ok(Json(json!({"success": data.error.is_none(), "editor": data})))
}

async fn settings_handler(State(state): State<Arc<AppState>>) -> ApiResult {
    let settings = load_settings(&state.repo, &state.rules, &state.preacher_group_id).await?;
    Ok(Json(json!({"success": true, "settings": settings})))
}

#[derive(Debug, Deserialize)]
struct PermittedQuery {
    date: NaiveDate,
    time: String,
    #[serde(default)]
    holiday: bool,
}

async fn permitted_services_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<PermittedQuery>,
) -> ApiResult {
    let rules = effective_rules(&state).await?;
    let holiday = query.holiday || state.rules.holidays.contains(&query.date);
    let matched = rule_for_slot(query.date, &query.time, holiday, &rules);
    Ok(Json(json!({
        "success": true,
        "configured": matched.rule().is_some(),
        "services": matched.rule().map(|r| r.allowed_services.clone()).unwrap_or_default(),
    })))
}

async fn list_meetings_handler(State(state): State<Arc<AppState>>) -> ApiResult {
    let overview = load_meetings_overview(&state.repo).await;
    Ok(Json(json!({"success": true, "overview": overview})))
}

async fn get_meeting_handler(State(state): State<Arc<AppState>>, AxumPath(id): AxumPath<String>) -> ApiResult {
    let detail = load_meeting(&state.repo, &id).await?;
    Ok(Json(json!({"success": true, "meeting": detail})))
}
