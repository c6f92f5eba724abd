use axum::{
    extract::{Json, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

use crate::automation::core::SessionFactory;
use crate::automation::{ActionExecutor, Arbiter, PortalDriver, PortalScrapeJob};
use crate::config::Settings;
use crate::error::{AutomationError, AutomationResult};
use crate::models::{Account, ActionOutcome, BoardColumns, SchedulerStatus, TaskMessages};
use crate::snapshot::{merge_messages, SnapshotStore};
use crate::storage::{atomic_write_json, RosterStore, TemplateStore, TokenStore, WorkerStore};

pub struct AppState {
    pub settings: Settings,
    pub roster: RosterStore,
    pub workers: WorkerStore,
    pub tokens: Arc<TokenStore>,
    pub templates: TemplateStore,
    pub snapshots: SnapshotStore,
    pub arbiter: Arc<Arbiter>,
    pub executor: ActionExecutor,
    pub http: reqwest::Client,
    shutdown: broadcast::Sender<()>,
}

impl AppState {
    pub fn new(settings: Settings, sessions: Arc<dyn SessionFactory>, shutdown: broadcast::Sender<()>) -> Self {
        let roster = RosterStore::new(settings.accounts_file());
        let snapshots = SnapshotStore::new(settings.snapshots_dir());
        let tokens = Arc::new(TokenStore::new(settings.token_file()));
        let driver = PortalDriver::new(&settings);

        let job = PortalScrapeJob::new(sessions.clone(), driver.clone(), snapshots.clone(), tokens.clone());
        let arbiter = Arc::new(Arbiter::new(
            roster.clone(),
            snapshots.clone(),
            Arc::new(job),
            settings.schedule.clone(),
            settings.snapshot_retention,
        ));

        Self {
            workers: WorkerStore::new(settings.workers_file()),
            templates: TemplateStore::new(settings.templates_dir()),
            executor: ActionExecutor::new(sessions, driver),
            http: reqwest::Client::new(),
            roster,
            tokens,
            snapshots,
            arbiter,
            shutdown,
            settings,
        }
    }

    /// Starts background scraping unless it is already running.
    pub fn start_background(&self) {
        let _ = self.arbiter.ensure_started(self.shutdown.subscribe());
    }

    /// Configured action credentials, else the first roster account.
    pub fn action_account(&self) -> AutomationResult<Account> {
        if let Some(account) = &self.settings.action_account {
            return Ok(account.clone());
        }
        self.roster
            .first()?
            .ok_or_else(|| AutomationError::Config("no account available for actions; log in first".into()))
    }

    fn board_with_messages(&self, columns: Option<BoardColumns>) -> BoardColumns {
        let mut columns = columns.unwrap_or_default();
        merge_messages(&mut columns, &self.snapshots.latest_messages());
        columns
    }
}

pub type SharedState = Arc<AppState>;

pub struct ApiError(AutomationError);

impl From<AutomationError> for ApiError {
    fn from(e: AutomationError) -> Self {
        ApiError(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            AutomationError::Upstream { status, body } => {
                return (
                    StatusCode::BAD_GATEWAY,
                    Json(json!({
                        "error": "Upstream request failed",
                        "status_code": status,
                        "details": body,
                    })),
                )
                    .into_response();
            }
            AutomationError::MissingToken => StatusCode::UNAUTHORIZED,
            AutomationError::NotFound(_) => StatusCode::NOT_FOUND,
            AutomationError::Config(_) => StatusCode::BAD_REQUEST,
            AutomationError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            AutomationError::Http(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            error!(error = %self.0, "Request failed");
        }
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> Response {
    (StatusCode::BAD_REQUEST, Json(json!({ "success": false, "error": message.into() }))).into_response()
}

fn outcome_response(outcome: ActionOutcome) -> Response {
    let status = if outcome.success { StatusCode::OK } else { StatusCode::INTERNAL_SERVER_ERROR };
    (status, Json(outcome)).into_response()
}

/// Names of the fields that are absent or blank in a JSON body.
fn missing_fields(body: &Value, fields: &[&str]) -> Vec<String> {
    fields
        .iter()
        .filter(|f| body.get(**f).and_then(Value::as_str).map_or(true, |v| v.trim().is_empty()))
        .map(|f| f.to_string())
        .collect()
}

fn field(body: &Value, name: &str) -> String {
    body.get(name).and_then(Value::as_str).unwrap_or_default().trim().to_string()
}

// --- Session & board ---

pub async fn login(State(state): State<SharedState>, Json(body): Json<Value>) -> Response {
    let missing = missing_fields(&body, &["username", "password"]);
    if !missing.is_empty() {
        return bad_request(format!("Missing required fields: {}", missing.join(", ")));
    }
    let account = Account { username: field(&body, "username"), password: field(&body, "password") };

    if let Err(e) = state.roster.add(&account) {
        warn!(error = %e, "Failed to persist account");
    }
    let result = state.arbiter.scrape_now(&account).await;
    state.start_background();

    match result {
        Ok(columns) => (StatusCode::OK, Json(json!({ "success": true, "columns": columns }))).into_response(),
        Err(e) => {
            error!(username = %account.username, error = %e, "Login scrape failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "success": false, "error": e.to_string() })),
            )
                .into_response()
        }
    }
}

#[derive(Deserialize)]
pub struct UserQuery {
    username: Option<String>,
}

pub async fn check_new_tasks(State(state): State<SharedState>, Query(q): Query<UserQuery>) -> Response {
    let Some(username) = q.username.filter(|u| !u.is_empty()) else {
        return bad_request("username is required");
    };
    let columns = state.board_with_messages(state.arbiter.board(&username).await);
    (StatusCode::OK, Json(json!({ "columns": columns }))).into_response()
}

pub async fn check_task_messages(State(state): State<SharedState>, Query(q): Query<UserQuery>) -> Response {
    let Some(username) = q.username.filter(|u| !u.is_empty()) else {
        return bad_request("username is required");
    };
    let columns = state.board_with_messages(state.arbiter.board(&username).await);
    let messages: HashMap<String, TaskMessages> = columns
        .tasks()
        .map(|t| (t.task.case_number.clone(), TaskMessages::from_task(&t.task)))
        .collect();
    (StatusCode::OK, Json(json!({ "messages": messages }))).into_response()
}

// --- Actions ---

pub async fn add_technician(State(state): State<SharedState>, Json(body): Json<Value>) -> Response {
    let missing = missing_fields(&body, &["task_uuid", "worker_name"]);
    if !missing.is_empty() {
        return bad_request(format!("Missing required fields: {}", missing.join(", ")));
    }
    let task = field(&body, "task_uuid");
    let worker = field(&body, "worker_name");
    let account = match state.action_account() {
        Ok(a) => a,
        Err(e) => return ApiError(e).into_response(),
    };

    info!(task = %task, worker = %worker, "Assignment requested");
    let executor = state.executor.clone();
    let result = state
        .arbiter
        .run_action("assign", async move { executor.assign_worker(&task, &worker, &account).await })
        .await;
    match result {
        Ok(outcome) => outcome_response(outcome),
        Err(e) => outcome_response(ActionOutcome { success: false, output: e.to_string() }),
    }
}

pub async fn upload_media(State(state): State<SharedState>, Json(body): Json<Value>) -> Response {
    let missing = missing_fields(&body, &["task_filter", "file_path"]);
    if !missing.is_empty() {
        return bad_request(format!("Missing required fields: {}", missing.join(", ")));
    }
    let filter = field(&body, "task_filter");
    let file = PathBuf::from(field(&body, "file_path"));
    let account = match state.action_account() {
        Ok(a) => a,
        Err(e) => return ApiError(e).into_response(),
    };

    let executor = state.executor.clone();
    let result = state
        .arbiter
        .run_action("upload", async move { executor.upload_media(&filter, &file, &account).await })
        .await;
    match result {
        Ok(outcome) => outcome_response(outcome),
        Err(e) => outcome_response(ActionOutcome { success: false, output: e.to_string() }),
    }
}

// --- Worker roster ---

pub async fn get_workers(State(state): State<SharedState>) -> Result<Json<Vec<String>>, ApiError> {
    Ok(Json(state.workers.load()?))
}

#[derive(Deserialize)]
pub struct WorkerBody {
    name: String,
}

pub async fn add_worker(
    State(state): State<SharedState>,
    Json(body): Json<WorkerBody>,
) -> Result<Json<Vec<String>>, ApiError> {
    Ok(Json(state.workers.add(&body.name)?))
}

pub async fn delete_worker(
    State(state): State<SharedState>,
    Path(name): Path<String>,
) -> Result<Json<Vec<String>>, ApiError> {
    Ok(Json(state.workers.remove(&name)?))
}

// --- Forms ---

pub async fn get_form(State(state): State<SharedState>, Path(task_id): Path<String>) -> Result<Json<Value>, ApiError> {
    let token = state.tokens.current().ok_or(AutomationError::MissingToken)?;
    let url = format!(
        "{}/api/tasks/tasks/{}/template-form",
        state.settings.portal.api_base.trim_end_matches('/'),
        task_id
    );

    let resp = state
        .http
        .get(&url)
        .bearer_auth(&token.token)
        .header("Accept", "application/json")
        .send()
        .await
        .map_err(AutomationError::from)?;
    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        warn!(task_id = %task_id, status = status.as_u16(), "Form fetch rejected upstream");
        return Err(AutomationError::Upstream { status: status.as_u16(), body }.into());
    }

    let form: Value = resp.json().await.map_err(AutomationError::from)?;
    if let Err(e) = atomic_write_json(&state.settings.api_form_file(), &form) {
        warn!(error = %e, "Failed to save api-form.json");
    }
    Ok(Json(form))
}

pub async fn save_form_template(State(state): State<SharedState>, Json(body): Json<Value>) -> Response {
    let task_id = body.get("taskId").map(|v| match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    });
    let (Some(task_id), Some(form)) = (task_id, body.get("formData")) else {
        return bad_request("Missing required fields: taskId, formData");
    };
    match state.templates.save(&task_id, form) {
        Ok(path) => (
            StatusCode::OK,
            Json(json!({ "success": true, "path": path.display().to_string() })),
        )
            .into_response(),
        Err(e) => ApiError(e).into_response(),
    }
}

pub async fn list_form_templates(State(state): State<SharedState>) -> Result<Json<Value>, ApiError> {
    Ok(Json(json!({ "files": state.templates.list()? })))
}

pub async fn get_form_template(
    State(state): State<SharedState>,
    Path(filename): Path<String>,
) -> Result<Json<Value>, ApiError> {
    Ok(Json(state.templates.get(&filename)?))
}

// --- Operations ---

pub async fn scheduler_status(State(state): State<SharedState>) -> Json<SchedulerStatus> {
    let snapshot = state.arbiter.state().snapshot();
    let account = match &snapshot.phase {
        crate::automation::state::Phase::Scraping { account } => Some(account.clone()),
        _ => None,
    };
    Json(SchedulerStatus {
        phase: snapshot.phase.to_string(),
        account,
        pending_actions: snapshot.pending_actions,
        sweeps_completed: snapshot.sweeps_completed,
        token_observed_at: state.tokens.current().map(|t| t.observed_at),
    })
}

pub async fn purge_snapshots(State(state): State<SharedState>) -> Json<Value> {
    Json(json!({ "deleted": state.snapshots.purge_all() }))
}
