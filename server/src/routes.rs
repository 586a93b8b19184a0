//! HTTP route handlers for the Studio server.
//!
//! This module provides the HTTP API endpoints:
//!
//! - `GET /health` - Health check endpoint
//! - `POST /api/auth/login`, `GET /api/auth/me`, `POST /api/auth/logout` - Passcode sessions
//! - `POST /api/dashboard/time` - Start or stop a task timer
//! - `GET /api/dashboard/time` - Running/total task counts
//! - `GET /api/dashboard` - Clients, projects and tasks with live elapsed time
//! - `POST /api/files` - Scoped workspace file operations
//! - `GET|POST /api/clients`, `POST /api/projects`, `POST /api/tasks` - Records
//! - `POST /api/log`, `GET /api/logs` - Append-only application log
//! - `POST /api/scrape` - Fetch a page and summarize it
//! - `GET /api/db/health` - Snapshot file size against `DB_MAX_BYTES`
//!
//! # Architecture
//!
//! All routes share application state through [`AppState`], which contains:
//! - Configuration (including auth settings)
//! - The record store
//! - The workspace every file operation is confined to
//! - The application log
//! - An HTTP client for page scraping
//! - Server start time for uptime reporting
//!
//! Every route except the public ones passes through [`require_session`].
//!
//! # Example
//!
//! ```rust,no_run
//! use studio_server::routes::{create_router, AppState};
//! use studio_server::config::Config;
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = Config::from_env().expect("failed to load config");
//!     let state = AppState::new(config).expect("failed to open state");
//!     let app = create_router(state);
//!
//!     let listener = tokio::net::TcpListener::bind("0.0.0.0:8080").await.unwrap();
//!     axum::serve(listener, app).await.unwrap();
//! }
//! ```

use std::sync::Arc;
use std::time::Instant;

use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, Query, Request, State},
    http::{header::SET_COOKIE, HeaderMap},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use crate::applog::{tail_limit, AppLog, LogTail};
use crate::auth::{
    cookie_value, expired_session_cookie, parse_session, secrets_match, session_cookie,
    validate_passcode, AuthenticatedUser, PASSCODE_HEADER, SESSION_COOKIE,
};
use crate::config::Config;
use crate::error::{Result, ServerError};
use crate::scrape::{PageSummary, Scraper};
use crate::store::{ClientTree, NewClient, NewProject, NewTask, SnapshotHealth, Store};
use crate::tracker::{self, TimerSummary, Transition};
use crate::types::{
    non_blank, parse_due, Client, FileAction, IdInput, LogEntry, LogLevel, Project, Task,
    TimerAction,
};
use crate::workspace::{DirEntry, Workspace};

// ============================================================================
// Constants
// ============================================================================

/// Maximum request body size (1 MB).
const MAX_BODY_SIZE: usize = 1024 * 1024;

/// Routes reachable without a session.
const PUBLIC_PATHS: &[&str] = &["/health", "/api/auth/login", "/api/auth/me"];

/// Route that also accepts the passcode secret in a header.
const LOGS_PATH: &str = "/api/logs";

// ============================================================================
// Application State
// ============================================================================

/// Shared application state for all route handlers.
#[derive(Clone)]
pub struct AppState {
    /// Server configuration.
    pub config: Arc<Config>,

    /// Client, project and task records.
    pub store: Arc<Store>,

    /// Root-confined file access.
    pub workspace: Arc<Workspace>,

    /// Append-only application log.
    pub app_log: AppLog,

    /// Page fetcher behind `/api/scrape`.
    pub scraper: Scraper,

    /// Server start time for uptime calculation.
    pub start_time: Instant,
}

impl AppState {
    /// Opens the record store and workspace described by `config`.
    ///
    /// # Errors
    ///
    /// Fails if the store snapshot is unreadable, the workspace root
    /// cannot be created, or the HTTP client cannot be built.
    pub fn new(config: Config) -> Result<Self> {
        let store = match &config.data_file {
            Some(path) => Store::open(path)?,
            None => Store::in_memory(),
        };
        let workspace = Workspace::new(config.workspace_root())?;
        let scraper = Scraper::new()?;
        Ok(Self::with_components(config, store, workspace, scraper))
    }

    /// Creates application state from already-opened components.
    #[must_use]
    pub fn with_components(
        config: Config,
        store: Store,
        workspace: Workspace,
        scraper: Scraper,
    ) -> Self {
        let app_log = AppLog::new(config.app_log_path());
        Self {
            config: Arc::new(config),
            store: Arc::new(store),
            workspace: Arc::new(workspace),
            app_log,
            scraper,
            start_time: Instant::now(),
        }
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("config", &"<Config>")
            .field("store", &self.store)
            .field("workspace", &self.workspace.root())
            .field("app_log", &self.app_log.path())
            .field("scraper", &self.scraper)
            .field("start_time", &self.start_time)
            .finish()
    }
}

// ============================================================================
// Router
// ============================================================================

/// Creates the application router with all routes configured.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(get_health))
        .route("/api/auth/login", post(post_login))
        .route("/api/auth/me", get(get_me))
        .route("/api/auth/logout", post(post_logout))
        .route("/api/dashboard", get(get_dashboard))
        .route(
            "/api/dashboard/time",
            post(post_timer).get(get_timer_summary),
        )
        .route("/api/files", post(post_files))
        .route("/api/clients", get(get_clients).post(post_client))
        .route("/api/projects", post(post_project))
        .route("/api/tasks", post(post_task))
        .route("/api/log", post(post_log))
        .route(LOGS_PATH, get(get_logs))
        .route("/api/scrape", post(post_scrape))
        .route("/api/db/health", get(get_db_health))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            require_session,
        ))
        .layer(DefaultBodyLimit::max(MAX_BODY_SIZE))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Parses a JSON request body, mapping failures to a 400.
fn parse_body<T: DeserializeOwned>(body: &Bytes) -> Result<T> {
    serde_json::from_slice(body)
        .map_err(|err| ServerError::validation(format!("invalid request body: {err}")))
}

/// Milliseconds since `started`, for app log entries.
fn millis_since(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

/// Display label for an elapsed value.
fn elapsed_label(ms: u64) -> String {
    tracker::format_duration(i64::try_from(ms).unwrap_or(i64::MAX))
}

/// Runs a store operation on the blocking thread pool.
///
/// Store writes hold the record lock across the snapshot write, so both
/// reads and writes stay off the async workers.
async fn with_store<T, E, F>(store: &Arc<Store>, op: F) -> Result<T>
where
    F: FnOnce(&Store) -> std::result::Result<T, E> + Send + 'static,
    T: Send + 'static,
    E: Into<ServerError> + Send + 'static,
{
    let store = Arc::clone(store);
    tokio::task::spawn_blocking(move || op(&store))
        .await
        .map_err(|err| ServerError::internal(format!("store task failed: {err}")))?
        .map_err(Into::into)
}

// ============================================================================
// Session Gate
// ============================================================================

fn is_public_path(path: &str) -> bool {
    PUBLIC_PATHS.contains(&path)
}

/// Rejects requests without a valid session cookie.
///
/// Public paths always pass. `GET /api/logs` also accepts the passcode
/// secret in the `x-passcode` header. With `STUDIO_UNSAFE_NO_AUTH` set
/// everything passes.
pub async fn require_session(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let path = request.uri().path().to_owned();
    if state.config.unsafe_no_auth || is_public_path(&path) {
        return next.run(request).await;
    }

    let authorized = session_user(&state, request.headers()).is_some()
        || (path == LOGS_PATH && has_log_passcode(&state, request.headers()));

    if authorized {
        next.run(request).await
    } else {
        debug!(path = %path, "Rejected request without valid session");
        ServerError::auth("Unauthorized").into_response()
    }
}

fn session_user(state: &AppState, headers: &HeaderMap) -> Option<AuthenticatedUser> {
    let value = cookie_value(headers, SESSION_COOKIE)?;
    match parse_session(&state.config.users, state.config.secret(), &value) {
        Ok(user) => Some(user),
        Err(err) => {
            debug!(error = %err, "Session cookie rejected");
            None
        }
    }
}

fn has_log_passcode(state: &AppState, headers: &HeaderMap) -> bool {
    let Some(secret) = state.config.passcode_secret.as_deref() else {
        return false;
    };
    headers
        .get(PASSCODE_HEADER)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|provided| !provided.is_empty() && secrets_match(provided, secret))
}

// ============================================================================
// GET /health - Health Check
// ============================================================================

/// Response body for health check endpoint.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    /// Server status (always "ok" if responding).
    pub status: String,

    /// Server uptime in seconds.
    pub uptime_seconds: u64,
}

/// GET /health - Health check endpoint. No authentication required.
async fn get_health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
    })
}

// ============================================================================
// Auth routes
// ============================================================================

#[derive(Debug, Deserialize)]
struct LoginRequest {
    passcode: Option<serde_json::Value>,
}

/// Response body for a successful login.
#[derive(Debug, Serialize, Deserialize)]
pub struct LoginResponse {
    pub user: AuthenticatedUser,
}

/// POST /api/auth/login - Exchange a passcode for a session cookie.
///
/// # Responses
///
/// - `200 OK` - `{user}` with `Set-Cookie: auth_session=...`
/// - `400 Bad Request` - Passcode missing
/// - `401 Unauthorized` - Passcode does not match any user
async fn post_login(State(state): State<AppState>, body: Bytes) -> Result<Response> {
    let started = Instant::now();
    let request: LoginRequest = parse_body(&body)?;
    let passcode = request
        .passcode
        .as_ref()
        .and_then(|v| v.as_str())
        .filter(|p| !p.is_empty())
        .ok_or_else(|| ServerError::validation("Passcode required"))?;

    let login = match validate_passcode(&state.config.users, state.config.secret(), passcode) {
        Ok(login) => login,
        Err(err) => {
            warn!("Login attempt with invalid passcode");
            state
                .app_log
                .record(
                    LogEntry::new(LogLevel::Warn, "auth", "Invalid passcode")
                        .with_duration_ms(millis_since(started)),
                )
                .await;
            return Err(err.into());
        }
    };

    info!(user = %login.user.slug, "User logged in");
    state
        .app_log
        .record(
            LogEntry::info("auth", "Login success")
                .with_duration_ms(millis_since(started))
                .with_detail(json!({ "user": login.user.slug })),
        )
        .await;

    Ok((
        [(SET_COOKIE, session_cookie(&login.token))],
        Json(LoginResponse { user: login.user }),
    )
        .into_response())
}

/// Response body for the session check.
#[derive(Debug, Serialize, Deserialize)]
pub struct MeResponse {
    pub authenticated: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<AuthenticatedUser>,
}

/// GET /api/auth/me - Report whether the caller holds a valid session.
async fn get_me(State(state): State<AppState>, headers: HeaderMap) -> Json<MeResponse> {
    let user = session_user(&state, &headers);
    Json(MeResponse {
        authenticated: user.is_some(),
        user,
    })
}

/// POST /api/auth/logout - Clear the session cookie.
async fn post_logout(State(state): State<AppState>) -> Response {
    state
        .app_log
        .record(LogEntry::info("auth", "Logout success"))
        .await;
    (
        [(SET_COOKIE, expired_session_cookie())],
        Json(json!({ "ok": true })),
    )
        .into_response()
}

// ============================================================================
// /api/dashboard/time - Task Timer
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TimerRequest {
    task_id: Option<IdInput>,
    action: Option<String>,
}

/// Response body for a timer change.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimerResponse {
    /// The task as stored after the call.
    pub task: Task,
    /// Elapsed time at the moment of the call.
    pub elapsed_ms: u64,
    pub elapsed_label: String,
    /// Set when the call was a no-op.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// POST /api/dashboard/time - Start or stop a task timer.
///
/// # Request Body
///
/// `{ "taskId": 3, "action": "start" | "stop" }`
///
/// # Responses
///
/// - `200 OK` - Updated task; `message` is set for no-op calls
/// - `400 Bad Request` - Missing task id or unknown action
/// - `404 Not Found` - Unknown task
async fn post_timer(State(state): State<AppState>, body: Bytes) -> Result<Json<TimerResponse>> {
    let started = Instant::now();
    let request: TimerRequest = parse_body(&body)?;

    let task_id = request.task_id.as_ref().and_then(IdInput::as_id);
    let action = request.action.as_deref().and_then(TimerAction::parse);
    let (Some(task_id), Some(action)) = (task_id, action) else {
        return Err(ServerError::validation(
            "taskId (number) and action start|stop are required.",
        ));
    };

    let now = Utc::now();
    let outcome = match action {
        TimerAction::Start => {
            with_store(&state.store, move |store| tracker::start(store, task_id, now)).await?
        }
        TimerAction::Stop => {
            with_store(&state.store, move |store| tracker::stop(store, task_id, now)).await?
        }
    };

    let message = match outcome.transition {
        Transition::Started => Some("Timer started".to_string()),
        Transition::Stopped { .. } => Some("Timer stopped".to_string()),
        Transition::AlreadyRunning | Transition::NotRunning => None,
    };
    if let Some(message) = message {
        state
            .app_log
            .record(
                LogEntry::info("timer", message)
                    .with_duration_ms(millis_since(started))
                    .with_detail(json!({
                        "taskId": task_id,
                        "timeSpentMs": outcome.task.time_spent_ms,
                    })),
            )
            .await;
    }

    let elapsed_ms = tracker::elapsed(&outcome.task, now);
    Ok(Json(TimerResponse {
        elapsed_label: elapsed_label(elapsed_ms),
        elapsed_ms,
        message: outcome.transition.note().map(str::to_string),
        task: outcome.task,
    }))
}

/// GET /api/dashboard/time - Lightweight timer summary.
async fn get_timer_summary(State(state): State<AppState>) -> Result<Json<TimerSummary>> {
    Ok(Json(with_store(&state.store, tracker::summary).await?))
}

// ============================================================================
// GET /api/dashboard - Aggregate view
// ============================================================================

/// A project annotated with its client's name.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardProject {
    #[serde(flatten)]
    pub project: Project,
    pub client_name: String,
}

/// A task annotated with names and its live elapsed time.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardTask {
    #[serde(flatten)]
    pub task: Task,
    pub project_name: String,
    pub client_name: String,
    pub elapsed_ms: u64,
    pub elapsed_label: String,
}

#[derive(Debug, Serialize)]
pub struct DashboardCounts {
    pub clients: usize,
    pub projects: usize,
    pub tasks: usize,
}

#[derive(Debug, Serialize)]
pub struct DashboardResponse {
    pub clients: Vec<ClientTree>,
    pub projects: Vec<DashboardProject>,
    pub tasks: Vec<DashboardTask>,
    pub counts: DashboardCounts,
}

/// GET /api/dashboard - Everything the dashboard renders, with elapsed time
/// computed at response time.
async fn get_dashboard(State(state): State<AppState>) -> Result<Json<DashboardResponse>> {
    let now = Utc::now();
    let clients = with_store(&state.store, Store::client_tree).await?;

    let mut projects = Vec::new();
    let mut tasks = Vec::new();
    for client in &clients {
        for tree in &client.projects {
            for task in &tree.tasks {
                let elapsed_ms = tracker::elapsed(task, now);
                tasks.push(DashboardTask {
                    task: task.clone(),
                    project_name: tree.project.name.clone(),
                    client_name: client.client.name.clone(),
                    elapsed_ms,
                    elapsed_label: elapsed_label(elapsed_ms),
                });
            }
            projects.push(DashboardProject {
                project: tree.project.clone(),
                client_name: client.client.name.clone(),
            });
        }
    }

    let counts = DashboardCounts {
        clients: clients.len(),
        projects: projects.len(),
        tasks: tasks.len(),
    };

    Ok(Json(DashboardResponse {
        clients,
        projects,
        tasks,
        counts,
    }))
}

// ============================================================================
// Records
// ============================================================================

#[derive(Debug, Serialize)]
struct ClientsResponse {
    clients: Vec<ClientTree>,
}

/// GET /api/clients - Clients with nested projects and tasks.
async fn get_clients(State(state): State<AppState>) -> Result<Json<ClientsResponse>> {
    Ok(Json(ClientsResponse {
        clients: with_store(&state.store, Store::client_tree).await?,
    }))
}

#[derive(Debug, Deserialize)]
struct ClientRequest {
    name: Option<String>,
    contact: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ClientResponse {
    pub client: Client,
}

/// POST /api/clients - Create a client.
async fn post_client(State(state): State<AppState>, body: Bytes) -> Result<Json<ClientResponse>> {
    let request: ClientRequest = parse_body(&body)?;
    let name = non_blank(request.name.as_deref())
        .ok_or_else(|| ServerError::validation("Client name is required."))?;

    let new = NewClient {
        name,
        contact: non_blank(request.contact.as_deref()),
    };
    let client = with_store(&state.store, move |store| store.create_client(new)).await?;
    info!(client_id = client.id, "Client created");
    Ok(Json(ClientResponse { client }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProjectRequest {
    client_id: Option<IdInput>,
    name: Option<String>,
    status: Option<String>,
    owner: Option<String>,
    due: Option<String>,
    notes: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ProjectResponse {
    pub project: Project,
}

/// POST /api/projects - Create a project under a client.
async fn post_project(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<ProjectResponse>> {
    let request: ProjectRequest = parse_body(&body)?;
    let client_id = request.client_id.as_ref().and_then(IdInput::as_id);
    let name = non_blank(request.name.as_deref());
    let (Some(client_id), Some(name)) = (client_id, name) else {
        return Err(ServerError::validation(
            "clientId (number) and name are required.",
        ));
    };

    let new = NewProject {
        client_id,
        name,
        status: non_blank(request.status.as_deref()),
        owner: non_blank(request.owner.as_deref()),
        notes: non_blank(request.notes.as_deref()),
        due: parse_due(request.due.as_deref()),
    };
    let project = with_store(&state.store, move |store| store.create_project(new)).await?;
    info!(project_id = project.id, client_id, "Project created");
    Ok(Json(ProjectResponse { project }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TaskRequest {
    project_id: Option<IdInput>,
    title: Option<String>,
    status: Option<String>,
    owner: Option<String>,
    due: Option<String>,
    prompt: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TaskResponse {
    pub task: Task,
}

/// POST /api/tasks - Create an idle task under a project.
async fn post_task(State(state): State<AppState>, body: Bytes) -> Result<Json<TaskResponse>> {
    let request: TaskRequest = parse_body(&body)?;
    let project_id = request.project_id.as_ref().and_then(IdInput::as_id);
    let title = non_blank(request.title.as_deref());
    let (Some(project_id), Some(title)) = (project_id, title) else {
        return Err(ServerError::validation(
            "projectId (number) and title are required.",
        ));
    };

    let new = NewTask {
        project_id,
        title,
        status: non_blank(request.status.as_deref()),
        owner: non_blank(request.owner.as_deref()),
        prompt: non_blank(request.prompt.as_deref()),
        due: parse_due(request.due.as_deref()),
    };
    let task = with_store(&state.store, move |store| store.create_task(new)).await?;
    info!(task_id = task.id, project_id, "Task created");
    Ok(Json(TaskResponse { task }))
}

// ============================================================================
// POST /api/files - Workspace Files
// ============================================================================

#[derive(Debug, Deserialize)]
struct FileRequest {
    action: Option<String>,
    path: Option<String>,
    content: Option<serde_json::Value>,
}

/// Response body for file operations.
#[derive(Debug, Serialize, Deserialize)]
pub struct FileResponse {
    pub ok: bool,
    /// Path relative to the workspace root.
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub files: Option<Vec<DirEntry>>,
}

impl FileResponse {
    fn new(path: String) -> Self {
        Self {
            ok: true,
            path,
            message: None,
            content: None,
            files: None,
        }
    }
}

/// POST /api/files - Create, append, read or list inside the workspace.
///
/// # Request Body
///
/// `{ "action": "create" | "append" | "read" | "list", "path"?: string, "content"?: string }`
///
/// `path` is always relative to the workspace root.
///
/// # Responses
///
/// - `200 OK` - Operation result
/// - `400 Bad Request` - Missing action, path or content
/// - `403 Forbidden` - Path escapes the workspace
/// - `404 Not Found` - File or directory does not exist
async fn post_files(State(state): State<AppState>, body: Bytes) -> Result<Json<FileResponse>> {
    let started = Instant::now();
    let request: FileRequest = parse_body(&body)?;

    let action = request
        .action
        .as_deref()
        .ok_or_else(|| ServerError::validation("action is required"))?;
    let action =
        FileAction::parse(action).ok_or_else(|| ServerError::validation("Unsupported action"))?;

    let path = request.path.as_deref().unwrap_or_default();
    if action.requires_path() && path.trim().is_empty() {
        return Err(ServerError::validation("path is required for this action"));
    }
    let content = request.content.as_ref().and_then(|v| v.as_str());
    if action.requires_content() && content.is_none() {
        return Err(ServerError::validation(
            "content is required for create/append",
        ));
    }
    let content = content.unwrap_or_default();

    let result = run_file_action(&state.workspace, action, path, content).await;

    let entry = match &result {
        Ok(response) => LogEntry::info("files", format!("{action:?} {}", response.path)),
        Err(err) => LogEntry::error("files", format!("{action:?} failed: {err}")),
    };
    state
        .app_log
        .record(entry.with_duration_ms(millis_since(started)))
        .await;

    Ok(Json(result?))
}

async fn run_file_action(
    workspace: &Workspace,
    action: FileAction,
    path: &str,
    content: &str,
) -> Result<FileResponse> {
    match action {
        FileAction::Create => {
            let target = workspace.create(path, content).await?;
            let rel = workspace.relative(&target);
            Ok(FileResponse {
                message: Some(format!("Created {rel}")),
                ..FileResponse::new(rel)
            })
        }
        FileAction::Append => {
            let target = workspace.append(path, content).await?;
            let rel = workspace.relative(&target);
            Ok(FileResponse {
                message: Some(format!("Appended to {rel}")),
                ..FileResponse::new(rel)
            })
        }
        FileAction::Read => {
            let (target, content) = workspace.read(path).await?;
            Ok(FileResponse {
                content: Some(content),
                ..FileResponse::new(workspace.relative(&target))
            })
        }
        FileAction::List => {
            let (target, files) = workspace.list(path).await?;
            Ok(FileResponse {
                files: Some(files),
                ..FileResponse::new(workspace.relative(&target))
            })
        }
    }
}

// ============================================================================
// Application log
// ============================================================================

#[derive(Debug, Deserialize)]
struct LogRequest {
    source: Option<String>,
    level: Option<String>,
    message: Option<String>,
    detail: Option<serde_json::Value>,
}

/// A client-posted log line, stored with its level as given.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ClientLogLine {
    ts: chrono::DateTime<Utc>,
    source: String,
    level: String,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    detail: Option<serde_json::Value>,
}

/// POST /api/log - Append a client-supplied line to the application log.
///
/// Missing or empty `source`, `level` and `message` default to `"app"`,
/// `"info"` and `""`.
async fn post_log(State(state): State<AppState>, body: Bytes) -> Result<Json<serde_json::Value>> {
    let request: LogRequest = parse_body(&body)?;
    let or_default = |value: Option<String>, default: &str| {
        value
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| default.to_string())
    };
    let line = ClientLogLine {
        ts: Utc::now(),
        source: or_default(request.source, "app"),
        level: or_default(request.level, "info"),
        message: request.message.unwrap_or_default(),
        detail: request.detail,
    };

    state.app_log.append(&line).await?;
    Ok(Json(json!({ "ok": true })))
}

#[derive(Debug, Deserialize)]
struct LogsQuery {
    limit: Option<String>,
}

/// GET /api/logs - Tail of the application log.
///
/// `limit` defaults to 120 and is clamped to 1..=500.
async fn get_logs(
    State(state): State<AppState>,
    Query(query): Query<LogsQuery>,
) -> Result<Json<LogTail>> {
    let limit = tail_limit(query.limit.as_deref());
    Ok(Json(state.app_log.tail(limit).await?))
}

// ============================================================================
// /api/scrape - Page Summaries
// ============================================================================

#[derive(Debug, Deserialize)]
struct ScrapeRequest {
    url: Option<String>,
}

/// POST /api/scrape - Fetch a page and summarize it.
///
/// # Request Body
///
/// ```json
/// { "url": "https://example.com" }
/// ```
///
/// # Responses
///
/// - `200 OK` - [`PageSummary`]
/// - `400 Bad Request` - Missing or non-http(s) URL
/// - `502 Bad Gateway` - Upstream failed, timed out or returned an error status
async fn post_scrape(State(state): State<AppState>, body: Bytes) -> Result<Json<PageSummary>> {
    let started = Instant::now();
    let request: ScrapeRequest = parse_body(&body)?;
    let url = request.url.unwrap_or_default();

    match state.scraper.scrape(&url).await {
        Ok(summary) => {
            debug!(url = %summary.url, words = summary.counts.words, "Page scraped");
            state
                .app_log
                .record(
                    LogEntry::info("scrape", "POST /api/scrape success")
                        .with_duration_ms(millis_since(started))
                        .with_detail(json!({ "url": summary.url, "title": summary.title })),
                )
                .await;
            Ok(Json(summary))
        }
        Err(err) => {
            warn!(error = %err, "Scrape failed");
            state
                .app_log
                .record(
                    LogEntry::error("scrape", "POST /api/scrape failed")
                        .with_duration_ms(millis_since(started))
                        .with_detail(json!({ "url": url, "error": err.to_string() })),
                )
                .await;
            Err(err.into())
        }
    }
}

// ============================================================================
// /api/db/health - Snapshot Size
// ============================================================================

/// GET /api/db/health - Snapshot file size against the configured limit.
///
/// # Responses
///
/// - `200 OK` - [`SnapshotHealth`]
/// - `404 Not Found` - No snapshot file (in-memory store or nothing written yet)
async fn get_db_health(State(state): State<AppState>) -> Result<Json<SnapshotHealth>> {
    let started = Instant::now();
    let threshold = state.config.db_max_bytes;
    let Some(health) = with_store(&state.store, move |store| store.health(threshold)).await? else {
        return Err(ServerError::not_found("Database file not found"));
    };

    state
        .app_log
        .record(
            LogEntry::info("db-health", "GET /api/db/health success")
                .with_duration_ms(millis_since(started))
                .with_detail(json!({
                    "sizeBytes": health.size_bytes,
                    "thresholdBytes": health.threshold_bytes,
                    "percent": health.percent,
                    "status": health.status,
                })),
        )
        .await;
    Ok(Json(health))
}

// ============================================================================
// Tests
// ============================================================================
