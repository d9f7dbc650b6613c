use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Deserialize;
use serde_json::json;

use crate::bridge::session::TAIL_LINES;
use crate::bridge::{CommandSpec, Origin, StreamBridge};
use crate::config::Config;
use crate::errors::{ServiceError, StreamError};
use crate::services::{GitService, NetlifyService, NpmTask, WorkspaceService};

use super::monitor;

const AGENT_LABEL: &str = "Cursor Agent";
const DEPLOY_POLL_INTERVAL: Duration = Duration::from_secs(5);
const DEPLOY_POLL_TIMEOUT: Duration = Duration::from_secs(300);

// ── Shared application state ──────────────────────────────────────────

pub struct AppState {
    pub config: Config,
    pub bridge: StreamBridge,
    pub workspace: WorkspaceService,
    pub git: GitService,
    pub netlify: Option<NetlifyService>,
    pub started_at: Instant,
}

pub type SharedState = Arc<AppState>;

impl AppState {
    pub fn from_config(config: Config) -> Result<Self> {
        let bridge = StreamBridge::new(config.bridge_settings());
        let workspace = WorkspaceService::new(config.workspace.clone(), bridge);
        let git = GitService::new(config.github_token.clone(), bridge);
        let netlify = match (&config.netlify_auth_token, &config.netlify_site_id) {
            (Some(token), Some(site)) => Some(NetlifyService::new(token, site, workspace.clone())?),
            _ => None,
        };
        Ok(Self {
            config,
            bridge,
            workspace,
            git,
            netlify,
            started_at: Instant::now(),
        })
    }

    fn netlify(&self) -> Result<&NetlifyService, ApiError> {
        self.netlify
            .as_ref()
            .ok_or_else(|| ServiceError::NotConfigured("Netlify").into())
    }

    /// Existing project directory, or 404.
    fn existing_project(&self, project: &str) -> Result<PathBuf, ApiError> {
        let path = self.workspace.project_path(project)?;
        if !path.is_dir() {
            return Err(ServiceError::ProjectNotFound {
                name: project.to_string(),
                path: path.to_string_lossy().to_string(),
            }
            .into());
        }
        Ok(path)
    }

    fn agent_command(&self, project: &str, prompt: &str) -> Result<CommandSpec, ApiError> {
        let key = self
            .config
            .cursor_api_key
            .as_deref()
            .ok_or(ServiceError::NotConfigured("CURSOR_API_KEY"))?;
        let path = self.existing_project(project)?;
        Ok(CommandSpec::agent(&self.config.agent_bin, key, &path, prompt))
    }
}

// ── Request payload types ─────────────────────────────────────────────

#[derive(Deserialize)]
pub struct ChatRequest {
    #[serde(default)]
    pub project: String,
    #[serde(default)]
    pub prompt: String,
}

#[derive(Deserialize)]
pub struct StreamCommandRequest {
    #[serde(default)]
    pub project: String,
    #[serde(rename = "type", default)]
    pub kind: String,
}

#[derive(Deserialize)]
pub struct CommitRequest {
    #[serde(default)]
    pub project: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub files: Vec<String>,
}

#[derive(Deserialize)]
pub struct BranchRequest {
    #[serde(default)]
    pub project: String,
    #[serde(default)]
    pub branch: String,
}

#[derive(Deserialize)]
pub struct CloneRequest {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub project: String,
}

#[derive(Deserialize)]
pub struct DeployRequest {
    #[serde(default)]
    pub project: String,
    #[serde(default)]
    pub wait: bool,
}

// ── Error handling ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    BadRequest(String),
    Unauthorized(String),
    Unavailable(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            ApiError::Unavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };
        if status.is_server_error() {
            tracing::error!(%status, error = %message, "request failed");
        }
        (status, Json(json!({"success": false, "error": message}))).into_response()
    }
}

impl From<ServiceError> for ApiError {
    fn from(err: ServiceError) -> Self {
        let msg = err.to_string();
        match err {
            ServiceError::ProjectNotFound { .. } => ApiError::NotFound(msg),
            ServiceError::InvalidProject { .. } | ServiceError::InvalidName(_) => {
                ApiError::BadRequest(msg)
            }
            ServiceError::NotConfigured(_) => ApiError::Unavailable(msg),
            _ => ApiError::Internal(msg),
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        ApiError::Internal(format!("{:#}", err))
    }
}

impl From<StreamError> for ApiError {
    fn from(err: StreamError) -> Self {
        ApiError::Internal(err.to_string())
    }
}

fn require(value: &str, field: &str) -> Result<(), ApiError> {
    if value.trim().is_empty() {
        return Err(ApiError::BadRequest(format!("{} is required", field)));
    }
    Ok(())
}

/// Run a blocking git2 call off the async runtime.
async fn blocking<T, F>(f: F) -> Result<T, ApiError>
where
    F: FnOnce() -> Result<T, ServiceError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ApiError::Internal(format!("Task join error: {}", e)))?
        .map_err(ApiError::from)
}

// ── Router ────────────────────────────────────────────────────────────

pub fn api_router() -> Router<SharedState> {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/chat", post(chat))
        .route("/api/chat/simple", post(chat_simple))
        .route("/api/review", post(review))
        .route("/api/analyze", post(analyze))
        .route("/api/stream", post(stream_command))
        .route("/api/projects", get(list_projects))
        .route("/api/projects/{project}/status", get(project_status))
        .route("/api/projects/{project}/validate", get(validate_project))
        .route("/api/projects/{project}/install", post(install_project))
        .route("/api/projects/{project}/build", post(build_project))
        .route("/api/git/commit", post(git_commit))
        .route("/api/git/push", post(git_push))
        .route("/api/git/pull", post(git_pull))
        .route("/api/git/branch", post(git_create_branch))
        .route("/api/git/switch", post(git_switch_branch))
        .route("/api/git/clone", post(git_clone))
        .route("/api/git/{project}/status", get(git_status))
        .route("/api/git/{project}/branches", get(git_branches))
        .route("/api/git/{project}/diff", get(git_diff))
        .route("/api/git/{project}/diff/staged", get(git_staged_diff))
        .route("/api/git/{project}/reset", post(git_reset))
        .route("/api/deploy", post(deploy))
        .route("/api/deploy/status/{deploy_id}", get(deploy_status))
        .route("/api/deploy/site", get(site_info))
        .route("/api/monitor/system", get(monitor::system_stats))
        .route("/api/monitor/projects", get(monitor::project_stats))
        .route("/api/monitor/health", get(monitor::service_health))
}

// ── Handlers: agent ───────────────────────────────────────────────────

async fn health_check(State(state): State<SharedState>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "service": state.config.service_name,
        "version": state.config.version,
    }))
}

async fn chat(
    State(state): State<SharedState>,
    Json(req): Json<ChatRequest>,
) -> Result<Response, ApiError> {
    require(&req.project, "project")?;
    require(&req.prompt, "prompt")?;
    launch_agent(&state, &req.project, &req.prompt)
}

async fn review(
    State(state): State<SharedState>,
    Json(req): Json<ChatRequest>,
) -> Result<Response, ApiError> {
    require(&req.project, "project")?;
    let prompt = review_prompt(&req.project, &req.prompt);
    launch_agent(&state, &req.project, &prompt)
}

async fn analyze(
    State(state): State<SharedState>,
    Json(req): Json<ChatRequest>,
) -> Result<Response, ApiError> {
    require(&req.project, "project")?;
    let prompt = analyze_prompt(&req.project, &req.prompt);
    launch_agent(&state, &req.project, &prompt)
}

fn launch_agent(state: &SharedState, project: &str, prompt: &str) -> Result<Response, ApiError> {
    let spec = state.agent_command(project, prompt)?;
    tracing::info!(project, "starting agent stream");
    let stream = state.bridge.launch(&spec, AGENT_LABEL)?;
    Ok(stream.response.into_response())
}

pub fn review_prompt(project: &str, extra: &str) -> String {
    with_requirements(
        format!(
            "Review the code of project {}, focusing on code quality, security, performance and best practices.",
            project
        ),
        extra,
    )
}

pub fn analyze_prompt(project: &str, extra: &str) -> String {
    with_requirements(
        format!(
            "Analyze the architecture of project {}: system design, component structure, dependencies and technology stack.",
            project
        ),
        extra,
    )
}

fn with_requirements(base: String, extra: &str) -> String {
    if extra.trim().is_empty() {
        base
    } else {
        format!("{}\n\nSpecific requirements: {}", base, extra.trim())
    }
}

async fn chat_simple(
    State(state): State<SharedState>,
    Json(req): Json<ChatRequest>,
) -> Result<Response, ApiError> {
    require(&req.project, "project")?;
    require(&req.prompt, "prompt")?;
    let spec = state.agent_command(&req.project, &req.prompt)?;
    let output = state.bridge.collect(&spec).await?;

    let message = output
        .lines
        .iter()
        .map(|line| match line.origin {
            Origin::Stdout => format!("[INFO] {}", line.text),
            Origin::Stderr => format!("[ERROR] {}", line.text),
        })
        .collect::<Vec<_>>()
        .join("\n");

    if output.succeeded() {
        return Ok(Json(json!({"success": true, "message": message})).into_response());
    }
    let error = match output.report.read_failures.first() {
        Some(failure) => failure.to_string(),
        None => {
            let skip = output.lines.len().saturating_sub(TAIL_LINES);
            StreamError::ExecutionFailure {
                outcome: output.outcome,
                tail: output.lines[skip..].iter().map(|l| l.text.clone()).collect(),
            }
            .to_string()
        }
    };
    Ok((
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({"success": false, "message": message, "error": error})),
    )
        .into_response())
}

async fn stream_command(
    State(state): State<SharedState>,
    Json(req): Json<StreamCommandRequest>,
) -> Result<Response, ApiError> {
    require(&req.project, "project")?;
    require(&req.kind, "type")?;
    let task: NpmTask = req.kind.parse().map_err(ApiError::BadRequest)?;
    let path = state.existing_project(&req.project)?;
    tracing::info!(project = %req.project, task = task.as_str(), "starting command stream");
    let stream = state.bridge.launch(&task.command(&path), &task.label())?;
    Ok(stream.response.into_response())
}

// ── Handlers: projects ────────────────────────────────────────────────

async fn list_projects(State(state): State<SharedState>) -> Result<impl IntoResponse, ApiError> {
    let projects = state.workspace.list_projects()?;
    Ok(Json(json!({"success": true, "projects": projects})))
}

async fn project_status(
    State(state): State<SharedState>,
    Path(project): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let status = state.workspace.status(&project)?;
    Ok(Json(json!({"success": true, "status": status})))
}

async fn validate_project(
    State(state): State<SharedState>,
    Path(project): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    match state.workspace.validate(&project) {
        Ok(_) => Ok(Json(json!({"success": true, "valid": true}))),
        Err(e @ (ServiceError::ProjectNotFound { .. } | ServiceError::InvalidProject { .. })) => {
            Ok(Json(json!({"success": false, "valid": false, "error": e.to_string()})))
        }
        Err(e) => Err(e.into()),
    }
}

async fn install_project(
    State(state): State<SharedState>,
    Path(project): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let output = state.workspace.install(&project).await?;
    Ok(Json(json!({"success": true, "message": "Dependencies installed", "output": output})))
}

async fn build_project(
    State(state): State<SharedState>,
    Path(project): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let output = state.workspace.build(&project).await?;
    Ok(Json(json!({"success": true, "message": "Build finished", "output": output})))
}

// ── Handlers: git ─────────────────────────────────────────────────────

async fn git_status(
    State(state): State<SharedState>,
    Path(project): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let path = state.workspace.project_path(&project)?;
    let git = state.git.clone();
    let status = blocking(move || git.status(&path)).await?;
    Ok(Json(json!({"success": true, "status": status})))
}

async fn git_branches(
    State(state): State<SharedState>,
    Path(project): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let path = state.workspace.project_path(&project)?;
    let git = state.git.clone();
    let branches = blocking(move || git.branches(&path)).await?;
    Ok(Json(json!({"success": true, "branches": branches})))
}

async fn git_diff(
    State(state): State<SharedState>,
    Path(project): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let path = state.workspace.project_path(&project)?;
    let git = state.git.clone();
    let diff = blocking(move || git.diff(&path)).await?;
    Ok(Json(json!({"success": true, "diff": diff})))
}

async fn git_staged_diff(
    State(state): State<SharedState>,
    Path(project): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let path = state.workspace.project_path(&project)?;
    let git = state.git.clone();
    let diff = blocking(move || git.staged_diff(&path)).await?;
    Ok(Json(json!({"success": true, "diff": diff})))
}

async fn git_reset(
    State(state): State<SharedState>,
    Path(project): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let path = state.workspace.project_path(&project)?;
    let git = state.git.clone();
    blocking(move || git.reset_hard(&path)).await?;
    Ok(Json(json!({"success": true, "message": "Changes reset"})))
}

async fn git_commit(
    State(state): State<SharedState>,
    Json(req): Json<CommitRequest>,
) -> Result<impl IntoResponse, ApiError> {
    require(&req.project, "project")?;
    require(&req.message, "message")?;
    let path = state.workspace.project_path(&req.project)?;
    let git = state.git.clone();
    let commit = blocking(move || git.commit(&path, &req.message, &req.files)).await?;
    Ok(Json(json!({"success": true, "message": "Committed", "commit": commit})))
}

async fn git_push(
    State(state): State<SharedState>,
    Json(req): Json<BranchRequest>,
) -> Result<impl IntoResponse, ApiError> {
    require(&req.project, "project")?;
    let branch = if req.branch.trim().is_empty() { "main" } else { req.branch.trim() };
    let path = state.existing_project(&req.project)?;
    state.git.push(&path, branch).await?;
    Ok(Json(json!({"success": true, "message": format!("Pushed {}", branch)})))
}

async fn git_pull(
    State(state): State<SharedState>,
    Json(req): Json<BranchRequest>,
) -> Result<impl IntoResponse, ApiError> {
    require(&req.project, "project")?;
    let branch = if req.branch.trim().is_empty() { "main" } else { req.branch.trim() };
    let path = state.existing_project(&req.project)?;
    state.git.pull(&path, branch).await?;
    Ok(Json(json!({"success": true, "message": format!("Pulled {}", branch)})))
}

async fn git_create_branch(
    State(state): State<SharedState>,
    Json(req): Json<BranchRequest>,
) -> Result<impl IntoResponse, ApiError> {
    require(&req.project, "project")?;
    require(&req.branch, "branch")?;
    let path = state.workspace.project_path(&req.project)?;
    let git = state.git.clone();
    let branch = req.branch.clone();
    blocking(move || git.create_branch(&path, &branch)).await?;
    Ok(Json(json!({"success": true, "message": format!("Created branch {}", req.branch)})))
}

async fn git_switch_branch(
    State(state): State<SharedState>,
    Json(req): Json<BranchRequest>,
) -> Result<impl IntoResponse, ApiError> {
    require(&req.project, "project")?;
    require(&req.branch, "branch")?;
    let path = state.workspace.project_path(&req.project)?;
    let git = state.git.clone();
    let branch = req.branch.clone();
    blocking(move || git.switch_branch(&path, &branch)).await?;
    Ok(Json(json!({"success": true, "message": format!("Switched to {}", req.branch)})))
}

async fn git_clone(
    State(state): State<SharedState>,
    Json(req): Json<CloneRequest>,
) -> Result<impl IntoResponse, ApiError> {
    require(&req.url, "url")?;
    require(&req.project, "project")?;
    let target = state.workspace.project_path(&req.project)?;
    if target.exists() {
        return Err(ApiError::BadRequest(format!(
            "Project {} already exists",
            req.project
        )));
    }
    std::fs::create_dir_all(state.workspace.frontends_dir()).map_err(ServiceError::from)?;
    state.git.clone_repo(&req.url, &target).await?;
    Ok(Json(json!({"success": true, "message": format!("Cloned into {}", req.project)})))
}

// ── Handlers: deploy ──────────────────────────────────────────────────

async fn deploy(
    State(state): State<SharedState>,
    Json(req): Json<DeployRequest>,
) -> Result<impl IntoResponse, ApiError> {
    require(&req.project, "project")?;
    let netlify = state.netlify()?;
    let deploy = netlify.deploy_project(&req.project).await?;
    if !req.wait {
        return Ok(Json(json!({"success": true, "deploy": deploy})));
    }
    let status = netlify
        .wait_for_deploy(&deploy.id, DEPLOY_POLL_INTERVAL, DEPLOY_POLL_TIMEOUT)
        .await?;
    Ok(Json(json!({
        "success": status.is_ready(),
        "deploy": deploy,
        "status": status,
    })))
}

async fn deploy_status(
    State(state): State<SharedState>,
    Path(deploy_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let status = state.netlify()?.deploy_status(&deploy_id).await?;
    Ok(Json(json!({"success": true, "status": status})))
}

async fn site_info(State(state): State<SharedState>) -> Result<impl IntoResponse, ApiError> {
    let site = state.netlify()?.site_info().await?;
    Ok(Json(json!({"success": true, "site": site})))
}
