//! Monitor endpoints: process uptime, workspace usage and per-project git summaries.

use std::time::Duration;

use axum::{Json, extract::State, response::IntoResponse};
use futures::future::join_all;
use serde::Serialize;
use serde_json::{Value, json};

use super::api::{ApiError, SharedState};
use crate::services::GitStats;

#[derive(Debug, Serialize)]
pub struct ProjectDetail {
    pub name: String,
    pub path: String,
    pub exists: bool,
    pub has_package_json: bool,
    pub has_node_modules: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub git_stats: Option<GitStats>,
}

#[derive(Debug, Serialize)]
pub struct ProjectSummary {
    pub total_projects: usize,
    pub active_projects: usize,
    pub total_commits: usize,
    pub project_details: Vec<ProjectDetail>,
}

pub fn format_uptime(uptime: Duration) -> String {
    let secs = uptime.as_secs();
    format!("{}h {}m {}s", secs / 3600, (secs / 60) % 60, secs % 60)
}

fn service_status(state: &SharedState) -> Value {
    let availability = |ok: bool| if ok { "available" } else { "not_configured" };
    json!({
        "server": "running",
        "cursor": availability(state.config.cursor_api_key.is_some()),
        "git": availability(true),
        "github": availability(state.config.is_github_configured()),
        "netlify": availability(state.netlify.is_some()),
    })
}

pub async fn system_stats(State(state): State<SharedState>) -> Result<impl IntoResponse, ApiError> {
    let workspace = state.workspace.clone();
    let (size, projects) = tokio::task::spawn_blocking(move || {
        (workspace.workspace_size(), workspace.list_projects())
    })
    .await
    .map_err(|e| ApiError::Internal(format!("Task join error: {}", e)))?;
    let projects = projects?;

    let active = projects
        .iter()
        .filter(|p| state.workspace.status(p).map(|s| s.exists).unwrap_or(false))
        .count();
    let cpus = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);

    Ok(Json(json!({
        "success": true,
        "stats": {
            "uptime": format_uptime(state.started_at.elapsed()),
            "disk_usage": {
                "workspace_size_mb": size / 1024 / 1024,
                "workspace_path": state.workspace.root(),
            },
            "cpu_usage": {"num_cpu": cpus},
            "project_stats": {
                "total_projects": projects.len(),
                "active_projects": active,
                "projects": projects,
            },
            "service_status": service_status(&state),
        },
        "timestamp": chrono::Utc::now().timestamp(),
    })))
}

pub async fn project_stats(State(state): State<SharedState>) -> Result<impl IntoResponse, ApiError> {
    let names = state.workspace.list_projects()?;
    let details = join_all(names.into_iter().map(|name| project_detail(state.clone(), name)))
        .await
        .into_iter()
        .collect::<Result<Vec<_>, ApiError>>()?;

    let summary = ProjectSummary {
        total_projects: details.len(),
        active_projects: details.iter().filter(|d| d.exists).count(),
        total_commits: details
            .iter()
            .filter_map(|d| d.git_stats.as_ref())
            .map(|g| g.commit_count)
            .sum(),
        project_details: details,
    };

    Ok(Json(json!({
        "success": true,
        "project_stats": summary,
        "timestamp": chrono::Utc::now().timestamp(),
    })))
}

async fn project_detail(state: SharedState, name: String) -> Result<ProjectDetail, ApiError> {
    let status = state.workspace.status(&name)?;
    let git_stats = if status.exists {
        let path = state.workspace.project_path(&name)?;
        let git = state.git.clone();
        // Projects without a repository simply carry no git stats.
        tokio::task::spawn_blocking(move || git.stats(&path).ok())
            .await
            .map_err(|e| ApiError::Internal(format!("Task join error: {}", e)))?
    } else {
        None
    };
    Ok(ProjectDetail {
        name: status.project,
        path: status.path,
        exists: status.exists,
        has_package_json: status.has_package_json,
        has_node_modules: status.has_node_modules,
        git_stats,
    })
}

pub async fn service_health(State(state): State<SharedState>) -> impl IntoResponse {
    Json(json!({
        "success": true,
        "health": {
            "overall": "healthy",
            "services": {
                "api": {"status": "healthy"},
                "cursor": {
                    "status": if state.config.cursor_api_key.is_some() { "healthy" } else { "degraded" },
                    "available": state.config.cursor_api_key.is_some(),
                },
                "git": {"status": "healthy", "available": true},
                "netlify": {
                    "status": if state.netlify.is_some() { "healthy" } else { "not_configured" },
                    "available": state.netlify.is_some(),
                },
            },
            "uptime": format_uptime(state.started_at.elapsed()),
        },
        "timestamp": chrono::Utc::now().timestamp(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::api::{api_router, tests::test_state};
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    async fn get_json(app: axum::Router, uri: &str) -> Value {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[test]
    fn test_format_uptime() {
        assert_eq!(format_uptime(Duration::from_secs(0)), "0h 0m 0s");
        assert_eq!(format_uptime(Duration::from_secs(3723)), "1h 2m 3s");
    }

    #[tokio::test]
    async fn test_system_stats_counts_projects() {
        let (state, _dir) = test_state("true");
        let body = get_json(api_router().with_state(state), "/api/monitor/system").await;
        assert_eq!(body["success"], true);
        assert_eq!(body["stats"]["project_stats"]["total_projects"], 1);
        assert_eq!(body["stats"]["project_stats"]["active_projects"], 1);
        assert_eq!(body["stats"]["service_status"]["netlify"], "not_configured");
        assert!(body["timestamp"].is_i64());
    }

    #[tokio::test]
    async fn test_project_stats_includes_git_summary() {
        let (state, dir) = test_state("true");
        let site = dir.path().join("frontends/site");
        let repo = git2::Repository::init(&site).unwrap();
        let mut config = repo.config().unwrap();
        config.set_str("user.name", "test").unwrap();
        config.set_str("user.email", "test@test.com").unwrap();
        state.git.commit(&site, "init", &[]).unwrap();

        let body = get_json(api_router().with_state(state), "/api/monitor/projects").await;
        let stats = &body["project_stats"];
        assert_eq!(stats["total_projects"], 1);
        assert_eq!(stats["total_commits"], 1);
        assert_eq!(stats["project_details"][0]["git_stats"]["status"], "clean");
    }

    #[tokio::test]
    async fn test_service_health() {
        let (state, _dir) = test_state("true");
        let body = get_json(api_router().with_state(state), "/api/monitor/health").await;
        assert_eq!(body["health"]["overall"], "healthy");
        assert_eq!(body["health"]["services"]["cursor"]["available"], true);
        assert_eq!(body["health"]["services"]["netlify"]["available"], false);
    }
}
