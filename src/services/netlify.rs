use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::anyhow;
use serde::{Deserialize, Serialize};
use walkdir::WalkDir;

use crate::errors::ServiceError;

use super::workspace::WorkspaceService;

pub const NETLIFY_API_URL: &str = "https://api.netlify.com";

/// Checked in order; the first existing directory is deployed.
const BUILD_DIRS: [&str; 5] = ["dist", "build", "out", ".next", "public"];

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Serialize)]
struct DeployRequest<'a> {
    files: &'a BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DeployResponse {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub deploy_id: String,
    #[serde(default, alias = "error_message", skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DeployStatus {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub url: String,
    #[serde(default, alias = "error_message", skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DeployStatus {
    pub fn is_ready(&self) -> bool {
        self.state == "ready"
    }

    pub fn is_failed(&self) -> bool {
        self.state == "error"
    }
}

/// Builds a frontend project and uploads its output to a Netlify site.
#[derive(Debug, Clone)]
pub struct NetlifyService {
    client: reqwest::Client,
    base_url: String,
    auth_token: String,
    site_id: String,
    workspace: WorkspaceService,
}

impl NetlifyService {
    pub fn new(
        auth_token: impl Into<String>,
        site_id: impl Into<String>,
        workspace: WorkspaceService,
    ) -> Result<Self, ServiceError> {
        let client = reqwest::Client::builder().timeout(HTTP_TIMEOUT).build()?;
        Ok(Self {
            client,
            base_url: NETLIFY_API_URL.to_string(),
            auth_token: auth_token.into(),
            site_id: site_id.into(),
            workspace,
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn site_id(&self) -> &str {
        &self.site_id
    }

    /// `npm run build`, then upload the first build output directory found.
    pub async fn deploy_project(&self, project: &str) -> Result<DeployResponse, ServiceError> {
        let path = self.workspace.validate(project)?;
        self.workspace.build(project).await?;

        let build_dir = find_build_dir(&path).ok_or_else(|| {
            ServiceError::Other(anyhow!(
                "No build output directory found in {} (looked for {})",
                path.display(),
                BUILD_DIRS.join(", ")
            ))
        })?;
        let files = read_build_files(&build_dir)?;
        tracing::info!(project, dir = %build_dir.display(), files = files.len(), "uploading build output");
        self.create_deploy(&files).await
    }

    pub async fn create_deploy(
        &self,
        files: &BTreeMap<String, String>,
    ) -> Result<DeployResponse, ServiceError> {
        let url = format!("{}/api/v1/sites/{}/deploys", self.base_url, self.site_id);
        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.auth_token)
            .json(&DeployRequest { files })
            .send()
            .await?;
        let deploy: DeployResponse = check_status(resp).await?.json().await?;
        tracing::info!(deploy_id = %deploy.id, state = %deploy.state, "deploy created");
        Ok(deploy)
    }

    pub async fn deploy_status(&self, deploy_id: &str) -> Result<DeployStatus, ServiceError> {
        let url = format!("{}/api/v1/deploys/{}", self.base_url, deploy_id);
        let resp = self
            .client
            .get(&url)
            .bearer_auth(&self.auth_token)
            .send()
            .await?;
        Ok(check_status(resp).await?.json().await?)
    }

    pub async fn site_info(&self) -> Result<serde_json::Value, ServiceError> {
        let url = format!("{}/api/v1/sites/{}", self.base_url, self.site_id);
        let resp = self
            .client
            .get(&url)
            .bearer_auth(&self.auth_token)
            .send()
            .await?;
        Ok(check_status(resp).await?.json().await?)
    }

    /// Poll until the deploy is `ready` or `error`, or `timeout` elapses.
    pub async fn wait_for_deploy(
        &self,
        deploy_id: &str,
        interval: Duration,
        timeout: Duration,
    ) -> Result<DeployStatus, ServiceError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let status = self.deploy_status(deploy_id).await?;
            if status.is_ready() || status.is_failed() {
                return Ok(status);
            }
            tracing::debug!(deploy_id, state = %status.state, "deploy not ready yet");
            if tokio::time::Instant::now() + interval > deadline {
                return Err(ServiceError::Other(anyhow!(
                    "Deploy {} did not finish within {}s (last state: {})",
                    deploy_id,
                    timeout.as_secs(),
                    status.state
                )));
            }
            tokio::time::sleep(interval).await;
        }
    }
}

async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response, ServiceError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(ServiceError::RemoteStatus {
        status: status.as_u16(),
        body,
    })
}

pub fn find_build_dir(project_dir: &Path) -> Option<PathBuf> {
    BUILD_DIRS
        .iter()
        .map(|d| project_dir.join(d))
        .find(|p| p.is_dir())
}

/// Every file under `dir`, keyed by `/`-separated relative path.
pub fn read_build_files(dir: &Path) -> Result<BTreeMap<String, String>, ServiceError> {
    let mut files = BTreeMap::new();
    for entry in WalkDir::new(dir) {
        let entry = entry.map_err(|e| ServiceError::Other(e.into()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let rel = entry
            .path()
            .strip_prefix(dir)
            .map_err(|e| ServiceError::Other(e.into()))?;
        let key = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        let content = std::fs::read(entry.path())?;
        files.insert(key, String::from_utf8_lossy(&content).into_owned());
    }
    Ok(files)
}
