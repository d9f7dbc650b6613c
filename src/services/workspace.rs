use std::path::{Component, Path, PathBuf};
use std::str::FromStr;

use serde::Serialize;
use walkdir::WalkDir;

use crate::bridge::{CommandSpec, StreamBridge};
use crate::errors::ServiceError;

/// An npm script the server is willing to run for a project.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NpmTask {
    Install,
    Build,
    Test,
}

impl NpmTask {
    pub fn as_str(&self) -> &'static str {
        match self {
            NpmTask::Install => "install",
            NpmTask::Build => "build",
            NpmTask::Test => "test",
        }
    }

    pub fn args(&self) -> &'static [&'static str] {
        match self {
            NpmTask::Install => &["install", "--legacy-peer-deps"],
            NpmTask::Build => &["run", "build"],
            NpmTask::Test => &["test"],
        }
    }

    pub fn command(&self, project_dir: &Path) -> CommandSpec {
        CommandSpec::new("npm", project_dir).args(self.args().iter().copied())
    }

    pub fn label(&self) -> String {
        format!("npm {}", self.args().join(" "))
    }
}

impl FromStr for NpmTask {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "install" => Ok(NpmTask::Install),
            "build" => Ok(NpmTask::Build),
            "test" => Ok(NpmTask::Test),
            other => Err(format!("unsupported command type '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ProjectStatus {
    pub project: String,
    pub path: String,
    pub exists: bool,
    pub has_package_json: bool,
    pub has_node_modules: bool,
}

/// Frontend projects living under `<workspace>/frontends/<name>`.
#[derive(Debug, Clone)]
pub struct WorkspaceService {
    root: PathBuf,
    bridge: StreamBridge,
}

impl WorkspaceService {
    pub fn new(root: impl Into<PathBuf>, bridge: StreamBridge) -> Self {
        Self {
            root: root.into(),
            bridge,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn frontends_dir(&self) -> PathBuf {
        self.root.join("frontends")
    }

    /// Path of a project. The name must be a single plain path component.
    pub fn project_path(&self, name: &str) -> Result<PathBuf, ServiceError> {
        validate_project_name(name)?;
        Ok(self.frontends_dir().join(name))
    }

    /// Directories under `frontends/` that contain a `package.json`, sorted.
    pub fn list_projects(&self) -> Result<Vec<String>, ServiceError> {
        let dir = self.frontends_dir();
        if !dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut projects = Vec::new();
        for entry in std::fs::read_dir(&dir)? {
            let entry = entry?;
            if entry.file_type()?.is_dir() && entry.path().join("package.json").is_file() {
                projects.push(entry.file_name().to_string_lossy().to_string());
            }
        }
        projects.sort();
        Ok(projects)
    }

    pub fn status(&self, name: &str) -> Result<ProjectStatus, ServiceError> {
        let path = self.project_path(name)?;
        Ok(ProjectStatus {
            project: name.to_string(),
            path: path.to_string_lossy().to_string(),
            exists: path.is_dir(),
            has_package_json: path.join("package.json").is_file(),
            has_node_modules: path.join("node_modules").is_dir(),
        })
    }

    /// Existing directory with a `package.json`; returns its path.
    pub fn validate(&self, name: &str) -> Result<PathBuf, ServiceError> {
        let path = self.project_path(name)?;
        if !path.is_dir() {
            return Err(ServiceError::ProjectNotFound {
                name: name.to_string(),
                path: path.to_string_lossy().to_string(),
            });
        }
        if !path.join("package.json").is_file() {
            return Err(ServiceError::InvalidProject {
                name: name.to_string(),
            });
        }
        Ok(path)
    }

    pub async fn install(&self, name: &str) -> Result<String, ServiceError> {
        self.run_npm(name, NpmTask::Install).await
    }

    pub async fn build(&self, name: &str) -> Result<String, ServiceError> {
        self.run_npm(name, NpmTask::Build).await
    }

    /// Run an npm task to completion; combined output on success, attached to the error otherwise.
    pub async fn run_npm(&self, name: &str, task: NpmTask) -> Result<String, ServiceError> {
        let path = self.validate(name)?;
        tracing::info!(project = name, task = task.as_str(), "running npm task");
        let output = self.bridge.collect(&task.command(&path)).await?;
        if !output.succeeded() {
            return Err(ServiceError::CommandFailed {
                command: task.label(),
                output: output.combined(),
            });
        }
        Ok(output.combined())
    }

    /// Total size in bytes of all files under the workspace root.
    pub fn workspace_size(&self) -> u64 {
        WalkDir::new(&self.root)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .filter_map(|e| e.metadata().ok())
            .map(|m| m.len())
            .sum()
    }
}

pub fn validate_project_name(name: &str) -> Result<(), ServiceError> {
    let mut components = Path::new(name).components();
    let single_normal = matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    );
    if name.is_empty() || !single_normal || name.contains(['/', '\\', '\0']) {
        return Err(ServiceError::InvalidName(name.to_string()));
    }
    Ok(())
}
