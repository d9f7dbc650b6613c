use std::path::Path;

use git2::{
    BranchType, DiffFormat, DiffOptions, IndexAddOption, Repository, ResetType, Signature,
    StatusOptions, build::CheckoutBuilder,
};
use serde::Serialize;

use crate::bridge::{CommandSpec, StreamBridge};
use crate::errors::ServiceError;

const RECENT_COMMITS: usize = 5;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct GitStatus {
    pub current_branch: Option<String>,
    pub modified_files: Vec<String>,
    pub has_changes: bool,
    pub recent_commits: Vec<String>,
}

/// Per-project summary shown on the monitor page.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct GitStats {
    pub commit_count: usize,
    pub last_commit: Option<String>,
    pub branch: Option<String>,
    pub status: &'static str,
}

/// Git operations on project repositories.
///
/// Local operations go through `git2` and block; call them from
/// `spawn_blocking`. Network operations shell out to the `git` CLI.
#[derive(Debug, Clone)]
pub struct GitService {
    token: Option<String>,
    bridge: StreamBridge,
}

impl GitService {
    pub fn new(token: Option<String>, bridge: StreamBridge) -> Self {
        Self { token, bridge }
    }

    pub fn status(&self, repo_path: &Path) -> Result<GitStatus, ServiceError> {
        let repo = open(repo_path)?;

        let mut opts = StatusOptions::new();
        opts.include_untracked(true).recurse_untracked_dirs(true);
        let modified_files: Vec<String> = repo
            .statuses(Some(&mut opts))?
            .iter()
            .filter_map(|entry| entry.path().map(str::to_string))
            .collect();

        Ok(GitStatus {
            current_branch: current_branch(&repo),
            has_changes: !modified_files.is_empty(),
            modified_files,
            recent_commits: recent_commits(&repo, RECENT_COMMITS)?,
        })
    }

    /// Stage `files` (everything when empty) and commit. Returns the new commit id.
    pub fn commit(&self, repo_path: &Path, message: &str, files: &[String]) -> Result<String, ServiceError> {
        let repo = open(repo_path)?;
        let mut index = repo.index()?;
        if files.is_empty() {
            index.add_all(["*"].iter(), IndexAddOption::DEFAULT, None)?;
        } else {
            index.add_all(files.iter(), IndexAddOption::DEFAULT, None)?;
        }
        index.write()?;

        let tree = repo.find_tree(index.write_tree()?)?;
        let sig = repo
            .signature()
            .or_else(|_| Signature::now("tion", "tion@localhost"))?;

        let parent = repo.head().ok().and_then(|h| h.peel_to_commit().ok());
        let parents: Vec<&git2::Commit<'_>> = parent.iter().collect();
        let oid = repo.commit(Some("HEAD"), &sig, &sig, message, &tree, &parents)?;

        tracing::info!(repo = %repo_path.display(), commit = %oid, "committed changes");
        Ok(oid.to_string())
    }

    /// Create `name` at HEAD and check it out.
    pub fn create_branch(&self, repo_path: &Path, name: &str) -> Result<(), ServiceError> {
        let repo = open(repo_path)?;
        let head = repo.head()?.peel_to_commit()?;
        repo.branch(name, &head, false)?;
        checkout_branch(&repo, name)
    }

    pub fn switch_branch(&self, repo_path: &Path, name: &str) -> Result<(), ServiceError> {
        let repo = open(repo_path)?;
        repo.find_branch(name, BranchType::Local)?;
        checkout_branch(&repo, name)
    }

    pub fn branches(&self, repo_path: &Path) -> Result<Vec<String>, ServiceError> {
        let repo = open(repo_path)?;
        let mut names = Vec::new();
        for branch in repo.branches(Some(BranchType::Local))? {
            let (branch, _) = branch?;
            if let Some(name) = branch.name()? {
                names.push(name.to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    /// Unstaged changes (index to working tree) as a unified diff.
    pub fn diff(&self, repo_path: &Path) -> Result<String, ServiceError> {
        let repo = open(repo_path)?;
        let mut opts = DiffOptions::new();
        let diff = repo.diff_index_to_workdir(None, Some(&mut opts))?;
        patch_text(&diff)
    }

    /// Staged changes (HEAD to index) as a unified diff.
    pub fn staged_diff(&self, repo_path: &Path) -> Result<String, ServiceError> {
        let repo = open(repo_path)?;
        let head_tree = repo.head().ok().and_then(|h| h.peel_to_tree().ok());
        let diff = repo.diff_tree_to_index(head_tree.as_ref(), None, None)?;
        patch_text(&diff)
    }

    /// Discard all tracked changes (`git reset --hard HEAD`).
    pub fn reset_hard(&self, repo_path: &Path) -> Result<(), ServiceError> {
        let repo = open(repo_path)?;
        let head = repo.head()?.peel_to_commit()?;
        repo.reset(head.as_object(), ResetType::Hard, None)?;
        tracing::info!(repo = %repo_path.display(), "reset working tree to HEAD");
        Ok(())
    }

    pub fn stats(&self, repo_path: &Path) -> Result<GitStats, ServiceError> {
        let repo = open(repo_path)?;
        let mut walk = repo.revwalk()?;
        let commit_count = if walk.push_head().is_ok() { walk.count() } else { 0 };
        let last_commit = recent_commits(&repo, 1)?.into_iter().next();
        let mut opts = StatusOptions::new();
        opts.include_untracked(true);
        let clean = repo.statuses(Some(&mut opts))?.is_empty();

        Ok(GitStats {
            commit_count,
            last_commit,
            branch: current_branch(&repo),
            status: if clean { "clean" } else { "modified" },
        })
    }

    pub async fn push(&self, repo_path: &Path, branch: &str) -> Result<String, ServiceError> {
        self.run_git(repo_path, &["push", "origin", branch]).await
    }

    pub async fn pull(&self, repo_path: &Path, branch: &str) -> Result<String, ServiceError> {
        self.run_git(repo_path, &["pull", "origin", branch]).await
    }

    pub async fn clone_repo(&self, url: &str, target: &Path) -> Result<String, ServiceError> {
        if target.exists() {
            return Err(ServiceError::CommandFailed {
                command: "git clone".to_string(),
                output: format!("target path {} already exists", target.display()),
            });
        }
        let parent = target.parent().unwrap_or(Path::new("."));
        let target = target.to_string_lossy().to_string();
        self.run_git(parent, &["clone", url, &target]).await
    }

    async fn run_git(&self, cwd: &Path, args: &[&str]) -> Result<String, ServiceError> {
        let mut spec = CommandSpec::new("git", cwd)
            .args(args.iter().copied())
            .env("GIT_TERMINAL_PROMPT", "0");
        if let Some(token) = &self.token {
            spec = spec.env("GITHUB_TOKEN", token);
        }
        let output = self.bridge.collect(&spec).await?;
        if !output.succeeded() {
            return Err(ServiceError::CommandFailed {
                command: format!("git {}", args.join(" ")),
                output: output.combined(),
            });
        }
        Ok(output.combined())
    }
}

fn open(repo_path: &Path) -> Result<Repository, ServiceError> {
    if !repo_path.exists() {
        return Err(ServiceError::ProjectNotFound {
            name: repo_path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default(),
            path: repo_path.to_string_lossy().to_string(),
        });
    }
    Ok(Repository::open(repo_path)?)
}

fn current_branch(repo: &Repository) -> Option<String> {
    match repo.head() {
        Ok(head) => head.shorthand().map(str::to_string),
        // Unborn branch: HEAD points at a ref that has no commit yet.
        Err(_) => repo
            .find_reference("HEAD")
            .ok()
            .and_then(|r| r.symbolic_target().map(str::to_string))
            .map(|t| t.trim_start_matches("refs/heads/").to_string()),
    }
}

fn recent_commits(repo: &Repository, limit: usize) -> Result<Vec<String>, ServiceError> {
    let mut walk = repo.revwalk()?;
    if walk.push_head().is_err() {
        return Ok(Vec::new());
    }
    let mut commits = Vec::new();
    for oid in walk.take(limit) {
        let commit = repo.find_commit(oid?)?;
        let short = commit.id().to_string();
        commits.push(format!(
            "{} {}",
            &short[..7.min(short.len())],
            commit.summary().unwrap_or("")
        ));
    }
    Ok(commits)
}

fn checkout_branch(repo: &Repository, name: &str) -> Result<(), ServiceError> {
    let refname = format!("refs/heads/{}", name);
    let target = repo.revparse_single(&refname)?;
    repo.checkout_tree(&target, Some(CheckoutBuilder::new().safe()))?;
    repo.set_head(&refname)?;
    Ok(())
}

fn patch_text(diff: &git2::Diff<'_>) -> Result<String, ServiceError> {
    let mut buf = Vec::new();
    diff.print(DiffFormat::Patch, |_delta, _hunk, line| {
        if matches!(line.origin(), '+' | '-' | ' ') {
            buf.push(line.origin() as u8);
        }
        buf.extend_from_slice(line.content());
        true
    })?;
    Ok(String::from_utf8_lossy(&buf).to_string())
}
