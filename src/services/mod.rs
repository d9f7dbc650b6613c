//! Project automation helpers used by the agent server.
//!
//! | Module      | Responsibility                                           |
//! |-------------|----------------------------------------------------------|
//! | `workspace` | Project discovery under `<workspace>/frontends`, npm tasks |
//! | `git`       | Repository status, commits, branches (git2) and push/pull |
//! | `netlify`   | Build output upload and deploy polling                   |

pub mod git;
pub mod netlify;
pub mod workspace;

pub use git::{GitService, GitStats, GitStatus};
pub use netlify::{DeployResponse, DeployStatus, NetlifyService};
pub use workspace::{NpmTask, ProjectStatus, WorkspaceService, validate_project_name};
