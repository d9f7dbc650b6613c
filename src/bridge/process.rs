use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::process::{Child, ChildStderr, ChildStdout, Command};

use crate::errors::StreamError;

use super::Origin;

/// How long `terminate` waits for the killed child to be reaped.
const KILL_GRACE: Duration = Duration::from_secs(5);

/// An immutable description of one external process invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandSpec {
    program: String,
    args: Vec<String>,
    working_dir: PathBuf,
    env: HashMap<String, String>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>, working_dir: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            working_dir: working_dir.into(),
            env: HashMap::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// The coding-agent invocation: `<bin> --api-key <key> --project <path> --plan <prompt>`,
    /// run inside the project directory.
    pub fn agent(binary: &str, api_key: &str, project_path: &Path, prompt: &str) -> Self {
        let project = project_path.to_string_lossy().to_string();
        Self::new(binary, project_path).args([
            "--api-key",
            api_key,
            "--project",
            &project,
            "--plan",
            prompt,
        ])
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn arguments(&self) -> &[String] {
        &self.args
    }

    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    /// Program plus arguments, with the value following `--api-key` masked.
    pub fn display_redacted(&self) -> String {
        let mut parts = vec![self.program.clone()];
        let mut mask_next = false;
        for arg in &self.args {
            if mask_next {
                parts.push("***".to_string());
                mask_next = false;
            } else {
                mask_next = arg == "--api-key";
                parts.push(arg.clone());
            }
        }
        parts.join(" ")
    }
}

/// How a child process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessOutcome {
    pub code: Option<i32>,
    pub signal: Option<i32>,
}

impl ProcessOutcome {
    pub fn from_code(code: i32) -> Self {
        Self {
            code: Some(code),
            signal: None,
        }
    }

    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

impl From<ExitStatus> for ProcessOutcome {
    fn from(status: ExitStatus) -> Self {
        #[cfg(unix)]
        let signal = {
            use std::os::unix::process::ExitStatusExt;
            status.signal()
        };
        #[cfg(not(unix))]
        let signal = None;
        Self {
            code: status.code(),
            signal,
        }
    }
}

impl fmt::Display for ProcessOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.code, self.signal) {
            (Some(code), _) => write!(f, "exited with exit status {}", code),
            (None, Some(signal)) => write!(f, "was terminated by signal {}", signal),
            (None, None) => write!(f, "exited with unknown status"),
        }
    }
}

/// Launches processes described by a `CommandSpec`.
pub struct ProcessRunner;

impl ProcessRunner {
    /// Spawn the process with both output streams piped.
    ///
    /// Launch problems (missing working directory, unresolvable binary) are
    /// reported here, before any output is streamed.
    pub fn spawn(spec: &CommandSpec) -> Result<RunningProcess, StreamError> {
        let dir = spec.working_dir();
        if !dir.is_dir() {
            return Err(StreamError::StartFailure {
                program: spec.program().to_string(),
                reason: format!("working directory {} does not exist", dir.display()),
            });
        }

        let mut cmd = Command::new(spec.program());
        cmd.args(spec.arguments())
            .current_dir(dir)
            .envs(&spec.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = cmd.spawn().map_err(|e| StreamError::StartFailure {
            program: spec.program().to_string(),
            reason: if e.kind() == std::io::ErrorKind::NotFound {
                "executable not found on PATH".to_string()
            } else {
                e.to_string()
            },
        })?;

        tracing::info!(
            pid = child.id(),
            command = %spec.display_redacted(),
            cwd = %dir.display(),
            "spawned process"
        );

        Ok(RunningProcess {
            child,
            program: spec.program().to_string(),
        })
    }
}

/// A spawned child. Dropping it kills the process.
pub struct RunningProcess {
    child: Child,
    program: String,
}

impl RunningProcess {
    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// Hand out the two output pipes. Fails (and kills the child) if either
    /// pipe is unavailable.
    pub fn take_pipes(&mut self) -> Result<(ChildStdout, ChildStderr), StreamError> {
        let stdout = self.child.stdout.take();
        let stderr = self.child.stderr.take();
        match (stdout, stderr) {
            (Some(out), Some(err)) => Ok((out, err)),
            (None, _) => {
                let _ = self.child.start_kill();
                Err(StreamError::PipeFailure(Origin::Stdout))
            }
            (_, None) => {
                let _ = self.child.start_kill();
                Err(StreamError::PipeFailure(Origin::Stderr))
            }
        }
    }

    pub async fn wait(&mut self) -> Result<ProcessOutcome, StreamError> {
        let status = self.child.wait().await.map_err(StreamError::Wait)?;
        Ok(status.into())
    }

    /// Kill the child and reap it. Returns `None` if it could not be reaped in time.
    pub async fn terminate(&mut self) -> Option<ProcessOutcome> {
        if let Err(e) = self.child.start_kill() {
            tracing::debug!(program = %self.program, error = %e, "kill request failed");
        }
        match tokio::time::timeout(KILL_GRACE, self.child.wait()).await {
            Ok(Ok(status)) => Some(status.into()),
            Ok(Err(e)) => {
                tracing::warn!(program = %self.program, error = %e, "failed to reap killed process");
                None
            }
            Err(_) => {
                tracing::warn!(program = %self.program, "killed process did not exit in time");
                None
            }
        }
    }
}
