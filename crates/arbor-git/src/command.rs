use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::debug;

use crate::error::GitError;
use crate::process::{render_command, run_captured, ProcessError};

/// Keeps git non-interactive and its messages parseable.
const GIT_ENV: &[(&str, &str)] = &[("GIT_TERMINAL_PROMPT", "0"), ("LC_ALL", "C")];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitOutput {
    pub stdout: String,
    pub stderr: String,
}

/// Seam for everything that shells out to git.
pub trait GitRunner: Send + Sync {
    fn run_git(&self, cwd: &Path, args: &[&str]) -> Result<GitOutput, GitError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitCli {
    pub binary: PathBuf,
    pub timeout: Option<Duration>,
}

impl Default for GitCli {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("git"),
            timeout: None,
        }
    }
}

impl GitCli {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn run<I, S>(&self, cwd: &Path, args: I) -> Result<GitOutput, GitError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let owned_args: Vec<OsString> = args
            .into_iter()
            .map(|arg| arg.as_ref().to_os_string())
            .collect();
        let rendered = render_command(&self.binary, &owned_args);
        debug!(command = %rendered, cwd = %cwd.display(), "running git");

        let output = run_captured(&self.binary, cwd, &owned_args, GIT_ENV, self.timeout)
            .map_err(|err| match err {
                ProcessError::Spawn(source) | ProcessError::Wait(source) => GitError::Io {
                    command: rendered.clone(),
                    source,
                },
                ProcessError::Timeout(timeout) => GitError::Timeout {
                    command: rendered.clone(),
                    timeout,
                },
            })?;

        let stdout =
            String::from_utf8(output.stdout).map_err(|source| GitError::NonUtf8Output {
                command: rendered.clone(),
                stream: "stdout",
                source,
            })?;
        let stderr =
            String::from_utf8(output.stderr).map_err(|source| GitError::NonUtf8Output {
                command: rendered.clone(),
                stream: "stderr",
                source,
            })?;

        if !output.success {
            return Err(GitError::CommandFailed {
                command: rendered,
                status: output.status,
                stdout,
                stderr,
            });
        }

        Ok(GitOutput { stdout, stderr })
    }
}

impl GitRunner for GitCli {
    fn run_git(&self, cwd: &Path, args: &[&str]) -> Result<GitOutput, GitError> {
        self.run(cwd, args)
    }
}
