use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};
use std::time::Duration;

use arbor_git::process::{render_command, run_captured, ProcessError};
use tracing::debug;

use crate::error::GhError;

const GH_ENV: &[(&str, &str)] = &[("GH_PROMPT_DISABLED", "1"), ("NO_COLOR", "1")];

/// The only gh invocations arbor issues. Everything is read-only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AllowedGhCommand {
    PrList,
    RepoView,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GhOutput {
    pub stdout: String,
    pub stderr: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GhCli {
    pub binary: PathBuf,
    pub timeout: Option<Duration>,
}

impl Default for GhCli {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("gh"),
            timeout: None,
        }
    }
}

impl GhCli {
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

    pub fn run_allowed<I, S>(
        &self,
        cwd: &Path,
        allowed: AllowedGhCommand,
        args: I,
    ) -> Result<GhOutput, GhError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let owned_args: Vec<OsString> = args
            .into_iter()
            .map(|arg| arg.as_ref().to_os_string())
            .collect();
        validate_contract(allowed, &owned_args)?;

        let rendered = render_command(&self.binary, &owned_args);
        debug!(command = %rendered, cwd = %cwd.display(), "running gh");
        let output = run_captured(&self.binary, cwd, &owned_args, GH_ENV, self.timeout)
            .map_err(|err| match err {
                ProcessError::Spawn(source) | ProcessError::Wait(source) => GhError::Io {
                    command: rendered.clone(),
                    source,
                },
                ProcessError::Timeout(timeout) => GhError::Timeout {
                    command: rendered.clone(),
                    timeout,
                },
            })?;

        let stdout =
            String::from_utf8(output.stdout).map_err(|source| GhError::NonUtf8Output {
                command: rendered.clone(),
                stream: "stdout",
                source,
            })?;
        let stderr =
            String::from_utf8(output.stderr).map_err(|source| GhError::NonUtf8Output {
                command: rendered.clone(),
                stream: "stderr",
                source,
            })?;

        if !output.success {
            return Err(GhError::CommandFailed {
                command: rendered,
                status: output.status,
                stdout,
                stderr,
            });
        }

        Ok(GhOutput { stdout, stderr })
    }
}

fn validate_contract(allowed: AllowedGhCommand, args: &[OsString]) -> Result<(), GhError> {
    let ok = match allowed {
        AllowedGhCommand::PrList => {
            arg_eq(args, 0, "pr")
                && arg_eq(args, 1, "list")
                && args.iter().skip(2).all(|arg| {
                    let arg = arg.to_string_lossy();
                    !matches!(arg.as_ref(), "--web" | "-w")
                })
        }
        AllowedGhCommand::RepoView => {
            args.len() == 4
                && arg_eq(args, 0, "repo")
                && arg_eq(args, 1, "view")
                && arg_eq(args, 2, "--json")
                && !arg_at(args, 3).trim().is_empty()
        }
    };

    if ok {
        return Ok(());
    }

    Err(GhError::ContractViolation {
        message: format!("disallowed automated gh invocation: {:?}", args),
    })
}

fn arg_eq(args: &[OsString], idx: usize, expected: &str) -> bool {
    arg_at(args, idx) == expected
}

fn arg_at(args: &[OsString], idx: usize) -> String {
    args.get(idx)
        .map(|x| x.to_string_lossy().to_string())
        .unwrap_or_default()
}
