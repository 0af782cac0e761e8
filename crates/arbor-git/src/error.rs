use std::path::PathBuf;
use std::string::FromUtf8Error;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum GitError {
    #[error("git command failed to start ({command}): {source}")]
    Io {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("git command returned non-zero exit ({command}) status={status:?}: {}", .stderr.trim())]
    CommandFailed {
        command: String,
        status: Option<i32>,
        stdout: String,
        stderr: String,
    },
    #[error("git command output was not valid UTF-8 ({command}, {stream}): {source}")]
    NonUtf8Output {
        command: String,
        stream: &'static str,
        #[source]
        source: FromUtf8Error,
    },
    #[error("git command timed out after {}s ({command})", .timeout.as_secs_f32())]
    Timeout { command: String, timeout: Duration },
    #[error("path is not inside a git repository: {path}")]
    NotARepository { path: PathBuf },
    #[error("invalid git output: {context}")]
    Parse { context: String },
}

impl GitError {
    /// Stderr of a failed command, empty for other variants.
    pub fn stderr(&self) -> &str {
        match self {
            GitError::CommandFailed { stderr, .. } => stderr,
            _ => "",
        }
    }

    pub fn is_command_failure(&self) -> bool {
        matches!(self, GitError::CommandFailed { .. })
    }

    /// Exit status 1 with empty output, as returned by predicates like `merge-base` and
    /// `show-ref --quiet` when the answer is "no".
    pub fn is_negative_answer(&self) -> bool {
        matches!(
            self,
            GitError::CommandFailed { status: Some(1), stdout, stderr, .. }
                if stdout.trim().is_empty() && stderr.trim().is_empty()
        )
    }

    pub fn looks_like_conflict(&self) -> bool {
        match self {
            GitError::CommandFailed { stdout, stderr, .. } => {
                looks_like_conflict(stdout) || looks_like_conflict(stderr)
            }
            _ => false,
        }
    }
}

pub fn looks_like_conflict(text: &str) -> bool {
    let lower = text.to_ascii_lowercase();
    lower.contains("conflict")
        || lower.contains("could not apply")
        || lower.contains("resolve all conflicts")
        || lower.contains("needs merge")
}
