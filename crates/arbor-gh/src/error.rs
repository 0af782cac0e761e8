use std::string::FromUtf8Error;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum GhError {
    #[error("gh command failed to start ({command}): {source}")]
    Io {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("gh command returned non-zero exit ({command}) status={status:?}: {}", .stderr.trim())]
    CommandFailed {
        command: String,
        status: Option<i32>,
        stdout: String,
        stderr: String,
    },
    #[error("gh command output was not valid UTF-8 ({command}, {stream}): {source}")]
    NonUtf8Output {
        command: String,
        stream: &'static str,
        #[source]
        source: FromUtf8Error,
    },
    #[error("gh command timed out after {}s ({command})", .timeout.as_secs_f32())]
    Timeout { command: String, timeout: Duration },
    #[error("gh contract violation: {message}")]
    ContractViolation { message: String },
    #[error("unable to parse gh output: {message}")]
    Parse { message: String },
}

impl GhError {
    /// Short reason suitable for a scan warning.
    pub fn summary(&self) -> String {
        match self {
            GhError::Io { source, .. } if source.kind() == std::io::ErrorKind::NotFound => {
                "gh is not installed".to_string()
            }
            GhError::CommandFailed { stderr, .. } if looks_unauthenticated(stderr) => {
                "gh is not authenticated".to_string()
            }
            GhError::CommandFailed { stderr, status, .. } => {
                let first_line = stderr.lines().find(|line| !line.trim().is_empty());
                match first_line {
                    Some(line) => line.trim().to_string(),
                    None => format!("gh exited with status {status:?}"),
                }
            }
            other => other.to_string(),
        }
    }
}

fn looks_unauthenticated(stderr: &str) -> bool {
    let lower = stderr.to_ascii_lowercase();
    lower.contains("gh auth login") || lower.contains("not logged in")
}

#[cfg(test)]
mod tests {
    use super::GhError;
    use std::time::Duration;

    #[test]
    fn summary_recognizes_missing_binary_and_auth() {
        let missing = GhError::Io {
            command: "gh pr list".to_string(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "No such file"),
        };
        assert_eq!(missing.summary(), "gh is not installed");

        let unauth = GhError::CommandFailed {
            command: "gh pr list".to_string(),
            status: Some(4),
            stdout: String::new(),
            stderr: "To get started with GitHub CLI, please run:  gh auth login".to_string(),
        };
        assert_eq!(unauth.summary(), "gh is not authenticated");
    }

    #[test]
    fn summary_uses_first_stderr_line_for_other_failures() {
        let err = GhError::CommandFailed {
            command: "gh repo view".to_string(),
            status: Some(1),
            stdout: String::new(),
            stderr: "\nnone of the git remotes configured for this repository point to a known GitHub host\nmore".to_string(),
        };
        assert!(err.summary().starts_with("none of the git remotes"));
    }

    #[test]
    fn timeout_renders_budget() {
        let err = GhError::Timeout {
            command: "gh pr list".to_string(),
            timeout: Duration::from_secs(20),
        };
        assert_eq!(err.summary(), "gh command timed out after 20s (gh pr list)");
    }
}
