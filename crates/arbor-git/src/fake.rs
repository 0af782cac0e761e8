//! Scripted stand-in for the git binary, for exercising callers without a repository.

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use crate::command::{GitOutput, GitRunner};
use crate::error::GitError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptedResponse {
    Ok(String),
    Fail { status: i32, stderr: String },
    Timeout,
}

impl ScriptedResponse {
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self::Ok(stdout.into())
    }

    pub fn fail(status: i32, stderr: impl Into<String>) -> Self {
        Self::Fail {
            status,
            stderr: stderr.into(),
        }
    }

    /// Silent exit status 1.
    pub fn no() -> Self {
        Self::fail(1, "")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCall {
    pub cwd: PathBuf,
    pub args: String,
}

/// Responses are keyed by the space-joined argument list. Several responses queued for one
/// key are consumed in order and the last one repeats.
#[derive(Debug, Default)]
pub struct ScriptedGit {
    responses: Mutex<HashMap<String, VecDeque<ScriptedResponse>>>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl ScriptedGit {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(self, args: &str, response: ScriptedResponse) -> Self {
        self.script(args, response);
        self
    }

    pub fn script(&self, args: &str, response: ScriptedResponse) {
        if let Ok(mut responses) = self.responses.lock() {
            responses
                .entry(args.to_string())
                .or_default()
                .push_back(response);
        }
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls
            .lock()
            .map(|calls| calls.clone())
            .unwrap_or_default()
    }

    pub fn invoked(&self, args: &str) -> bool {
        self.calls().iter().any(|call| call.args == args)
    }

    /// Calls whose arguments start with `prefix`.
    pub fn count_calls(&self, prefix: &str) -> usize {
        self.calls()
            .iter()
            .filter(|call| call.args.starts_with(prefix))
            .count()
    }

    fn next_response(&self, key: &str) -> Option<ScriptedResponse> {
        let mut responses = self.responses.lock().ok()?;
        let queue = responses.get_mut(key)?;
        if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        }
    }
}

impl GitRunner for ScriptedGit {
    fn run_git(&self, cwd: &Path, args: &[&str]) -> Result<GitOutput, GitError> {
        let key = args.join(" ");
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(RecordedCall {
                cwd: cwd.to_path_buf(),
                args: key.clone(),
            });
        }
        let command = format!("git {key}");

        match self.next_response(&key) {
            Some(ScriptedResponse::Ok(stdout)) => Ok(GitOutput {
                stdout,
                stderr: String::new(),
            }),
            Some(ScriptedResponse::Fail { status, stderr }) => Err(GitError::CommandFailed {
                command,
                status: Some(status),
                stdout: String::new(),
                stderr,
            }),
            Some(ScriptedResponse::Timeout) => Err(GitError::Timeout {
                command,
                timeout: Duration::from_secs(1),
            }),
            None => Err(GitError::CommandFailed {
                command,
                status: Some(128),
                stdout: String::new(),
                stderr: format!("unscripted git invocation: {key}"),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::{ScriptedGit, ScriptedResponse};
    use crate::command::GitRunner;
    use crate::error::GitError;

    #[test]
    fn queued_responses_are_consumed_then_last_repeats() {
        let git = ScriptedGit::new()
            .on("rev-parse HEAD", ScriptedResponse::ok("aaa\n"))
            .on("rev-parse HEAD", ScriptedResponse::ok("bbb\n"));
        let cwd = Path::new("/repo");

        let outputs = (0..3)
            .map(|_| git.run_git(cwd, &["rev-parse", "HEAD"]).expect("scripted").stdout)
            .collect::<Vec<_>>();
        assert_eq!(outputs, vec!["aaa\n", "bbb\n", "bbb\n"]);
        assert_eq!(git.count_calls("rev-parse"), 3);
    }

    #[test]
    fn unscripted_invocations_fail_and_are_recorded() {
        let git = ScriptedGit::new();
        let err = git
            .run_git(Path::new("/repo"), &["status", "--porcelain"])
            .expect_err("nothing scripted");
        assert!(err.stderr().contains("unscripted git invocation: status --porcelain"));
        assert!(git.invoked("status --porcelain"));
        assert_eq!(git.calls()[0].cwd, Path::new("/repo"));
    }

    #[test]
    fn timeout_and_failure_responses_map_to_git_errors() {
        let git = ScriptedGit::new()
            .on("fetch", ScriptedResponse::Timeout)
            .on("merge-base a b", ScriptedResponse::no());
        let cwd = Path::new("/repo");

        assert!(matches!(
            git.run_git(cwd, &["fetch"]),
            Err(GitError::Timeout { .. })
        ));
        let err = git
            .run_git(cwd, &["merge-base", "a", "b"])
            .expect_err("scripted failure");
        assert!(err.is_negative_answer());
    }
}
