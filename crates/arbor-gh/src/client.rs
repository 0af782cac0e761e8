use std::path::Path;

use arbor_core::types::PullRequestSummary;

use crate::command::{AllowedGhCommand, GhCli};
use crate::error::GhError;
use crate::types::{parse_pr_list, parse_repo_view, PR_LIST_FIELDS};

/// Read-only view of the code-hosting service.
pub trait CodeHost: Send + Sync {
    fn open_pull_requests(
        &self,
        root: &Path,
        limit: u32,
    ) -> Result<Vec<PullRequestSummary>, GhError>;

    /// `owner/name` of the hosted repository.
    fn repository_name(&self, root: &Path) -> Result<String, GhError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct GhClient {
    pub cli: GhCli,
}

impl GhClient {
    pub fn new(cli: GhCli) -> Self {
        Self { cli }
    }
}

impl CodeHost for GhClient {
    fn open_pull_requests(
        &self,
        root: &Path,
        limit: u32,
    ) -> Result<Vec<PullRequestSummary>, GhError> {
        let limit = limit.max(1).to_string();
        let output = self.cli.run_allowed(
            root,
            AllowedGhCommand::PrList,
            [
                "pr",
                "list",
                "--state",
                "open",
                "--json",
                PR_LIST_FIELDS,
                "--limit",
                limit.as_str(),
            ],
        )?;
        parse_pr_list(&output.stdout)
    }

    fn repository_name(&self, root: &Path) -> Result<String, GhError> {
        let output = self.cli.run_allowed(
            root,
            AllowedGhCommand::RepoView,
            ["repo", "view", "--json", "nameWithOwner"],
        )?;
        parse_repo_view(&output.stdout)
    }
}

/// Fixed answers, for tests and for running without gh.
#[derive(Debug, Clone, Default)]
pub struct StaticCodeHost {
    pub pull_requests: Vec<PullRequestSummary>,
    pub repository: Option<String>,
    /// When set, every call fails with this stderr.
    pub failure: Option<String>,
}

impl StaticCodeHost {
    pub fn failing(stderr: impl Into<String>) -> Self {
        Self {
            failure: Some(stderr.into()),
            ..Self::default()
        }
    }

    fn check(&self, command: &str) -> Result<(), GhError> {
        match &self.failure {
            Some(stderr) => Err(GhError::CommandFailed {
                command: command.to_string(),
                status: Some(1),
                stdout: String::new(),
                stderr: stderr.clone(),
            }),
            None => Ok(()),
        }
    }
}

impl CodeHost for StaticCodeHost {
    fn open_pull_requests(
        &self,
        _root: &Path,
        limit: u32,
    ) -> Result<Vec<PullRequestSummary>, GhError> {
        self.check("gh pr list")?;
        Ok(self
            .pull_requests
            .iter()
            .take(limit as usize)
            .cloned()
            .collect())
    }

    fn repository_name(&self, _root: &Path) -> Result<String, GhError> {
        self.check("gh repo view")?;
        self.repository.clone().ok_or_else(|| GhError::CommandFailed {
            command: "gh repo view".to_string(),
            status: Some(1),
            stdout: String::new(),
            stderr: "no hosted repository".to_string(),
        })
    }
}
