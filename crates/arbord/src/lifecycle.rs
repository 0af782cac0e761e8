//! Branch mutations. Each operation leaves the repository in a settled state on failure.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use arbor_core::naming::BranchNamingRules;
use arbor_core::types::{RepoId, ReparentedEdge};
use arbor_git::{
    check_ref_format, checkout_branch, commits_not_in, current_branch, delete_local_branch,
    delete_remote_branch, has_uncommitted_changes, head_sha, list_worktrees, local_branch_exists,
    rebase_branch as git_rebase, rebase_in_progress, remote_branch_exists, GitError, GitRunner,
    RebaseOutcome,
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::cache::{lock, SharedStore};
use crate::persistence::PersistenceError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    Validation,
    NotFound,
    Conflict,
    ExternalTool,
    Internal,
}

impl ErrorClass {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorClass::Validation => "validation",
            ErrorClass::NotFound => "not_found",
            ErrorClass::Conflict => "conflict",
            ErrorClass::ExternalTool => "external_tool",
            ErrorClass::Internal => "internal",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    #[error("{message}")]
    Validation { message: String },
    #[error("{message}")]
    NotFound { message: String },
    #[error("{message}")]
    Conflict { message: String },
    #[error("{message}: {source}")]
    ExternalTool {
        message: String,
        #[source]
        source: GitError,
    },
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}

impl LifecycleError {
    pub fn kind(&self) -> ErrorClass {
        match self {
            LifecycleError::Validation { .. } => ErrorClass::Validation,
            LifecycleError::NotFound { .. } => ErrorClass::NotFound,
            LifecycleError::Conflict { .. } => ErrorClass::Conflict,
            LifecycleError::ExternalTool { .. } => ErrorClass::ExternalTool,
            LifecycleError::Persistence(_) => ErrorClass::Internal,
        }
    }

    fn tool(message: impl Into<String>) -> impl FnOnce(GitError) -> Self {
        let message = message.into();
        move |source| LifecycleError::ExternalTool { message, source }
    }

    fn not_found(message: impl Into<String>) -> Self {
        LifecycleError::NotFound {
            message: message.into(),
        }
    }

    fn conflict(message: impl Into<String>) -> Self {
        LifecycleError::Conflict {
            message: message.into(),
        }
    }
}

/// One mutual-exclusion token per repository, keyed by canonical local path.
#[derive(Debug, Default)]
pub struct RepoLocks {
    tokens: Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>,
}

impl RepoLocks {
    pub fn token(&self, root: &Path) -> Arc<Mutex<()>> {
        Arc::clone(lock(&self.tokens).entry(root.to_path_buf()).or_default())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteOutcome {
    pub reparented_edges: Vec<ReparentedEdge>,
    /// Remote cleanup that did not happen. The local delete and re-parenting stand.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

/// Why a branch cannot be deleted, in the order the checks run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeleteBlocker {
    BranchNotFound,
    CurrentlyCheckedOut,
    HasCommits,
    PushedToRemote,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeletableCheck {
    pub deletable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<DeleteBlocker>,
}

impl DeletableCheck {
    fn blocked(reason: DeleteBlocker) -> Self {
        Self {
            deletable: false,
            reason: Some(reason),
        }
    }
}

/// Tools shared by every branch operation.
pub struct BranchOps<'a> {
    pub git: &'a dyn GitRunner,
    pub naming: &'a dyn BranchNamingRules,
    pub remote: &'a str,
}

impl BranchOps<'_> {
    pub fn create(&self, root: &Path, name: &str, base: &str) -> Result<(), LifecycleError> {
        self.naming
            .check(name)
            .map_err(|err| LifecycleError::Validation {
                message: err.to_string(),
            })?;
        let accepted = check_ref_format(root, self.git, name)
            .map_err(LifecycleError::tool("git check-ref-format failed"))?;
        if !accepted {
            return Err(LifecycleError::Validation {
                message: format!("invalid branch name '{name}': not accepted by git"),
            });
        }
        if self.branch_exists(root, name)? {
            return Err(LifecycleError::conflict(format!(
                "branch {name} already exists"
            )));
        }

        let start_point = if self.branch_exists(root, base)? {
            base.to_string()
        } else if remote_branch_exists(root, self.git, self.remote, base)
            .map_err(LifecycleError::tool("git show-ref failed"))?
        {
            format!("{}/{base}", self.remote)
        } else {
            return Err(LifecycleError::not_found(format!(
                "base branch {base} not found"
            )));
        };

        arbor_git::create_branch(root, self.git, name, &start_point)
            .map_err(LifecycleError::tool(format!("creating branch {name} failed")))
    }

    pub fn push(&self, cwd: &Path, branch: &str, force: bool) -> Result<(), LifecycleError> {
        if !self.branch_exists(cwd, branch)? {
            return Err(LifecycleError::not_found(format!(
                "branch {branch} not found"
            )));
        }
        match arbor_git::push_branch(cwd, self.git, self.remote, branch, force) {
            Ok(_) => Ok(()),
            Err(err) if is_push_rejection(err.stderr()) => {
                warn!(branch, force, "push rejected");
                Err(LifecycleError::conflict(format!(
                    "push rejected: {}",
                    err.stderr().trim()
                )))
            }
            Err(err) => Err(LifecycleError::tool(format!("pushing {branch} failed"))(err)),
        }
    }

    pub fn rebase(&self, root: &Path, branch: &str, parent: &str) -> Result<(), LifecycleError> {
        for name in [branch, parent] {
            if !self.branch_exists(root, name)? {
                return Err(LifecycleError::not_found(format!(
                    "branch {name} not found"
                )));
            }
        }

        let checked_out_in = list_worktrees(root, self.git)
            .map_err(LifecycleError::tool("git worktree list failed"))?
            .into_iter()
            .find(|worktree| {
                worktree.branch.as_deref() == Some(branch)
                    && !worktree.prunable
                    && worktree.path.exists()
            })
            .map(|worktree| worktree.path);
        let cwd = checked_out_in.clone().unwrap_or_else(|| root.to_path_buf());

        let stopped = rebase_in_progress(&cwd, self.git)
            .map_err(LifecycleError::tool("git rev-parse failed"))?;
        if stopped {
            return Err(rebase_already_running(branch, &cwd));
        }

        let dirty = has_uncommitted_changes(&cwd, self.git)
            .map_err(LifecycleError::tool("git status failed"))?;
        if dirty {
            return Err(LifecycleError::conflict(format!(
                "cannot rebase {branch}: uncommitted changes in {}",
                cwd.display()
            )));
        }

        let restore = match checked_out_in {
            Some(_) => None,
            None => Some(self.checkout_position(root)?),
        };

        let outcome = git_rebase(&cwd, self.git, branch, parent);

        if let Some(previous) = restore {
            if let Err(err) = checkout_branch(root, self.git, &previous) {
                warn!(%previous, error = %err, "could not restore previous checkout after rebase");
            }
        }

        match outcome.map_err(LifecycleError::tool(format!(
            "rebasing {branch} onto {parent} failed"
        )))? {
            RebaseOutcome::Rebased => Ok(()),
            RebaseOutcome::AlreadyInProgress => Err(rebase_already_running(branch, &cwd)),
            RebaseOutcome::Conflict { output } => Err(LifecycleError::conflict(format!(
                "rebase of {branch} onto {parent} stopped on a conflict and was aborted:\n{output}"
            ))),
        }
    }

    /// `parent` is the branch whose history decides whether `branch` still has unique commits.
    pub fn check_deletable(
        &self,
        root: &Path,
        branch: &str,
        parent: &str,
    ) -> Result<DeletableCheck, LifecycleError> {
        if !self.branch_exists(root, branch)? {
            return Ok(DeletableCheck::blocked(DeleteBlocker::BranchNotFound));
        }
        if self.is_checked_out(root, branch)? {
            return Ok(DeletableCheck::blocked(DeleteBlocker::CurrentlyCheckedOut));
        }
        if parent != branch && self.branch_exists(root, parent)? {
            let unique = commits_not_in(root, self.git, branch, parent)
                .map_err(LifecycleError::tool("git rev-list failed"))?;
            if unique > 0 {
                return Ok(DeletableCheck::blocked(DeleteBlocker::HasCommits));
            }
        }
        let pushed = remote_branch_exists(root, self.git, self.remote, branch)
            .map_err(LifecycleError::tool("git show-ref failed"))?;
        if pushed {
            return Ok(DeletableCheck::blocked(DeleteBlocker::PushedToRemote));
        }
        Ok(DeletableCheck {
            deletable: true,
            reason: None,
        })
    }

    /// Deletes the branch, then re-parents every tree spec of `repo_id` that mentions it.
    /// Once the local branch is gone the call succeeds; a failed remote delete is reported
    /// as a warning on the outcome.
    pub fn delete(
        &self,
        store: &SharedStore,
        repo_id: &RepoId,
        root: &Path,
        branch: &str,
        force: bool,
        delete_remote: bool,
    ) -> Result<DeleteOutcome, LifecycleError> {
        if !self.branch_exists(root, branch)? {
            return Err(LifecycleError::not_found(format!(
                "branch {branch} not found"
            )));
        }
        if self.is_checked_out(root, branch)? {
            return Err(LifecycleError::conflict(format!(
                "branch {branch} is currently checked out"
            )));
        }

        if let Err(err) = delete_local_branch(root, self.git, branch, force) {
            if err.stderr().contains("not fully merged") {
                return Err(LifecycleError::conflict(format!(
                    "branch {branch} is not fully merged: {}",
                    err.stderr().trim()
                )));
            }
            return Err(LifecycleError::tool(format!("deleting {branch} failed"))(err));
        }

        let mut warnings = Vec::new();
        if delete_remote {
            if let Err(err) = self.delete_remote_if_present(root, branch) {
                warn!(branch, remote = self.remote, error = %err, "remote branch was not deleted");
                warnings.push(err.to_string());
            }
        }

        let reparented_edges = lock(store).reparent_tree_specs(repo_id, branch)?;
        info!(
            branch,
            %repo_id,
            reparented = reparented_edges.len(),
            "deleted branch and re-parented tree specs"
        );
        Ok(DeleteOutcome {
            reparented_edges,
            warnings,
        })
    }

    fn delete_remote_if_present(&self, root: &Path, branch: &str) -> Result<(), LifecycleError> {
        let exists = remote_branch_exists(root, self.git, self.remote, branch)
            .map_err(LifecycleError::tool("git show-ref failed"))?;
        if !exists {
            return Ok(());
        }
        delete_remote_branch(root, self.git, self.remote, branch).map_err(LifecycleError::tool(
            format!("deleting {}/{branch} failed", self.remote),
        ))
    }

    fn branch_exists(&self, root: &Path, branch: &str) -> Result<bool, LifecycleError> {
        local_branch_exists(root, self.git, branch).map_err(LifecycleError::tool("git show-ref failed"))
    }

    fn is_checked_out(&self, root: &Path, branch: &str) -> Result<bool, LifecycleError> {
        let current = current_branch(root, self.git)
            .map_err(LifecycleError::tool("git symbolic-ref failed"))?;
        if current.as_deref() == Some(branch) {
            return Ok(true);
        }
        let worktrees = list_worktrees(root, self.git)
            .map_err(LifecycleError::tool("git worktree list failed"))?;
        Ok(worktrees
            .iter()
            .any(|worktree| worktree.branch.as_deref() == Some(branch)))
    }

    /// Branch name, or commit id when HEAD is detached.
    fn checkout_position(&self, root: &Path) -> Result<String, LifecycleError> {
        let current = current_branch(root, self.git)
            .map_err(LifecycleError::tool("git symbolic-ref failed"))?;
        match current {
            Some(branch) => Ok(branch),
            None => head_sha(root, self.git).map_err(LifecycleError::tool("git rev-parse failed")),
        }
    }
}

fn rebase_already_running(branch: &str, cwd: &Path) -> LifecycleError {
    LifecycleError::conflict(format!(
        "cannot rebase {branch}: a rebase is already in progress in {}",
        cwd.display()
    ))
}

fn is_push_rejection(stderr: &str) -> bool {
    stderr.contains("rejected") || stderr.contains("stale info")
}
