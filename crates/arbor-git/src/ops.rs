//! Branch mutations: create, push, rebase, delete.

use std::path::Path;

use tracing::{info, warn};

use crate::command::{GitOutput, GitRunner};
use crate::error::GitError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RebaseOutcome {
    Rebased,
    /// The rebase hit conflicts and was aborted; the branch is unchanged.
    Conflict { output: String },
    /// Another rebase is already stopped in `cwd`; nothing was run.
    AlreadyInProgress,
}

/// Asks git whether `name` is acceptable as a new branch name.
pub fn check_ref_format(root: &Path, git: &dyn GitRunner, name: &str) -> Result<bool, GitError> {
    match git.run_git(root, &["check-ref-format", "--branch", name]) {
        Ok(_) => Ok(true),
        Err(err) if err.is_command_failure() => Ok(false),
        Err(err) => Err(err),
    }
}

pub fn create_branch(
    root: &Path,
    git: &dyn GitRunner,
    name: &str,
    base: &str,
) -> Result<(), GitError> {
    git.run_git(root, &["branch", name, base])?;
    info!(branch = name, base, "created branch");
    Ok(())
}

pub fn push_branch(
    cwd: &Path,
    git: &dyn GitRunner,
    remote: &str,
    branch: &str,
    force: bool,
) -> Result<GitOutput, GitError> {
    let lease = format!("--force-with-lease={branch}");
    let mut args = vec!["push"];
    if force {
        args.push(&lease);
    }
    args.extend(["-u", remote, branch]);
    let output = git.run_git(cwd, &args)?;
    info!(branch, remote, force, "pushed branch");
    Ok(output)
}

pub fn checkout_branch(cwd: &Path, git: &dyn GitRunner, branch: &str) -> Result<(), GitError> {
    git.run_git(cwd, &["checkout", "--quiet", branch])?;
    Ok(())
}

/// Rebases `branch` onto `parent`. A rebase this call started never stays in progress;
/// a rebase that was already stopped in `cwd` is left alone.
pub fn rebase_branch(
    cwd: &Path,
    git: &dyn GitRunner,
    branch: &str,
    parent: &str,
) -> Result<RebaseOutcome, GitError> {
    if rebase_in_progress(cwd, git)? {
        warn!(branch, parent, cwd = %cwd.display(), "refusing to rebase over a stopped rebase");
        return Ok(RebaseOutcome::AlreadyInProgress);
    }

    match git.run_git(cwd, &["rebase", parent, branch]) {
        Ok(_) => {
            info!(branch, parent, "rebased branch");
            Ok(RebaseOutcome::Rebased)
        }
        Err(err) => {
            let aborted = match rebase_in_progress(cwd, git) {
                Ok(true) => abort_rebase(cwd, git),
                Ok(false) => false,
                Err(state_err) => {
                    warn!(branch, error = %state_err, "could not tell whether the rebase stopped");
                    false
                }
            };
            if err.looks_like_conflict() {
                warn!(branch, parent, aborted, "rebase hit conflicts");
                let output = match &err {
                    GitError::CommandFailed { stdout, stderr, .. } => {
                        format!("{}\n{}", stdout.trim(), stderr.trim()).trim().to_string()
                    }
                    other => other.to_string(),
                };
                return Ok(RebaseOutcome::Conflict { output });
            }
            Err(err)
        }
    }
}

/// Whether the worktree at `cwd` has a rebase stopped mid-way (merge or apply backend).
pub fn rebase_in_progress(cwd: &Path, git: &dyn GitRunner) -> Result<bool, GitError> {
    for state in ["rebase-merge", "rebase-apply"] {
        let output = git.run_git(cwd, &["rev-parse", "--git-path", state])?;
        let raw = Path::new(output.stdout.trim());
        let path = if raw.is_absolute() {
            raw.to_path_buf()
        } else {
            cwd.join(raw)
        };
        if path.exists() {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Returns whether the rebase got aborted.
fn abort_rebase(cwd: &Path, git: &dyn GitRunner) -> bool {
    git.run_git(cwd, &["rebase", "--abort"]).is_ok()
}

pub fn delete_local_branch(
    root: &Path,
    git: &dyn GitRunner,
    branch: &str,
    force: bool,
) -> Result<(), GitError> {
    let flag = if force { "-D" } else { "-d" };
    git.run_git(root, &["branch", flag, branch])?;
    info!(branch, force, "deleted local branch");
    Ok(())
}

pub fn delete_remote_branch(
    root: &Path,
    git: &dyn GitRunner,
    remote: &str,
    branch: &str,
) -> Result<(), GitError> {
    git.run_git(root, &["push", remote, "--delete", branch])?;
    info!(branch, remote, "deleted remote branch");
    Ok(())
}
