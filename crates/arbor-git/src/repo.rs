use std::path::{Path, PathBuf};

use crate::command::GitRunner;
use crate::error::GitError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoHandle {
    pub root: PathBuf,
    pub git_dir: PathBuf,
}

pub fn discover_repo(start_path: &Path, git: &dyn GitRunner) -> Result<RepoHandle, GitError> {
    let inside = match git.run_git(start_path, &["rev-parse", "--is-inside-work-tree"]) {
        Ok(output) => output.stdout.trim().eq("true"),
        Err(GitError::CommandFailed { .. }) => false,
        Err(err) => return Err(err),
    };

    if !inside {
        return Err(GitError::NotARepository {
            path: start_path.to_path_buf(),
        });
    }

    let root_raw = git.run_git(start_path, &["rev-parse", "--show-toplevel"])?;
    let root = PathBuf::from(root_raw.stdout.trim());

    let git_dir_raw = git.run_git(&root, &["rev-parse", "--git-common-dir"])?;
    let git_dir_rel = PathBuf::from(git_dir_raw.stdout.trim());
    let git_dir = if git_dir_rel.is_absolute() {
        git_dir_rel
    } else {
        root.join(git_dir_rel)
    };

    Ok(RepoHandle { root, git_dir })
}

/// Checked-out branch of the worktree at `cwd`, `None` when HEAD is detached.
pub fn current_branch(cwd: &Path, git: &dyn GitRunner) -> Result<Option<String>, GitError> {
    match git.run_git(cwd, &["symbolic-ref", "--quiet", "--short", "HEAD"]) {
        Ok(output) => {
            let branch = output.stdout.trim();
            Ok((!branch.is_empty()).then(|| branch.to_string()))
        }
        Err(err) if err.is_negative_answer() => Ok(None),
        Err(err) => Err(err),
    }
}

pub fn head_sha(cwd: &Path, git: &dyn GitRunner) -> Result<String, GitError> {
    let output = git.run_git(cwd, &["rev-parse", "HEAD"])?;
    Ok(output.stdout.trim().to_string())
}

/// Check if the worktree has uncommitted changes (staged or unstaged).
pub fn has_uncommitted_changes(cwd: &Path, git: &dyn GitRunner) -> Result<bool, GitError> {
    let output = git.run_git(cwd, &["status", "--porcelain"])?;
    Ok(!output.stdout.trim().is_empty())
}
