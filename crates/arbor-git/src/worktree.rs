use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::command::GitRunner;
use crate::error::GitError;
use crate::repo::has_uncommitted_changes;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListedWorktree {
    pub path: PathBuf,
    pub branch: Option<String>,
    pub head: Option<String>,
    pub bare: bool,
    pub prunable: bool,
}

pub fn list_worktrees(root: &Path, git: &dyn GitRunner) -> Result<Vec<ListedWorktree>, GitError> {
    let output = git.run_git(root, &["worktree", "list", "--porcelain"])?;
    parse_worktree_list(&output.stdout)
}

/// Dirty flag for a listed worktree. Prunable or missing worktrees report clean.
pub fn worktree_is_dirty(worktree: &ListedWorktree, git: &dyn GitRunner) -> Result<bool, GitError> {
    if worktree.bare || worktree.prunable || !worktree.path.exists() {
        debug!(path = %worktree.path.display(), "skipping status for unreachable worktree");
        return Ok(false);
    }
    has_uncommitted_changes(&worktree.path, git)
}

pub fn parse_worktree_list(raw: &str) -> Result<Vec<ListedWorktree>, GitError> {
    let mut listed = Vec::new();

    let mut current_path: Option<PathBuf> = None;
    let mut current_branch: Option<String> = None;
    let mut current_head: Option<String> = None;
    let mut bare = false;
    let mut prunable = false;

    for line in raw.lines().chain(std::iter::once("")) {
        if line.trim().is_empty() {
            if let Some(path) = current_path.take() {
                listed.push(ListedWorktree {
                    path,
                    branch: current_branch.take(),
                    head: current_head.take(),
                    bare,
                    prunable,
                });
            }
            bare = false;
            prunable = false;
            continue;
        }

        if let Some(rest) = line.strip_prefix("worktree ") {
            current_path = Some(PathBuf::from(rest.trim()));
            continue;
        }
        if let Some(rest) = line.strip_prefix("branch ") {
            let branch = rest.trim().trim_start_matches("refs/heads/").to_string();
            current_branch = Some(branch);
            continue;
        }
        if let Some(rest) = line.strip_prefix("HEAD ") {
            current_head = Some(rest.trim().to_string());
            continue;
        }
        if line == "bare" {
            bare = true;
            continue;
        }
        if line == "prunable" || line.starts_with("prunable ") {
            prunable = true;
            continue;
        }
    }

    if listed.is_empty() && !raw.trim().is_empty() {
        return Err(GitError::Parse {
            context: "unable to parse git worktree list output".to_string(),
        });
    }

    Ok(listed)
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::PathBuf;

    use super::{list_worktrees, parse_worktree_list, worktree_is_dirty};
    use crate::command::GitCli;
    use crate::testutil::{init_repo, run_git};

    #[test]
    fn parses_branch_detached_and_prunable_entries() {
        let raw = "worktree /repo\nHEAD 1111111111111111111111111111111111111111\nbranch refs/heads/main\n\nworktree /repo-wt/detached\nHEAD 2222222222222222222222222222222222222222\ndetached\n\nworktree /gone/feature\nHEAD 3333333333333333333333333333333333333333\nbranch refs/heads/feature/x\nprunable gitdir file points to non-existent location\n";

        let listed = parse_worktree_list(raw).expect("parse");
        assert_eq!(listed.len(), 3);
        assert_eq!(listed[0].path, PathBuf::from("/repo"));
        assert_eq!(listed[0].branch.as_deref(), Some("main"));
        assert!(!listed[0].prunable);
        assert_eq!(listed[1].branch, None);
        assert!(listed[1].head.is_some());
        assert_eq!(listed[2].branch.as_deref(), Some("feature/x"));
        assert!(listed[2].prunable);
    }

    #[test]
    fn rejects_output_without_worktree_lines() {
        let err = parse_worktree_list("HEAD abc\nbranch refs/heads/main\n").expect_err("garbage");
        assert!(err.to_string().contains("unable to parse git worktree list output"));
    }

    #[test]
    fn lists_linked_worktrees_and_reports_dirty_state() {
        let dir = init_repo();
        let linked = tempfile::tempdir().expect("temp dir");
        let linked_path = linked.path().join("feature-wt");
        run_git(
            dir.path(),
            &[
                "worktree",
                "add",
                "--quiet",
                "-b",
                "feature/wt",
                linked_path.to_str().expect("utf-8 path"),
            ],
        );
        fs::write(linked_path.join("wip.txt"), "wip\n").expect("write");

        let git = GitCli::default();
        let listed = list_worktrees(dir.path(), &git).expect("list");
        assert_eq!(listed.len(), 2);

        let feature = listed
            .iter()
            .find(|wt| wt.branch.as_deref() == Some("feature/wt"))
            .expect("linked worktree listed");
        assert!(worktree_is_dirty(feature, &git).expect("status"));

        let main = listed
            .iter()
            .find(|wt| wt.branch.as_deref() == Some("main"))
            .expect("main worktree listed");
        assert!(!worktree_is_dirty(main, &git).expect("status"));
    }
}
