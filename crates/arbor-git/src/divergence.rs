use std::path::Path;

use arbor_core::types::Divergence;

use crate::command::GitRunner;
use crate::error::GitError;

pub fn merge_base(
    root: &Path,
    git: &dyn GitRunner,
    left: &str,
    right: &str,
) -> Result<Option<String>, GitError> {
    match git.run_git(root, &["merge-base", left, right]) {
        Ok(output) => {
            let sha = output.stdout.trim();
            Ok((!sha.is_empty()).then(|| sha.to_string()))
        }
        Err(err) if err.is_negative_answer() => Ok(None),
        Err(err) => Err(err),
    }
}

/// Commits `branch` has that `base` lacks (ahead) and the reverse (behind), measured from
/// their merge base. `None` when the two share no history.
pub fn divergence(
    root: &Path,
    git: &dyn GitRunner,
    base: &str,
    branch: &str,
) -> Result<Option<Divergence>, GitError> {
    if merge_base(root, git, base, branch)?.is_none() {
        return Ok(None);
    }
    let range = format!("{base}...{branch}");
    let output = git.run_git(root, &["rev-list", "--left-right", "--count", &range])?;
    parse_left_right_count(&output.stdout).map(Some)
}

/// Parses `rev-list --left-right --count A...B` output: `<only in A>\t<only in B>`.
pub fn parse_left_right_count(raw: &str) -> Result<Divergence, GitError> {
    let mut parts = raw.split_whitespace();
    let (Some(left), Some(right), None) = (parts.next(), parts.next(), parts.next()) else {
        return Err(GitError::Parse {
            context: format!("expected two counts from rev-list, got {raw:?}"),
        });
    };
    let parse = |value: &str| {
        value.parse::<u32>().map_err(|_| GitError::Parse {
            context: format!("invalid rev-list count {value:?}"),
        })
    };
    Ok(Divergence::new(parse(right)?, parse(left)?))
}

/// Number of commits reachable from `branch` but not from `parent`.
pub fn commits_not_in(
    root: &Path,
    git: &dyn GitRunner,
    branch: &str,
    parent: &str,
) -> Result<u32, GitError> {
    let range = format!("{parent}..{branch}");
    let output = git.run_git(root, &["rev-list", "--count", &range])?;
    output.stdout.trim().parse::<u32>().map_err(|_| GitError::Parse {
        context: format!("invalid rev-list count {:?}", output.stdout.trim()),
    })
}
