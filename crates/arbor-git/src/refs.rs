//! Local branches, remote-tracking state and remote identity.

use std::path::Path;

use arbor_core::types::RemoteSync;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::command::GitRunner;
use crate::error::GitError;

pub const BRANCH_FORMAT: &str = "--format=%(refname:short)%00%(objectname)%00%(committerdate:unix)%00%(upstream:short)%00%(upstream:remotename)%00%(upstream:track)";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchRef {
    pub name: String,
    pub tip: String,
    pub committed_at: Option<DateTime<Utc>>,
    pub upstream: Option<String>,
    pub remote: RemoteSync,
}

pub fn list_branches(root: &Path, git: &dyn GitRunner) -> Result<Vec<BranchRef>, GitError> {
    let output = git.run_git(root, &["for-each-ref", BRANCH_FORMAT, "refs/heads"])?;
    parse_branch_refs(&output.stdout)
}

pub fn parse_branch_refs(raw: &str) -> Result<Vec<BranchRef>, GitError> {
    let mut branches = Vec::new();
    for line in raw.lines() {
        if line.trim().is_empty() {
            continue;
        }
        let fields = line.split('\0').collect::<Vec<_>>();
        if fields.len() != 6 {
            return Err(GitError::Parse {
                context: format!("expected 6 branch fields, got {}: {line:?}", fields.len()),
            });
        }
        let name = fields[0].trim();
        if name.is_empty() {
            return Err(GitError::Parse {
                context: format!("branch line without a name: {line:?}"),
            });
        }

        let committed_at = fields[2]
            .trim()
            .parse::<i64>()
            .ok()
            .and_then(|secs| Utc.timestamp_opt(secs, 0).single());
        let upstream = Some(fields[3].trim())
            .filter(|upstream| !upstream.is_empty())
            .map(str::to_string);
        let remote_name = fields[4].trim();
        let remote = if upstream.is_none() || remote_name.is_empty() || remote_name == "." {
            RemoteSync::NoUpstream
        } else {
            parse_upstream_track(fields[5])?
        };

        branches.push(BranchRef {
            name: name.to_string(),
            tip: fields[1].trim().to_string(),
            committed_at,
            upstream,
            remote,
        });
    }
    Ok(branches)
}

/// Parses `%(upstream:track)`: empty, `[gone]`, `[ahead N]`, `[behind N]` or both.
pub fn parse_upstream_track(raw: &str) -> Result<RemoteSync, GitError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(RemoteSync::Tracking { ahead: 0, behind: 0 });
    }
    let inner = trimmed
        .strip_prefix('[')
        .and_then(|rest| rest.strip_suffix(']'))
        .ok_or_else(|| GitError::Parse {
            context: format!("unexpected upstream track value: {trimmed}"),
        })?;
    if inner == "gone" {
        return Ok(RemoteSync::Gone);
    }

    let mut ahead = 0;
    let mut behind = 0;
    for part in inner.split(',') {
        let mut words = part.split_whitespace();
        let (Some(label), Some(count), None) = (words.next(), words.next(), words.next()) else {
            return Err(GitError::Parse {
                context: format!("unexpected upstream track value: {trimmed}"),
            });
        };
        let count = count.parse::<u32>().map_err(|_| GitError::Parse {
            context: format!("unexpected upstream track count: {trimmed}"),
        })?;
        match label {
            "ahead" => ahead = count,
            "behind" => behind = count,
            _ => {
                return Err(GitError::Parse {
                    context: format!("unexpected upstream track label: {trimmed}"),
                })
            }
        }
    }
    Ok(RemoteSync::Tracking { ahead, behind })
}

pub fn local_branch_exists(root: &Path, git: &dyn GitRunner, branch: &str) -> Result<bool, GitError> {
    ref_exists(root, git, &format!("refs/heads/{branch}"))
}

pub fn remote_branch_exists(
    root: &Path,
    git: &dyn GitRunner,
    remote: &str,
    branch: &str,
) -> Result<bool, GitError> {
    ref_exists(root, git, &format!("refs/remotes/{remote}/{branch}"))
}

fn ref_exists(root: &Path, git: &dyn GitRunner, full_ref: &str) -> Result<bool, GitError> {
    match git.run_git(root, &["show-ref", "--verify", "--quiet", full_ref]) {
        Ok(_) => Ok(true),
        Err(err) if err.is_negative_answer() => Ok(false),
        Err(err) => Err(err),
    }
}

/// Branch the remote's HEAD points at, e.g. `main` for `origin/HEAD -> origin/main`.
pub fn remote_default_branch(
    root: &Path,
    git: &dyn GitRunner,
    remote: &str,
) -> Result<Option<String>, GitError> {
    let head_ref = format!("refs/remotes/{remote}/HEAD");
    match git.run_git(root, &["symbolic-ref", "--quiet", "--short", &head_ref]) {
        Ok(output) => {
            let short = output.stdout.trim();
            let prefix = format!("{remote}/");
            let branch = short.strip_prefix(&prefix).unwrap_or(short);
            Ok((!branch.is_empty()).then(|| branch.to_string()))
        }
        Err(err) if err.is_command_failure() => Ok(None),
        Err(err) => Err(err),
    }
}

pub fn remote_url(root: &Path, git: &dyn GitRunner, remote: &str) -> Result<Option<String>, GitError> {
    match git.run_git(root, &["remote", "get-url", remote]) {
        Ok(output) => {
            let url = output.stdout.trim();
            Ok((!url.is_empty()).then(|| url.to_string()))
        }
        Err(err) if err.is_command_failure() => Ok(None),
        Err(err) => Err(err),
    }
}

/// `owner/name` from an https, ssh or scp-style remote URL.
pub fn repo_id_from_remote_url(url: &str) -> Option<String> {
    let trimmed = url.trim().trim_end_matches('/');
    let without_suffix = trimmed.strip_suffix(".git").unwrap_or(trimmed);

    let path = if let Some((_, rest)) = without_suffix.split_once("://") {
        rest.split_once('/').map(|(_, path)| path)?
    } else if let Some((host, path)) = without_suffix.split_once(':') {
        if host.contains('/') {
            return None;
        }
        path
    } else {
        return None;
    };

    let segments = path
        .split('/')
        .filter(|segment| !segment.is_empty())
        .collect::<Vec<_>>();
    if segments.len() < 2 {
        return None;
    }
    let owner = segments[segments.len() - 2];
    let name = segments[segments.len() - 1];
    Some(format!("{owner}/{name}"))
}
