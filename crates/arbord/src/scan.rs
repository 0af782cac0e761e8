//! One scan: collect, infer, assemble a validated snapshot.

use std::collections::BTreeSet;
use std::path::PathBuf;

use arbor_core::types::{
    BranchBadge, BranchNode, ObservedSnapshot, RemoteSync, RepoId, SnapshotInvariantError,
};
use arbor_gh::CodeHost;
use arbor_git::{discover_repo, GitError, GitRunner};
use chrono::Utc;
use tracing::{debug, info};

use crate::collectors::{collect_observations, CollectRequest, GitDivergenceOracle, Observations};
use crate::inference::{infer_topology, InferredTopology};

#[derive(Debug, thiserror::Error)]
pub enum ScanError {
    #[error("repository unavailable at {path}: {source}")]
    Repository {
        path: PathBuf,
        #[source]
        source: GitError,
    },
    #[error("scan assembled an inconsistent snapshot: {0}")]
    Invariant(#[from] SnapshotInvariantError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanRequest {
    pub local_path: PathBuf,
    pub active_path: PathBuf,
    pub base_branch: String,
    pub repo_id: RepoId,
    pub remote: String,
    pub pr_limit: u32,
}

/// Reads the repository and builds a fresh snapshot. Collector failures become warnings;
/// only an undiscoverable repository fails the scan.
pub fn run_scan(
    git: &dyn GitRunner,
    host: &dyn CodeHost,
    request: &ScanRequest,
) -> Result<ObservedSnapshot, ScanError> {
    let repo = discover_repo(&request.local_path, git).map_err(|source| ScanError::Repository {
        path: request.local_path.clone(),
        source,
    })?;

    let observed = collect_observations(
        git,
        host,
        &CollectRequest {
            root: repo.root.clone(),
            active_path: request.active_path.clone(),
            base_branch: request.base_branch.clone(),
            remote: request.remote.clone(),
            pr_limit: request.pr_limit,
            fallback_repo_id: request.repo_id.clone(),
        },
    );

    let branches = observed
        .branches
        .iter()
        .map(|branch| branch.name.clone())
        .collect::<BTreeSet<_>>();
    let oracle = GitDivergenceOracle::new(&repo.root, git);
    let topology = infer_topology(
        &branches,
        &request.base_branch,
        &observed.default_branch,
        &oracle,
    );
    let mut snapshot = assemble_snapshot(observed, branches, topology, &request.base_branch);
    snapshot.warnings.extend(oracle.take_warnings());
    snapshot.check_invariants()?;

    info!(
        repo_id = %snapshot.repo_id,
        branches = snapshot.branches.len(),
        edges = snapshot.edges.len(),
        warnings = snapshot.warnings.len(),
        "scan assembled snapshot"
    );
    Ok(snapshot)
}

pub fn assemble_snapshot(
    observed: Observations,
    branches: BTreeSet<String>,
    topology: InferredTopology,
    base_branch: &str,
) -> ObservedSnapshot {
    let mut warnings = observed.warnings;
    let mut nodes = Vec::with_capacity(observed.branches.len());

    for branch in &observed.branches {
        let name = branch.name.as_str();
        let pull_request = observed
            .pull_requests
            .iter()
            .find(|pr| pr.branch == name)
            .map(|pr| pr.number);
        let mut badges = Vec::new();
        if name == observed.default_branch {
            badges.push(BranchBadge::Default);
        }
        if name == base_branch {
            badges.push(BranchBadge::Base);
        }
        if observed.current_branch.as_deref() == Some(name) {
            badges.push(BranchBadge::Current);
        }
        let checkouts = observed
            .worktrees
            .iter()
            .filter(|worktree| worktree.branch.as_deref() == Some(name))
            .collect::<Vec<_>>();
        if checkouts.iter().any(|worktree| !worktree.active) {
            badges.push(BranchBadge::Worktree);
        }
        if checkouts.iter().any(|worktree| worktree.dirty) {
            badges.push(BranchBadge::Dirty);
        }
        if pull_request.is_some() {
            badges.push(BranchBadge::PullRequest);
        }

        let upstream = branch.upstream.as_deref().unwrap_or("upstream");
        match branch.remote {
            RemoteSync::NoUpstream => badges.push(BranchBadge::NoUpstream),
            RemoteSync::Gone => {
                badges.push(BranchBadge::NoUpstream);
                warnings.push(format!("missing remote for {name}: {upstream} is gone"));
            }
            RemoteSync::Tracking { ahead, behind } => {
                if ahead > 0 {
                    badges.push(BranchBadge::Unpushed);
                }
                if behind > 0 {
                    badges.push(BranchBadge::BehindRemote);
                }
                if ahead > 0 && behind > 0 {
                    badges.push(BranchBadge::Diverged);
                    warnings.push(format!(
                        "diverged branch {name}: {ahead} ahead, {behind} behind {upstream}"
                    ));
                }
            }
        }
        badges.sort();
        badges.dedup();

        let divergence = topology.divergence.get(name).copied();
        nodes.push(BranchNode {
            name: name.to_string(),
            tip: branch.tip.clone(),
            last_commit_at: branch.committed_at,
            ahead: divergence.map(|d| d.ahead),
            behind: divergence.map(|d| d.behind),
            remote: branch.remote,
            badges,
            pull_request,
        });
    }

    if topology.root.is_none() && !branches.is_empty() {
        debug!(
            base_branch,
            default_branch = %observed.default_branch,
            "neither base nor default branch exists, every branch is a root"
        );
    }

    ObservedSnapshot {
        repo_id: observed.repo_id,
        default_branch: observed.default_branch,
        base_branch: base_branch.to_string(),
        branches,
        nodes,
        edges: topology.edges,
        pull_requests: observed.pull_requests,
        worktrees: observed.worktrees,
        warnings,
        current_branch: observed.current_branch,
        scanned_at: Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use arbor_core::types::{BranchBadge, Confidence, RemoteSync, RepoId};
    use arbor_gh::StaticCodeHost;
    use arbor_git::{GitCli, ScriptedGit};

    use super::{run_scan, ScanError, ScanRequest};
    use crate::testutil::{commit_file, init_repo, run_git};

    fn request(path: &std::path::Path) -> ScanRequest {
        ScanRequest {
            local_path: path.to_path_buf(),
            active_path: path.to_path_buf(),
            base_branch: "main".to_string(),
            repo_id: RepoId::new("local/widgets"),
            remote: "origin".to_string(),
            pr_limit: 50,
        }
    }

    fn host() -> StaticCodeHost {
        StaticCodeHost {
            repository: Some("acme/widgets".to_string()),
            ..StaticCodeHost::default()
        }
    }

    #[test]
    fn scans_stacked_branches_in_a_real_repository() {
        let repo = init_repo();
        let root = repo.path();
        run_git(root, &["checkout", "--quiet", "-b", "feature/a"]);
        commit_file(root, "a.txt", "a\n", "feature a");
        run_git(root, &["checkout", "--quiet", "-b", "feature/b"]);
        commit_file(root, "b.txt", "b\n", "feature b");
        commit_file(root, "b2.txt", "b2\n", "feature b again");
        run_git(root, &["checkout", "--quiet", "main"]);
        fs::write(root.join("scratch.txt"), "dirty\n").expect("write scratch");

        let snapshot = run_scan(&GitCli::default(), &host(), &request(root)).expect("scan");

        assert_eq!(snapshot.repo_id, RepoId::new("acme/widgets"));
        assert_eq!(snapshot.default_branch, "main");
        assert_eq!(
            snapshot.branches.iter().map(String::as_str).collect::<Vec<_>>(),
            vec!["feature/a", "feature/b", "main"]
        );
        let a = snapshot.parent_of("feature/a").expect("edge for feature/a");
        assert_eq!(a.parent, "main");
        assert_eq!(a.confidence, Confidence::High);
        let b = snapshot.parent_of("feature/b").expect("edge for feature/b");
        assert_eq!(b.parent, "feature/a");
        assert_eq!(b.confidence, Confidence::High);
        assert!(snapshot.parent_of("main").is_none());

        let node_b = snapshot.node("feature/b").expect("node");
        assert_eq!((node_b.ahead, node_b.behind), (Some(2), Some(0)));
        assert_eq!(node_b.remote, RemoteSync::NoUpstream);

        let main = snapshot.node("main").expect("main node");
        for badge in [
            BranchBadge::Default,
            BranchBadge::Base,
            BranchBadge::Current,
            BranchBadge::Dirty,
            BranchBadge::NoUpstream,
        ] {
            assert!(main.has_badge(badge), "main lacks {badge:?}");
        }
        assert_eq!(snapshot.current_branch.as_deref(), Some("main"));
        assert_eq!(snapshot.worktrees.len(), 1);
        assert!(snapshot.worktrees[0].active);
        snapshot.check_invariants().expect("invariants");
    }

    #[test]
    fn tracking_state_produces_badges_and_warnings() {
        let origin = tempfile::tempdir().expect("origin dir");
        run_git(origin.path(), &["init", "--quiet", "--bare"]);
        let repo = init_repo();
        let root = repo.path();
        let origin_path = origin.path().to_string_lossy().into_owned();
        run_git(root, &["remote", "add", "origin", &origin_path]);
        run_git(root, &["push", "--quiet", "-u", "origin", "main"]);

        run_git(root, &["checkout", "--quiet", "-b", "feature/gone"]);
        commit_file(root, "g.txt", "g\n", "gone");
        run_git(root, &["push", "--quiet", "-u", "origin", "feature/gone"]);
        run_git(root, &["push", "--quiet", "origin", "--delete", "feature/gone"]);
        run_git(root, &["checkout", "--quiet", "main"]);
        commit_file(root, "local.txt", "local\n", "local only");

        let snapshot = run_scan(&GitCli::default(), &host(), &request(root)).expect("scan");

        let main = snapshot.node("main").expect("main");
        assert_eq!(main.remote, RemoteSync::Tracking { ahead: 1, behind: 0 });
        assert!(main.has_badge(BranchBadge::Unpushed));
        let gone = snapshot.node("feature/gone").expect("gone");
        assert_eq!(gone.remote, RemoteSync::Gone);
        assert!(snapshot
            .warnings
            .iter()
            .any(|w| w.starts_with("missing remote for feature/gone")));
    }

    #[test]
    fn undiscoverable_repository_fails_the_scan() {
        let dir = tempfile::tempdir().expect("tempdir");
        let err = run_scan(&GitCli::default(), &host(), &request(dir.path()))
            .expect_err("not a repository");
        assert!(matches!(err, ScanError::Repository { .. }));

        let err = run_scan(&ScriptedGit::new(), &host(), &request(dir.path()))
            .expect_err("git unavailable");
        assert!(matches!(err, ScanError::Repository { .. }));
    }
}
