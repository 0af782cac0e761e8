//! Observation collectors. Each one degrades to an empty or unknown value plus a warning
//! instead of failing the scan.

use std::collections::HashMap;
use std::fmt::Display;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::thread;

use arbor_core::types::{Divergence, PullRequestSummary, RepoId, WorktreeSummary};
use arbor_gh::CodeHost;
use arbor_git::{
    current_branch, divergence, list_branches, list_worktrees, remote_default_branch,
    remote_url, repo_id_from_remote_url, worktree_is_dirty, BranchRef, GitRunner,
};
use tracing::{debug, warn};

use crate::inference::DivergenceOracle;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectRequest {
    pub root: PathBuf,
    /// Directory the caller is working in; the worktree at this path is flagged active.
    pub active_path: PathBuf,
    pub base_branch: String,
    pub remote: String,
    pub pr_limit: u32,
    pub fallback_repo_id: RepoId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Observations {
    pub default_branch: String,
    pub branches: Vec<BranchRef>,
    pub current_branch: Option<String>,
    pub worktrees: Vec<WorktreeSummary>,
    pub pull_requests: Vec<PullRequestSummary>,
    pub repo_id: RepoId,
    pub warnings: Vec<String>,
}

fn unavailable(collector: &str, reason: impl Display) -> String {
    format!("{collector} unavailable: {reason}")
}

/// Runs every collector concurrently and waits for all of them.
pub fn collect_observations(
    git: &dyn GitRunner,
    host: &dyn CodeHost,
    request: &CollectRequest,
) -> Observations {
    let (default_branch, branches, current, worktrees, pull_requests, repo_id) =
        thread::scope(|scope| {
            let default_branch = scope.spawn(|| collect_default_branch(git, request));
            let branches = scope.spawn(|| collect_branches(git, request));
            let current = scope.spawn(|| collect_current_branch(git, request));
            let worktrees = scope.spawn(|| collect_worktrees(git, request));
            let pull_requests = scope.spawn(|| collect_pull_requests(host, request));
            let repo_id = scope.spawn(|| collect_repo_id(git, host, request));
            (
                join_collector("default branch", default_branch),
                join_collector("branch list", branches),
                join_collector("current branch", current),
                join_collector("worktrees", worktrees),
                join_collector("pull requests", pull_requests),
                join_collector("repository id", repo_id),
            )
        });

    let mut warnings = Vec::new();
    let default_branch = default_branch.settle(request.base_branch.clone(), &mut warnings);
    let branches = branches.settle(Vec::new(), &mut warnings);
    let current_branch = current.settle(None, &mut warnings);
    let worktrees = worktrees.settle(Vec::new(), &mut warnings);
    let pull_requests = pull_requests.settle(Vec::new(), &mut warnings);
    let repo_id = repo_id.settle(request.fallback_repo_id.clone(), &mut warnings);

    Observations {
        default_branch,
        branches,
        current_branch,
        worktrees,
        pull_requests,
        repo_id,
        warnings,
    }
}

#[derive(Debug)]
struct Collected<T> {
    value: Option<T>,
    warnings: Vec<String>,
}

impl<T> Collected<T> {
    fn value(value: T) -> Self {
        Self {
            value: Some(value),
            warnings: Vec::new(),
        }
    }

    fn with_warnings(value: T, warnings: Vec<String>) -> Self {
        Self {
            value: Some(value),
            warnings,
        }
    }

    fn settle(self, fallback: T, warnings: &mut Vec<String>) -> T {
        warnings.extend(self.warnings);
        self.value.unwrap_or(fallback)
    }

    fn failed(collector: &str, reason: impl Display) -> Self {
        let warning = unavailable(collector, reason);
        warn!(%warning, "collector failed");
        Self {
            value: None,
            warnings: vec![warning],
        }
    }
}

fn join_collector<T>(
    collector: &str,
    handle: thread::ScopedJoinHandle<'_, Collected<T>>,
) -> Collected<T> {
    handle
        .join()
        .unwrap_or_else(|_| Collected::failed(collector, "collector thread panicked"))
}

fn collect_default_branch(git: &dyn GitRunner, request: &CollectRequest) -> Collected<String> {
    match remote_default_branch(&request.root, git, &request.remote) {
        Ok(Some(branch)) => Collected::value(branch),
        Ok(None) => {
            debug!(
                remote = %request.remote,
                fallback = %request.base_branch,
                "remote HEAD not set, using base branch as default"
            );
            Collected::value(request.base_branch.clone())
        }
        Err(err) => Collected::failed("default branch", err),
    }
}

fn collect_branches(git: &dyn GitRunner, request: &CollectRequest) -> Collected<Vec<BranchRef>> {
    match list_branches(&request.root, git) {
        Ok(mut branches) => {
            branches.sort_by(|left, right| left.name.cmp(&right.name));
            branches.dedup_by(|left, right| left.name == right.name);
            Collected::value(branches)
        }
        Err(err) => Collected::failed("branch list", err),
    }
}

fn collect_current_branch(
    git: &dyn GitRunner,
    request: &CollectRequest,
) -> Collected<Option<String>> {
    match current_branch(&request.active_path, git) {
        Ok(branch) => Collected::value(branch),
        Err(err) => Collected::failed("current branch", err),
    }
}

fn collect_worktrees(
    git: &dyn GitRunner,
    request: &CollectRequest,
) -> Collected<Vec<WorktreeSummary>> {
    let listed = match list_worktrees(&request.root, git) {
        Ok(listed) => listed,
        Err(err) => return Collected::failed("worktrees", err),
    };

    let active = canonical(&request.active_path);
    let mut warnings = Vec::new();
    let mut summaries = Vec::with_capacity(listed.len());
    for worktree in listed {
        if worktree.bare {
            continue;
        }
        let missing = !worktree.path.exists();
        if worktree.prunable || missing {
            warnings.push(format!(
                "orphaned worktree {}: {}",
                worktree.path.display(),
                if missing { "path no longer exists" } else { "marked prunable" }
            ));
        }
        let dirty = match worktree_is_dirty(&worktree, git) {
            Ok(dirty) => dirty,
            Err(err) => {
                warnings.push(unavailable(
                    &format!("worktree status for {}", worktree.path.display()),
                    err,
                ));
                false
            }
        };
        summaries.push(WorktreeSummary {
            active: canonical(&worktree.path) == active,
            path: worktree.path,
            branch: worktree.branch,
            head: worktree.head,
            dirty,
            prunable: worktree.prunable || missing,
        });
    }
    Collected::with_warnings(summaries, warnings)
}

fn collect_pull_requests(
    host: &dyn CodeHost,
    request: &CollectRequest,
) -> Collected<Vec<PullRequestSummary>> {
    match host.open_pull_requests(&request.root, request.pr_limit) {
        Ok(pull_requests) => Collected::value(pull_requests),
        Err(err) => Collected::failed("pull requests", err.summary()),
    }
}

fn collect_repo_id(
    git: &dyn GitRunner,
    host: &dyn CodeHost,
    request: &CollectRequest,
) -> Collected<RepoId> {
    let gh_reason = match host.repository_name(&request.root) {
        Ok(name) => return Collected::value(RepoId::new(name)),
        Err(err) => err.summary(),
    };
    debug!(reason = %gh_reason, "gh repo view failed, trying remote url");

    match remote_url(&request.root, git, &request.remote) {
        Ok(Some(url)) => {
            if let Some(name) = repo_id_from_remote_url(&url) {
                return Collected::value(RepoId::new(name));
            }
            Collected::failed(
                "repository id",
                format!("{gh_reason}; remote url {url} has no owner/name"),
            )
        }
        Ok(None) => Collected::failed(
            "repository id",
            format!("{gh_reason}; remote {} is not configured", request.remote),
        ),
        Err(err) => Collected::failed("repository id", format!("{gh_reason}; {err}")),
    }
}

fn canonical(path: &Path) -> PathBuf {
    std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

/// Divergence backed by git, memoized for the lifetime of one scan. Measuring one
/// direction of a pair also answers the reverse direction.
pub struct GitDivergenceOracle<'a> {
    root: &'a Path,
    git: &'a dyn GitRunner,
    memo: Mutex<HashMap<(String, String), Option<Divergence>>>,
    failures: Mutex<Vec<String>>,
}

impl<'a> GitDivergenceOracle<'a> {
    pub fn new(root: &'a Path, git: &'a dyn GitRunner) -> Self {
        Self {
            root,
            git,
            memo: Mutex::new(HashMap::new()),
            failures: Mutex::new(Vec::new()),
        }
    }

    /// Warnings for pairs git could not measure, at most one per failure message.
    pub fn take_warnings(&self) -> Vec<String> {
        let mut failures = match self.failures.lock() {
            Ok(failures) => failures,
            Err(poisoned) => poisoned.into_inner(),
        };
        let mut taken = std::mem::take(&mut *failures);
        taken.dedup();
        taken
    }
}

impl DivergenceOracle for GitDivergenceOracle<'_> {
    fn divergence(&self, base: &str, branch: &str) -> Option<Divergence> {
        let key = (base.to_string(), branch.to_string());
        if let Ok(memo) = self.memo.lock() {
            if let Some(known) = memo.get(&key) {
                return *known;
            }
        }

        let measured = match divergence(self.root, self.git, base, branch) {
            Ok(measured) => measured,
            Err(err) => {
                if let Ok(mut failures) = self.failures.lock() {
                    failures.push(unavailable(&format!("ahead/behind {base}...{branch}"), err));
                }
                None
            }
        };
        if let Ok(mut memo) = self.memo.lock() {
            let reverse = measured.map(|d| Divergence::new(d.behind, d.ahead));
            memo.insert((branch.to_string(), base.to_string()), reverse);
            memo.insert(key, measured);
        }
        measured
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use arbor_core::types::{Divergence, PullRequestSummary, RepoId};
    use arbor_gh::StaticCodeHost;
    use arbor_git::{ScriptedGit, ScriptedResponse, BRANCH_FORMAT};

    use super::{collect_observations, CollectRequest, GitDivergenceOracle};
    use crate::inference::DivergenceOracle;

    fn request(root: PathBuf) -> CollectRequest {
        CollectRequest {
            active_path: root.clone(),
            root,
            base_branch: "main".to_string(),
            remote: "origin".to_string(),
            pr_limit: 50,
            fallback_repo_id: RepoId::new("local/widgets"),
        }
    }

    fn branch_line(name: &str, tip: &str) -> String {
        format!("{name}\0{tip}\01700000000\0\0\0\n")
    }

    #[test]
    fn collects_every_observation_from_scripted_tools() {
        let dir = tempfile::tempdir().expect("tempdir");
        let root = dir.path().to_path_buf();
        let worktrees = format!(
            "worktree {}\nHEAD aaa\nbranch refs/heads/main\n\nworktree /gone/elsewhere\nHEAD bbb\nbranch refs/heads/feature/a\nprunable gitdir file points to non-existent location\n\n",
            root.display()
        );
        let git = ScriptedGit::new()
            .on(
                "symbolic-ref --quiet --short refs/remotes/origin/HEAD",
                ScriptedResponse::ok("origin/main\n"),
            )
            .on(
                &format!("for-each-ref {BRANCH_FORMAT} refs/heads"),
                ScriptedResponse::ok(format!(
                    "{}{}",
                    branch_line("main", "aaa"),
                    branch_line("feature/a", "bbb")
                )),
            )
            .on(
                "symbolic-ref --quiet --short HEAD",
                ScriptedResponse::ok("main\n"),
            )
            .on("worktree list --porcelain", ScriptedResponse::ok(worktrees))
            .on("status --porcelain", ScriptedResponse::ok(" M src/lib.rs\n"));
        let host = StaticCodeHost {
            pull_requests: vec![PullRequestSummary {
                number: 7,
                title: "Feature A".to_string(),
                branch: "feature/a".to_string(),
                base_branch: "main".to_string(),
                url: "https://github.com/acme/widgets/pull/7".to_string(),
                is_draft: false,
            }],
            repository: Some("acme/widgets".to_string()),
            failure: None,
        };

        let observed = collect_observations(&git, &host, &request(root));
        assert_eq!(observed.default_branch, "main");
        assert_eq!(
            observed
                .branches
                .iter()
                .map(|b| b.name.as_str())
                .collect::<Vec<_>>(),
            vec!["feature/a", "main"]
        );
        assert_eq!(observed.current_branch.as_deref(), Some("main"));
        assert_eq!(observed.repo_id, RepoId::new("acme/widgets"));
        assert_eq!(observed.pull_requests.len(), 1);

        assert_eq!(observed.worktrees.len(), 2);
        assert!(observed.worktrees[0].active);
        assert!(observed.worktrees[0].dirty);
        assert!(!observed.worktrees[1].active);
        assert!(observed.worktrees[1].prunable);
        assert!(!observed.worktrees[1].dirty);
        assert_eq!(git.count_calls("status --porcelain"), 1);
        assert!(observed
            .warnings
            .iter()
            .any(|w| w.starts_with("orphaned worktree /gone/elsewhere")));
    }

    #[test]
    fn failing_collectors_degrade_to_warnings() {
        let dir = tempfile::tempdir().expect("tempdir");
        let git = ScriptedGit::new()
            .on(
                "symbolic-ref --quiet --short refs/remotes/origin/HEAD",
                ScriptedResponse::Timeout,
            )
            .on(
                "symbolic-ref --quiet --short HEAD",
                ScriptedResponse::no(),
            )
            .on(
                "remote get-url origin",
                ScriptedResponse::ok("git@github.com:acme/widgets.git\n"),
            );
        let host = StaticCodeHost::failing("gh: not logged in to any hosts");

        let observed = collect_observations(&git, &host, &request(dir.path().to_path_buf()));
        assert_eq!(observed.default_branch, "main");
        assert!(observed.branches.is_empty());
        assert!(observed.worktrees.is_empty());
        assert!(observed.pull_requests.is_empty());
        assert_eq!(observed.current_branch, None);
        assert_eq!(observed.repo_id, RepoId::new("acme/widgets"));

        for collector in ["default branch", "branch list", "worktrees", "pull requests"] {
            assert!(
                observed
                    .warnings
                    .iter()
                    .any(|w| w.starts_with(&format!("{collector} unavailable: "))),
                "missing warning for {collector}: {:?}",
                observed.warnings
            );
        }
        assert!(observed
            .warnings
            .iter()
            .any(|w| w == "pull requests unavailable: gh is not authenticated"));
    }

    #[test]
    fn repository_id_falls_back_to_provisional_with_warning() {
        let dir = tempfile::tempdir().expect("tempdir");
        let git = ScriptedGit::new().on(
            "remote get-url origin",
            ScriptedResponse::fail(2, "error: No such remote 'origin'"),
        );
        let host = StaticCodeHost::default();

        let observed = collect_observations(&git, &host, &request(dir.path().to_path_buf()));
        assert_eq!(observed.repo_id, RepoId::new("local/widgets"));
        assert!(observed
            .warnings
            .iter()
            .any(|w| w.starts_with("repository id unavailable: ")
                && w.contains("remote origin is not configured")));
    }

    #[test]
    fn divergence_oracle_memoizes_and_reports_failures() {
        let dir = tempfile::tempdir().expect("tempdir");
        let git = ScriptedGit::new()
            .on("merge-base main feature/a", ScriptedResponse::ok("abc\n"))
            .on(
                "rev-list --left-right --count main...feature/a",
                ScriptedResponse::ok("1\t3\n"),
            )
            .on("merge-base main orphan", ScriptedResponse::no())
            .on(
                "merge-base main broken",
                ScriptedResponse::fail(128, "fatal: bad object"),
            );
        let oracle = GitDivergenceOracle::new(dir.path(), &git);

        assert_eq!(oracle.divergence("main", "feature/a"), Some(Divergence::new(3, 1)));
        assert_eq!(oracle.divergence("main", "feature/a"), Some(Divergence::new(3, 1)));
        assert_eq!(git.count_calls("merge-base main feature/a"), 1);
        assert_eq!(oracle.divergence("feature/a", "main"), Some(Divergence::new(1, 3)));
        assert_eq!(git.count_calls("merge-base"), 1);
        assert_eq!(git.count_calls("rev-list"), 1);

        assert_eq!(oracle.divergence("main", "orphan"), None);
        assert!(oracle.take_warnings().is_empty());

        assert_eq!(oracle.divergence("main", "broken"), None);
        let warnings = oracle.take_warnings();
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].starts_with("ahead/behind main...broken unavailable: "));
    }
}
