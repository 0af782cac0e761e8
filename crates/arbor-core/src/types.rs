//! Core types for observed repository topology.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use crate::forest::{check_forest, ForestError};

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RepoId(pub String);

impl RepoId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Provisional identifier used until a scan resolves `owner/name`.
    pub fn provisional_for(path: &std::path::Path) -> Self {
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| "repository".to_string());
        Self(format!("local/{name}"))
    }
}

impl std::fmt::Display for RepoId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for RepoId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PinId(pub i64);

impl std::fmt::Display for PinId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for PinId {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        value
            .trim()
            .parse::<i64>()
            .map(PinId)
            .map_err(|_| format!("repository pin id must be an integer, got '{value}'"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    High,
    Low,
}

impl Confidence {
    pub fn as_str(self) -> &'static str {
        match self {
            Confidence::High => "high",
            Confidence::Low => "low",
        }
    }
}

/// Commit counts of a branch measured against a comparison ref from their merge base.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Divergence {
    pub ahead: u32,
    pub behind: u32,
}

impl Divergence {
    pub fn new(ahead: u32, behind: u32) -> Self {
        Self { ahead, behind }
    }

    pub fn distance(self) -> u32 {
        self.ahead.saturating_add(self.behind)
    }

    pub fn is_diverged(self) -> bool {
        self.ahead > 0 && self.behind > 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum RemoteSync {
    NoUpstream,
    Gone,
    Tracking { ahead: u32, behind: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BranchBadge {
    Default,
    Base,
    Current,
    Worktree,
    Dirty,
    PullRequest,
    NoUpstream,
    Unpushed,
    BehindRemote,
    Diverged,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct BranchNode {
    pub name: String,
    pub tip: String,
    pub last_commit_at: Option<DateTime<Utc>>,
    pub ahead: Option<u32>,
    pub behind: Option<u32>,
    pub remote: RemoteSync,
    #[serde(default)]
    pub badges: Vec<BranchBadge>,
    #[serde(default)]
    pub pull_request: Option<u64>,
}

impl BranchNode {
    pub fn has_badge(&self, badge: BranchBadge) -> bool {
        self.badges.contains(&badge)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct InferredEdge {
    pub parent: String,
    pub child: String,
    pub confidence: Confidence,
    #[serde(default)]
    pub is_designed: bool,
}

impl InferredEdge {
    pub fn inferred(parent: impl Into<String>, child: impl Into<String>, confidence: Confidence) -> Self {
        Self {
            parent: parent.into(),
            child: child.into(),
            confidence,
            is_designed: false,
        }
    }

    pub fn designed(parent: impl Into<String>, child: impl Into<String>) -> Self {
        Self {
            parent: parent.into(),
            child: child.into(),
            confidence: Confidence::High,
            is_designed: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct PullRequestSummary {
    pub number: u64,
    pub title: String,
    pub branch: String,
    pub base_branch: String,
    pub url: String,
    #[serde(default)]
    pub is_draft: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct WorktreeSummary {
    pub path: PathBuf,
    pub branch: Option<String>,
    pub head: Option<String>,
    pub dirty: bool,
    pub active: bool,
    #[serde(default)]
    pub prunable: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ObservedSnapshot {
    pub repo_id: RepoId,
    pub default_branch: String,
    pub base_branch: String,
    pub branches: BTreeSet<String>,
    pub nodes: Vec<BranchNode>,
    pub edges: Vec<InferredEdge>,
    #[serde(default)]
    pub pull_requests: Vec<PullRequestSummary>,
    #[serde(default)]
    pub worktrees: Vec<WorktreeSummary>,
    #[serde(default)]
    pub warnings: Vec<String>,
    #[serde(default)]
    pub current_branch: Option<String>,
    pub scanned_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SnapshotInvariantError {
    #[error("{kind} references unknown branch {branch}")]
    UnknownBranch { kind: &'static str, branch: String },
    #[error("branch {branch} has more than one node")]
    DuplicateNode { branch: String },
    #[error(transparent)]
    Forest(#[from] ForestError),
}

impl ObservedSnapshot {
    pub fn parent_of(&self, child: &str) -> Option<&InferredEdge> {
        self.edges.iter().find(|edge| edge.child == child)
    }

    pub fn node(&self, name: &str) -> Option<&BranchNode> {
        self.nodes.iter().find(|node| node.name == name)
    }

    pub fn parent_map(&self) -> BTreeMap<String, String> {
        self.edges
            .iter()
            .map(|edge| (edge.child.clone(), edge.parent.clone()))
            .collect()
    }

    /// Branches without a parent edge.
    pub fn roots(&self) -> Vec<&str> {
        self.branches
            .iter()
            .filter(|branch| self.parent_of(branch).is_none())
            .map(String::as_str)
            .collect()
    }

    pub fn check_invariants(&self) -> Result<(), SnapshotInvariantError> {
        let mut seen_nodes = BTreeSet::new();
        for node in &self.nodes {
            if !self.branches.contains(&node.name) {
                return Err(SnapshotInvariantError::UnknownBranch {
                    kind: "node",
                    branch: node.name.clone(),
                });
            }
            if !seen_nodes.insert(node.name.as_str()) {
                return Err(SnapshotInvariantError::DuplicateNode {
                    branch: node.name.clone(),
                });
            }
        }
        for edge in &self.edges {
            for branch in [&edge.parent, &edge.child] {
                if !self.branches.contains(branch) {
                    return Err(SnapshotInvariantError::UnknownBranch {
                        kind: "edge",
                        branch: branch.clone(),
                    });
                }
            }
        }
        check_forest(
            self.edges
                .iter()
                .map(|edge| (edge.parent.as_str(), edge.child.as_str())),
        )?;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepositoryPin {
    pub id: PinId,
    pub repo_id: RepoId,
    pub local_path: PathBuf,
    pub base_branch: String,
    pub last_used_at: DateTime<Utc>,
    pub snapshot_version: u64,
}

/// One rewritten tree-spec edge after a branch deletion.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReparentedEdge {
    pub child: String,
    pub new_parent: String,
}


#[cfg(test)]
mod tests {
    use super::fixtures::snapshot;
    use super::{Confidence, Divergence, PinId, RemoteSync, RepoId, SnapshotInvariantError};
    use crate::forest::ForestError;
    use std::path::Path;

    #[test]
    fn snapshot_invariants_accept_forest_rooted_at_main() {
        let snap = snapshot(
            &["main", "feature/a", "feature/b"],
            &[
                ("main", "feature/a", Confidence::High),
                ("feature/a", "feature/b", Confidence::Low),
            ],
        );
        snap.check_invariants().expect("valid snapshot");
        assert_eq!(snap.roots(), vec!["main"]);
        assert_eq!(snap.parent_of("feature/b").map(|e| e.parent.as_str()), Some("feature/a"));
    }

    #[test]
    fn snapshot_invariants_reject_unknown_branches_and_cycles() {
        let snap = snapshot(&["main"], &[("main", "ghost", Confidence::Low)]);
        assert!(matches!(
            snap.check_invariants(),
            Err(SnapshotInvariantError::UnknownBranch { branch, .. }) if branch == "ghost"
        ));

        let snap = snapshot(
            &["a", "b"],
            &[("a", "b", Confidence::Low), ("b", "a", Confidence::Low)],
        );
        assert!(matches!(
            snap.check_invariants(),
            Err(SnapshotInvariantError::Forest(ForestError::Cycle { .. }))
        ));
    }

    #[test]
    fn remote_sync_serializes_with_status_tag() {
        let json = serde_json::to_value(RemoteSync::Tracking { ahead: 2, behind: 0 }).expect("json");
        assert_eq!(json["status"], "tracking");
        assert_eq!(json["ahead"], 2);

        let json = serde_json::to_value(RemoteSync::NoUpstream).expect("json");
        assert_eq!(json["status"], "no_upstream");
    }

    #[test]
    fn edge_serializes_is_designed_in_camel_case() {
        let snap = snapshot(&["main", "a"], &[("main", "a", Confidence::Low)]);
        let json = serde_json::to_value(&snap).expect("json");
        assert_eq!(json["edges"][0]["isDesigned"], false);
        assert_eq!(json["edges"][0]["confidence"], "low");
        assert_eq!(json["defaultBranch"], "main");
    }

    #[test]
    fn pin_id_parses_integers_only() {
        assert_eq!("42".parse::<PinId>(), Ok(PinId(42)));
        assert!("abc".parse::<PinId>().is_err());
    }

    #[test]
    fn provisional_repo_id_uses_directory_name() {
        assert_eq!(
            RepoId::provisional_for(Path::new("/home/dev/widgets")),
            RepoId::new("local/widgets")
        );
    }

    #[test]
    fn divergence_distance_and_diverged_flag() {
        assert_eq!(Divergence::new(3, 2).distance(), 5);
        assert!(Divergence::new(1, 1).is_diverged());
        assert!(!Divergence::new(1, 0).is_diverged());
    }
}
