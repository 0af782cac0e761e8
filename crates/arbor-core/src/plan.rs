//! Designed topology: planning sessions (task-id keyed) and tree specs (branch keyed).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::forest::{check_forest, ForestError};
use crate::types::{RepoId, ReparentedEdge};

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub String);

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    #[default]
    Draft,
    Confirmed,
}

impl SessionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            SessionStatus::Draft => "draft",
            SessionStatus::Confirmed => "confirmed",
        }
    }
}

impl std::str::FromStr for SessionStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "draft" => Ok(SessionStatus::Draft),
            "confirmed" => Ok(SessionStatus::Confirmed),
            other => Err(format!(
                "invalid session status '{other}'. valid values: draft, confirmed"
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct TaskNode {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub branch: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DesignedEdge {
    pub parent: String,
    pub child: String,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PlanError {
    #[error("planning session {id} is confirmed and can no longer be edited")]
    AlreadyConfirmed { id: SessionId },
    #[error("designed edge references unknown task node {node}")]
    UnknownNode { node: String },
    #[error(transparent)]
    Forest(#[from] ForestError),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct PlanningSession {
    pub id: SessionId,
    pub repo_id: RepoId,
    pub base_branch: String,
    pub status: SessionStatus,
    pub nodes: Vec<TaskNode>,
    pub edges: Vec<DesignedEdge>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PlanningSession {
    pub fn new_draft(id: SessionId, repo_id: RepoId, base_branch: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id,
            repo_id,
            base_branch: base_branch.into(),
            status: SessionStatus::Draft,
            nodes: Vec::new(),
            edges: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_confirmed(&self) -> bool {
        self.status == SessionStatus::Confirmed
    }

    /// Rewrites the plan. Only allowed while the session is a draft.
    pub fn replace_plan(
        &mut self,
        nodes: Vec<TaskNode>,
        edges: Vec<DesignedEdge>,
    ) -> Result<(), PlanError> {
        if self.is_confirmed() {
            return Err(PlanError::AlreadyConfirmed {
                id: self.id.clone(),
            });
        }
        validate_session_graph(&nodes, &edges)?;
        self.nodes = nodes;
        self.edges = edges;
        self.updated_at = Utc::now();
        Ok(())
    }

    pub fn confirm(&mut self) -> Result<(), PlanError> {
        if self.is_confirmed() {
            return Err(PlanError::AlreadyConfirmed {
                id: self.id.clone(),
            });
        }
        validate_session_graph(&self.nodes, &self.edges)?;
        self.status = SessionStatus::Confirmed;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Designed edges translated to branch names. Nodes without a branch yield nothing.
    pub fn branch_edges(&self) -> Vec<(String, String)> {
        let branch_of = self
            .nodes
            .iter()
            .filter_map(|node| {
                node.branch
                    .as_deref()
                    .map(str::trim)
                    .filter(|branch| !branch.is_empty())
                    .map(|branch| (node.id.as_str(), branch.to_string()))
            })
            .collect::<BTreeMap<_, _>>();

        self.edges
            .iter()
            .filter_map(|edge| {
                let parent = branch_of.get(edge.parent.as_str())?;
                let child = branch_of.get(edge.child.as_str())?;
                Some((parent.clone(), child.clone()))
            })
            .collect()
    }
}

pub fn validate_session_graph(nodes: &[TaskNode], edges: &[DesignedEdge]) -> Result<(), PlanError> {
    let ids = nodes.iter().map(|node| node.id.as_str()).collect::<BTreeSet<_>>();
    for edge in edges {
        for node in [&edge.parent, &edge.child] {
            if !ids.contains(node.as_str()) {
                return Err(PlanError::UnknownNode { node: node.clone() });
            }
        }
    }
    check_forest(
        edges
            .iter()
            .map(|edge| (edge.parent.as_str(), edge.child.as_str())),
    )?;
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct TreeSpecNode {
    pub branch: String,
    #[serde(default)]
    pub title: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TreeSpecEdge {
    pub parent: String,
    pub child: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct TreeSpec {
    pub repo_id: RepoId,
    pub base_branch: String,
    #[serde(default)]
    pub nodes: Vec<TreeSpecNode>,
    #[serde(default)]
    pub edges: Vec<TreeSpecEdge>,
}

impl TreeSpec {
    pub fn empty(repo_id: RepoId, base_branch: impl Into<String>) -> Self {
        Self {
            repo_id,
            base_branch: base_branch.into(),
            nodes: Vec::new(),
            edges: Vec::new(),
        }
    }

    pub fn check_forest(&self) -> Result<(), ForestError> {
        check_forest(
            self.edges
                .iter()
                .map(|edge| (edge.parent.as_str(), edge.child.as_str())),
        )
    }

    pub fn parent_of(&self, child: &str) -> Option<&str> {
        self.edges
            .iter()
            .find(|edge| edge.child == child)
            .map(|edge| edge.parent.as_str())
    }

    pub fn mentions(&self, branch: &str) -> bool {
        self.nodes.iter().any(|node| node.branch == branch)
            || self
                .edges
                .iter()
                .any(|edge| edge.parent == branch || edge.child == branch)
    }

    /// Removes `deleted` and hands its children to its own parent.
    ///
    /// Children of a spec root are attached to the spec's base branch; when the deleted
    /// branch is the base branch itself its children become roots and are not reported.
    pub fn reparent_after_delete(&mut self, deleted: &str) -> Vec<ReparentedEdge> {
        let grandparent = self
            .parent_of(deleted)
            .map(str::to_string)
            .or_else(|| (self.base_branch != deleted).then(|| self.base_branch.clone()));

        let mut changed = Vec::new();
        let mut kept = Vec::with_capacity(self.edges.len());
        for edge in self.edges.drain(..) {
            if edge.child == deleted {
                continue;
            }
            if edge.parent != deleted {
                kept.push(edge);
                continue;
            }
            let Some(new_parent) = grandparent.clone() else {
                continue;
            };
            if new_parent == edge.child {
                continue;
            }
            changed.push(ReparentedEdge {
                child: edge.child.clone(),
                new_parent: new_parent.clone(),
            });
            kept.push(TreeSpecEdge {
                parent: new_parent,
                child: edge.child,
            });
        }
        self.edges = kept;
        self.nodes.retain(|node| node.branch != deleted);
        changed
    }
}
