use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{ObservedSnapshot, PinId, RepoId, ReparentedEdge};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum EventKind {
    ScanStarted,
    ScanCompleted {
        version: u64,
        snapshot: Box<ObservedSnapshot>,
    },
    ScanFailed {
        message: String,
    },
    BranchCreated {
        branch: String,
        #[serde(rename = "baseBranch")]
        base_branch: String,
    },
    BranchPushed {
        branch: String,
        forced: bool,
    },
    BranchRebased {
        branch: String,
        #[serde(rename = "parentBranch")]
        parent_branch: String,
    },
    BranchDeleted {
        branch: String,
        #[serde(rename = "reparentedEdges")]
        reparented_edges: Vec<ReparentedEdge>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArborEvent {
    pub at: DateTime<Utc>,
    pub pin_id: Option<PinId>,
    pub repo_id: RepoId,
    pub kind: EventKind,
}

impl ArborEvent {
    pub fn now(pin_id: Option<PinId>, repo_id: RepoId, kind: EventKind) -> Self {
        Self {
            at: Utc::now(),
            pin_id,
            repo_id,
            kind,
        }
    }
}

pub fn event_name(kind: &EventKind) -> &'static str {
    match kind {
        EventKind::ScanStarted => "scan_started",
        EventKind::ScanCompleted { .. } => "scan_completed",
        EventKind::ScanFailed { .. } => "scan_failed",
        EventKind::BranchCreated { .. } => "branch_created",
        EventKind::BranchPushed { .. } => "branch_pushed",
        EventKind::BranchRebased { .. } => "branch_rebased",
        EventKind::BranchDeleted { .. } => "branch_deleted",
    }
}
