//! Read-time merge of designed edges onto an inferred snapshot.

use std::collections::{BTreeMap, HashMap};

use arbor_core::forest::would_create_cycle;
use arbor_core::plan::{PlanningSession, TreeSpec};
use arbor_core::types::{InferredEdge, ObservedSnapshot};
use tracing::debug;

/// Designed edges in precedence order: confirmed sessions for the snapshot's repository and
/// base branch (oldest first), then the tree spec. Later entries win for the same child.
fn designed_edges(
    snapshot: &ObservedSnapshot,
    sessions: &[PlanningSession],
    tree_spec: Option<&TreeSpec>,
) -> Vec<(String, String)> {
    let mut applicable = sessions
        .iter()
        .filter(|session| {
            session.is_confirmed()
                && session.repo_id == snapshot.repo_id
                && session.base_branch == snapshot.base_branch
        })
        .collect::<Vec<_>>();
    applicable.sort_by(|left, right| {
        left.created_at
            .cmp(&right.created_at)
            .then_with(|| left.id.cmp(&right.id))
    });

    let mut edges = applicable
        .into_iter()
        .flat_map(PlanningSession::branch_edges)
        .collect::<Vec<_>>();
    if let Some(spec) = tree_spec {
        edges.extend(
            spec.edges
                .iter()
                .map(|edge| (edge.parent.clone(), edge.child.clone())),
        );
    }
    edges
}

/// Returns a copy of `snapshot` whose edges include the designed topology.
pub fn apply_overlay(
    snapshot: &ObservedSnapshot,
    sessions: &[PlanningSession],
    tree_spec: Option<&TreeSpec>,
) -> ObservedSnapshot {
    let mut by_child = snapshot
        .edges
        .iter()
        .map(|edge| (edge.child.clone(), edge.clone()))
        .collect::<BTreeMap<_, _>>();

    // Per child, candidate parents from lowest to highest precedence.
    let mut candidates = Vec::<(String, Vec<String>)>::new();
    let mut position = HashMap::<String, usize>::new();
    for (parent, child) in designed_edges(snapshot, sessions, tree_spec) {
        if !snapshot.branches.contains(&parent) || !snapshot.branches.contains(&child) {
            debug!(%parent, %child, "designed edge references a branch that does not exist yet");
            continue;
        }
        let index = *position.entry(child.clone()).or_insert_with(|| {
            candidates.push((child.clone(), Vec::new()));
            candidates.len() - 1
        });
        let parents = &mut candidates[index].1;
        parents.retain(|known| *known != parent);
        parents.push(parent);
    }

    let mut warnings = snapshot.warnings.clone();
    for (child, parents) in candidates {
        let current = by_child
            .iter()
            .filter(|(edge_child, _)| **edge_child != child)
            .map(|(edge_child, edge)| (edge_child.clone(), edge.parent.clone()))
            .collect::<HashMap<_, _>>();
        // A dropped edge falls back to the next designed parent, then to the inferred one.
        for parent in parents.into_iter().rev() {
            if would_create_cycle(&current, &parent, &child) {
                let reason = if parent == child { "self edge" } else { "would create a cycle" };
                warnings.push(format!("designed edge {parent} -> {child} dropped: {reason}"));
                continue;
            }
            by_child.insert(child.clone(), InferredEdge::designed(parent, child.clone()));
            break;
        }
    }

    let mut overlaid = snapshot.clone();
    overlaid.edges = by_child.into_values().collect();
    overlaid.warnings = warnings;
    overlaid
}
