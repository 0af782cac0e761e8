//! Best-effort parent inference over branch history.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use arbor_core::forest::would_create_cycle;
use arbor_core::types::{Confidence, Divergence, InferredEdge};

/// Largest behind-count an edge may carry and still be reported with high confidence.
pub const MAX_BEHIND_FOR_HIGH: u32 = 2;

/// Merge-base distances between branches.
pub trait DivergenceOracle {
    /// Commits `branch` has over `base` (ahead) and the reverse (behind). `None` when the two
    /// share no merge base.
    fn divergence(&self, base: &str, branch: &str) -> Option<Divergence>;
}

impl DivergenceOracle for HashMap<(String, String), Divergence> {
    fn divergence(&self, base: &str, branch: &str) -> Option<Divergence> {
        self.get(&(base.to_string(), branch.to_string())).copied()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct InferredTopology {
    pub root: Option<String>,
    /// Sorted by child name.
    pub edges: Vec<InferredEdge>,
    /// Divergence of each child against the parent it was attached to, when known.
    pub divergence: BTreeMap<String, Divergence>,
}

impl InferredTopology {
    pub fn parent_of(&self, child: &str) -> Option<&str> {
        self.edges
            .iter()
            .find(|edge| edge.child == child)
            .map(|edge| edge.parent.as_str())
    }
}

/// The base branch when it exists, else the default branch when it exists.
pub fn choose_root(branches: &BTreeSet<String>, base: &str, default: &str) -> Option<String> {
    [base, default]
        .into_iter()
        .find(|candidate| !candidate.is_empty() && branches.contains(*candidate))
        .map(str::to_string)
}

#[derive(Debug, Clone)]
struct Candidate<'a> {
    parent: &'a str,
    divergence: Divergence,
    is_root: bool,
}

impl Candidate<'_> {
    fn rank(&self) -> (u32, bool, &str) {
        (self.divergence.distance(), !self.is_root, self.parent)
    }
}

pub fn infer_topology(
    branches: &BTreeSet<String>,
    base: &str,
    default: &str,
    oracle: &dyn DivergenceOracle,
) -> InferredTopology {
    let root = choose_root(branches, base, default);
    let mut parents = HashMap::<String, String>::new();
    let mut topology = InferredTopology {
        root: root.clone(),
        ..InferredTopology::default()
    };

    for branch in processing_order(branches, root.as_deref(), oracle) {
        let mut candidates = branches
            .iter()
            .filter(|candidate| candidate.as_str() != branch)
            .filter_map(|candidate| {
                let divergence = oracle.divergence(candidate, branch)?;
                // Candidate already contains every commit of `branch` and more.
                if divergence.ahead == 0 && divergence.behind > 0 {
                    return None;
                }
                if would_create_cycle(&parents, candidate, branch) {
                    return None;
                }
                Some(Candidate {
                    parent: candidate.as_str(),
                    divergence,
                    is_root: root.as_deref() == Some(candidate.as_str()),
                })
            })
            .collect::<Vec<_>>();
        candidates.sort_by(|left, right| left.rank().cmp(&right.rank()));

        let Some(best) = candidates.first() else {
            let Some(root) = root.as_deref() else {
                continue;
            };
            parents.insert(branch.to_string(), root.to_string());
            topology
                .edges
                .push(InferredEdge::inferred(root, branch, Confidence::Low));
            if let Some(divergence) = oracle.divergence(root, branch) {
                topology.divergence.insert(branch.to_string(), divergence);
            }
            continue;
        };

        let best_distance = best.divergence.distance();
        let unique = candidates
            .iter()
            .skip(1)
            .all(|other| other.divergence.distance() > best_distance);
        let confidence = if unique
            && best.divergence.ahead > 0
            && best.divergence.behind <= MAX_BEHIND_FOR_HIGH
        {
            Confidence::High
        } else {
            Confidence::Low
        };

        parents.insert(branch.to_string(), best.parent.to_string());
        topology
            .edges
            .push(InferredEdge::inferred(best.parent, branch, confidence));
        topology
            .divergence
            .insert(branch.to_string(), best.divergence);
    }

    topology.edges.sort_by(|left, right| left.child.cmp(&right.child));
    topology
}

/// Non-root branches, closest to the root first. Branches with no merge base against the
/// root come last; ties are broken by name.
fn processing_order<'a>(
    branches: &'a BTreeSet<String>,
    root: Option<&str>,
    oracle: &dyn DivergenceOracle,
) -> Vec<&'a str> {
    let mut ordered = branches
        .iter()
        .map(String::as_str)
        .filter(|branch| Some(*branch) != root)
        .map(|branch| {
            let ahead = root.and_then(|root| oracle.divergence(root, branch)).map(|d| d.ahead);
            (ahead.is_none(), ahead.unwrap_or(0), branch)
        })
        .collect::<Vec<_>>();
    ordered.sort();
    ordered.into_iter().map(|(_, _, branch)| branch).collect()
}
