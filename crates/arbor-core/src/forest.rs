//! Parent-map helpers shared by the snapshot, the tree spec, the inferencer
//! and the overlay. Every edge set in this workspace must stay a forest.

use std::collections::{BTreeMap, HashMap, HashSet};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ForestError {
    #[error("branch {branch} is its own parent")]
    SelfEdge { branch: String },
    #[error("branch {child} has more than one parent ({first}, {second})")]
    DuplicateParent {
        child: String,
        first: String,
        second: String,
    },
    #[error("cycle detected through branch {branch}")]
    Cycle { branch: String },
}

/// Builds a child -> parent map, rejecting self edges and children with two parents.
pub fn parent_map<'a, I>(edges: I) -> Result<BTreeMap<String, String>, ForestError>
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let mut parents = BTreeMap::<String, String>::new();
    for (parent, child) in edges {
        if parent == child {
            return Err(ForestError::SelfEdge {
                branch: child.to_string(),
            });
        }
        if let Some(existing) = parents.get(child) {
            return Err(ForestError::DuplicateParent {
                child: child.to_string(),
                first: existing.clone(),
                second: parent.to_string(),
            });
        }
        parents.insert(child.to_string(), parent.to_string());
    }
    Ok(parents)
}

/// Validates that the edges form a forest.
pub fn check_forest<'a, I>(edges: I) -> Result<(), ForestError>
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let parents = parent_map(edges)?;
    for start in parents.keys() {
        let mut seen = HashSet::new();
        let mut cursor = Some(start.as_str());
        while let Some(branch) = cursor {
            if !seen.insert(branch) {
                return Err(ForestError::Cycle {
                    branch: start.clone(),
                });
            }
            cursor = parents.get(branch).map(String::as_str);
        }
    }
    Ok(())
}

/// Returns true when adding `parent -> child` to an acyclic parent map would close a cycle.
pub fn would_create_cycle<M>(parents: &M, parent: &str, child: &str) -> bool
where
    M: ParentLookup,
{
    if parent == child {
        return true;
    }
    let mut hops = 0usize;
    let mut cursor = Some(parent.to_string());
    while let Some(branch) = cursor {
        if branch == child {
            return true;
        }
        hops += 1;
        if hops > parents.len() + 1 {
            return true;
        }
        cursor = parents.parent_of(&branch).map(str::to_string);
    }
    false
}

pub trait ParentLookup {
    fn parent_of(&self, child: &str) -> Option<&str>;
    fn len(&self) -> usize;
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ParentLookup for BTreeMap<String, String> {
    fn parent_of(&self, child: &str) -> Option<&str> {
        self.get(child).map(String::as_str)
    }

    fn len(&self) -> usize {
        BTreeMap::len(self)
    }
}

impl ParentLookup for HashMap<String, String> {
    fn parent_of(&self, child: &str) -> Option<&str> {
        self.get(child).map(String::as_str)
    }

    fn len(&self) -> usize {
        HashMap::len(self)
    }
}
