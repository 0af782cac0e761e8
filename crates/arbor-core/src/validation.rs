//! Validation for configuration and designed topology.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::config::ArborConfig;
use crate::plan::TreeSpec;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationLevel {
    Error,
    Warning,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub level: ValidationLevel,
    pub code: &'static str,
    pub message: String,
}

pub trait Validate {
    fn validate(&self) -> Vec<ValidationIssue>;
}

pub fn has_errors(issues: &[ValidationIssue]) -> bool {
    issues
        .iter()
        .any(|issue| issue.level == ValidationLevel::Error)
}

pub fn render_errors(issues: &[ValidationIssue]) -> String {
    issues
        .iter()
        .filter(|issue| issue.level == ValidationLevel::Error)
        .map(|issue| format!("{}: {}", issue.code, issue.message))
        .collect::<Vec<_>>()
        .join("; ")
}

impl Validate for ArborConfig {
    fn validate(&self) -> Vec<ValidationIssue> {
        let mut issues = Vec::new();

        if self.server.bind.trim().is_empty() {
            issues.push(ValidationIssue {
                level: ValidationLevel::Error,
                code: "server.bind.empty",
                message: "server bind address must not be empty".to_string(),
            });
        }

        if self.server.event_buffer == 0 {
            issues.push(ValidationIssue {
                level: ValidationLevel::Error,
                code: "server.event_buffer.zero",
                message: "event buffer must hold at least one event".to_string(),
            });
        }

        if self.scan.command_timeout_secs == 0 {
            issues.push(ValidationIssue {
                level: ValidationLevel::Error,
                code: "scan.command_timeout.zero",
                message: "command timeout must be greater than zero seconds".to_string(),
            });
        } else if self.scan.command_timeout_secs > 600 {
            issues.push(ValidationIssue {
                level: ValidationLevel::Warning,
                code: "scan.command_timeout.large",
                message: format!(
                    "command timeout of {}s will let a hung collector stall scans",
                    self.scan.command_timeout_secs
                ),
            });
        }

        if self.scan.default_base_branch.trim().is_empty() {
            issues.push(ValidationIssue {
                level: ValidationLevel::Error,
                code: "scan.default_base_branch.empty",
                message: "default base branch must not be empty".to_string(),
            });
        }

        if self.scan.remote.trim().is_empty() {
            issues.push(ValidationIssue {
                level: ValidationLevel::Error,
                code: "scan.remote.empty",
                message: "remote name must not be empty".to_string(),
            });
        }

        if self.tools.git_binary.as_os_str().is_empty() {
            issues.push(ValidationIssue {
                level: ValidationLevel::Error,
                code: "tools.git_binary.empty",
                message: "git binary path must not be empty".to_string(),
            });
        }

        if self.tools.gh_binary.as_os_str().is_empty() {
            issues.push(ValidationIssue {
                level: ValidationLevel::Warning,
                code: "tools.gh_binary.empty",
                message: "gh binary path is empty; pull requests will not be collected"
                    .to_string(),
            });
        }

        if self.naming.max_length == 0 {
            issues.push(ValidationIssue {
                level: ValidationLevel::Error,
                code: "naming.max_length.zero",
                message: "branch name max length must be greater than zero".to_string(),
            });
        }

        if self
            .naming
            .allowed_prefixes
            .iter()
            .any(|prefix| prefix.trim().is_empty())
        {
            issues.push(ValidationIssue {
                level: ValidationLevel::Warning,
                code: "naming.allowed_prefixes.blank",
                message: "blank entry in allowed branch prefixes".to_string(),
            });
        }

        issues
    }
}

impl Validate for TreeSpec {
    fn validate(&self) -> Vec<ValidationIssue> {
        let mut issues = Vec::new();

        if self.base_branch.trim().is_empty() {
            issues.push(ValidationIssue {
                level: ValidationLevel::Error,
                code: "tree_spec.base_branch.empty",
                message: "tree spec base branch must not be empty".to_string(),
            });
        }

        if let Err(err) = self.check_forest() {
            issues.push(ValidationIssue {
                level: ValidationLevel::Error,
                code: "tree_spec.edges.not_forest",
                message: err.to_string(),
            });
        }

        let mut seen = BTreeSet::new();
        for node in &self.nodes {
            if node.branch.trim().is_empty() {
                issues.push(ValidationIssue {
                    level: ValidationLevel::Error,
                    code: "tree_spec.node.blank",
                    message: "tree spec node has a blank branch name".to_string(),
                });
            } else if !seen.insert(node.branch.as_str()) {
                issues.push(ValidationIssue {
                    level: ValidationLevel::Warning,
                    code: "tree_spec.node.duplicate",
                    message: format!("branch {} is listed more than once", node.branch),
                });
            }
        }

        let known = self
            .nodes
            .iter()
            .map(|node| node.branch.as_str())
            .chain(std::iter::once(self.base_branch.as_str()))
            .collect::<BTreeSet<_>>();
        for edge in &self.edges {
            for branch in [&edge.parent, &edge.child] {
                if !known.contains(branch.as_str()) {
                    issues.push(ValidationIssue {
                        level: ValidationLevel::Warning,
                        code: "tree_spec.edge.unlisted_branch",
                        message: format!("edge references branch {branch} with no node entry"),
                    });
                }
            }
        }

        issues
    }
}
