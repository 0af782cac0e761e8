use arbor_core::types::PullRequestSummary;
use serde::Deserialize;

use crate::error::GhError;

pub const PR_LIST_FIELDS: &str = "number,title,headRefName,baseRefName,url,isDraft";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GhPullRequest {
    number: u64,
    #[serde(default)]
    title: String,
    head_ref_name: String,
    base_ref_name: String,
    #[serde(default)]
    url: String,
    #[serde(default)]
    is_draft: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GhRepoView {
    name_with_owner: String,
}

/// Parses `gh pr list --json number,title,headRefName,baseRefName,url,isDraft`.
pub fn parse_pr_list(raw: &str) -> Result<Vec<PullRequestSummary>, GhError> {
    if raw.trim().is_empty() {
        return Ok(Vec::new());
    }
    let listed: Vec<GhPullRequest> = serde_json::from_str(raw).map_err(|err| GhError::Parse {
        message: format!("pr list: {err}"),
    })?;
    Ok(listed
        .into_iter()
        .map(|pr| PullRequestSummary {
            number: pr.number,
            title: pr.title,
            branch: pr.head_ref_name,
            base_branch: pr.base_ref_name,
            url: pr.url,
            is_draft: pr.is_draft,
        })
        .collect())
}

/// Parses `gh repo view --json nameWithOwner` into `owner/name`.
pub fn parse_repo_view(raw: &str) -> Result<String, GhError> {
    let view: GhRepoView = serde_json::from_str(raw).map_err(|err| GhError::Parse {
        message: format!("repo view: {err}"),
    })?;
    let name = view.name_with_owner.trim();
    if name.split('/').filter(|part| !part.is_empty()).count() != 2 {
        return Err(GhError::Parse {
            message: format!("repo view: expected owner/name, got {name:?}"),
        });
    }
    Ok(name.to_string())
}
