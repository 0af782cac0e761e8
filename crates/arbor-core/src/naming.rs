//! Branch naming rules applied before a branch is created.

use crate::config::NamingConfig;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NamingError {
    #[error("invalid branch name '{name}': {reason}")]
    Syntax { name: String, reason: String },
    #[error("invalid branch name '{name}': must start with one of {allowed:?}")]
    Prefix { name: String, allowed: Vec<String> },
    #[error("invalid branch name '{name}': longer than {max} characters")]
    TooLong { name: String, max: usize },
}

/// Project-specific convention for new branch names.
pub trait BranchNamingRules: Send + Sync {
    fn check(&self, name: &str) -> Result<(), NamingError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrefixNamingConvention {
    allowed_prefixes: Vec<String>,
    max_length: usize,
}

impl PrefixNamingConvention {
    pub fn new(allowed_prefixes: Vec<String>, max_length: usize) -> Self {
        Self {
            allowed_prefixes: allowed_prefixes
                .into_iter()
                .map(|prefix| prefix.trim().to_string())
                .filter(|prefix| !prefix.is_empty())
                .collect(),
            max_length,
        }
    }

    pub fn from_config(config: &NamingConfig) -> Self {
        Self::new(config.allowed_prefixes.clone(), config.max_length)
    }
}

impl Default for PrefixNamingConvention {
    fn default() -> Self {
        Self::from_config(&NamingConfig::default())
    }
}

impl BranchNamingRules for PrefixNamingConvention {
    fn check(&self, name: &str) -> Result<(), NamingError> {
        check_ref_syntax(name)?;
        if name.chars().count() > self.max_length {
            return Err(NamingError::TooLong {
                name: name.to_string(),
                max: self.max_length,
            });
        }
        if !self.allowed_prefixes.is_empty()
            && !self
                .allowed_prefixes
                .iter()
                .any(|prefix| name.starts_with(prefix.as_str()))
        {
            return Err(NamingError::Prefix {
                name: name.to_string(),
                allowed: self.allowed_prefixes.clone(),
            });
        }
        Ok(())
    }
}

/// Local mirror of the `git check-ref-format --branch` rules.
pub fn check_ref_syntax(name: &str) -> Result<(), NamingError> {
    let fail = |reason: &str| {
        Err(NamingError::Syntax {
            name: name.to_string(),
            reason: reason.to_string(),
        })
    };

    if name.trim().is_empty() {
        return fail("name is empty");
    }
    if name == "@" || name == "HEAD" {
        return fail("reserved name");
    }
    if name.starts_with('-') {
        return fail("must not start with '-'");
    }
    if name.starts_with('/') || name.ends_with('/') || name.contains("//") {
        return fail("empty path component");
    }
    if name.ends_with('.') || name.contains("..") {
        return fail("must not contain '..' or end with '.'");
    }
    if name.contains("@{") {
        return fail("must not contain '@{'");
    }
    if name
        .chars()
        .any(|c| c.is_ascii_control() || matches!(c, ' ' | '~' | '^' | ':' | '?' | '*' | '[' | '\\'))
    {
        return fail("contains a forbidden character");
    }
    for component in name.split('/') {
        if component.starts_with('.') {
            return fail("path component starts with '.'");
        }
        if component.ends_with(".lock") {
            return fail("path component ends with '.lock'");
        }
    }
    Ok(())
}
