//! Repository coordinates

use std::fmt;
use std::str::FromStr;

use crate::error::{HubError, Result};

/// A remote repository id: `name` or `namespace/name`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RepoId {
    namespace: Option<String>,
    name: String,
}

impl RepoId {
    /// Parse `namespace/name` or a bare `name`
    pub fn parse(s: &str) -> Result<Self> {
        let parts: Vec<&str> = s.split('/').collect();
        let (namespace, name) = match parts.as_slice() {
            [name] => (None, *name),
            [namespace, name] => (Some(*namespace), *name),
            _ => return Err(HubError::InvalidRepoId(s.to_string())),
        };

        if let Some(ns) = namespace {
            if !is_valid_segment(ns) {
                return Err(HubError::InvalidRepoId(s.to_string()));
            }
        }
        if !is_valid_segment(name) {
            return Err(HubError::InvalidRepoId(s.to_string()));
        }

        Ok(Self {
            namespace: namespace.map(String::from),
            name: name.to_string(),
        })
    }

    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Same repository under `namespace` (used when the hub resolves a
    /// bare name to the authenticated user)
    pub fn with_namespace(&self, namespace: &str) -> Self {
        Self {
            namespace: Some(namespace.to_string()),
            name: self.name.clone(),
        }
    }

    /// Folder name used for cached snapshots: `models--ns--name`
    pub fn cache_folder_name(&self) -> String {
        match &self.namespace {
            Some(ns) => format!("models--{}--{}", ns, self.name),
            None => format!("models--{}", self.name),
        }
    }
}

impl fmt::Display for RepoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{}/{}", ns, self.name),
            None => write!(f, "{}", self.name),
        }
    }
}

impl FromStr for RepoId {
    type Err = HubError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

fn is_valid_segment(segment: &str) -> bool {
    !segment.is_empty()
        && segment.len() <= 96
        && !segment.starts_with(['-', '.'])
        && !segment.ends_with('.')
        && !segment.contains("..")
        && !segment.contains("--")
        && segment
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_with_namespace() {
        let repo = RepoId::parse("valid_org/test-model-org").unwrap();
        assert_eq!(repo.namespace(), Some("valid_org"));
        assert_eq!(repo.name(), "test-model-org");
        assert_eq!(repo.to_string(), "valid_org/test-model-org");
        assert_eq!(
            repo.cache_folder_name(),
            "models--valid_org--test-model-org"
        );
    }

    #[test]
    fn test_parse_bare_name() {
        let repo: RepoId = "test-model".parse().unwrap();
        assert_eq!(repo.namespace(), None);
        assert_eq!(repo.with_namespace("alice").to_string(), "alice/test-model");
    }

    #[test]
    fn test_parse_invalid() {
        for bad in ["", "a/b/c", "/name", "ns/", "ns/../x", "ns/na me", "-x/y", "a--b/c"] {
            assert!(
                matches!(RepoId::parse(bad), Err(HubError::InvalidRepoId(_))),
                "{bad:?} should be rejected"
            );
        }
    }
}
