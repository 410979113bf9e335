//! Provider adapters for the hosting backends replicas live on.
//!
//! Each backend implements [`Provider`]: an existence query plus repository
//! creation. Adapters are collected in a [`ProviderSet`] and looked up by
//! [`ProviderTag`], the same tag the manifest keys replica URLs with.

pub mod codecommit;
pub mod github;
pub mod gitlab;

pub use codecommit::CodeCommitProvider;
pub use github::GithubProvider;
pub use gitlab::GitlabProvider;

use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;
use std::fmt;
use thiserror::Error;

/// Hosting backends a replica can live on. Manifest replica keys
/// deserialize directly into this enum, so an unrecognized tag is caught at
/// load time.
///
/// Variant order matches the lexicographic order of the tag strings, which
/// fixes the iteration order of tag-keyed maps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderTag {
    Aws,
    Github,
    Gitlab,
}

impl ProviderTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderTag::Aws => "aws",
            ProviderTag::Github => "github",
            ProviderTag::Gitlab => "gitlab",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "aws" => Some(ProviderTag::Aws),
            "github" => Some(ProviderTag::Github),
            "gitlab" => Some(ProviderTag::Gitlab),
            _ => None,
        }
    }
}

impl fmt::Display for ProviderTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failures surfaced by provider adapters.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// The existence query could not be completed (transport failure, auth
    /// failure, or a URL the adapter cannot classify). Distinct from a
    /// definite "does not exist".
    #[error("[{tag}] query for [{url}] failed: {reason}")]
    Query {
        tag: ProviderTag,
        url: String,
        reason: String,
    },

    /// Repository creation was attempted and failed.
    #[error("[{tag}] create for [{url}] failed: {reason}")]
    Create {
        tag: ProviderTag,
        url: String,
        reason: String,
    },

    /// The backend does not create repositories at all.
    #[error("[{tag}] does not support repository creation")]
    Unsupported { tag: ProviderTag },
}

impl ProviderError {
    pub fn query(tag: ProviderTag, url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Query {
            tag,
            url: url.into(),
            reason: reason.into(),
        }
    }

    pub fn create(tag: ProviderTag, url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Create {
            tag,
            url: url.into(),
            reason: reason.into(),
        }
    }
}

/// A hosting backend that can answer whether a repository exists and, where
/// the backend supports it, provision a missing one.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Provider: Send + Sync {
    /// The replica tag this adapter serves.
    fn tag(&self) -> ProviderTag;

    /// Whether the repository behind `url` exists on the backend.
    ///
    /// `Ok(false)` means the provider definitively answered "not found";
    /// anything preventing that answer is a [`ProviderError::Query`].
    async fn exists(&self, url: &str) -> Result<bool, ProviderError>;

    /// Create the repository behind `url`.
    ///
    /// Returns the clone URL the provider reports for whatever it actually
    /// provisioned, which is not guaranteed to answer to the requested name
    /// (CodeCommit truncates names at the first dot).
    async fn create(&self, url: &str) -> Result<String, ProviderError>;
}

/// Registry of provider adapters, looked up by tag.
pub struct ProviderSet {
    providers: Vec<Box<dyn Provider>>,
}

impl ProviderSet {
    pub fn new() -> Self {
        Self {
            providers: Vec::new(),
        }
    }

    pub fn register(&mut self, provider: Box<dyn Provider>) {
        self.providers.push(provider);
    }

    /// The adapter serving `tag`, if one is registered.
    pub fn get(&self, tag: ProviderTag) -> Option<&dyn Provider> {
        self.providers
            .iter()
            .find(|provider| provider.tag() == tag)
            .map(|provider| provider.as_ref())
    }

    /// Build the full adapter set from the process environment: GitHub
    /// (token from `GITHUB_TOKEN` or the `gh` CLI, anonymous otherwise),
    /// GitLab (`GITLAB_TOKEN` / `GITLAB_NAMESPACE`), and CodeCommit
    /// (ambient AWS credential and region resolution).
    pub async fn from_env() -> Result<Self> {
        let mut set = Self::new();
        set.register(Box::new(GithubProvider::from_env().await?));
        set.register(Box::new(GitlabProvider::from_env()?));
        set.register(Box::new(CodeCommitProvider::from_env().await));
        Ok(set)
    }
}

impl Default for ProviderSet {
    fn default() -> Self {
        Self::new()
    }
}

/// Strip scheme and host from a git remote URL, leaving the repository
/// path. Understands both URL (`scheme://host/path`) and scp-like
/// (`user@host:path`) forms; a trailing `.git` is removed.
pub(crate) fn remote_path(url: &str) -> Option<String> {
    let url = url.trim().trim_end_matches('/');

    let path = if let Some((_, rest)) = url.split_once("://") {
        let (_, path) = rest.split_once('/')?;
        path
    } else if let Some((_, path)) = url.split_once(':') {
        path
    } else {
        return None;
    };

    let path = path.trim_start_matches('/');
    let path = path.strip_suffix(".git").unwrap_or(path);

    if path.is_empty() {
        None
    } else {
        Some(path.to_string())
    }
}

/// The repository name a URL points at: the last path segment, `.git`
/// suffix stripped.
pub(crate) fn repo_name(url: &str) -> String {
    let trimmed = url.trim().trim_end_matches('/');
    let base = trimmed.rsplit('/').next().unwrap_or(trimmed);
    let base = base.rsplit(':').next().unwrap_or(base);
    base.strip_suffix(".git").unwrap_or(base).to_string()
}
