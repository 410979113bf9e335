use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use octocrab::Octocrab;
use std::env;
use tokio::process::Command;
use tracing::debug;

use super::{remote_path, Provider, ProviderError, ProviderTag};

/// GitHub adapter backed by the REST API.
///
/// Existence checks work anonymously for public repositories; a personal
/// token (from `GITHUB_TOKEN`, or an authenticated `gh` CLI) extends them
/// to private ones. Repository creation is not offered: GitHub replicas
/// are expected to pre-exist.
pub struct GithubProvider {
    client: Octocrab,
}

impl GithubProvider {
    /// Build the adapter, discovering a token from the environment or the
    /// `gh` CLI when one is available.
    pub async fn from_env() -> Result<Self> {
        let mut builder = Octocrab::builder();

        match detect_token().await {
            Some(token) => {
                debug!("GitHub queries run with a personal token");
                builder = builder.personal_token(token);
            }
            None => debug!("No GitHub token found, queries run anonymously"),
        }

        let client = builder.build().context("Failed to create GitHub client")?;

        Ok(Self { client })
    }

    #[cfg(test)]
    fn with_base_uri(uri: &str) -> Result<Self> {
        let client = Octocrab::builder().base_uri(uri)?.build()?;
        Ok(Self { client })
    }

    /// Split a GitHub remote URL into (owner, repository).
    fn owner_and_repo(url: &str) -> Option<(String, String)> {
        let path = remote_path(url)?;
        let mut segments = path.split('/');
        let owner = segments.next()?;
        let repo = segments.next()?;
        if owner.is_empty() || repo.is_empty() || segments.next().is_some() {
            return None;
        }
        Some((owner.to_string(), repo.to_string()))
    }
}

#[async_trait]
impl Provider for GithubProvider {
    fn tag(&self) -> ProviderTag {
        ProviderTag::Github
    }

    async fn exists(&self, url: &str) -> Result<bool, ProviderError> {
        let (owner, repo) = Self::owner_and_repo(url).ok_or_else(|| {
            ProviderError::query(
                ProviderTag::Github,
                url,
                "cannot derive owner/repository from URL",
            )
        })?;

        match self.client.repos(owner, repo).get().await {
            Ok(_) => Ok(true),
            Err(octocrab::Error::GitHub { source, .. }) if source.status_code.as_u16() == 404 => {
                Ok(false)
            }
            Err(err) => Err(ProviderError::query(
                ProviderTag::Github,
                url,
                err.to_string(),
            )),
        }
    }

    async fn create(&self, _url: &str) -> Result<String, ProviderError> {
        Err(ProviderError::Unsupported {
            tag: ProviderTag::Github,
        })
    }
}

/// Find a GitHub token: `GITHUB_TOKEN` first, then an authenticated `gh`
/// CLI.
async fn detect_token() -> Option<String> {
    if let Ok(token) = env::var("GITHUB_TOKEN") {
        if !token.is_empty() {
            debug!("Using token from GITHUB_TOKEN");
            return Some(token);
        }
    }

    match gh_cli_token().await {
        Ok(token) => {
            debug!("Using token from the gh CLI");
            Some(token)
        }
        Err(err) => {
            debug!("No token from the gh CLI: {err:#}");
            None
        }
    }
}

/// Ask an installed, authenticated `gh` CLI for its token.
async fn gh_cli_token() -> Result<String> {
    let output = Command::new("gh")
        .args(["auth", "token"])
        .output()
        .await
        .context("Failed to run the gh CLI")?;

    if !output.status.success() {
        bail!(
            "gh auth token failed: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }

    let token = String::from_utf8(output.stdout)
        .context("gh CLI token is not valid UTF-8")?
        .trim()
        .to_string();

    if token.is_empty() {
        bail!("gh CLI returned an empty token");
    }

    Ok(token)
}
