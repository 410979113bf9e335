use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::json;
use std::env;
use std::time::Duration;
use tracing::{debug, warn};

use super::{remote_path, repo_name, Provider, ProviderError, ProviderTag};

const DEFAULT_BASE_URL: &str = "https://gitlab.com";
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// GitLab adapter backed by the v4 REST API.
///
/// Existence checks run anonymously when no token is configured, which
/// limits them to public projects (GitLab answers 404 for projects the
/// caller cannot see). Creation always needs `GITLAB_TOKEN`; created
/// projects land in the namespace from `GITLAB_NAMESPACE` when set,
/// otherwise in the token owner's personal namespace.
pub struct GitlabProvider {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
    namespace_id: Option<u64>,
}

impl GitlabProvider {
    /// Build an adapter against an explicit GitLab instance.
    pub fn new(base_url: &str, token: Option<String>, namespace_id: Option<u64>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .context("Failed to create GitLab HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
            namespace_id,
        })
    }

    /// Build the adapter for gitlab.com from `GITLAB_TOKEN` and
    /// `GITLAB_NAMESPACE`.
    pub fn from_env() -> Result<Self> {
        let token = env::var("GITLAB_TOKEN").ok().filter(|t| !t.is_empty());
        if token.is_none() {
            debug!("GITLAB_TOKEN not set, GitLab queries run anonymously");
        }

        let namespace_id = match env::var("GITLAB_NAMESPACE") {
            Ok(raw) => match raw.parse::<u64>() {
                Ok(id) => Some(id),
                Err(_) => {
                    warn!("GITLAB_NAMESPACE [{raw}] is not a numeric namespace id, ignoring it");
                    None
                }
            },
            Err(_) => None,
        };

        Self::new(DEFAULT_BASE_URL, token, namespace_id)
    }

    /// The URL-encoded project path the API addresses a project by
    /// (`group%2Fsub%2Frepo`).
    fn project_path(url: &str) -> Option<String> {
        let path = remote_path(url)?;
        if !path.contains('/') {
            return None;
        }
        Some(path.replace('/', "%2F"))
    }

    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => request.header("PRIVATE-TOKEN", token),
            None => request,
        }
    }
}

#[async_trait]
impl Provider for GitlabProvider {
    fn tag(&self) -> ProviderTag {
        ProviderTag::Gitlab
    }

    async fn exists(&self, url: &str) -> Result<bool, ProviderError> {
        let path = Self::project_path(url).ok_or_else(|| {
            ProviderError::query(
                ProviderTag::Gitlab,
                url,
                "cannot derive project path from URL",
            )
        })?;

        let endpoint = format!("{}/api/v4/projects/{}", self.base_url, path);
        let response = self
            .authorized(self.client.get(&endpoint))
            .send()
            .await
            .map_err(|err| ProviderError::query(ProviderTag::Gitlab, url, err.to_string()))?;

        match response.status() {
            StatusCode::OK => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            status => Err(ProviderError::query(
                ProviderTag::Gitlab,
                url,
                format!("GitLab API answered {status}"),
            )),
        }
    }

    async fn create(&self, url: &str) -> Result<String, ProviderError> {
        let token = self.token.as_ref().ok_or_else(|| {
            ProviderError::create(ProviderTag::Gitlab, url, "GITLAB_TOKEN is not set")
        })?;

        let name = repo_name(url);
        let mut body = json!({ "name": name });
        if let Some(namespace_id) = self.namespace_id {
            body["namespace_id"] = json!(namespace_id);
        }

        let endpoint = format!("{}/api/v4/projects", self.base_url);
        let response = self
            .client
            .post(&endpoint)
            .header("PRIVATE-TOKEN", token)
            .json(&body)
            .send()
            .await
            .map_err(|err| ProviderError::create(ProviderTag::Gitlab, url, err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(ProviderError::create(
                ProviderTag::Gitlab,
                url,
                format!("GitLab API answered {status}: {}", detail.trim()),
            ));
        }

        let project: serde_json::Value = response
            .json()
            .await
            .map_err(|err| ProviderError::create(ProviderTag::Gitlab, url, err.to_string()))?;

        project
            .get("ssh_url_to_repo")
            .or_else(|| project.get("http_url_to_repo"))
            .and_then(|value| value.as_str())
            .map(|value| value.to_string())
            .ok_or_else(|| {
                ProviderError::create(
                    ProviderTag::Gitlab,
                    url,
                    "created project carries no clone URL",
                )
            })
    }
}
