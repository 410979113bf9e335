use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_codecommit::error::DisplayErrorContext;
use aws_sdk_codecommit::Client;
use tracing::warn;

use super::{repo_name, Provider, ProviderError, ProviderTag};

/// AWS CodeCommit adapter, served under the `aws` replica tag.
///
/// Credentials and region come from the ambient AWS configuration chain
/// (environment, shared config files, instance metadata). Repository names
/// are the last URL path segment, which covers both the HTTPS
/// (`.../v1/repos/<name>`) and `codecommit::<region>://<name>` URL styles.
pub struct CodeCommitProvider {
    client: Client,
}

impl CodeCommitProvider {
    /// Build the adapter with ambient AWS credential/region resolution.
    pub async fn from_env() -> Self {
        let config = aws_config::load_defaults(BehaviorVersion::latest()).await;
        Self {
            client: Client::new(&config),
        }
    }

    /// The name CodeCommit actually keeps for a requested repository name:
    /// everything from the first `.` onwards is dropped.
    fn provisioned_name(requested: &str) -> &str {
        match requested.split_once('.') {
            Some((kept, _)) => kept,
            None => requested,
        }
    }
}

#[async_trait]
impl Provider for CodeCommitProvider {
    fn tag(&self) -> ProviderTag {
        ProviderTag::Aws
    }

    async fn exists(&self, url: &str) -> Result<bool, ProviderError> {
        let name = repo_name(url);
        if name.is_empty() {
            return Err(ProviderError::query(
                ProviderTag::Aws,
                url,
                "cannot derive repository name from URL",
            ));
        }

        match self
            .client
            .get_repository()
            .repository_name(&name)
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(err) => {
                if err
                    .as_service_error()
                    .map_or(false, |e| e.is_repository_does_not_exist_exception())
                {
                    Ok(false)
                } else {
                    Err(ProviderError::query(
                        ProviderTag::Aws,
                        url,
                        format!("{}", DisplayErrorContext(&err)),
                    ))
                }
            }
        }
    }

    async fn create(&self, url: &str) -> Result<String, ProviderError> {
        let requested = repo_name(url);
        if requested.is_empty() {
            return Err(ProviderError::create(
                ProviderTag::Aws,
                url,
                "cannot derive repository name from URL",
            ));
        }

        let name = Self::provisioned_name(&requested);
        if name != requested {
            warn!("CodeCommit keeps [{name}] for requested repository name [{requested}]");
        }

        let output = self
            .client
            .create_repository()
            .repository_name(name)
            .send()
            .await
            .map_err(|err| {
                ProviderError::create(
                    ProviderTag::Aws,
                    url,
                    format!("{}", DisplayErrorContext(&err)),
                )
            })?;

        output
            .repository_metadata()
            .and_then(|meta| meta.clone_url_http())
            .map(|clone_url| clone_url.to_string())
            .ok_or_else(|| {
                ProviderError::create(
                    ProviderTag::Aws,
                    url,
                    "created repository carries no clone URL",
                )
            })
    }
}
