use anyhow::{Context, Result};
use async_trait::async_trait;

use super::TokenResolver;
use crate::config::{AppCredentials, Config, REPOSITORY_VAR};
use crate::github::{self, RepoSlug};

/// Mints an installation token for the Rehearsal GitHub App on the current
/// repository. Best effort: anything that goes wrong after the repository is
/// known turns into a decline so the OIDC exchange still gets its turn.
pub struct AppInstallationResolver {
    credentials: Option<AppCredentials>,
    repository: Option<String>,
    api_url: String,
}

impl AppInstallationResolver {
    pub fn new(
        credentials: Option<AppCredentials>,
        repository: Option<String>,
        api_url: impl Into<String>,
    ) -> Self {
        Self {
            credentials,
            repository,
            api_url: api_url.into(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.app.clone(),
            config.repository.clone(),
            config.api_url.clone(),
        )
    }

    async fn mint(&self, credentials: &AppCredentials, repo: &RepoSlug) -> Result<String> {
        let gh = github::app_client(&self.api_url, credentials)?;
        let installation_id = github::repository_installation(&gh, repo).await?;
        github::create_installation_token(&gh, installation_id).await
    }
}

#[async_trait]
impl TokenResolver for AppInstallationResolver {
    fn name(&self) -> &str {
        "rehearsal-app"
    }

    async fn resolve(&self) -> Result<Option<String>> {
        let Some(credentials) = &self.credentials else {
            tracing::debug!("rehearsal-app: credentials not configured, skipping");
            return Ok(None);
        };

        // No repository context is a broken runner, not a reason to fall back.
        let repository = self
            .repository
            .as_deref()
            .with_context(|| format!("{} is not set", REPOSITORY_VAR))?;
        let repo: RepoSlug = repository.parse()?;

        match self.mint(credentials, &repo).await {
            Ok(token) => {
                tracing::info!(repo = %repo, "rehearsal-app: installation token created");
                Ok(Some(token))
            }
            Err(err) => {
                tracing::warn!(
                    "rehearsal-app: failed to get installation token, falling back to OIDC: {:#}",
                    err
                );
                Ok(None)
            }
        }
    }
}
