use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use reqwest::header::ACCEPT;
use reqwest::{Client, Url};
use serde::Deserialize;

use super::TokenResolver;
use crate::config::{OIDC_REQUEST_URL_VAR, OidcRequest};
use crate::retry::RetryPolicy;

pub const DEFAULT_AUDIENCE: &str = "claude-code-github-action";
pub const DEFAULT_EXCHANGE_URL: &str =
    "https://api.anthropic.com/api/github/github-app-token-exchange";

const MISSING_PERMISSION: &str = "Could not fetch an OIDC token. Did you remember to add `id-token: write` to your workflow permissions?";

#[derive(Debug, Clone)]
pub struct ExchangeSettings {
    pub exchange_url: String,
    pub audience: String,
    pub retry: RetryPolicy,
}

impl Default for ExchangeSettings {
    fn default() -> Self {
        Self {
            exchange_url: DEFAULT_EXCHANGE_URL.to_string(),
            audience: DEFAULT_AUDIENCE.to_string(),
            retry: RetryPolicy::default(),
        }
    }
}

#[derive(Deserialize)]
struct IdTokenResponse {
    value: Option<String>,
}

#[derive(Deserialize)]
struct ExchangeResponse {
    token: Option<String>,
    // Older name for `token`, still sent by some deployments.
    app_token: Option<String>,
}

impl ExchangeResponse {
    fn into_token(self) -> Option<String> {
        self.token
            .filter(|t| !t.is_empty())
            .or(self.app_token.filter(|t| !t.is_empty()))
    }
}

#[derive(Deserialize)]
struct ExchangeError {
    error: ExchangeErrorDetail,
}

#[derive(Deserialize)]
struct ExchangeErrorDetail {
    message: String,
}

/// Last resort: trade the workflow's OIDC identity for an app token. Every
/// failure here is fatal.
pub struct OidcExchangeResolver {
    request: Option<OidcRequest>,
    settings: ExchangeSettings,
    client: Client,
}

impl OidcExchangeResolver {
    pub fn new(request: Option<OidcRequest>, settings: ExchangeSettings) -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("ghtoken/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            request,
            settings,
            client,
        })
    }

    async fn fetch_oidc_token(&self, request: &OidcRequest) -> Result<String> {
        let mut url = Url::parse(&request.url)
            .with_context(|| format!("invalid {}: {}", OIDC_REQUEST_URL_VAR, request.url))?;
        url.query_pairs_mut()
            .append_pair("audience", &self.settings.audience);

        let resp = self
            .client
            .get(url)
            .bearer_auth(&request.request_token)
            .header(ACCEPT, "application/json")
            .send()
            .await
            .context("OIDC token request failed")?;
        let status = resp.status();
        if !status.is_success() {
            bail!("OIDC token request returned {}", status);
        }
        let body: IdTokenResponse = resp
            .json()
            .await
            .context("failed to parse OIDC token response")?;
        body.value
            .filter(|v| !v.is_empty())
            .context("OIDC token response has no value")
    }

    async fn exchange(&self, oidc_token: &str) -> Result<String> {
        let resp = self
            .client
            .post(&self.settings.exchange_url)
            .bearer_auth(oidc_token)
            .send()
            .await
            .context("token exchange request failed")?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ExchangeError>(&body)
                .map(|e| e.error.message)
                .unwrap_or_else(|_| String::from("Unknown error"));
            tracing::debug!(%status, "oidc-exchange: exchange rejected");
            bail!("{}", message);
        }
        let body: ExchangeResponse = resp
            .json()
            .await
            .context("failed to parse token exchange response")?;
        body.into_token().context("token not found")
    }
}

#[async_trait]
impl TokenResolver for OidcExchangeResolver {
    fn name(&self) -> &str {
        "oidc-exchange"
    }

    async fn resolve(&self) -> Result<Option<String>> {
        // Without the request variables the runner never granted the
        // permission, so there is nothing to retry.
        let request = self
            .request
            .as_ref()
            .with_context(|| format!("{} is not set", OIDC_REQUEST_URL_VAR))
            .context(MISSING_PERMISSION)?;

        let retry = self.settings.retry;
        let oidc_token = retry
            .run("oidc token", || self.fetch_oidc_token(request))
            .await
            .context(MISSING_PERMISSION)?;
        tracing::debug!("oidc-exchange: OIDC token acquired");

        let token = retry
            .run("token exchange", || self.exchange(&oidc_token))
            .await?;
        Ok(Some(token))
    }
}
