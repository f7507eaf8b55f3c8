//! Token resolution chain.
//!
//! Sources are tried in order and the first one that produces a token wins:
//! - **override**: a token handed in by the operator
//! - **rehearsal-app**: an installation token minted for the Rehearsal GitHub App
//! - **oidc-exchange**: the workflow's OIDC token exchanged for an app token
//!
//! A resolver answers `Ok(None)` when it does not apply. Any `Err` stops the
//! chain.

mod app;
mod oidc;
mod override_token;

use std::fmt;

use anyhow::{Result, bail};
use async_trait::async_trait;

use crate::config::Config;

pub use app::AppInstallationResolver;
pub use oidc::{DEFAULT_AUDIENCE, DEFAULT_EXCHANGE_URL, ExchangeSettings, OidcExchangeResolver};
pub use override_token::OverrideResolver;

#[async_trait]
pub trait TokenResolver: Send + Sync {
    fn name(&self) -> &str;

    async fn resolve(&self) -> Result<Option<String>>;
}

pub struct Resolved {
    pub token: String,
    pub source: String,
}

impl fmt::Debug for Resolved {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resolved")
            .field("token", &"<redacted>")
            .field("source", &self.source)
            .finish()
    }
}

pub struct ResolverChain {
    resolvers: Vec<Box<dyn TokenResolver>>,
}

impl ResolverChain {
    pub fn new(resolvers: Vec<Box<dyn TokenResolver>>) -> Self {
        Self { resolvers }
    }

    pub fn with<R: TokenResolver + 'static>(mut self, resolver: R) -> Self {
        self.resolvers.push(Box::new(resolver));
        self
    }

    /// The standard order: override, Rehearsal App, OIDC exchange.
    pub fn from_config(config: &Config, exchange: ExchangeSettings) -> Result<Self> {
        Ok(Self::new(vec![])
            .with(OverrideResolver::new(config.override_token.clone()))
            .with(AppInstallationResolver::from_config(config))
            .with(OidcExchangeResolver::new(
                config.oidc_request.clone(),
                exchange,
            )?))
    }

    pub async fn resolve(&self) -> Result<Resolved> {
        for resolver in &self.resolvers {
            tracing::debug!(resolver = resolver.name(), "chain: trying");
            match resolver.resolve().await? {
                Some(token) if !token.is_empty() => {
                    tracing::info!(resolver = resolver.name(), "chain: token resolved");
                    return Ok(Resolved {
                        token,
                        source: resolver.name().to_string(),
                    });
                }
                _ => tracing::debug!(resolver = resolver.name(), "chain: declined"),
            }
        }
        bail!("no token source produced a credential")
    }
}
