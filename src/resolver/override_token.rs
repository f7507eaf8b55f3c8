use anyhow::Result;
use async_trait::async_trait;

use super::TokenResolver;

/// Hands back an operator-supplied token untouched.
pub struct OverrideResolver {
    token: Option<String>,
}

impl OverrideResolver {
    pub fn new(token: Option<String>) -> Self {
        Self { token }
    }
}

#[async_trait]
impl TokenResolver for OverrideResolver {
    fn name(&self) -> &str {
        "override"
    }

    async fn resolve(&self) -> Result<Option<String>> {
        Ok(self.token.clone().filter(|t| !t.is_empty()))
    }
}
