use std::fmt;
use std::path::PathBuf;

use crate::github::DEFAULT_API_URL;

pub const OVERRIDE_TOKEN_VAR: &str = "OVERRIDE_GITHUB_TOKEN";
pub const APP_ID_VAR: &str = "REHEARSAL_APP_ID";
pub const APP_PRIVATE_KEY_VAR: &str = "REHEARSAL_APP_PRIVATE_KEY";
pub const REPOSITORY_VAR: &str = "GITHUB_REPOSITORY";
pub const API_URL_VAR: &str = "GITHUB_API_URL";
pub const OUTPUT_FILE_VAR: &str = "GITHUB_OUTPUT";
pub const OIDC_REQUEST_URL_VAR: &str = "ACTIONS_ID_TOKEN_REQUEST_URL";
pub const OIDC_REQUEST_TOKEN_VAR: &str = "ACTIONS_ID_TOKEN_REQUEST_TOKEN";

/// Everything the resolvers read from the process environment, captured once
/// at startup.
#[derive(Debug, Clone, Default)]
pub struct Config {
    pub override_token: Option<String>,
    pub app: Option<AppCredentials>,
    pub repository: Option<String>,
    pub oidc_request: Option<OidcRequest>,
    pub api_url: String,
    pub output_file: Option<PathBuf>,
}

#[derive(Clone)]
pub struct AppCredentials {
    pub app_id: String,
    pub private_key: String,
}

impl fmt::Debug for AppCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppCredentials")
            .field("app_id", &self.app_id)
            .field("private_key", &"<redacted>")
            .finish()
    }
}

/// Where and how to ask the runner for an OIDC identity token.
#[derive(Clone)]
pub struct OidcRequest {
    pub url: String,
    pub request_token: String,
}

impl fmt::Debug for OidcRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OidcRequest")
            .field("url", &self.url)
            .field("request_token", &"<redacted>")
            .finish()
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from an arbitrary variable source. Empty values are
    /// treated the same as unset ones.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.is_empty());

        let app = match (get(APP_ID_VAR), get(APP_PRIVATE_KEY_VAR)) {
            (Some(app_id), Some(private_key)) => Some(AppCredentials {
                app_id,
                private_key,
            }),
            (Some(_), None) | (None, Some(_)) => {
                tracing::debug!(
                    "config: only one of {} and {} is set, ignoring app credentials",
                    APP_ID_VAR,
                    APP_PRIVATE_KEY_VAR
                );
                None
            }
            (None, None) => None,
        };

        let oidc_request = match (get(OIDC_REQUEST_URL_VAR), get(OIDC_REQUEST_TOKEN_VAR)) {
            (Some(url), Some(request_token)) => Some(OidcRequest { url, request_token }),
            _ => None,
        };

        Self {
            override_token: get(OVERRIDE_TOKEN_VAR),
            app,
            repository: get(REPOSITORY_VAR),
            oidc_request,
            api_url: get(API_URL_VAR).unwrap_or_else(|| DEFAULT_API_URL.to_string()),
            output_file: get(OUTPUT_FILE_VAR).map(PathBuf::from),
        }
    }
}
