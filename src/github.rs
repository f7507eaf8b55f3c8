use std::fmt;
use std::str::FromStr;

use anyhow::{Context, Result, bail};
use jsonwebtoken::EncodingKey;
use octocrab::Octocrab;
use octocrab::models::AppId;
use serde::Deserialize;

use crate::config::AppCredentials;

pub const DEFAULT_API_URL: &str = "https://api.github.com";

/// Repository identified by the `owner/name` form used in `GITHUB_REPOSITORY`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoSlug {
    pub owner: String,
    pub name: String,
}

impl fmt::Display for RepoSlug {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

impl FromStr for RepoSlug {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.split_once('/') {
            Some((owner, name)) if !owner.is_empty() && !name.is_empty() && !name.contains('/') => {
                Ok(Self {
                    owner: owner.to_string(),
                    name: name.to_string(),
                })
            }
            _ => bail!("invalid repository (expected owner/name): {}", s),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RepoInstallation {
    id: u64,
}

#[derive(Deserialize)]
struct InstallationAccessToken {
    token: String,
}

/// Build an Octocrab client authenticated as the GitHub App itself (JWT), not
/// yet scoped to any installation.
pub fn app_client(api_url: &str, credentials: &AppCredentials) -> Result<Octocrab> {
    let app_id: u64 = credentials
        .app_id
        .trim()
        .parse()
        .with_context(|| format!("invalid app id: {}", credentials.app_id))?;
    let key = EncodingKey::from_rsa_pem(credentials.private_key.as_bytes())
        .context("failed to parse app private key as RSA PEM")?;
    Octocrab::builder()
        .base_uri(api_url)
        .with_context(|| format!("invalid GitHub API url: {}", api_url))?
        .app(AppId(app_id), key)
        .build()
        .context("failed to build GitHub client")
}

/// Look up the installation id the app has on `repo`.
pub async fn repository_installation(gh: &Octocrab, repo: &RepoSlug) -> Result<u64> {
    let installation: RepoInstallation = gh
        .get(
            format!("/repos/{}/{}/installation", repo.owner, repo.name),
            None::<&()>,
        )
        .await
        .with_context(|| format!("failed to look up app installation for {}", repo))?;
    tracing::debug!(installation_id = installation.id, "github: installation found");
    Ok(installation.id)
}

/// Mint an installation access token for `installation_id`.
pub async fn create_installation_token(gh: &Octocrab, installation_id: u64) -> Result<String> {
    let created: InstallationAccessToken = gh
        .post(
            format!("/app/installations/{}/access_tokens", installation_id),
            None::<&()>,
        )
        .await
        .with_context(|| {
            format!(
                "failed to create access token for installation {}",
                installation_id
            )
        })?;
    if created.token.is_empty() {
        bail!(
            "GitHub returned an empty access token for installation {}",
            installation_id
        );
    }
    Ok(created.token)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{header_exists, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    pub(crate) const TEST_APP_KEY: &str = include_str!("../tests/fixtures/app-key.pem");

    pub(crate) fn test_credentials() -> AppCredentials {
        AppCredentials {
            app_id: "12345".into(),
            private_key: TEST_APP_KEY.into(),
        }
    }

    #[test]
    fn parse_repo_slug() {
        let slug: RepoSlug = "apache/opendal".parse().unwrap();
        assert_eq!(
            slug,
            RepoSlug {
                owner: "apache".into(),
                name: "opendal".into()
            }
        );
    }

    #[test]
    fn repo_slug_display_round_trips() {
        let slug: RepoSlug = "apache/opendal".parse().unwrap();
        assert_eq!(slug.to_string(), "apache/opendal");
    }

    #[test]
    fn reject_malformed_repo_slug() {
        for input in ["", "apache", "/opendal", "apache/", "a/b/c"] {
            assert!(input.parse::<RepoSlug>().is_err(), "accepted {:?}", input);
        }
    }

    #[test]
    fn app_client_rejects_bad_inputs() {
        let bad_id = AppCredentials {
            app_id: "not-a-number".into(),
            private_key: TEST_APP_KEY.into(),
        };
        let err = app_client(DEFAULT_API_URL, &bad_id).unwrap_err();
        assert!(err.to_string().contains("invalid app id"));

        let bad_key = AppCredentials {
            app_id: "1".into(),
            private_key: "not a pem".into(),
        };
        let err = app_client(DEFAULT_API_URL, &bad_key).unwrap_err();
        assert!(err.to_string().contains("RSA PEM"));
    }

    #[tokio::test]
    async fn looks_up_installation_and_mints_token() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/repos/apache/foo/installation"))
            .and(header_exists("authorization"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": 777 })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/app/installations/777/access_tokens"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({
                "token": "ghs_minted",
                "expires_at": "2030-01-01T00:00:00Z"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let gh = app_client(&server.uri(), &test_credentials()).unwrap();
        let repo: RepoSlug = "apache/foo".parse().unwrap();
        let id = repository_installation(&gh, &repo).await.unwrap();
        assert_eq!(id, 777);
        let token = create_installation_token(&gh, id).await.unwrap();
        assert_eq!(token, "ghs_minted");
    }

    #[tokio::test]
    async fn installation_lookup_fails_on_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/repos/apache/foo/installation"))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({
                "message": "Not Found",
                "documentation_url": "https://docs.github.com/rest"
            })))
            .mount(&server)
            .await;

        let gh = app_client(&server.uri(), &test_credentials()).unwrap();
        let repo: RepoSlug = "apache/foo".parse().unwrap();
        let err = repository_installation(&gh, &repo).await.unwrap_err();
        assert!(
            err.to_string()
                .contains("failed to look up app installation for apache/foo")
        );
    }

    #[tokio::test]
    async fn routes_are_joined_under_base_path() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v3/repos/apache/foo/installation"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": 31 })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/v3/app/installations/31/access_tokens"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({ "token": "ghs_ghe" })))
            .expect(1)
            .mount(&server)
            .await;

        let api_url = format!("{}/api/v3", server.uri());
        let gh = app_client(&api_url, &test_credentials()).unwrap();
        let repo: RepoSlug = "apache/foo".parse().unwrap();
        let id = repository_installation(&gh, &repo).await.unwrap();
        assert_eq!(id, 31);
        assert_eq!(create_installation_token(&gh, id).await.unwrap(), "ghs_ghe");
    }
}
