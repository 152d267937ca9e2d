//! Resolution of run attempts to their log archive download URL
//!
//! The REST endpoint answers with a `302` whose `Location` is a short-lived
//! signed URL. Redirects are not followed so that the URL can be handed to
//! the fetcher as-is.

use async_trait::async_trait;
use reqwest::header::{ACCEPT, AUTHORIZATION, LOCATION};
use reqwest::redirect::Policy;
use tracing::debug;
use url::Url;

use crate::config::GitHubApiConfig;
use crate::error::ResolveError;

/// Resolves `(owner, repo, run, attempt)` to a downloadable archive URL
#[async_trait]
pub trait LogUrlResolver: Send + Sync {
    async fn resolve(
        &self,
        owner: &str,
        repo: &str,
        run_id: i64,
        run_attempt: i64,
    ) -> Result<Url, ResolveError>;
}

/// Resolver backed by the GitHub REST API
pub struct GitHubLogUrlResolver {
    client: reqwest::Client,
    base_url: String,
    token: String,
}

impl GitHubLogUrlResolver {
    /// Build a resolver reading its token from the configured environment variable
    pub fn from_env(config: &GitHubApiConfig) -> Result<Self, ResolveError> {
        let token = std::env::var(&config.token_env)
            .ok()
            .filter(|t| !t.is_empty())
            .ok_or_else(|| ResolveError::MissingToken {
                env: config.token_env.clone(),
            })?;
        Self::with_token(config, token)
    }

    pub fn with_token(config: &GitHubApiConfig, token: impl Into<String>) -> Result<Self, ResolveError> {
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .redirect(Policy::none())
            .build()
            .map_err(ResolveError::Client)?;
        Ok(Self::with_client(client, &config.base_url, token))
    }

    /// Wrap an existing client; it must not follow redirects
    pub fn with_client(client: reqwest::Client, base_url: &str, token: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.into(),
        }
    }

    fn logs_endpoint(&self, owner: &str, repo: &str, run_id: i64, run_attempt: i64) -> Result<Url, ResolveError> {
        let run_id = run_id.to_string();
        let run_attempt = run_attempt.to_string();

        let mut url = Url::parse(&self.base_url)?;
        url.path_segments_mut()
            .map_err(|_| url::ParseError::RelativeUrlWithCannotBeABaseBase)?
            .pop_if_empty()
            .extend([
                "repos",
                owner,
                repo,
                "actions",
                "runs",
                run_id.as_str(),
                "attempts",
                run_attempt.as_str(),
                "logs",
            ]);
        Ok(url)
    }
}

#[async_trait]
impl LogUrlResolver for GitHubLogUrlResolver {
    async fn resolve(
        &self,
        owner: &str,
        repo: &str,
        run_id: i64,
        run_attempt: i64,
    ) -> Result<Url, ResolveError> {
        let endpoint = self.logs_endpoint(owner, repo, run_id, run_attempt)?;
        debug!(run_id, run_attempt, "Requesting log archive location from {}", endpoint);

        let response = self
            .client
            .get(endpoint.clone())
            .header(AUTHORIZATION, format!("Bearer {}", self.token))
            .header(ACCEPT, "application/vnd.github+json")
            .header("X-GitHub-Api-Version", "2022-11-28")
            .send()
            .await?;

        let status = response.status();
        if !status.is_redirection() && !status.is_success() {
            return Err(ResolveError::Status {
                status,
                url: endpoint.to_string(),
            });
        }

        let location = response
            .headers()
            .get(LOCATION)
            .and_then(|value| value.to_str().ok())
            .ok_or_else(|| ResolveError::MissingLocation {
                url: endpoint.to_string(),
            })?;

        Ok(endpoint.join(location)?)
    }
}
