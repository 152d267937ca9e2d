//! Step log retrieval from the Drone API

use async_trait::async_trait;
use reqwest::header::{ACCEPT, AUTHORIZATION};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;
use url::Url;

use crate::config::DroneConfig;
use crate::error::DroneError;

/// One line of step output
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogLine {
    #[serde(rename = "pos", default)]
    pub number: i64,

    #[serde(rename = "out", default)]
    pub message: String,

    /// Seconds since the step started
    #[serde(rename = "time", default)]
    pub timestamp: i64,
}

/// Fetches the output of one step
#[async_trait]
pub trait DroneLogClient: Send + Sync {
    async fn step_logs(
        &self,
        namespace: &str,
        name: &str,
        build_number: i64,
        stage_number: i64,
        step_number: i64,
    ) -> Result<Vec<LogLine>, DroneError>;
}

/// Client for `GET /api/repos/{namespace}/{name}/builds/{n}/logs/{stage}/{step}`
pub struct DroneApiClient {
    client: reqwest::Client,
    host: String,
    token: String,
}

impl DroneApiClient {
    /// Build a client for the configured host, reading its token from the environment
    pub fn from_env(config: &DroneConfig, timeout: Duration) -> Result<Self, DroneError> {
        if config.host.is_empty() {
            return Err(DroneError::MissingHost);
        }
        let token = std::env::var(&config.token_env)
            .ok()
            .filter(|t| !t.is_empty())
            .ok_or_else(|| DroneError::MissingToken {
                env: config.token_env.clone(),
            })?;
        let client = reqwest::Client::builder()
            .user_agent(concat!("ci-otel/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()
            .map_err(DroneError::Client)?;
        Ok(Self::with_client(client, &config.host, token))
    }

    pub fn with_client(client: reqwest::Client, host: &str, token: impl Into<String>) -> Self {
        Self {
            client,
            host: host.trim_end_matches('/').to_string(),
            token: token.into(),
        }
    }

    fn logs_endpoint(
        &self,
        namespace: &str,
        name: &str,
        build_number: i64,
        stage_number: i64,
        step_number: i64,
    ) -> Result<Url, DroneError> {
        let build_number = build_number.to_string();
        let stage_number = stage_number.to_string();
        let step_number = step_number.to_string();

        let mut url = Url::parse(&self.host)?;
        url.path_segments_mut()
            .map_err(|_| url::ParseError::RelativeUrlWithCannotBeABaseBase)?
            .pop_if_empty()
            .extend([
                "api",
                "repos",
                namespace,
                name,
                "builds",
                build_number.as_str(),
                "logs",
                stage_number.as_str(),
                step_number.as_str(),
            ]);
        Ok(url)
    }
}

#[async_trait]
impl DroneLogClient for DroneApiClient {
    async fn step_logs(
        &self,
        namespace: &str,
        name: &str,
        build_number: i64,
        stage_number: i64,
        step_number: i64,
    ) -> Result<Vec<LogLine>, DroneError> {
        let endpoint = self.logs_endpoint(namespace, name, build_number, stage_number, step_number)?;
        debug!(build_number, stage_number, step_number, "Requesting step logs from {}", endpoint);

        let response = self
            .client
            .get(endpoint.clone())
            .header(AUTHORIZATION, format!("Bearer {}", self.token))
            .header(ACCEPT, "application/json")
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(DroneError::Status {
                status,
                url: endpoint.to_string(),
            });
        }

        let body = response.bytes().await?;
        // A step that never produced output is served as `null`
        let lines: Option<Vec<LogLine>> =
            serde_json::from_slice(&body).map_err(|source| DroneError::Decode {
                url: endpoint.to_string(),
                source,
            })?;
        Ok(lines.unwrap_or_default())
    }
}
