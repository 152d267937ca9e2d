//! Receiver configuration
//!
//! Loaded from YAML; every field has a built-in default so an empty file (or
//! no file at all) yields a usable configuration.
//!
//! ```yaml
//! service_name_prefix: "ci-"
//! counter_cache_capacity: 10000
//! github_api:
//!   base_url: https://api.github.com
//!   token_env: GITHUB_TOKEN
//! drone:
//!   host: https://drone.example.com
//!   repos:
//!     org/service: [main, release]
//! ```

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use tracing::warn;

use crate::error::ConfigError;

/// Minimum download timeout; archive downloads for large runs need time
pub const MIN_DOWNLOAD_TIMEOUT_SECONDS: u64 = 5;

/// Default body cap for one reconstructed log entry (1 MiB)
pub const DEFAULT_MAX_LOG_ENTRY_BYTES: usize = 1024 * 1024;

/// Top-level receiver configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReceiverConfig {
    /// Overrides the derived service name entirely
    #[serde(default)]
    pub custom_service_name: Option<String>,

    /// Prepended to the derived service name
    #[serde(default)]
    pub service_name_prefix: String,

    /// Appended to the derived service name
    #[serde(default)]
    pub service_name_suffix: String,

    /// Maximum number of counter keys kept before LRU eviction
    #[serde(default = "default_counter_cache_capacity")]
    pub counter_cache_capacity: usize,

    /// Body cap for one reconstructed log entry
    #[serde(default = "default_max_log_entry_bytes")]
    pub max_log_entry_bytes: usize,

    /// Timeout for one log archive download
    #[serde(default = "default_download_timeout")]
    pub download_timeout_seconds: u64,

    /// GitHub API access used to resolve log archive URLs
    #[serde(default)]
    pub github_api: GitHubApiConfig,

    /// Drone server access and the repositories whose builds are traced
    #[serde(default)]
    pub drone: DroneConfig,
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        Self {
            custom_service_name: None,
            service_name_prefix: String::new(),
            service_name_suffix: String::new(),
            counter_cache_capacity: default_counter_cache_capacity(),
            max_log_entry_bytes: default_max_log_entry_bytes(),
            download_timeout_seconds: default_download_timeout(),
            github_api: GitHubApiConfig::default(),
            drone: DroneConfig::default(),
        }
    }
}

fn default_counter_cache_capacity() -> usize {
    10_000
}

fn default_max_log_entry_bytes() -> usize {
    DEFAULT_MAX_LOG_ENTRY_BYTES
}

fn default_download_timeout() -> u64 {
    60
}

/// GitHub API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitHubApiConfig {
    /// API root, override for GitHub Enterprise
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Environment variable holding the API token
    #[serde(default = "default_token_env")]
    pub token_env: String,

    /// User agent sent with every API request
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for GitHubApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            token_env: default_token_env(),
            user_agent: default_user_agent(),
        }
    }
}

fn default_base_url() -> String {
    "https://api.github.com".to_string()
}

fn default_token_env() -> String {
    "GITHUB_TOKEN".to_string()
}

fn default_user_agent() -> String {
    "ci-otel".to_string()
}

/// Drone server configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DroneConfig {
    /// Server root, e.g. `https://drone.example.com`; step logs are not
    /// fetched when empty
    #[serde(default)]
    pub host: String,

    /// Environment variable holding the API token
    #[serde(default = "default_drone_token_env")]
    pub token_env: String,

    /// Enabled repositories (`namespace/name`) and the branches traced for each
    #[serde(default)]
    pub repos: BTreeMap<String, Vec<String>>,
}

fn default_drone_token_env() -> String {
    "DRONE_TOKEN".to_string()
}

impl DroneConfig {
    /// Allowed branches for `slug`, or `None` when the repository is not enabled
    pub fn branches(&self, slug: &str) -> Option<&[String]> {
        self.repos.get(slug).map(Vec::as_slice)
    }

    fn problems(&self, problems: &mut Vec<String>) {
        if !self.host.is_empty() && url::Url::parse(&self.host).is_err() {
            problems.push(format!("drone.host is not a valid URL: {}", self.host));
        }
        if self.token_env.is_empty() {
            problems.push("drone.token_env must not be empty".to_string());
        }
        for (repo, branches) in &self.repos {
            if branches.is_empty() {
                problems.push(format!("at least one branch must be defined for repo {repo}"));
            }
            let mut seen = HashSet::new();
            for branch in branches {
                if !seen.insert(branch.as_str()) {
                    problems.push(format!("branch {branch} is duplicated for repo {repo}"));
                }
            }
        }
    }
}

impl ReceiverConfig {
    /// Load and validate configuration from a YAML file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&content).map_err(|err| match err {
            ConfigError::Parse { source, .. } => ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            },
            other => other,
        })
    }

    /// Parse and validate configuration from a YAML string
    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        let config: ReceiverConfig = if content.trim().is_empty() {
            ReceiverConfig::default()
        } else {
            serde_yaml_ng::from_str(content).map_err(|source| ConfigError::Parse {
                path: Default::default(),
                source,
            })?
        };
        config.validate()?;
        Ok(config)
    }

    /// Check every field, reporting all problems at once
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut problems = Vec::new();

        if self.counter_cache_capacity == 0 {
            problems.push("counter_cache_capacity must be greater than zero".to_string());
        }
        if self.max_log_entry_bytes == 0 {
            problems.push("max_log_entry_bytes must be greater than zero".to_string());
        }
        if matches!(self.custom_service_name.as_deref(), Some(name) if name.trim().is_empty()) {
            problems.push("custom_service_name must not be blank when set".to_string());
        }
        if url::Url::parse(&self.github_api.base_url).is_err() {
            problems.push(format!(
                "github_api.base_url is not a valid URL: {}",
                self.github_api.base_url
            ));
        }
        if self.github_api.token_env.is_empty() {
            problems.push("github_api.token_env must not be empty".to_string());
        }
        self.drone.problems(&mut problems);

        if problems.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Invalid(problems))
        }
    }

    /// Download timeout with the minimum applied
    pub fn effective_download_timeout(&self) -> std::time::Duration {
        let seconds = if self.download_timeout_seconds < MIN_DOWNLOAD_TIMEOUT_SECONDS {
            warn!(
                "Configured download_timeout_seconds={} is too low; using minimum of {} seconds",
                self.download_timeout_seconds, MIN_DOWNLOAD_TIMEOUT_SECONDS
            );
            MIN_DOWNLOAD_TIMEOUT_SECONDS
        } else {
            self.download_timeout_seconds
        };
        std::time::Duration::from_secs(seconds)
    }

    /// Service name for a repository's telemetry
    pub fn service_name(&self, repo_full_name: &str) -> String {
        if let Some(custom) = &self.custom_service_name {
            return custom.clone();
        }
        let formatted = repo_full_name.replace(['/', '_'], "-").to_lowercase();
        format!(
            "{}{}{}",
            self.service_name_prefix, formatted, self.service_name_suffix
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_empty_yaml() {
        let config = ReceiverConfig::from_yaml("").unwrap();
        assert_eq!(config.counter_cache_capacity, 10_000);
        assert_eq!(config.max_log_entry_bytes, 1024 * 1024);
        assert_eq!(config.github_api.token_env, "GITHUB_TOKEN");
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let config = ReceiverConfig::from_yaml("service_name_prefix: ci-\n").unwrap();
        assert_eq!(config.service_name_prefix, "ci-");
        assert_eq!(config.github_api.base_url, "https://api.github.com");
    }

    #[test]
    fn test_validation_collects_all_problems() {
        let yaml = "counter_cache_capacity: 0\nmax_log_entry_bytes: 0\n";
        match ReceiverConfig::from_yaml(yaml) {
            Err(ConfigError::Invalid(problems)) => assert_eq!(problems.len(), 2),
            other => panic!("expected validation failure, got {other:?}"),
        }
    }

    #[test]
    fn test_drone_repos_parse() {
        let yaml = "drone:\n  host: https://drone.example.com\n  repos:\n    org/app: [main, release]\n";
        let config = ReceiverConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.drone.token_env, "DRONE_TOKEN");
        assert_eq!(
            config.drone.branches("org/app"),
            Some(&["main".to_string(), "release".to_string()][..])
        );
        assert!(config.drone.branches("org/other").is_none());
    }

    #[test]
    fn test_drone_branch_lists_validated() {
        let yaml = "drone:\n  repos:\n    org/empty: []\n    org/dup: [main, main]\n";
        match ReceiverConfig::from_yaml(yaml) {
            Err(ConfigError::Invalid(problems)) => {
                assert_eq!(
                    problems,
                    vec![
                        "branch main is duplicated for repo org/dup".to_string(),
                        "at least one branch must be defined for repo org/empty".to_string(),
                    ]
                );
            }
            other => panic!("expected validation failure, got {other:?}"),
        }
    }

    #[test]
    fn test_service_name_derivation() {
        let config = ReceiverConfig {
            service_name_prefix: "gh-".into(),
            service_name_suffix: "-ci".into(),
            ..Default::default()
        };
        assert_eq!(config.service_name("Grafana/my_repo"), "gh-grafana-my-repo-ci");
    }

    #[test]
    fn test_custom_service_name_wins() {
        let config = ReceiverConfig {
            custom_service_name: Some("pipeline".into()),
            service_name_prefix: "ignored-".into(),
            ..Default::default()
        };
        assert_eq!(config.service_name("org/repo"), "pipeline");
    }

    #[test]
    fn test_download_timeout_clamped() {
        let config = ReceiverConfig {
            download_timeout_seconds: 1,
            ..Default::default()
        };
        assert_eq!(config.effective_download_timeout().as_secs(), 5);
    }
}
