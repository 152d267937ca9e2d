//! Drone webhook payload model
//!
//! Drone sends its build either at the top level or nested under `repo`,
//! depending on the server version; [`DroneEvent::build`] accepts both.
//! Times are Unix seconds, zero when unset.

use serde::{Deserialize, Serialize};

use crate::error::EventError;
use crate::event::null_as_default;

/// Event type name accepted by the CLI and [`DroneEvent::parse`]
pub const EVENT_TYPE: &str = "drone";

/// Drone webhook payload
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DroneEvent {
    pub event: String,
    pub action: String,
    pub repo: Option<DroneRepo>,
    pub build: Option<DroneBuild>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub system: DroneSystem,
}

impl DroneEvent {
    pub fn parse(payload: &[u8]) -> Result<Self, EventError> {
        serde_json::from_slice(payload).map_err(|source| EventError::Decode {
            event_type: EVENT_TYPE.to_string(),
            source,
        })
    }

    /// The build carried by the event, wherever the server put it
    pub fn build(&self) -> Option<&DroneBuild> {
        self.build
            .as_ref()
            .or_else(|| self.repo.as_ref().and_then(|repo| repo.build.as_ref()))
    }
}

/// Repository a build belongs to
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DroneRepo {
    pub id: i64,
    pub namespace: String,
    pub name: String,
    /// `namespace/name`
    pub slug: String,
    pub scm: String,
    pub git_http_url: String,
    pub git_ssh_url: String,
    pub link: String,
    pub default_branch: String,
    pub build: Option<DroneBuild>,
}

/// One build of a repository
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DroneBuild {
    pub id: i64,
    pub number: i64,
    pub parent: i64,
    pub status: String,
    pub event: String,
    pub action: String,
    pub link: String,
    pub title: String,
    pub message: String,
    pub before: String,
    pub after: String,
    #[serde(rename = "ref")]
    pub git_ref: String,
    pub source: String,
    pub target: String,
    pub started: i64,
    pub finished: i64,
    pub created: i64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub stages: Vec<DroneStage>,
}

impl DroneBuild {
    /// Whether the build has finished; Drone reports `updated` for every
    /// transition, so the finish time is the only reliable signal
    pub fn is_finished(&self) -> bool {
        self.finished != 0
    }

    /// Root span name: the title when set, otherwise the commit message
    pub fn display_name(&self) -> &str {
        if self.title.is_empty() {
            &self.message
        } else {
            &self.title
        }
    }
}

/// A pipeline within a build
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DroneStage {
    pub id: i64,
    pub number: i64,
    pub name: String,
    pub status: String,
    pub started: i64,
    pub stopped: i64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub steps: Vec<DroneStep>,
}

/// One step of a stage
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DroneStep {
    pub id: i64,
    /// Sent as `step_id` by Drone
    #[serde(rename = "step_id", alias = "stage_id")]
    pub stage_id: i64,
    pub number: i64,
    pub name: String,
    pub status: String,
    pub started: i64,
    pub stopped: i64,
}

impl DroneStep {
    pub fn is_skipped(&self) -> bool {
        self.status == "skipped"
    }
}

/// Drone server information
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DroneSystem {
    pub proto: String,
    pub host: String,
    pub link: String,
    pub version: String,
}
