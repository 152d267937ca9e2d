//! GitHub Actions webhook event model
//!
//! Only the two event kinds the receiver handles are modeled. Dispatch happens
//! once, at the boundary, via [`WebhookEvent::parse`]; everything downstream
//! takes the concrete payload type.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::EventError;

/// Webhook event kinds handled by the receiver
#[derive(Debug, Clone)]
pub enum WebhookEvent {
    /// `X-GitHub-Event: workflow_run`
    WorkflowRun(WorkflowRunEvent),
    /// `X-GitHub-Event: workflow_job`
    WorkflowJob(WorkflowJobEvent),
}

impl WebhookEvent {
    /// Decode a payload by its `X-GitHub-Event` type.
    ///
    /// Returns `Ok(None)` for event types the receiver does not handle.
    pub fn parse(event_type: &str, payload: &[u8]) -> Result<Option<Self>, EventError> {
        let decode_err = |source| EventError::Decode {
            event_type: event_type.to_string(),
            source,
        };
        match event_type {
            "workflow_run" => serde_json::from_slice(payload)
                .map(|e| Some(WebhookEvent::WorkflowRun(e)))
                .map_err(decode_err),
            "workflow_job" => serde_json::from_slice(payload)
                .map(|e| Some(WebhookEvent::WorkflowJob(e)))
                .map_err(decode_err),
            _ => Ok(None),
        }
    }

    /// Event type name as sent in `X-GitHub-Event`
    pub fn kind(&self) -> &'static str {
        match self {
            WebhookEvent::WorkflowRun(_) => "workflow_run",
            WebhookEvent::WorkflowJob(_) => "workflow_job",
        }
    }

    /// Status of the run or job carried by the event
    pub fn status(&self) -> &str {
        match self {
            WebhookEvent::WorkflowRun(e) => &e.workflow_run.status,
            WebhookEvent::WorkflowJob(e) => &e.workflow_job.status,
        }
    }

    /// Whether the run or job has finished
    pub fn is_completed(&self) -> bool {
        self.status() == "completed"
    }

    pub fn repository(&self) -> &Repository {
        match self {
            WebhookEvent::WorkflowRun(e) => &e.repository,
            WebhookEvent::WorkflowJob(e) => &e.repository,
        }
    }
}

/// Account reference (owner, actor, sender)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Account {
    #[serde(default, deserialize_with = "null_as_default")]
    pub login: String,
}

/// Repository the run belongs to
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Repository {
    #[serde(default, deserialize_with = "null_as_default")]
    pub name: String,

    /// `owner/name`
    #[serde(default, deserialize_with = "null_as_default")]
    pub full_name: String,

    #[serde(default, deserialize_with = "null_as_default")]
    pub owner: Account,

    #[serde(default)]
    pub default_branch: Option<String>,
}

/// Workflow definition reference
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Workflow {
    #[serde(default, deserialize_with = "null_as_default")]
    pub path: String,
}

/// `workflow_run` webhook payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowRunEvent {
    #[serde(default, deserialize_with = "null_as_default")]
    pub action: String,

    pub workflow_run: WorkflowRun,

    #[serde(default)]
    pub workflow: Option<Workflow>,

    #[serde(default, deserialize_with = "null_as_default")]
    pub repository: Repository,

    #[serde(default)]
    pub sender: Option<Account>,
}

/// One execution of a workflow
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowRun {
    pub id: i64,

    #[serde(default, deserialize_with = "null_as_default")]
    pub name: String,

    #[serde(default = "default_attempt", deserialize_with = "null_as_attempt")]
    pub run_attempt: i64,

    #[serde(default, deserialize_with = "null_as_default")]
    pub head_branch: String,

    #[serde(default, deserialize_with = "null_as_default")]
    pub head_sha: String,

    #[serde(default, deserialize_with = "null_as_default")]
    pub status: String,

    #[serde(default)]
    pub conclusion: Option<String>,

    #[serde(default, deserialize_with = "null_as_default")]
    pub event: String,

    #[serde(default, deserialize_with = "null_as_default")]
    pub display_title: String,

    #[serde(default, deserialize_with = "null_as_default")]
    pub path: String,

    #[serde(default, deserialize_with = "null_as_default")]
    pub html_url: String,

    #[serde(default)]
    pub actor: Option<Account>,

    #[serde(default)]
    pub triggering_actor: Option<Account>,

    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub run_started_at: Option<DateTime<Utc>>,
}

fn default_attempt() -> i64 {
    1
}

/// Read an explicit `null` the same way as a missing field
pub(crate) fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

fn null_as_attempt<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<i64>::deserialize(deserializer)?.unwrap_or_else(default_attempt))
}

/// `workflow_job` webhook payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowJobEvent {
    #[serde(default, deserialize_with = "null_as_default")]
    pub action: String,

    pub workflow_job: WorkflowJob,

    #[serde(default, deserialize_with = "null_as_default")]
    pub repository: Repository,

    #[serde(default)]
    pub sender: Option<Account>,
}

/// One job of a workflow run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowJob {
    pub id: i64,

    pub run_id: i64,

    #[serde(default = "default_attempt", deserialize_with = "null_as_attempt")]
    pub run_attempt: i64,

    #[serde(default, deserialize_with = "null_as_default")]
    pub name: String,

    #[serde(default, deserialize_with = "null_as_default")]
    pub workflow_name: String,

    #[serde(default, deserialize_with = "null_as_default")]
    pub head_branch: String,

    #[serde(default, deserialize_with = "null_as_default")]
    pub head_sha: String,

    #[serde(default, deserialize_with = "null_as_default")]
    pub status: String,

    #[serde(default)]
    pub conclusion: Option<String>,

    #[serde(default, deserialize_with = "null_as_default")]
    pub labels: Vec<String>,

    #[serde(default)]
    pub runner_name: Option<String>,

    #[serde(default)]
    pub runner_group_name: Option<String>,

    #[serde(default, deserialize_with = "null_as_default")]
    pub html_url: String,

    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,

    #[serde(default, deserialize_with = "null_as_default")]
    pub steps: Vec<Step>,
}

impl WorkflowJob {
    /// Labels lower-cased, sorted and comma-joined, or `"no labels"`
    pub fn label_set(&self) -> String {
        canonical_labels(&self.labels)
    }
}

/// One step of a job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    #[serde(default, deserialize_with = "null_as_default")]
    pub name: String,

    pub number: i64,

    #[serde(default, deserialize_with = "null_as_default")]
    pub status: String,

    #[serde(default)]
    pub conclusion: Option<String>,

    /// Kept raw so one malformed step cannot fail the whole payload
    #[serde(default)]
    pub started_at: Option<String>,

    #[serde(default)]
    pub completed_at: Option<String>,
}

impl Step {
    pub fn start_time(&self) -> Option<DateTime<Utc>> {
        parse_time(self.started_at.as_deref())
    }

    pub fn end_time(&self) -> Option<DateTime<Utc>> {
        parse_time(self.completed_at.as_deref())
    }
}

fn parse_time(value: Option<&str>) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value?)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

/// Canonical label-set string used as a metric and resource dimension
pub fn canonical_labels(labels: &[String]) -> String {
    if labels.is_empty() {
        return "no labels".to_string();
    }
    let mut lowered: Vec<String> = labels.iter().map(|l| l.to_lowercase()).collect();
    lowered.sort();
    lowered.join(",")
}
