//! Attribute helpers and resource attribute sets for GitHub Actions events

use chrono::{DateTime, SecondsFormat, Utc};
use opentelemetry_proto::tonic::common::v1::{any_value, AnyValue, InstrumentationScope, KeyValue};
use opentelemetry_proto::tonic::resource::v1::Resource;

use super::INSTRUMENTATION_SCOPE_NAME;
use crate::config::ReceiverConfig;
use crate::event::{WorkflowJobEvent, WorkflowRunEvent};

pub const JOB_NAME: &str = "ci.github.workflow.job.name";
pub const STEP_NAME: &str = "ci.github.workflow.job.step.name";
pub const STEP_NUMBER: &str = "ci.github.workflow.job.step.number";
pub const STEP_STATUS: &str = "ci.github.workflow.job.step.status";
pub const STEP_CONCLUSION: &str = "ci.github.workflow.job.step.conclusion";

pub fn kv_string(key: &str, value: &str) -> KeyValue {
    KeyValue {
        key: key.to_string(),
        value: Some(AnyValue {
            value: Some(any_value::Value::StringValue(value.to_string())),
        }),
    }
}

pub fn kv_bool(key: &str, value: bool) -> KeyValue {
    KeyValue {
        key: key.to_string(),
        value: Some(AnyValue {
            value: Some(any_value::Value::BoolValue(value)),
        }),
    }
}

pub fn kv_int(key: &str, value: i64) -> KeyValue {
    KeyValue {
        key: key.to_string(),
        value: Some(AnyValue {
            value: Some(any_value::Value::IntValue(value)),
        }),
    }
}

/// String body value
pub fn string_value(value: String) -> AnyValue {
    AnyValue {
        value: Some(any_value::Value::StringValue(value)),
    }
}

/// Look up an attribute by key
pub fn find<'a>(attrs: &'a [KeyValue], key: &str) -> Option<&'a any_value::Value> {
    attrs
        .iter()
        .find(|kv| kv.key == key)
        .and_then(|kv| kv.value.as_ref())
        .and_then(|v| v.value.as_ref())
}

/// Look up a string attribute by key
pub fn find_str<'a>(attrs: &'a [KeyValue], key: &str) -> Option<&'a str> {
    match find(attrs, key) {
        Some(any_value::Value::StringValue(s)) => Some(s.as_str()),
        _ => None,
    }
}

/// Look up an integer attribute by key
pub fn find_int(attrs: &[KeyValue], key: &str) -> Option<i64> {
    match find(attrs, key) {
        Some(any_value::Value::IntValue(i)) => Some(*i),
        _ => None,
    }
}

/// The scope every batch is written under, optionally with extra attributes
pub fn scope(attributes: Vec<KeyValue>) -> InstrumentationScope {
    InstrumentationScope {
        name: INSTRUMENTATION_SCOPE_NAME.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        attributes,
        ..Default::default()
    }
}

fn rfc3339(time: Option<DateTime<Utc>>) -> String {
    time.map(|t| t.to_rfc3339_opts(SecondsFormat::Secs, true))
        .unwrap_or_default()
}

/// Resource for telemetry derived from a `workflow_run` event
pub fn workflow_run_resource(event: &WorkflowRunEvent, config: &ReceiverConfig) -> Resource {
    let run = &event.workflow_run;
    let repo = &event.repository;

    let mut attributes = vec![
        kv_string("service.name", &config.service_name(&repo.full_name)),
        kv_string("ci.system", "github"),
        kv_int("ci.github.workflow.run.id", run.id),
        kv_int("ci.github.workflow.run.run_attempt", run.run_attempt),
        kv_string("ci.github.workflow.run.name", &run.name),
        kv_string("ci.github.workflow.run.status", &run.status),
        kv_string(
            "ci.github.workflow.run.conclusion",
            run.conclusion.as_deref().unwrap_or_default(),
        ),
        kv_string("ci.github.workflow.run.event", &run.event),
        kv_string("ci.github.workflow.run.display_title", &run.display_title),
        kv_string("ci.github.workflow.run.head_branch", &run.head_branch),
        kv_string("ci.github.workflow.run.head_sha", &run.head_sha),
        kv_string("ci.github.workflow.run.html_url", &run.html_url),
        kv_string("ci.github.workflow.run.created_at", &rfc3339(run.created_at)),
        kv_string(
            "ci.github.workflow.run.run_started_at",
            &rfc3339(run.run_started_at),
        ),
        kv_string("ci.github.workflow.run.updated_at", &rfc3339(run.updated_at)),
        kv_string("scm.system", "git"),
        kv_string("scm.git.repo", &repo.full_name),
        kv_string("scm.git.head_branch", &run.head_branch),
        kv_string("scm.git.head_sha", &run.head_sha),
    ];

    let path = event
        .workflow
        .as_ref()
        .map(|w| w.path.as_str())
        .unwrap_or(run.path.as_str());
    attributes.push(kv_string("ci.github.workflow.run.path", path));

    if let Some(actor) = &run.actor {
        attributes.push(kv_string("ci.github.workflow.run.actor.login", &actor.login));
    }
    if let Some(actor) = &run.triggering_actor {
        attributes.push(kv_string(
            "ci.github.workflow.run.triggering_actor.login",
            &actor.login,
        ));
    }
    if let Some(sender) = &event.sender {
        attributes.push(kv_string("ci.github.workflow.run.sender.login", &sender.login));
    }

    Resource {
        attributes,
        ..Default::default()
    }
}

/// Resource for telemetry derived from a `workflow_job` event
pub fn workflow_job_resource(event: &WorkflowJobEvent, config: &ReceiverConfig) -> Resource {
    let job = &event.workflow_job;
    let repo = &event.repository;

    let mut attributes = vec![
        kv_string("service.name", &config.service_name(&repo.full_name)),
        kv_string("ci.system", "github"),
        kv_string("ci.github.workflow.name", &job.workflow_name),
        kv_int("ci.github.workflow.job.id", job.id),
        kv_int("ci.github.workflow.job.run_id", job.run_id),
        kv_int("ci.github.workflow.job.run_attempt", job.run_attempt),
        kv_string(JOB_NAME, &job.name),
        kv_string("ci.github.workflow.job.status", &job.status),
        kv_string(
            "ci.github.workflow.job.conclusion",
            job.conclusion.as_deref().unwrap_or_default(),
        ),
        kv_string("ci.github.workflow.job.labels", &job.label_set()),
        kv_string("ci.github.workflow.job.head_branch", &job.head_branch),
        kv_string("ci.github.workflow.job.head_sha", &job.head_sha),
        kv_string("ci.github.workflow.job.html_url", &job.html_url),
        kv_string("ci.github.workflow.job.created_at", &rfc3339(job.created_at)),
        kv_string("ci.github.workflow.job.started_at", &rfc3339(job.started_at)),
        kv_string(
            "ci.github.workflow.job.completed_at",
            &rfc3339(job.completed_at),
        ),
        kv_string(
            "ci.github.workflow.job.runner.name",
            job.runner_name.as_deref().unwrap_or_default(),
        ),
        kv_string(
            "ci.github.workflow.job.runner.group_name",
            job.runner_group_name.as_deref().unwrap_or_default(),
        ),
        kv_string("scm.git.repo.owner.login", &repo.owner.login),
        kv_string("scm.git.repo", &repo.full_name),
    ];

    if let Some(sender) = &event.sender {
        attributes.push(kv_string("ci.github.workflow.job.sender.login", &sender.login));
    }

    Resource {
        attributes,
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_helpers() {
        let attrs = vec![kv_string("a", "x"), kv_int("b", 7), kv_bool("c", true)];
        assert_eq!(find_str(&attrs, "a"), Some("x"));
        assert_eq!(find_int(&attrs, "b"), Some(7));
        assert_eq!(find_str(&attrs, "b"), None);
        assert!(find(&attrs, "missing").is_none());
    }

    #[test]
    fn test_scope_carries_attributes() {
        let scope = scope(vec![kv_string(JOB_NAME, "build")]);
        assert_eq!(scope.name, INSTRUMENTATION_SCOPE_NAME);
        assert_eq!(find_str(&scope.attributes, JOB_NAME), Some("build"));
    }
}
