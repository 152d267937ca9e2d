//! Span construction for completed runs and jobs
//!
//! Every identifier comes from [`crate::ids`], so spans built from separate
//! deliveries join up without coordination:
//!
//! ```text
//! run span      parent: none
//!   job span    parent: run span
//!     step span parent: job span
//! ```

use chrono::{DateTime, Utc};
use opentelemetry_proto::tonic::common::v1::KeyValue;
use opentelemetry_proto::tonic::trace::v1::{span, status, ResourceSpans, ScopeSpans, Span, Status};
use tracing::{debug, warn};

use crate::config::ReceiverConfig;
use crate::error::IdError;
use crate::event::{WorkflowJobEvent, WorkflowRunEvent};
use crate::ids;
use crate::telemetry::attributes::{
    self, kv_int, kv_string, STEP_CONCLUSION, STEP_NAME, STEP_NUMBER, STEP_STATUS,
};
use crate::telemetry::{unix_nanos, Traces};

/// Span status for a run, job or step conclusion
pub fn status_from_conclusion(conclusion: Option<&str>) -> Status {
    let code = match conclusion {
        Some("success") => status::StatusCode::Ok,
        Some("failure") | Some("timed_out") => status::StatusCode::Error,
        _ => status::StatusCode::Unset,
    };
    Status {
        message: conclusion.unwrap_or_default().to_string(),
        code: code as i32,
    }
}

fn nanos(time: Option<DateTime<Utc>>) -> u64 {
    time.map(unix_nanos).unwrap_or(0)
}

/// The run's root span
pub fn workflow_run_traces(event: &WorkflowRunEvent, config: &ReceiverConfig) -> Result<Traces, IdError> {
    let run = &event.workflow_run;
    let trace_id = ids::derive_trace_id(run.id, run.run_attempt)?;
    let span_id = ids::run_span_id(run.id, run.run_attempt)?;

    let start = run.run_started_at.or(run.created_at);
    if start.is_none() || run.updated_at.is_none() {
        warn!(run_id = run.id, "Workflow run is missing start or end time");
    }

    let root = Span {
        trace_id: trace_id.to_vec(),
        span_id: span_id.to_vec(),
        name: run.name.clone(),
        kind: span::SpanKind::Server as i32,
        start_time_unix_nano: nanos(start),
        end_time_unix_nano: nanos(run.updated_at),
        status: Some(status_from_conclusion(run.conclusion.as_deref())),
        ..Default::default()
    };

    debug!(run_id = run.id, run_attempt = run.run_attempt, %trace_id, "Built workflow run span");
    Ok(batch(attributes::workflow_run_resource(event, config), vec![root]))
}

/// The job span plus one span per step with usable timestamps
pub fn workflow_job_traces(event: &WorkflowJobEvent, config: &ReceiverConfig) -> Result<Traces, IdError> {
    let job = &event.workflow_job;
    let trace_id = ids::derive_trace_id(job.run_id, job.run_attempt)?;
    let run_span_id = ids::run_span_id(job.run_id, job.run_attempt)?;
    let job_span_id = ids::job_span_id(job.run_id, job.run_attempt, &job.name)?;

    let mut spans = Vec::with_capacity(job.steps.len() + 1);
    spans.push(Span {
        trace_id: trace_id.to_vec(),
        span_id: job_span_id.to_vec(),
        parent_span_id: run_span_id.to_vec(),
        name: job.name.clone(),
        kind: span::SpanKind::Internal as i32,
        start_time_unix_nano: nanos(job.started_at),
        end_time_unix_nano: nanos(job.completed_at),
        status: Some(status_from_conclusion(job.conclusion.as_deref())),
        ..Default::default()
    });

    for step in &job.steps {
        let (Some(start), Some(end)) = (step.start_time(), step.end_time()) else {
            warn!(
                job_name = %job.name,
                step_number = step.number,
                started_at = ?step.started_at,
                completed_at = ?step.completed_at,
                "Skipping step span with missing or unparsable timestamps"
            );
            continue;
        };

        let step_span_id = ids::step_span_id(job.run_id, job.run_attempt, &job.name, step.number)?;
        let attributes: Vec<KeyValue> = vec![
            kv_string(STEP_NAME, &step.name),
            kv_int(STEP_NUMBER, step.number),
            kv_string(STEP_STATUS, &step.status),
            kv_string(STEP_CONCLUSION, step.conclusion.as_deref().unwrap_or_default()),
        ];

        spans.push(Span {
            trace_id: trace_id.to_vec(),
            span_id: step_span_id.to_vec(),
            parent_span_id: job_span_id.to_vec(),
            name: step.name.clone(),
            kind: span::SpanKind::Internal as i32,
            start_time_unix_nano: unix_nanos(start),
            end_time_unix_nano: unix_nanos(end),
            attributes,
            status: Some(status_from_conclusion(step.conclusion.as_deref())),
            ..Default::default()
        });
    }

    debug!(
        run_id = job.run_id,
        job_name = %job.name,
        spans = spans.len(),
        "Built workflow job spans"
    );
    Ok(batch(attributes::workflow_job_resource(event, config), spans))
}

fn batch(resource: opentelemetry_proto::tonic::resource::v1::Resource, spans: Vec<Span>) -> Traces {
    Traces {
        resource_spans: vec![ResourceSpans {
            resource: Some(resource),
            scope_spans: vec![ScopeSpans {
                scope: Some(attributes::scope(Vec::new())),
                spans,
                ..Default::default()
            }],
            ..Default::default()
        }],
    }
}
