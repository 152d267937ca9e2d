//! Spans for finished Drone builds
//!
//! ```text
//! build span      parent: none        scope 0
//!   stage span    parent: build span  one scope per stage
//!     step span   parent: stage span  skipped steps are left out
//! ```

use opentelemetry_proto::tonic::common::v1::{InstrumentationScope, KeyValue};
use opentelemetry_proto::tonic::resource::v1::Resource;
use opentelemetry_proto::tonic::trace::v1::{span, status, ResourceSpans, ScopeSpans, Span, Status};
use tracing::debug;

use super::event::{DroneBuild, DroneEvent, DroneRepo};
use crate::config::ReceiverConfig;
use crate::error::IdError;
use crate::ids;
use crate::telemetry::attributes::{kv_int, kv_string};
use crate::telemetry::Traces;

pub const SCOPE_NAME: &str = "ci-otel.drone";

pub const WORKFLOW_ITEM_KIND: &str = "ci.drone.workflow_item.kind";
pub const BUILD_NUMBER: &str = "ci.drone.build.number";
pub const STAGE_ID: &str = "ci.drone.stage.id";
pub const STAGE_NUMBER: &str = "ci.drone.stage.number";
pub const STAGE_NAME: &str = "ci.drone.stage.name";
pub const STEP_ID: &str = "ci.drone.step.id";
pub const STEP_NUMBER: &str = "ci.drone.step.number";
pub const STEP_NAME: &str = "ci.drone.step.name";
pub const CI_STATUS: &str = "ci.status";

/// Unix seconds to nanoseconds, zero for unset or pre-epoch times
pub fn seconds_to_nanos(seconds: i64) -> u64 {
    u64::try_from(seconds)
        .map(|s| s.saturating_mul(1_000_000_000))
        .unwrap_or(0)
}

/// Span status for a Drone build, stage or step status
pub fn status_from_drone(drone_status: &str) -> Status {
    let code = match drone_status {
        "failure" | "error" => status::StatusCode::Error,
        "success" => status::StatusCode::Ok,
        _ => status::StatusCode::Unset,
    };
    Status {
        message: String::new(),
        code: code as i32,
    }
}

pub fn scope() -> InstrumentationScope {
    InstrumentationScope {
        name: SCOPE_NAME.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        ..Default::default()
    }
}

/// Resource shared by a build's spans and log records
pub fn build_resource(repo: &DroneRepo, branch: &str, config: &ReceiverConfig) -> Resource {
    let service_name = config.custom_service_name.as_deref().unwrap_or("drone");
    Resource {
        attributes: vec![
            kv_string("service.name", service_name),
            kv_string("service.version", env!("CARGO_PKG_VERSION")),
            kv_string("git.repo.name", &repo.slug),
            kv_string("git.branch.name", branch),
        ],
        ..Default::default()
    }
}

fn build_attributes(event: &DroneEvent, repo: &DroneRepo, build: &DroneBuild) -> Vec<KeyValue> {
    let vcs_type = if repo.scm.is_empty() { "git" } else { repo.scm.as_str() };

    let mut attributes = vec![
        kv_string(WORKFLOW_ITEM_KIND, "build"),
        kv_string("ci.drone.workflow.event", &build.event),
        kv_int(BUILD_NUMBER, build.number),
        kv_int("ci.drone.build.id", build.id),
        kv_string("ci.drone.workflow.title", &build.title),
        kv_string("ci.drone.build.message", &build.message),
        kv_string(CI_STATUS, &build.status),
        kv_string("ci.vendor", "drone"),
        kv_string("ci.version", &event.system.version),
        kv_string("vcs.type", vcs_type),
    ];
    if vcs_type == "git" {
        attributes.extend([
            kv_string("git.url.http", &repo.git_http_url),
            kv_string("git.url.ssh", &repo.git_ssh_url),
            kv_string("git.url.www", &repo.link),
        ]);
    }
    attributes.extend([
        kv_string("ci.drone.build.after", &build.after),
        kv_string("ci.drone.build.before", &build.before),
        kv_string("ci.drone.build.link", &build.link),
        kv_string("ci.drone.build.ref", &build.git_ref),
        kv_string("ci.drone.build.source", &build.source),
        kv_string("ci.drone.build.target", &build.target),
        kv_int("ci.drone.build.parent", build.parent),
    ]);
    attributes
}

/// Spans for a finished build; the caller has already checked eligibility
pub fn build_traces(
    event: &DroneEvent,
    repo: &DroneRepo,
    build: &DroneBuild,
    resource: Resource,
) -> Result<Traces, IdError> {
    let trace_id = ids::drone_trace_id(build.id)?;
    let build_span_id = ids::drone_build_span_id(build.id)?;

    let mut scope_spans = Vec::with_capacity(build.stages.len() + 1);
    scope_spans.push(ScopeSpans {
        scope: Some(scope()),
        spans: vec![Span {
            trace_id: trace_id.to_vec(),
            span_id: build_span_id.to_vec(),
            name: build.display_name().to_string(),
            kind: span::SpanKind::Server as i32,
            start_time_unix_nano: seconds_to_nanos(build.created),
            end_time_unix_nano: seconds_to_nanos(build.finished),
            attributes: build_attributes(event, repo, build),
            status: Some(status_from_drone(&build.status)),
            ..Default::default()
        }],
        ..Default::default()
    });

    for stage in &build.stages {
        let stage_span_id = ids::drone_stage_span_id(build.id, stage.number)?;
        let mut spans = Vec::with_capacity(stage.steps.len() + 1);
        spans.push(Span {
            trace_id: trace_id.to_vec(),
            span_id: stage_span_id.to_vec(),
            parent_span_id: build_span_id.to_vec(),
            name: stage.name.clone(),
            kind: span::SpanKind::Internal as i32,
            start_time_unix_nano: seconds_to_nanos(stage.started),
            end_time_unix_nano: seconds_to_nanos(stage.stopped),
            attributes: vec![
                kv_string(WORKFLOW_ITEM_KIND, "stage"),
                kv_string("service.name", &stage.name),
                kv_int(STAGE_NUMBER, stage.number),
                kv_int(STAGE_ID, stage.id),
                kv_string(STAGE_NAME, &stage.name),
                kv_string(CI_STATUS, &stage.status),
            ],
            status: Some(status_from_drone(&stage.status)),
            ..Default::default()
        });

        for step in stage.steps.iter().filter(|step| !step.is_skipped()) {
            spans.push(Span {
                trace_id: trace_id.to_vec(),
                span_id: ids::drone_step_span_id(build.id, stage.number, step.number)?.to_vec(),
                parent_span_id: stage_span_id.to_vec(),
                name: step.name.clone(),
                kind: span::SpanKind::Internal as i32,
                start_time_unix_nano: seconds_to_nanos(step.started),
                end_time_unix_nano: seconds_to_nanos(step.stopped),
                attributes: vec![
                    kv_string(WORKFLOW_ITEM_KIND, "step"),
                    kv_string(STAGE_NAME, &stage.name),
                    kv_int(STAGE_ID, step.stage_id),
                    kv_string(STEP_NAME, &step.name),
                    kv_int(STEP_ID, step.id),
                    kv_int(STEP_NUMBER, step.number),
                    kv_string(CI_STATUS, &step.status),
                ],
                status: Some(status_from_drone(&step.status)),
                ..Default::default()
            });
        }

        scope_spans.push(ScopeSpans {
            scope: Some(scope()),
            spans,
            ..Default::default()
        });
    }

    debug!(build_id = build.id, build_number = build.number, %trace_id, "Built Drone build spans");
    Ok(Traces {
        resource_spans: vec![ResourceSpans {
            resource: Some(resource),
            scope_spans,
            ..Default::default()
        }],
    })
}
