//! Deterministic trace and span identifiers
//!
//! Webhook deliveries are at-least-once and carry no idempotency key, so every
//! identifier is a SHA-256 digest of the business identity of the thing it
//! names. Retried or out-of-order deliveries of the same run attempt land in
//! the same trace without any local state.
//!
//! The canonical input joins decimal fields with `:` and a one-letter kind
//! tag, so `(1, 23)` and `(12, 3)` never share an input string. Drone
//! builds use a `drone:` prefix, which no GitHub input (always starting with
//! a number) can produce.

use sha2::{Digest, Sha256};
use std::fmt;

use crate::error::IdError;

/// 16-byte trace identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TraceId(pub [u8; 16]);

/// 8-byte span identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SpanId(pub [u8; 8]);

impl TraceId {
    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    pub fn to_vec(self) -> Vec<u8> {
        self.0.to_vec()
    }
}

impl SpanId {
    pub fn as_bytes(&self) -> &[u8; 8] {
        &self.0
    }

    pub fn to_vec(self) -> Vec<u8> {
        self.0.to_vec()
    }
}

impl fmt::Display for TraceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Display for SpanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

fn digest(input: &str) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    hasher.finalize().into()
}

fn trace_id_from(input: String) -> Result<TraceId, IdError> {
    let hash = digest(&input);
    let mut id = [0u8; 16];
    id.copy_from_slice(&hash[..16]);
    if id == [0u8; 16] {
        return Err(IdError::ZeroId { input });
    }
    Ok(TraceId(id))
}

fn span_id_from(input: String) -> Result<SpanId, IdError> {
    let hash = digest(&input);
    let mut id = [0u8; 8];
    id.copy_from_slice(&hash[..8]);
    if id == [0u8; 8] {
        return Err(IdError::ZeroId { input });
    }
    Ok(SpanId(id))
}

/// Derive the trace ID shared by every span and log record of one run attempt.
pub fn derive_trace_id(run_id: i64, attempt: i64) -> Result<TraceId, IdError> {
    trace_id_from(format!("{run_id}:{attempt}:t"))
}

/// Derive a span ID for a run, a job within it, or a step within that job.
///
/// - no job, no step: the run's root span
/// - job only: the job span
/// - job and step: the step span, scoped by job so that step 1 of two
///   different jobs never collide
pub fn derive_span_id(
    run_id: i64,
    attempt: i64,
    job_name: Option<&str>,
    step_number: Option<i64>,
) -> Result<SpanId, IdError> {
    let input = match (job_name, step_number) {
        (Some(""), _) => return Err(IdError::EmptyJobName),
        (None, Some(step)) => return Err(IdError::StepWithoutJob { step }),
        (None, None) => format!("{run_id}:{attempt}:r"),
        (Some(job), None) => format!("{run_id}:{attempt}:j:{job}"),
        (Some(job), Some(step)) => format!("{run_id}:{attempt}:s:{job}:{step}"),
    };
    span_id_from(input)
}

/// Span ID of the run's root span.
pub fn run_span_id(run_id: i64, attempt: i64) -> Result<SpanId, IdError> {
    derive_span_id(run_id, attempt, None, None)
}

/// Span ID of a job span.
pub fn job_span_id(run_id: i64, attempt: i64, job_name: &str) -> Result<SpanId, IdError> {
    derive_span_id(run_id, attempt, Some(job_name), None)
}

/// Span ID of a step span.
pub fn step_span_id(
    run_id: i64,
    attempt: i64,
    job_name: &str,
    step_number: i64,
) -> Result<SpanId, IdError> {
    derive_span_id(run_id, attempt, Some(job_name), Some(step_number))
}

/// Trace ID of a Drone build; build IDs are unique per Drone server.
pub fn drone_trace_id(build_id: i64) -> Result<TraceId, IdError> {
    trace_id_from(format!("drone:{build_id}:t"))
}

/// Span ID of a Drone build's root span.
pub fn drone_build_span_id(build_id: i64) -> Result<SpanId, IdError> {
    span_id_from(format!("drone:{build_id}:b"))
}

/// Span ID of a Drone stage, keyed by stage number within the build.
pub fn drone_stage_span_id(build_id: i64, stage_number: i64) -> Result<SpanId, IdError> {
    span_id_from(format!("drone:{build_id}:st:{stage_number}"))
}

/// Span ID of a Drone step, keyed by stage and step number.
pub fn drone_step_span_id(
    build_id: i64,
    stage_number: i64,
    step_number: i64,
) -> Result<SpanId, IdError> {
    span_id_from(format!("drone:{build_id}:sp:{stage_number}:{step_number}"))
}
