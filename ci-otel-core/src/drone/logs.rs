//! Log records for Drone step output
//!
//! Drone stamps each line with whole seconds since the step started. Lines
//! sharing a second are spread one nanosecond apart so that their order
//! survives sorting by timestamp.

use opentelemetry_proto::tonic::logs::v1::{LogRecord, ScopeLogs};

use super::client::LogLine;
use super::event::{DroneBuild, DroneStage, DroneStep};
use super::traces::{scope, seconds_to_nanos, BUILD_NUMBER, STAGE_NAME, STEP_NAME};
use crate::ids::{SpanId, TraceId};
use crate::telemetry::attributes::{kv_int, kv_string, string_value};
use crate::telemetry::now_unix_nanos;

/// Trace context attached to a step's records
#[derive(Debug, Clone, Copy)]
pub struct StepContext {
    pub trace_id: TraceId,
    pub span_id: SpanId,
}

/// One scope of records for a step's output
pub fn step_scope_logs(
    build: &DroneBuild,
    stage: &DroneStage,
    step: &DroneStep,
    lines: &[LogLine],
    context: Option<StepContext>,
) -> ScopeLogs {
    let step_start = seconds_to_nanos(step.started);
    let mut previous: Option<i64> = None;
    let mut delta = 0u64;

    let log_records = lines
        .iter()
        .map(|line| {
            if previous == Some(line.timestamp) {
                delta += 1;
            } else {
                delta = 0;
                previous = Some(line.timestamp);
            }

            LogRecord {
                time_unix_nano: step_start
                    .saturating_add(seconds_to_nanos(line.timestamp))
                    .saturating_add(delta),
                observed_time_unix_nano: now_unix_nanos(),
                body: Some(string_value(line.message.clone())),
                attributes: vec![
                    kv_string(STAGE_NAME, &stage.name),
                    kv_string(STEP_NAME, &step.name),
                    kv_int(BUILD_NUMBER, build.number),
                ],
                trace_id: context.map(|c| c.trace_id.to_vec()).unwrap_or_default(),
                span_id: context.map(|c| c.span_id.to_vec()).unwrap_or_default(),
                ..Default::default()
            }
        })
        .collect();

    ScopeLogs {
        scope: Some(scope()),
        log_records,
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids;
    use crate::telemetry::attributes::find_str;
    use pretty_assertions::assert_eq;

    fn line(timestamp: i64, message: &str) -> LogLine {
        LogLine {
            number: 0,
            message: message.to_string(),
            timestamp,
        }
    }

    fn step() -> DroneStep {
        DroneStep {
            number: 2,
            name: "test".into(),
            started: 1_000,
            ..Default::default()
        }
    }

    #[test]
    fn test_repeated_seconds_spread_by_nanoseconds() {
        let lines = vec![
            line(0, "a"),
            line(0, "b"),
            line(1, "c"),
            line(1, "d"),
            line(1, "e"),
            line(3, "f"),
        ];
        let scope = step_scope_logs(
            &DroneBuild::default(),
            &DroneStage::default(),
            &step(),
            &lines,
            None,
        );

        let base = 1_000_000_000_000u64;
        let times: Vec<u64> = scope.log_records.iter().map(|r| r.time_unix_nano).collect();
        assert_eq!(
            times,
            vec![
                base,
                base + 1,
                base + 1_000_000_000,
                base + 1_000_000_001,
                base + 1_000_000_002,
                base + 3_000_000_000,
            ]
        );
        assert!(scope.log_records.iter().all(|r| r.trace_id.is_empty()));
    }

    #[test]
    fn test_records_carry_step_context() {
        let build = DroneBuild {
            id: 2,
            number: 7,
            ..Default::default()
        };
        let stage = DroneStage {
            number: 1,
            name: "stageA".into(),
            ..Default::default()
        };
        let context = StepContext {
            trace_id: ids::drone_trace_id(2).unwrap(),
            span_id: ids::drone_step_span_id(2, 1, 2).unwrap(),
        };
        let scope = step_scope_logs(&build, &stage, &step(), &[line(5, "done")], Some(context));

        let record = &scope.log_records[0];
        assert_eq!(record.trace_id, context.trace_id.to_vec());
        assert_eq!(record.span_id, context.span_id.to_vec());
        assert_eq!(find_str(&record.attributes, STAGE_NAME), Some("stageA"));
        assert_eq!(find_str(&record.attributes, STEP_NAME), Some("test"));
        assert!(record.observed_time_unix_nano > 0);
    }
}
