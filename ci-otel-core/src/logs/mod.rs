//! Log ingestion for completed workflow runs
//!
//! ## Pipeline
//!
//! ```text
//! WorkflowRunEvent
//!   -> LogUrlResolver    (owner, repo, run, attempt) -> signed URL
//!   -> ArchiveFetcher    URL -> anonymous temp file
//!   -> LogArchive        zip -> job -> ordered step files
//!   -> reconstruct       step file -> LogEntry stream
//!   -> Logs              one resource, one scope per job, one record per entry
//! ```
//!
//! Archive reading is synchronous and runs on the blocking pool. One bad step
//! file never suppresses the rest of the archive.

pub mod archive;
pub mod fetch;
pub mod reconstruct;

pub use archive::{ArchiveIndex, LogArchive, StepFile};
pub use fetch::{ArchiveFetcher, DownloadedArchive};
pub use reconstruct::{LogEntry, LogEntryBuilder, ReconstructStats};

use opentelemetry_proto::tonic::logs::v1::{LogRecord, ResourceLogs, ScopeLogs};
use opentelemetry_proto::tonic::resource::v1::Resource;
use std::io::{BufReader, Read, Seek};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::ReceiverConfig;
use crate::error::{FetchError, LogsError};
use crate::event::WorkflowRunEvent;
use crate::github::LogUrlResolver;
use crate::ids::{self, SpanId, TraceId};
use crate::telemetry::attributes::{self, kv_int, kv_string, JOB_NAME, STEP_NUMBER};
use crate::telemetry::{log_record_count, now_unix_nanos, unix_nanos, Logs};

/// Run identity used to correlate records with the run's trace
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TraceCorrelation {
    pub run_id: i64,
    pub run_attempt: i64,
}

/// Turns workflow run events into log batches
pub struct LogsProcessor {
    resolver: Arc<dyn LogUrlResolver>,
    fetcher: ArchiveFetcher,
    max_entry_bytes: usize,
}

impl LogsProcessor {
    pub fn new(
        resolver: Arc<dyn LogUrlResolver>,
        fetcher: ArchiveFetcher,
        config: &ReceiverConfig,
    ) -> Self {
        Self {
            resolver,
            fetcher,
            max_entry_bytes: config.max_log_entry_bytes,
        }
    }

    /// Download and reconstruct every step log of the run.
    ///
    /// With `with_trace_info` each record carries the run's trace ID and the
    /// step's span ID; otherwise both are omitted.
    pub async fn event_to_logs(
        &self,
        event: &WorkflowRunEvent,
        config: &ReceiverConfig,
        with_trace_info: bool,
        cancel: &CancellationToken,
    ) -> Result<Logs, LogsError> {
        let run = &event.workflow_run;
        let owner = &event.repository.owner.login;
        let repo = &event.repository.name;

        let url = self
            .resolver
            .resolve(owner, repo, run.id, run.run_attempt)
            .await?;
        debug!(run_id = run.id, run_attempt = run.run_attempt, "Resolved log archive URL");

        let archive = self.fetcher.fetch(url.as_str(), cancel).await?;

        let resource = attributes::workflow_run_resource(event, config);
        let correlation = with_trace_info.then_some(TraceCorrelation {
            run_id: run.id,
            run_attempt: run.run_attempt,
        });
        let max_entry_bytes = self.max_entry_bytes;
        let cancel = cancel.clone();

        let logs = tokio::task::spawn_blocking(move || {
            archive_to_logs(
                archive.into_file(),
                resource,
                correlation,
                max_entry_bytes,
                &cancel,
            )
        })
        .await
        .map_err(|err| LogsError::Task(err.to_string()))??;

        info!(
            run_id = run.id,
            run_attempt = run.run_attempt,
            records = log_record_count(&logs),
            "Reconstructed workflow run logs"
        );
        Ok(logs)
    }
}

/// Build a log batch from an opened archive.
///
/// Only an unreadable central directory fails the batch; entries that cannot
/// be opened are logged and skipped.
pub fn archive_to_logs<R: Read + Seek>(
    reader: R,
    resource: Resource,
    correlation: Option<TraceCorrelation>,
    max_entry_bytes: usize,
    cancel: &CancellationToken,
) -> Result<Logs, LogsError> {
    let mut archive = LogArchive::open(reader)?;
    let index = archive.index();

    let trace_id = correlation
        .map(|c| ids::derive_trace_id(c.run_id, c.run_attempt))
        .transpose()?;

    let mut builder = LogEntryBuilder::new(max_entry_bytes);
    let mut scope_logs = Vec::with_capacity(index.jobs.len());

    for (job_name, files) in &index.jobs {
        if cancel.is_cancelled() {
            return Err(FetchError::Cancelled.into());
        }

        let mut log_records = Vec::new();
        for file in files {
            let span_id = match correlation {
                Some(c) => match ids::step_span_id(c.run_id, c.run_attempt, job_name, file.step_number) {
                    Ok(span_id) => Some(span_id),
                    Err(err) => {
                        error!(job_name = %job_name, file_name = %file.name, "Failed to derive step span ID: {}", err);
                        continue;
                    }
                },
                None => None,
            };

            let step = match archive.open_step(file) {
                Ok(step) => step,
                Err(err) => {
                    error!(job_name = %job_name, file_name = %file.name, "Failed to open step log: {}", err);
                    continue;
                }
            };

            let stats = reconstruct::reconstruct(
                BufReader::new(step),
                file.step_number,
                &mut builder,
                |entry| {
                    // Sampled per record, when the entry is finalised
                    let observed = now_unix_nanos();
                    log_records.push(to_log_record(entry, trace_id, span_id, observed))
                },
            );
            if stats.read_failed {
                warn!(job_name = %job_name, file_name = %file.name, "Step log was truncated by a read error");
            }
            debug!(
                job_name = %job_name,
                step_number = file.step_number,
                entries = stats.entries,
                orphaned = stats.orphaned_lines,
                oversized = stats.oversized_lines,
                "Processed step log"
            );
        }

        scope_logs.push(ScopeLogs {
            scope: Some(attributes::scope(vec![kv_string(JOB_NAME, job_name)])),
            log_records,
            ..Default::default()
        });
    }

    Ok(Logs {
        resource_logs: vec![ResourceLogs {
            resource: Some(resource),
            scope_logs,
            ..Default::default()
        }],
    })
}

fn to_log_record(
    entry: LogEntry,
    trace_id: Option<TraceId>,
    span_id: Option<SpanId>,
    observed_time_unix_nano: u64,
) -> LogRecord {
    LogRecord {
        time_unix_nano: unix_nanos(entry.timestamp),
        observed_time_unix_nano,
        body: Some(attributes::string_value(entry.body)),
        attributes: vec![kv_int(STEP_NUMBER, entry.step_number)],
        trace_id: trace_id.map(TraceId::to_vec).unwrap_or_default(),
        span_id: span_id.map(SpanId::to_vec).unwrap_or_default(),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::attributes::{find_int, find_str};
    use opentelemetry_proto::tonic::common::v1::any_value::Value;
    use std::io::{Cursor, Write};
    use zip::write::SimpleFileOptions;

    fn build_zip(files: &[(&str, &str)]) -> Cursor<Vec<u8>> {
        let mut buf = Vec::new();
        {
            let mut writer = zip::ZipWriter::new(Cursor::new(&mut buf));
            for (name, content) in files {
                writer
                    .start_file(*name, SimpleFileOptions::default())
                    .unwrap();
                writer.write_all(content.as_bytes()).unwrap();
            }
            writer.finish().unwrap();
        }
        Cursor::new(buf)
    }

    fn body(record: &LogRecord) -> &str {
        match record.body.as_ref().and_then(|b| b.value.as_ref()) {
            Some(Value::StringValue(s)) => s,
            _ => "",
        }
    }

    #[test]
    fn test_one_scope_per_job_in_order() {
        let archive = build_zip(&[
            ("test/1_Set up job.txt", "2023-01-01T12:00:00Z setting up\n"),
            ("build/2_Compile.txt", "2023-01-01T12:00:02Z compiling\nwarning: x\n"),
            ("build/1_Checkout.txt", "2023-01-01T12:00:01Z checkout\n"),
        ]);
        let logs = archive_to_logs(
            archive,
            Resource::default(),
            None,
            1024,
            &CancellationToken::new(),
        )
        .unwrap();

        let scopes = &logs.resource_logs[0].scope_logs;
        let jobs: Vec<&str> = scopes
            .iter()
            .map(|s| find_str(&s.scope.as_ref().unwrap().attributes, JOB_NAME).unwrap())
            .collect();
        assert_eq!(jobs, vec!["build", "test"]);

        let build = &scopes[0].log_records;
        assert_eq!(build.len(), 2);
        assert_eq!(body(&build[0]), "checkout");
        assert_eq!(body(&build[1]), "compiling\nwarning: x");
        assert_eq!(find_int(&build[1].attributes, STEP_NUMBER), Some(2));
        assert!(build[0].trace_id.is_empty());
        assert!(build[0].span_id.is_empty());
    }

    #[test]
    fn test_trace_ids_attached_when_correlated() {
        let archive = build_zip(&[("deploy/3_Ship.txt", "2023-01-01T12:00:00Z shipped\n")]);
        let correlation = TraceCorrelation {
            run_id: 100,
            run_attempt: 1,
        };
        let logs = archive_to_logs(
            archive,
            Resource::default(),
            Some(correlation),
            1024,
            &CancellationToken::new(),
        )
        .unwrap();

        let record = &logs.resource_logs[0].scope_logs[0].log_records[0];
        assert_eq!(record.trace_id, ids::derive_trace_id(100, 1).unwrap().to_vec());
        assert_eq!(
            record.span_id,
            ids::step_span_id(100, 1, "deploy", 3).unwrap().to_vec()
        );
        assert!(record.observed_time_unix_nano > 0);
    }

    #[test]
    fn test_observed_time_sampled_per_record() {
        let archive = build_zip(&[
            ("build/1_Checkout.txt", "2023-01-01T12:00:00Z one\n2023-01-01T12:00:01Z two\n"),
            ("build/2_Compile.txt", "2023-01-01T12:00:02Z three\n"),
        ]);
        let before = now_unix_nanos();
        let logs = archive_to_logs(archive, Resource::default(), None, 1024, &CancellationToken::new())
            .unwrap();
        let after = now_unix_nanos();

        let observed: Vec<u64> = logs.resource_logs[0].scope_logs[0]
            .log_records
            .iter()
            .map(|r| r.observed_time_unix_nano)
            .collect();
        assert_eq!(observed.len(), 3);
        assert!(observed.windows(2).all(|w| w[0] <= w[1]));
        assert!(observed.iter().all(|t| (before..=after).contains(t)));
    }

    #[test]
    fn test_bad_step_file_does_not_suppress_others() {
        let archive = build_zip(&[
            ("lint/x_Broken.txt", "2023-01-01T12:00:00Z never read\n"),
            ("lint/system.txt", "system"),
            ("lint/1_Run.txt", "2023-01-01T12:00:00Z ok\n"),
        ]);
        let logs = archive_to_logs(
            archive,
            Resource::default(),
            None,
            1024,
            &CancellationToken::new(),
        )
        .unwrap();
        assert_eq!(log_record_count(&logs), 1);
    }

    #[test]
    fn test_corrupt_archive_fails_batch() {
        let result = archive_to_logs(
            Cursor::new(b"PK garbage".to_vec()),
            Resource::default(),
            None,
            1024,
            &CancellationToken::new(),
        );
        assert!(matches!(result, Err(LogsError::Archive(_))));
    }

    #[test]
    fn test_cancelled_processing_stops() {
        let archive = build_zip(&[("a/1_x.txt", "2023-01-01T12:00:00Z a\n")]);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = archive_to_logs(archive, Resource::default(), None, 1024, &cancel);
        assert!(matches!(result, Err(LogsError::Fetch(FetchError::Cancelled))));
    }
}
