//! Drone build telemetry
//!
//! A finished build of an enabled repository and branch becomes one trace
//! (build, stage and step spans) plus the output of every non-skipped step,
//! fetched from the Drone API. Identifiers come from [`crate::ids`], so a
//! redelivered build lands in the same trace.
//!
//! Builds are not counted; only the GitHub Actions events feed the counters.

pub mod client;
pub mod event;
pub mod logs;
pub mod traces;

pub use client::{DroneApiClient, DroneLogClient, LogLine};
pub use event::{DroneBuild, DroneEvent, DroneRepo, DroneStage, DroneStep};

use opentelemetry_proto::tonic::logs::v1::ResourceLogs;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::ReceiverConfig;
use crate::error::{FetchError, LogsError};
use crate::ids;
use crate::receiver::{BranchOutcome, HandleOutcome, Sinks};
use crate::telemetry::{log_record_count, span_count, Logs, TelemetrySink};
use logs::StepContext;

/// A build that passed every eligibility check
struct Eligible<'a> {
    repo: &'a DroneRepo,
    build: &'a DroneBuild,
    branch: &'a str,
}

/// Turns Drone webhook events into traces and logs
pub struct DroneReceiver {
    config: ReceiverConfig,
    client: Option<Arc<dyn DroneLogClient>>,
    sinks: Sinks,
}

impl DroneReceiver {
    /// Without a client the logs branch is skipped even if a log sink is set
    pub fn new(config: ReceiverConfig, client: Option<Arc<dyn DroneLogClient>>, sinks: Sinks) -> Self {
        if sinks.logs.is_some() && client.is_none() {
            error!("No Drone API access configured, but a logs sink is set. Logs will not be processed.");
        }
        Self {
            config,
            client,
            sinks,
        }
    }

    pub fn config(&self) -> &ReceiverConfig {
        &self.config
    }

    /// Branch the build is filtered on: its target, or the repository default
    fn branch<'a>(repo: &'a DroneRepo, build: &'a DroneBuild) -> &'a str {
        if build.target.is_empty() {
            &repo.default_branch
        } else {
            &build.target
        }
    }

    fn eligible<'a>(&self, event: &'a DroneEvent) -> Result<Eligible<'a>, &'static str> {
        let Some(build) = event.build() else {
            warn!("No build info provided in the Drone webhook event");
            return Err("no build in event");
        };
        if !build.is_finished() {
            debug!(build_id = build.id, "Build hasn't finished yet");
            return Err("build not finished");
        }
        let Some(repo) = event.repo.as_ref() else {
            warn!(build_id = build.id, "No repository in the Drone webhook event");
            return Err("no repository in event");
        };
        let Some(allowed) = self.config.drone.branches(&repo.slug) else {
            warn!(repo = %repo.slug, "Repo not enabled, skipping");
            return Err("repo not enabled");
        };
        let branch = Self::branch(repo, build);
        if !allowed.iter().any(|b| b == branch) {
            warn!(repo = %repo.slug, branch, "Branch not enabled, skipping");
            return Err("branch not enabled");
        }
        Ok(Eligible { repo, build, branch })
    }

    fn skipped(sink: &Option<Arc<dyn TelemetrySink>>, reason: &'static str) -> BranchOutcome {
        match sink {
            Some(_) => BranchOutcome::Skipped(reason),
            None => BranchOutcome::Disabled,
        }
    }

    /// Process one event; traces first, then step logs
    pub async fn handle(&self, event: &DroneEvent, cancel: &CancellationToken) -> HandleOutcome {
        debug!(action = %event.action, "Received Drone event");
        let metrics = Self::skipped(&self.sinks.metrics, "drone builds are not counted");

        let eligible = match self.eligible(event) {
            Ok(eligible) => eligible,
            Err(reason) => {
                return HandleOutcome {
                    traces: Self::skipped(&self.sinks.traces, reason),
                    logs: Self::skipped(&self.sinks.logs, reason),
                    metrics,
                };
            }
        };

        let traces = self.traces_branch(event, &eligible).await;
        let with_trace_info = self.sinks.traces.is_some() && !traces.is_failed();
        let logs = self.logs_branch(&eligible, with_trace_info, cancel).await;

        let outcome = HandleOutcome {
            traces,
            logs,
            metrics,
        };
        info!(
            build_id = eligible.build.id,
            repo = %eligible.repo.slug,
            spans = outcome.traces.delivered(),
            log_records = outcome.logs.delivered(),
            "Handled Drone build"
        );
        outcome
    }

    async fn traces_branch(&self, event: &DroneEvent, eligible: &Eligible<'_>) -> BranchOutcome {
        let Some(sink) = &self.sinks.traces else {
            return BranchOutcome::Disabled;
        };

        let resource = traces::build_resource(eligible.repo, eligible.branch, &self.config);
        let batch = match traces::build_traces(event, eligible.repo, eligible.build, resource) {
            Ok(batch) => batch,
            Err(err) => {
                warn!("Failed to convert Drone build to traces: {}", err);
                return BranchOutcome::Failed(err.into());
            }
        };

        let count = span_count(&batch);
        match sink.consume_traces(batch).await {
            Ok(()) => BranchOutcome::Delivered(count),
            Err(err) => {
                warn!(sink = sink.name(), "Failed to consume traces: {}", err);
                BranchOutcome::Failed(err.into())
            }
        }
    }

    async fn logs_branch(
        &self,
        eligible: &Eligible<'_>,
        with_trace_info: bool,
        cancel: &CancellationToken,
    ) -> BranchOutcome {
        let Some(sink) = &self.sinks.logs else {
            return BranchOutcome::Disabled;
        };
        let Some(client) = &self.client else {
            return BranchOutcome::Skipped("no Drone API client");
        };

        let batch = match self.collect_logs(client.as_ref(), eligible, with_trace_info, cancel).await {
            Ok(batch) => batch,
            Err(err) => {
                error!(build_id = eligible.build.id, "Failed to process logs: {}", err);
                return BranchOutcome::Failed(err.into());
            }
        };
        if batch.resource_logs.iter().all(|r| r.scope_logs.is_empty()) {
            return BranchOutcome::Skipped("no step logs");
        }

        let count = log_record_count(&batch);
        match sink.consume_logs(batch).await {
            Ok(()) => BranchOutcome::Delivered(count),
            Err(err) => {
                error!(sink = sink.name(), "Failed to consume logs: {}", err);
                BranchOutcome::Failed(err.into())
            }
        }
    }

    /// One scope per step; a step whose logs cannot be fetched is left out
    async fn collect_logs(
        &self,
        client: &dyn DroneLogClient,
        eligible: &Eligible<'_>,
        with_trace_info: bool,
        cancel: &CancellationToken,
    ) -> Result<Logs, LogsError> {
        let Eligible { repo, build, .. } = *eligible;
        let trace_id = with_trace_info.then(|| ids::drone_trace_id(build.id)).transpose()?;

        let mut scope_logs = Vec::new();
        for stage in &build.stages {
            for step in stage.steps.iter().filter(|step| !step.is_skipped()) {
                let context = match trace_id {
                    Some(trace_id) => Some(StepContext {
                        trace_id,
                        span_id: ids::drone_step_span_id(build.id, stage.number, step.number)?,
                    }),
                    None => None,
                };

                let fetched = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(FetchError::Cancelled.into()),
                    fetched = client.step_logs(&repo.namespace, &repo.name, build.number, stage.number, step.number) => fetched,
                };
                let lines = match fetched {
                    Ok(lines) => lines,
                    Err(err) => {
                        error!(
                            stage = %stage.name,
                            step = %step.name,
                            "Error retrieving logs: {}",
                            err
                        );
                        continue;
                    }
                };
                scope_logs.push(logs::step_scope_logs(build, stage, step, &lines, context));
            }
        }

        let resource = traces::build_resource(repo, eligible.branch, &self.config);
        Ok(Logs {
            resource_logs: vec![ResourceLogs {
                resource: Some(resource),
                scope_logs,
                ..Default::default()
            }],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{DroneError, SinkError};
    use crate::telemetry::{CollectingSink, Metrics, Traces};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::BTreeMap;

    /// Serves one line per step, failing for the step numbers in `failing`
    #[derive(Default)]
    struct StubClient {
        failing: Vec<i64>,
        calls: Mutex<Vec<(String, String, i64, i64, i64)>>,
    }

    #[async_trait]
    impl DroneLogClient for StubClient {
        async fn step_logs(
            &self,
            namespace: &str,
            name: &str,
            build_number: i64,
            stage_number: i64,
            step_number: i64,
        ) -> Result<Vec<LogLine>, DroneError> {
            self.calls.lock().push((
                namespace.to_string(),
                name.to_string(),
                build_number,
                stage_number,
                step_number,
            ));
            if self.failing.contains(&step_number) {
                return Err(DroneError::Status {
                    status: reqwest::StatusCode::NOT_FOUND,
                    url: "http://drone.test/logs".into(),
                });
            }
            Ok(vec![LogLine {
                number: 1,
                message: "message".into(),
                timestamp: 123_456,
            }])
        }
    }

    struct RejectingTraces;

    #[async_trait]
    impl TelemetrySink for RejectingTraces {
        async fn consume_traces(&self, _: Traces) -> Result<(), SinkError> {
            Err(SinkError::Rejected("traces".into()))
        }
        async fn consume_logs(&self, _: Logs) -> Result<(), SinkError> {
            Ok(())
        }
        async fn consume_metrics(&self, _: Metrics) -> Result<(), SinkError> {
            Ok(())
        }
        fn name(&self) -> &'static str {
            "rejecting"
        }
    }

    fn event(branch: &str, steps: usize) -> DroneEvent {
        let build = DroneBuild {
            id: 2,
            number: 5,
            finished: 12_345_678,
            stages: vec![DroneStage {
                id: 1,
                number: 1,
                name: "stageA".into(),
                steps: (1..=steps as i64)
                    .map(|number| DroneStep {
                        id: number,
                        number,
                        name: format!("step{number}"),
                        status: "success".into(),
                        started: 1_000,
                        stopped: 1_001,
                        ..Default::default()
                    })
                    .collect(),
                ..Default::default()
            }],
            ..Default::default()
        };
        DroneEvent {
            repo: Some(DroneRepo {
                id: 1,
                namespace: "org".into(),
                name: "repoA".into(),
                slug: "org/repoA".into(),
                default_branch: branch.into(),
                build: Some(build),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn config(branches: &[&str]) -> ReceiverConfig {
        let mut repos = BTreeMap::new();
        repos.insert(
            "org/repoA".to_string(),
            branches.iter().map(|b| b.to_string()).collect(),
        );
        let mut config = ReceiverConfig::default();
        config.drone.repos = repos;
        config
    }

    fn receiver(config: ReceiverConfig, client: Arc<StubClient>, sink: Arc<CollectingSink>) -> DroneReceiver {
        DroneReceiver::new(config, Some(client as Arc<dyn DroneLogClient>), Sinks::all(sink))
    }

    #[tokio::test]
    async fn test_enabled_repo_and_branch() {
        let sink = Arc::new(CollectingSink::new());
        let client = Arc::new(StubClient::default());
        let receiver = receiver(config(&["main"]), client.clone(), sink.clone());

        let outcome = receiver.handle(&event("main", 1), &CancellationToken::new()).await;
        assert_eq!(outcome.traces.delivered(), 3);
        assert_eq!(outcome.logs.delivered(), 1);
        assert!(matches!(outcome.metrics, BranchOutcome::Skipped(_)));

        let logs = sink.logs();
        assert_eq!(logs[0].resource_logs.len(), 1);
        let record = &logs[0].resource_logs[0].scope_logs[0].log_records[0];
        assert_eq!(record.trace_id, ids::drone_trace_id(2).unwrap().to_vec());
        assert_eq!(record.span_id, ids::drone_step_span_id(2, 1, 1).unwrap().to_vec());
        assert_eq!(
            client.calls.lock().as_slice(),
            &[("org".to_string(), "repoA".to_string(), 5, 1, 1)]
        );
    }

    #[tokio::test]
    async fn test_repo_not_enabled() {
        let sink = Arc::new(CollectingSink::new());
        let receiver = receiver(ReceiverConfig::default(), Arc::new(StubClient::default()), sink.clone());

        let outcome = receiver.handle(&event("main", 1), &CancellationToken::new()).await;
        assert!(matches!(outcome.traces, BranchOutcome::Skipped("repo not enabled")));
        assert!(matches!(outcome.logs, BranchOutcome::Skipped("repo not enabled")));
        assert!(sink.traces().is_empty());
        assert!(sink.logs().is_empty());
    }

    #[tokio::test]
    async fn test_branch_not_enabled() {
        let sink = Arc::new(CollectingSink::new());
        let receiver = receiver(config(&["master"]), Arc::new(StubClient::default()), sink.clone());

        let outcome = receiver.handle(&event("main", 1), &CancellationToken::new()).await;
        assert!(matches!(outcome.traces, BranchOutcome::Skipped("branch not enabled")));
        assert!(sink.traces().is_empty());
    }

    #[tokio::test]
    async fn test_build_target_is_the_filtered_branch() {
        let sink = Arc::new(CollectingSink::new());
        let receiver = receiver(config(&["release"]), Arc::new(StubClient::default()), sink.clone());

        let mut event = event("main", 1);
        if let Some(build) = event.repo.as_mut().and_then(|r| r.build.as_mut()) {
            build.target = "release".into();
        }
        let outcome = receiver.handle(&event, &CancellationToken::new()).await;
        assert_eq!(outcome.traces.delivered(), 3);
    }

    #[tokio::test]
    async fn test_unfinished_or_missing_build_is_skipped() {
        let sink = Arc::new(CollectingSink::new());
        let receiver = receiver(config(&["main"]), Arc::new(StubClient::default()), sink.clone());

        let mut running = event("main", 1);
        if let Some(build) = running.repo.as_mut().and_then(|r| r.build.as_mut()) {
            build.finished = 0;
        }
        let outcome = receiver.handle(&running, &CancellationToken::new()).await;
        assert!(matches!(outcome.traces, BranchOutcome::Skipped("build not finished")));

        let outcome = receiver.handle(&DroneEvent::default(), &CancellationToken::new()).await;
        assert!(matches!(outcome.logs, BranchOutcome::Skipped("no build in event")));
        assert!(sink.traces().is_empty());
    }

    #[tokio::test]
    async fn test_failed_step_fetch_skips_only_that_step() {
        let sink = Arc::new(CollectingSink::new());
        let client = Arc::new(StubClient {
            failing: vec![2],
            ..Default::default()
        });
        let receiver = receiver(config(&["main"]), client, sink.clone());

        let outcome = receiver.handle(&event("main", 3), &CancellationToken::new()).await;
        assert_eq!(outcome.logs.delivered(), 2);
        assert!(!outcome.has_failures());
        assert_eq!(sink.logs()[0].resource_logs[0].scope_logs.len(), 2);
    }

    #[tokio::test]
    async fn test_failed_traces_drop_trace_context() {
        let collector = Arc::new(CollectingSink::new());
        let sinks = Sinks {
            traces: Some(Arc::new(RejectingTraces)),
            logs: Some(collector.clone()),
            metrics: None,
        };
        let client: Arc<dyn DroneLogClient> = Arc::new(StubClient::default());
        let receiver = DroneReceiver::new(config(&["main"]), Some(client), sinks);

        let outcome = receiver.handle(&event("main", 1), &CancellationToken::new()).await;
        assert!(outcome.traces.is_failed());
        assert!(matches!(outcome.metrics, BranchOutcome::Disabled));
        let record = &collector.logs()[0].resource_logs[0].scope_logs[0].log_records[0];
        assert!(record.trace_id.is_empty());
        assert!(record.span_id.is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_before_fetch() {
        let sink = Arc::new(CollectingSink::new());
        let receiver = receiver(config(&["main"]), Arc::new(StubClient::default()), sink.clone());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let outcome = receiver.handle(&event("main", 1), &cancel).await;
        assert!(outcome.logs.is_failed());
        assert_eq!(outcome.traces.delivered(), 3);
    }
}
