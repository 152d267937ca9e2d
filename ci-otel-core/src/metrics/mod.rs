//! Workflow job and run counters with stable cardinality
//!
//! Every series group `(metric, repo, label-set, is_main)` spans the full
//! `status x conclusion` cross product. The first time a group is seen, each
//! sibling series is emitted at its stored value (zero when fresh) alongside
//! the observed one, so a series never appears without its siblings.
//!
//! The first non-empty batch of an emitter also carries a `build_info` gauge
//! naming the receiver version.

pub mod cache;

pub use cache::{CounterCache, CounterKey, Increment};

use opentelemetry_proto::tonic::common::v1::KeyValue;
use opentelemetry_proto::tonic::metrics::v1::{
    metric, number_data_point, AggregationTemporality, Gauge, Metric, NumberDataPoint,
    ResourceMetrics, ScopeMetrics, Sum,
};
use opentelemetry_proto::tonic::resource::v1::Resource;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::debug;

use crate::config::ReceiverConfig;
use crate::event::{WorkflowJobEvent, WorkflowRunEvent};
use crate::telemetry::attributes::{kv_bool, kv_string, scope};
use crate::telemetry::{now_unix_nanos, Metrics};

/// Label-set used for run counters
pub const RUN_LABEL_SET: &str = "default";

pub const REPOSITORY_NAME: &str = "vcs.repository.name";

pub const BUILD_INFO: &str = "build_info";

/// Which counter a series belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricKind {
    Jobs,
    Runs,
}

impl MetricKind {
    pub fn name(self) -> &'static str {
        match self {
            MetricKind::Jobs => "workflow.jobs.count",
            MetricKind::Runs => "workflow.runs.count",
        }
    }

    fn description(self) -> &'static str {
        match self {
            MetricKind::Jobs => "Number of jobs.",
            MetricKind::Runs => "Number of runs.",
        }
    }

    fn unit(self) -> &'static str {
        match self {
            MetricKind::Jobs => "{job}",
            MetricKind::Runs => "{run}",
        }
    }

    fn attribute_prefix(self) -> &'static str {
        match self {
            MetricKind::Jobs => "ci.github.workflow.job",
            MetricKind::Runs => "ci.github.workflow.run",
        }
    }
}

/// Status dimension, taken from the webhook action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    Completed,
    InProgress,
    Queued,
    Waiting,
    Aborted,
}

impl Status {
    pub const ALL: [Status; 5] = [
        Status::Completed,
        Status::InProgress,
        Status::Queued,
        Status::Waiting,
        Status::Aborted,
    ];

    pub fn from_action(action: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.as_str() == action)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Status::Completed => "completed",
            Status::InProgress => "in_progress",
            Status::Queued => "queued",
            Status::Waiting => "waiting",
            Status::Aborted => "aborted",
        }
    }
}

/// Conclusion dimension; anything unrecognised is `Null`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Conclusion {
    Success,
    Failure,
    Cancelled,
    Neutral,
    Null,
    Skipped,
    TimedOut,
    ActionRequired,
}

impl Conclusion {
    pub const ALL: [Conclusion; 8] = [
        Conclusion::Success,
        Conclusion::Failure,
        Conclusion::Cancelled,
        Conclusion::Neutral,
        Conclusion::Null,
        Conclusion::Skipped,
        Conclusion::TimedOut,
        Conclusion::ActionRequired,
    ];

    pub fn from_conclusion(conclusion: Option<&str>) -> Self {
        conclusion
            .and_then(|c| Self::ALL.into_iter().find(|v| v.as_str() == c))
            .unwrap_or(Conclusion::Null)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Conclusion::Success => "success",
            Conclusion::Failure => "failure",
            Conclusion::Cancelled => "cancelled",
            Conclusion::Neutral => "neutral",
            Conclusion::Null => "null",
            Conclusion::Skipped => "skipped",
            Conclusion::TimedOut => "timed_out",
            Conclusion::ActionRequired => "action_required",
        }
    }
}

/// One observation to count
#[derive(Debug, Clone, Copy)]
struct Observation<'a> {
    kind: MetricKind,
    repo: &'a str,
    labels: &'a str,
    status: Status,
    conclusion: Conclusion,
    is_main: bool,
}

/// Produces counter batches from job and run events
pub struct MetricsEmitter {
    cache: Arc<CounterCache>,
    start_time_unix_nano: u64,
    // Cleared by the first batch that carries it
    build_info_pending: AtomicBool,
}

impl MetricsEmitter {
    pub fn new(cache: Arc<CounterCache>) -> Self {
        Self {
            cache,
            start_time_unix_nano: now_unix_nanos(),
            build_info_pending: AtomicBool::new(true),
        }
    }

    pub fn cache(&self) -> &Arc<CounterCache> {
        &self.cache
    }

    pub fn workflow_job_metrics(&self, event: &WorkflowJobEvent, config: &ReceiverConfig) -> Metrics {
        let job = &event.workflow_job;
        let repo = event.repository.full_name.as_str();
        if repo.is_empty() {
            debug!("Repository name is empty");
            return Metrics::default();
        }

        let labels = job.label_set();
        debug!(
            repo,
            run_id = job.run_id,
            job_name = %job.name,
            action = %event.action,
            labels = %labels,
            "Processing workflow_job event"
        );

        let Some(mut status) = Status::from_action(&event.action) else {
            debug!(action = %event.action, "Unknown workflow_job action, no metrics recorded");
            return Metrics::default();
        };
        let conclusion = Conclusion::from_conclusion(job.conclusion.as_deref());
        if status == Status::Completed && conclusion == Conclusion::Cancelled && job.steps.len() == 1 {
            status = Status::Aborted;
        }

        let is_main = event.repository.default_branch.as_deref() == Some(job.head_branch.as_str());
        self.emit(
            Observation {
                kind: MetricKind::Jobs,
                repo,
                labels: &labels,
                status,
                conclusion,
                is_main,
            },
            config,
        )
    }

    pub fn workflow_run_metrics(&self, event: &WorkflowRunEvent, config: &ReceiverConfig) -> Metrics {
        let run = &event.workflow_run;
        let repo = event.repository.full_name.as_str();
        if repo.is_empty() {
            debug!("Repository name is empty");
            return Metrics::default();
        }

        debug!(
            repo,
            run_id = run.id,
            action = %event.action,
            "Processing workflow_run event"
        );

        let Some(status) = Status::from_action(&event.action) else {
            debug!(action = %event.action, "Unknown workflow_run action, no metrics recorded");
            return Metrics::default();
        };
        let conclusion = Conclusion::from_conclusion(run.conclusion.as_deref());

        let is_main = event.repository.default_branch.as_deref() == Some(run.head_branch.as_str());
        self.emit(
            Observation {
                kind: MetricKind::Runs,
                repo,
                labels: RUN_LABEL_SET,
                status,
                conclusion,
                is_main,
            },
            config,
        )
    }

    fn emit(&self, obs: Observation<'_>, config: &ReceiverConfig) -> Metrics {
        let now = now_unix_nanos();
        let key = CounterKey::new(
            obs.kind,
            obs.repo,
            obs.labels,
            obs.is_main,
            obs.status,
            obs.conclusion,
        );

        // Scoped to this call only
        let mut emitted: HashSet<CounterKey> = HashSet::new();
        let mut data_points = Vec::new();

        if self.cache.get(&key).is_none() {
            debug!(
                repo = obs.repo,
                labels = obs.labels,
                is_main = obs.is_main,
                "First sighting, backfilling siblings"
            );
            for status in Status::ALL {
                for conclusion in Conclusion::ALL {
                    if status == obs.status && conclusion == obs.conclusion {
                        continue;
                    }
                    let sibling = key.sibling(status, conclusion);
                    if !emitted.insert(sibling.clone()) {
                        continue;
                    }
                    let value = self.cache.get_or_insert(sibling, 0);
                    data_points.push(self.data_point(obs, status, conclusion, value, now));
                }
            }
        }

        if emitted.insert(key.clone()) {
            let observed = self.cache.increment(key);
            data_points.push(self.data_point(obs, obs.status, obs.conclusion, observed.value, now));
        }

        let metric = Metric {
            name: obs.kind.name().to_string(),
            description: obs.kind.description().to_string(),
            unit: obs.kind.unit().to_string(),
            data: Some(metric::Data::Sum(Sum {
                data_points,
                aggregation_temporality: AggregationTemporality::Cumulative as i32,
                is_monotonic: true,
            })),
            ..Default::default()
        };
        let mut metrics = vec![metric];
        if self.build_info_pending.swap(false, Ordering::AcqRel) {
            metrics.push(self.build_info(now));
        }

        Metrics {
            resource_metrics: vec![ResourceMetrics {
                resource: Some(Resource {
                    attributes: vec![kv_string("service.name", &config.service_name(obs.repo))],
                    ..Default::default()
                }),
                scope_metrics: vec![ScopeMetrics {
                    scope: Some(scope(Vec::new())),
                    metrics,
                    ..Default::default()
                }],
                ..Default::default()
            }],
        }
    }

    fn build_info(&self, now: u64) -> Metric {
        Metric {
            name: BUILD_INFO.to_string(),
            description: "Receiver build information.".to_string(),
            unit: "1".to_string(),
            data: Some(metric::Data::Gauge(Gauge {
                data_points: vec![NumberDataPoint {
                    attributes: vec![kv_string("version", env!("CARGO_PKG_VERSION"))],
                    start_time_unix_nano: self.start_time_unix_nano,
                    time_unix_nano: now,
                    value: Some(number_data_point::Value::AsInt(1)),
                    ..Default::default()
                }],
            })),
            ..Default::default()
        }
    }

    fn data_point(
        &self,
        obs: Observation<'_>,
        status: Status,
        conclusion: Conclusion,
        value: i64,
        now: u64,
    ) -> NumberDataPoint {
        NumberDataPoint {
            attributes: series_attributes(obs, status, conclusion),
            start_time_unix_nano: self.start_time_unix_nano,
            time_unix_nano: now,
            value: Some(number_data_point::Value::AsInt(value)),
            ..Default::default()
        }
    }
}

fn series_attributes(obs: Observation<'_>, status: Status, conclusion: Conclusion) -> Vec<KeyValue> {
    let prefix = obs.kind.attribute_prefix();
    vec![
        kv_string(REPOSITORY_NAME, obs.repo),
        kv_string(&format!("{prefix}.labels"), obs.labels),
        kv_string(&format!("{prefix}.status"), status.as_str()),
        kv_string(&format!("{prefix}.conclusion"), conclusion.as_str()),
        kv_bool(&format!("{prefix}.head_branch.is_main"), obs.is_main),
    ]
}
