//! Event orchestration
//!
//! One [`Receiver::handle`] call per delivery. The traces branch runs first
//! because its outcome decides whether log records carry trace context; the
//! logs and metrics branches then run concurrently. A failing branch is
//! logged and reported in the [`HandleOutcome`], never propagated into the
//! others.

use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::ReceiverConfig;
use crate::error::{LogsError, ReceiverError};
use crate::event::WebhookEvent;
use crate::github::LogUrlResolver;
use crate::logs::{ArchiveFetcher, LogsProcessor};
use crate::metrics::{CounterCache, MetricsEmitter};
use crate::telemetry::{data_point_count, log_record_count, span_count, TelemetrySink};
use crate::traces;

/// Per-signal consumers; an absent sink disables that branch
#[derive(Clone, Default)]
pub struct Sinks {
    pub traces: Option<Arc<dyn TelemetrySink>>,
    pub logs: Option<Arc<dyn TelemetrySink>>,
    pub metrics: Option<Arc<dyn TelemetrySink>>,
}

impl Sinks {
    /// Route every signal to one sink
    pub fn all(sink: Arc<dyn TelemetrySink>) -> Self {
        Self {
            traces: Some(Arc::clone(&sink)),
            logs: Some(Arc::clone(&sink)),
            metrics: Some(sink),
        }
    }
}

/// What happened to one branch
#[derive(Debug)]
pub enum BranchOutcome {
    /// No sink configured for this signal
    Disabled,
    /// Branch does not apply to this event
    Skipped(&'static str),
    /// Batch handed to the sink; carries the item count
    Delivered(usize),
    Failed(ReceiverError),
}

impl BranchOutcome {
    pub fn is_failed(&self) -> bool {
        matches!(self, BranchOutcome::Failed(_))
    }

    pub fn delivered(&self) -> usize {
        match self {
            BranchOutcome::Delivered(n) => *n,
            _ => 0,
        }
    }
}

/// Result of handling one event
#[derive(Debug)]
pub struct HandleOutcome {
    pub traces: BranchOutcome,
    pub logs: BranchOutcome,
    pub metrics: BranchOutcome,
}

impl HandleOutcome {
    pub fn has_failures(&self) -> bool {
        self.traces.is_failed() || self.logs.is_failed() || self.metrics.is_failed()
    }
}

/// Turns webhook events into telemetry and hands it to the sinks
pub struct Receiver {
    config: ReceiverConfig,
    metrics: MetricsEmitter,
    logs: Option<LogsProcessor>,
    sinks: Sinks,
}

impl Receiver {
    /// Create a receiver owning `cache` for its counter state.
    ///
    /// Without a resolver the logs branch is disabled even if a log sink is set.
    pub fn new(
        config: ReceiverConfig,
        cache: Arc<CounterCache>,
        resolver: Option<Arc<dyn LogUrlResolver>>,
        sinks: Sinks,
    ) -> Result<Self, ReceiverError> {
        let fetcher =
            ArchiveFetcher::new(config.effective_download_timeout()).map_err(LogsError::from)?;
        Ok(Self::with_fetcher(config, cache, resolver, fetcher, sinks))
    }

    pub fn with_fetcher(
        config: ReceiverConfig,
        cache: Arc<CounterCache>,
        resolver: Option<Arc<dyn LogUrlResolver>>,
        fetcher: ArchiveFetcher,
        sinks: Sinks,
    ) -> Self {
        if sinks.logs.is_some() && resolver.is_none() {
            error!("No GitHub API access configured, but a logs sink is set. Logs will not be processed.");
        }
        let logs = resolver.map(|resolver| LogsProcessor::new(resolver, fetcher, &config));
        Self {
            metrics: MetricsEmitter::new(cache),
            config,
            logs,
            sinks,
        }
    }

    pub fn config(&self) -> &ReceiverConfig {
        &self.config
    }

    /// Process one event through every configured branch
    pub async fn handle(&self, event: &WebhookEvent, cancel: &CancellationToken) -> HandleOutcome {
        debug!(event = event.kind(), status = event.status(), "Received GitHub event");

        let traces = self.traces_branch(event).await;
        let with_trace_info = self.sinks.traces.is_some() && !traces.is_failed();

        let (logs, metrics) = tokio::join!(
            self.logs_branch(event, with_trace_info, cancel),
            self.metrics_branch(event),
        );

        let outcome = HandleOutcome {
            traces,
            logs,
            metrics,
        };
        info!(
            event = event.kind(),
            spans = outcome.traces.delivered(),
            log_records = outcome.logs.delivered(),
            data_points = outcome.metrics.delivered(),
            "Handled GitHub event"
        );
        outcome
    }

    async fn traces_branch(&self, event: &WebhookEvent) -> BranchOutcome {
        let Some(sink) = &self.sinks.traces else {
            return BranchOutcome::Disabled;
        };
        if !event.is_completed() {
            debug!(status = event.status(), "Skipping traces for non-completed event");
            return BranchOutcome::Skipped("event not completed");
        }

        let built = match event {
            WebhookEvent::WorkflowRun(e) => traces::workflow_run_traces(e, &self.config),
            WebhookEvent::WorkflowJob(e) => traces::workflow_job_traces(e, &self.config),
        };
        let batch = match built {
            Ok(batch) => batch,
            Err(err) => {
                warn!("Failed to convert event to traces: {}", err);
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
        event: &WebhookEvent,
        with_trace_info: bool,
        cancel: &CancellationToken,
    ) -> BranchOutcome {
        let Some(sink) = &self.sinks.logs else {
            return BranchOutcome::Disabled;
        };
        let Some(processor) = &self.logs else {
            return BranchOutcome::Skipped("no log URL resolver");
        };
        let WebhookEvent::WorkflowRun(run_event) = event else {
            return BranchOutcome::Skipped("logs are fetched per workflow run");
        };
        if !event.is_completed() {
            debug!(status = event.status(), "Skipping logs for non-completed event");
            return BranchOutcome::Skipped("event not completed");
        }

        let batch = match processor
            .event_to_logs(run_event, &self.config, with_trace_info, cancel)
            .await
        {
            Ok(batch) => batch,
            Err(err) => {
                error!(run_id = run_event.workflow_run.id, "Failed to process logs: {}", err);
                return BranchOutcome::Failed(err.into());
            }
        };

        let count = log_record_count(&batch);
        match sink.consume_logs(batch).await {
            Ok(()) => BranchOutcome::Delivered(count),
            Err(err) => {
                error!(sink = sink.name(), "Failed to consume logs: {}", err);
                BranchOutcome::Failed(err.into())
            }
        }
    }

    async fn metrics_branch(&self, event: &WebhookEvent) -> BranchOutcome {
        let Some(sink) = &self.sinks.metrics else {
            return BranchOutcome::Disabled;
        };

        let batch = match event {
            WebhookEvent::WorkflowRun(e) => self.metrics.workflow_run_metrics(e, &self.config),
            WebhookEvent::WorkflowJob(e) => self.metrics.workflow_job_metrics(e, &self.config),
        };
        let count = data_point_count(&batch);
        if count == 0 {
            return BranchOutcome::Skipped("no data points");
        }

        match sink.consume_metrics(batch).await {
            Ok(()) => BranchOutcome::Delivered(count),
            Err(err) => {
                warn!(sink = sink.name(), "Failed to consume metrics: {}", err);
                BranchOutcome::Failed(err.into())
            }
        }
    }
}
