//! Telemetry sinks
//!
//! A sink is the surrounding pipeline's consumer interface. The receiver hands
//! it whole batches and never retries; delivery guarantees belong to the sink.

use async_trait::async_trait;
use parking_lot::Mutex;
use prost::Message;
use std::time::Duration;
use tracing::{debug, warn};

use super::{Logs, Metrics, Traces};
use crate::error::SinkError;

/// Consumer of telemetry batches
#[async_trait]
pub trait TelemetrySink: Send + Sync {
    async fn consume_traces(&self, traces: Traces) -> Result<(), SinkError>;

    async fn consume_logs(&self, logs: Logs) -> Result<(), SinkError>;

    async fn consume_metrics(&self, metrics: Metrics) -> Result<(), SinkError>;

    /// Sink identifier for logging
    fn name(&self) -> &'static str;
}

/// Exports batches to an OTLP/HTTP endpoint as protobuf
pub struct OtlpHttpSink {
    client: reqwest::Client,
    endpoint: String,
}

impl OtlpHttpSink {
    /// Create a sink for `endpoint` (e.g. `http://localhost:4318`)
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("ci-otel/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()?;

        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
        })
    }

    async fn export(&self, signal: &str, payload: Vec<u8>) -> Result<(), SinkError> {
        let url = format!("{}/v1/{}", self.endpoint, signal);
        debug!("Exporting OTLP {} to {}", signal, url);

        let response = self
            .client
            .post(&url)
            .header("Content-Type", "application/x-protobuf")
            .body(payload)
            .send()
            .await
            .map_err(|source| SinkError::Transport {
                url: url.clone(),
                source,
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            warn!("OTLP export failed: {} - {}", status, body);
            return Err(SinkError::Status { status, url, body });
        }

        debug!("OTLP {} export successful", signal);
        Ok(())
    }
}

#[async_trait]
impl TelemetrySink for OtlpHttpSink {
    async fn consume_traces(&self, traces: Traces) -> Result<(), SinkError> {
        self.export("traces", traces.encode_to_vec()).await
    }

    async fn consume_logs(&self, logs: Logs) -> Result<(), SinkError> {
        self.export("logs", logs.encode_to_vec()).await
    }

    async fn consume_metrics(&self, metrics: Metrics) -> Result<(), SinkError> {
        self.export("metrics", metrics.encode_to_vec()).await
    }

    fn name(&self) -> &'static str {
        "otlp-http"
    }
}

/// Keeps every batch in memory
#[derive(Default)]
pub struct CollectingSink {
    traces: Mutex<Vec<Traces>>,
    logs: Mutex<Vec<Logs>>,
    metrics: Mutex<Vec<Metrics>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn traces(&self) -> Vec<Traces> {
        self.traces.lock().clone()
    }

    pub fn logs(&self) -> Vec<Logs> {
        self.logs.lock().clone()
    }

    pub fn metrics(&self) -> Vec<Metrics> {
        self.metrics.lock().clone()
    }
}

#[async_trait]
impl TelemetrySink for CollectingSink {
    async fn consume_traces(&self, traces: Traces) -> Result<(), SinkError> {
        self.traces.lock().push(traces);
        Ok(())
    }

    async fn consume_logs(&self, logs: Logs) -> Result<(), SinkError> {
        self.logs.lock().push(logs);
        Ok(())
    }

    async fn consume_metrics(&self, metrics: Metrics) -> Result<(), SinkError> {
        self.metrics.lock().push(metrics);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "collecting"
    }
}
