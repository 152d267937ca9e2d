//! Human and JSON summaries of one processed event

use serde_json::{json, Value};
use tabled::{
    settings::{object::Rows, Alignment, Modify, Style},
    Table, Tabled,
};

use ci_otel_core::telemetry::{data_point_count, log_record_count, span_count, CollectingSink};
use ci_otel_core::{BranchOutcome, HandleOutcome};

#[derive(Tabled)]
struct BranchRow {
    #[tabled(rename = "Signal")]
    signal: &'static str,
    #[tabled(rename = "Outcome")]
    outcome: String,
    #[tabled(rename = "Items")]
    items: usize,
    #[tabled(rename = "Detail")]
    detail: String,
}

pub struct Report {
    rows: Vec<BranchRow>,
    destination: String,
}

impl Report {
    pub fn new(outcome: &HandleOutcome, collector: &CollectingSink, endpoint: Option<&str>) -> Self {
        // Items come from the collector when nothing was exported
        let collected = endpoint.is_none();
        let rows = vec![
            row(
                "traces",
                &outcome.traces,
                collected.then(|| collector.traces().iter().map(span_count).sum()),
            ),
            row(
                "logs",
                &outcome.logs,
                collected.then(|| collector.logs().iter().map(log_record_count).sum()),
            ),
            row(
                "metrics",
                &outcome.metrics,
                collected.then(|| collector.metrics().iter().map(data_point_count).sum()),
            ),
        ];
        Self {
            rows,
            destination: endpoint.unwrap_or("in-memory").to_string(),
        }
    }

    pub fn table(&self) -> String {
        let table = Table::new(&self.rows)
            .with(Style::rounded())
            .with(Modify::new(Rows::first()).with(Alignment::center()))
            .to_string();
        format!("Destination: {}\n{}", self.destination, table)
    }

    pub fn to_json(&self) -> Value {
        let branches: Vec<Value> = self
            .rows
            .iter()
            .map(|r| {
                json!({
                    "signal": r.signal,
                    "outcome": r.outcome,
                    "items": r.items,
                    "detail": r.detail,
                })
            })
            .collect();
        json!({
            "destination": self.destination,
            "branches": branches,
        })
    }
}

fn row(signal: &'static str, outcome: &BranchOutcome, collected: Option<usize>) -> BranchRow {
    let (label, detail) = match outcome {
        BranchOutcome::Disabled => ("disabled", String::new()),
        BranchOutcome::Skipped(reason) => ("skipped", reason.to_string()),
        BranchOutcome::Delivered(_) => ("delivered", String::new()),
        BranchOutcome::Failed(err) => ("failed", error_chain(err)),
    };
    BranchRow {
        signal,
        outcome: label.to_string(),
        items: collected.unwrap_or_else(|| outcome.delivered()),
        detail,
    }
}

fn error_chain(err: &dyn std::error::Error) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}
