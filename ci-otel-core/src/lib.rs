//! GitHub Actions webhook telemetry
//!
//! Turns `workflow_run` and `workflow_job` webhook deliveries into OTLP
//! traces, logs and metrics:
//!
//! - [`ids`] derives trace and span IDs from run identity, so retried
//!   deliveries coalesce into one trace
//! - [`logs`] downloads a run's log archive and folds each step log into
//!   timestamped records
//! - [`metrics`] keeps LRU-bounded counters that always emit the full
//!   status and conclusion cross product
//! - [`receiver`] wires the branches to [`telemetry::TelemetrySink`]s
//! - [`drone`] turns finished Drone builds into traces and step logs

pub mod config;
pub mod drone;
pub mod error;
pub mod event;
pub mod github;
pub mod ids;
pub mod logs;
pub mod metrics;
pub mod receiver;
pub mod telemetry;
pub mod traces;

pub use config::ReceiverConfig;
pub use drone::{DroneEvent, DroneReceiver};
pub use error::ReceiverError;
pub use event::WebhookEvent;
pub use receiver::{BranchOutcome, HandleOutcome, Receiver, Sinks};
