//! Error types for every processing branch
//!
//! Each branch of event handling (traces, logs, metrics) fails independently,
//! so the errors are split along those seams and only joined in
//! [`ReceiverError`] at the orchestration layer.

use std::path::PathBuf;
use thiserror::Error;

/// Structurally invalid input to the identifier deriver
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IdError {
    #[error("job name must not be empty when deriving a job or step span ID")]
    EmptyJobName,

    #[error("step number {step} was given without a job name")]
    StepWithoutJob { step: i64 },

    #[error("derived identifier for {input:?} is all zeroes")]
    ZeroId { input: String },
}

/// Failures while downloading a log archive
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("failed to create temporary file for log archive")]
    TempFile(#[source] std::io::Error),

    #[error("failed to download log archive")]
    Transport(#[from] reqwest::Error),

    #[error("log archive download returned HTTP {status} for {url}")]
    Status {
        status: reqwest::StatusCode,
        url: String,
    },

    #[error("failed to write log archive to temporary file")]
    Write(#[source] std::io::Error),

    #[error("log archive download was cancelled")]
    Cancelled,
}

/// Failures while opening or reading a downloaded archive
#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error("failed to open log archive")]
    Open(#[source] zip::result::ZipError),

    #[error("failed to read archive entry {index}")]
    Entry {
        index: usize,
        #[source]
        source: zip::result::ZipError,
    },
}

/// Why a zip entry could not be mapped to a step number
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StepFileError {
    #[error("skipping system file: {file_name:?}")]
    SystemFile { file_name: String },

    #[error("file name {file_name:?} does not contain job prefix {job_name:?}/")]
    MissingJobPrefix { file_name: String, job_name: String },

    #[error("invalid step number in file name {file_name:?}")]
    InvalidNumber { file_name: String },
}

/// Configuration load and validation failures
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml_ng::Error,
    },

    #[error("invalid configuration: {}", .0.join("; "))]
    Invalid(Vec<String>),
}

/// Failures while resolving a run attempt to its log archive URL
#[derive(Error, Debug)]
pub enum ResolveError {
    #[error("GitHub API token is not set (expected in ${env})")]
    MissingToken { env: String },

    #[error("failed to build GitHub API client")]
    Client(#[source] reqwest::Error),

    #[error("failed to request log archive location")]
    Transport(#[from] reqwest::Error),

    #[error("GitHub API returned HTTP {status} for {url}")]
    Status {
        status: reqwest::StatusCode,
        url: String,
    },

    #[error("GitHub API response for {url} has no usable Location header")]
    MissingLocation { url: String },

    #[error("invalid GitHub API URL")]
    Url(#[from] url::ParseError),
}

/// Failures while fetching step logs from a Drone server
#[derive(Error, Debug)]
pub enum DroneError {
    #[error("Drone API token is not set (expected in ${env})")]
    MissingToken { env: String },

    #[error("Drone server URL is not configured")]
    MissingHost,

    #[error("failed to build Drone API client")]
    Client(#[source] reqwest::Error),

    #[error("failed to request step logs")]
    Transport(#[from] reqwest::Error),

    #[error("Drone API returned HTTP {status} for {url}")]
    Status {
        status: reqwest::StatusCode,
        url: String,
    },

    #[error("failed to decode step logs from {url}")]
    Decode {
        url: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid Drone API URL")]
    Url(#[from] url::ParseError),
}

/// Failures while handing a batch to a telemetry sink
#[derive(Error, Debug)]
pub enum SinkError {
    #[error("failed to send OTLP export request to {url}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("OTLP export to {url} failed with HTTP {status}: {body}")]
    Status {
        status: reqwest::StatusCode,
        url: String,
        body: String,
    },

    #[error("sink rejected batch: {0}")]
    Rejected(String),
}

/// Event payload decoding failures
#[derive(Error, Debug)]
pub enum EventError {
    #[error("failed to decode {event_type} payload")]
    Decode {
        event_type: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Log branch failures; the trace and metric branches never see these
#[derive(Error, Debug)]
pub enum LogsError {
    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Archive(#[from] ArchiveError),

    #[error(transparent)]
    Id(#[from] IdError),

    #[error(transparent)]
    Drone(#[from] DroneError),

    #[error("log archive processing task failed: {0}")]
    Task(String),
}

/// Top-level error for one event-processing branch
#[derive(Error, Debug)]
pub enum ReceiverError {
    #[error("trace processing failed")]
    Traces(#[from] IdError),

    #[error("log processing failed")]
    Logs(#[from] LogsError),

    #[error("failed to consume telemetry")]
    Sink(#[from] SinkError),
}
