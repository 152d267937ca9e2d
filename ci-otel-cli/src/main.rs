//! ci-otel - replay GitHub Actions and Drone webhook payloads into OpenTelemetry
//!
//! Reads one delivery from a file or stdin, runs it through the receiver and
//! either exports the result over OTLP/HTTP or prints what would be sent.

use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use ci_otel_core::drone::{self, DroneApiClient, DroneLogClient};
use ci_otel_core::github::{GitHubLogUrlResolver, LogUrlResolver};
use ci_otel_core::metrics::CounterCache;
use ci_otel_core::telemetry::{CollectingSink, OtlpHttpSink, TelemetrySink};
use ci_otel_core::{
    ids, DroneEvent, DroneReceiver, HandleOutcome, Receiver, ReceiverConfig, Sinks, WebhookEvent,
};

mod summary;

/// Log levels
#[derive(Debug, Clone, ValueEnum)]
enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    fn to_filter_directive(&self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

#[derive(Parser, Debug)]
#[clap(
    name = "ci-otel",
    about = "Turn GitHub Actions and Drone webhook events into traces, logs and metrics",
    version
)]
struct Cli {
    #[clap(subcommand)]
    command: Command,

    /// Set log level (RUST_LOG directives are added on top)
    #[clap(long, default_value = "info", global = true)]
    log_level: LogLevel,

    /// Emit logs as JSON
    #[clap(long, global = true)]
    json_logs: bool,
}

#[derive(Parser, Debug)]
enum Command {
    /// Process one webhook delivery
    Process {
        /// Value of the X-GitHub-Event header (workflow_run or workflow_job), or drone
        #[clap(long)]
        event_type: String,

        /// Payload file, or '-' for stdin
        #[clap(long, default_value = "-")]
        payload: PathBuf,

        /// Receiver configuration file (YAML)
        #[clap(long)]
        config: Option<PathBuf>,

        /// OTLP/HTTP endpoint, e.g. http://localhost:4318; prints a summary when absent
        #[clap(long)]
        otlp_endpoint: Option<String>,

        /// Timeout for each OTLP export request, in seconds
        #[clap(long, default_value_t = 10)]
        export_timeout: u64,

        /// Skip log download even when an API token is available
        #[clap(long)]
        no_logs: bool,

        /// Print the summary as JSON
        #[clap(long)]
        json: bool,
    },

    /// Print the deterministic trace and span IDs for a run, job or step
    Ids {
        #[clap(long)]
        run_id: i64,

        #[clap(long, default_value_t = 1)]
        attempt: i64,

        #[clap(long)]
        job: Option<String>,

        #[clap(long, requires = "job")]
        step: Option<i64>,
    },

    /// Validate a receiver configuration file
    ValidateConfig {
        /// Configuration file (YAML)
        path: PathBuf,
    },
}

fn initialize_tracing(log_level: &LogLevel, json_logs: bool) {
    let mut filter = EnvFilter::new(log_level.to_filter_directive());
    if let Ok(extra) = std::env::var("RUST_LOG") {
        for directive in extra.split(',').filter(|d| !d.is_empty()) {
            if let Ok(parsed) = directive.parse() {
                filter = filter.add_directive(parsed);
            }
        }
    }

    if json_logs {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(true)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    initialize_tracing(&cli.log_level, cli.json_logs);

    match cli.command {
        Command::Process {
            event_type,
            payload,
            config,
            otlp_endpoint,
            export_timeout,
            no_logs,
            json,
        } => {
            process_command(ProcessArgs {
                event_type,
                payload,
                config,
                otlp_endpoint,
                export_timeout: Duration::from_secs(export_timeout),
                no_logs,
                json,
            })
            .await
        }
        Command::Ids {
            run_id,
            attempt,
            job,
            step,
        } => ids_command(run_id, attempt, job.as_deref(), step),
        Command::ValidateConfig { path } => validate_config_command(&path),
    }
}

struct ProcessArgs {
    event_type: String,
    payload: PathBuf,
    config: Option<PathBuf>,
    otlp_endpoint: Option<String>,
    export_timeout: Duration,
    no_logs: bool,
    json: bool,
}

fn load_config(path: Option<&Path>) -> Result<ReceiverConfig> {
    match path {
        Some(path) => ReceiverConfig::load(path)
            .with_context(|| format!("Failed to load configuration from {}", path.display())),
        None => {
            debug!("No configuration file given, using defaults");
            Ok(ReceiverConfig::default())
        }
    }
}

fn read_payload(path: &Path) -> Result<Vec<u8>> {
    if path == Path::new("-") {
        let mut buf = Vec::new();
        io::stdin()
            .read_to_end(&mut buf)
            .context("Failed to read payload from stdin")?;
        Ok(buf)
    } else {
        fs::read(path).with_context(|| format!("Failed to read payload file {}", path.display()))
    }
}

fn cancel_on_interrupt() -> CancellationToken {
    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupted, cancelling");
            on_interrupt.cancel();
        }
    });
    cancel
}

async fn process_command(args: ProcessArgs) -> Result<()> {
    let config = load_config(args.config.as_deref())?;
    let payload = read_payload(&args.payload)?;

    let collector = Arc::new(CollectingSink::new());
    let sink: Arc<dyn TelemetrySink> = match &args.otlp_endpoint {
        Some(endpoint) => {
            let exporter = OtlpHttpSink::new(endpoint, args.export_timeout)
                .context("Failed to create OTLP exporter")?;
            Arc::new(exporter)
        }
        None => collector.clone() as Arc<dyn TelemetrySink>,
    };

    let outcome = if args.event_type == drone::event::EVENT_TYPE {
        let event = DroneEvent::parse(&payload).context("Failed to parse drone payload")?;
        process_drone(&args, config, sink, &event).await
    } else {
        let Some(event) = WebhookEvent::parse(&args.event_type, &payload)
            .with_context(|| format!("Failed to parse {} payload", args.event_type))?
        else {
            warn!(event = %args.event_type, "Skipping unsupported event type");
            return Ok(());
        };
        process_github(&args, config, sink, &event).await?
    };

    let report = summary::Report::new(&outcome, &collector, args.otlp_endpoint.as_deref());
    if args.json {
        println!("{}", serde_json::to_string_pretty(&report.to_json())?);
    } else {
        println!("{}", report.table());
    }

    if outcome.has_failures() {
        bail!("One or more telemetry branches failed");
    }
    Ok(())
}

async fn process_github(
    args: &ProcessArgs,
    config: ReceiverConfig,
    sink: Arc<dyn TelemetrySink>,
    event: &WebhookEvent,
) -> Result<HandleOutcome> {
    let resolver: Option<Arc<dyn LogUrlResolver>> = if args.no_logs {
        None
    } else {
        match GitHubLogUrlResolver::from_env(&config.github_api) {
            Ok(resolver) => Some(Arc::new(resolver) as Arc<dyn LogUrlResolver>),
            Err(err) => {
                warn!("Log archive download disabled: {}", err);
                None
            }
        }
    };

    let mut sinks = Sinks::all(sink);
    if resolver.is_none() {
        sinks.logs = None;
    }

    let cache = Arc::new(CounterCache::with_capacity(config.counter_cache_capacity));
    let receiver =
        Receiver::new(config, cache, resolver, sinks).context("Failed to create receiver")?;
    Ok(receiver.handle(event, &cancel_on_interrupt()).await)
}

async fn process_drone(
    args: &ProcessArgs,
    config: ReceiverConfig,
    sink: Arc<dyn TelemetrySink>,
    event: &DroneEvent,
) -> HandleOutcome {
    let client: Option<Arc<dyn DroneLogClient>> = if args.no_logs {
        None
    } else {
        match DroneApiClient::from_env(&config.drone, config.effective_download_timeout()) {
            Ok(client) => Some(Arc::new(client) as Arc<dyn DroneLogClient>),
            Err(err) => {
                warn!("Drone step log download disabled: {}", err);
                None
            }
        }
    };

    let mut sinks = Sinks::all(sink);
    sinks.metrics = None;
    if client.is_none() {
        sinks.logs = None;
    }

    let receiver = DroneReceiver::new(config, client, sinks);
    receiver.handle(event, &cancel_on_interrupt()).await
}

fn ids_command(run_id: i64, attempt: i64, job: Option<&str>, step: Option<i64>) -> Result<()> {
    let trace_id = ids::derive_trace_id(run_id, attempt)?;
    let span_id = ids::derive_span_id(run_id, attempt, job, step)?;
    println!("trace_id: {trace_id}");
    println!("span_id:  {span_id}");
    Ok(())
}

fn validate_config_command(path: &Path) -> Result<()> {
    let config = ReceiverConfig::load(path)
        .with_context(|| format!("Invalid configuration in {}", path.display()))?;
    println!("Configuration is valid");
    println!(
        "  counter cache capacity: {}\n  max log entry bytes:    {}\n  download timeout:       {:?}",
        config.counter_cache_capacity,
        config.max_log_entry_bytes,
        config.effective_download_timeout(),
    );
    Ok(())
}
