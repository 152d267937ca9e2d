//! Drone builds through the receiver, with step logs served over HTTP

mod common;

use ci_otel_core::drone::{DroneApiClient, DroneLogClient};
use ci_otel_core::telemetry::attributes::{find_int, find_str};
use ci_otel_core::telemetry::CollectingSink;
use ci_otel_core::{ids, BranchOutcome, DroneEvent, DroneReceiver, ReceiverConfig, Sinks};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use common::*;

fn config() -> ReceiverConfig {
    ReceiverConfig::from_yaml("drone:\n  repos:\n    org/app: [main]\n").unwrap()
}

fn event() -> DroneEvent {
    DroneEvent::parse(drone_build_payload().to_string().as_bytes()).unwrap()
}

#[tokio::test]
async fn test_build_spans_and_step_logs() {
    init_test_logging();
    let (host, request) = serve_json_once(
        r#"[{"pos":0,"out":"running tests","time":0},{"pos":1,"out":"ok","time":0},{"pos":2,"out":"done","time":4}]"#,
    )
    .await;
    let client: Arc<dyn DroneLogClient> =
        Arc::new(DroneApiClient::with_client(local_client(), &host, "token"));
    let sink = Arc::new(CollectingSink::new());
    let receiver = DroneReceiver::new(config(), Some(client), Sinks::all(sink.clone()));

    let outcome = receiver.handle(&event(), &CancellationToken::new()).await;
    assert_eq!(outcome.traces.delivered(), 3);
    assert_eq!(outcome.logs.delivered(), 3);
    assert!(matches!(outcome.metrics, BranchOutcome::Skipped(_)));
    assert_eq!(
        request.await.unwrap(),
        "GET /api/repos/org/app/builds/17/logs/1/1 HTTP/1.1"
    );

    let traces = sink.traces();
    let resource = traces[0].resource_spans[0].resource.as_ref().unwrap();
    assert_eq!(find_str(&resource.attributes, "git.repo.name"), Some("org/app"));
    assert_eq!(find_str(&resource.attributes, "git.branch.name"), Some("main"));
    let build_span = &traces[0].resource_spans[0].scope_spans[0].spans[0];
    assert_eq!(build_span.name, "Add retries");
    assert_eq!(build_span.trace_id, ids::drone_trace_id(42).unwrap().to_vec());
    assert_eq!(find_str(&build_span.attributes, "ci.version"), Some("2.20.0"));

    let logs = sink.logs();
    let records = &logs[0].resource_logs[0].scope_logs[0].log_records;
    let step_start = 1_700_000_002u64 * 1_000_000_000;
    assert_eq!(
        records.iter().map(|r| r.time_unix_nano).collect::<Vec<_>>(),
        vec![step_start, step_start + 1, step_start + 4_000_000_000]
    );
    for record in records {
        assert_eq!(record.span_id, ids::drone_step_span_id(42, 1, 1).unwrap().to_vec());
        assert_eq!(find_int(&record.attributes, "ci.drone.build.number"), Some(17));
    }
}

#[tokio::test]
async fn test_redelivery_reuses_trace() {
    init_test_logging();
    let sink = Arc::new(CollectingSink::new());
    let sinks = Sinks {
        traces: Some(sink.clone()),
        ..Default::default()
    };
    let receiver = DroneReceiver::new(config(), None, sinks);

    receiver.handle(&event(), &CancellationToken::new()).await;
    receiver.handle(&event(), &CancellationToken::new()).await;

    let traces = sink.traces();
    assert_eq!(traces.len(), 2);
    assert_eq!(traces[0], traces[1]);
}
