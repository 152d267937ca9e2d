//! Shared fixtures for integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use ci_otel_core::error::ResolveError;
use ci_otel_core::github::LogUrlResolver;
use ci_otel_core::WebhookEvent;
use serde_json::{json, Value};
use std::io::{Cursor, Write};
use std::sync::Once;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use url::Url;
use zip::write::SimpleFileOptions;

/// Initialize logging for tests (only once per test run)
static INIT: Once = Once::new();

pub fn init_test_logging() {
    INIT.call_once(|| {
        use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

        let _ = tracing_subscriber::registry()
            .with(
                tracing_subscriber::fmt::layer()
                    .with_test_writer()
                    .with_target(true)
                    .with_level(true),
            )
            .with(tracing_subscriber::filter::EnvFilter::from_default_env())
            .try_init();
    });
}

/// Zip a set of `(entry name, content)` pairs; names ending in `/` become directories
pub fn build_log_archive(entries: &[(&str, &str)]) -> Vec<u8> {
    let mut buf = Vec::new();
    {
        let mut writer = zip::ZipWriter::new(Cursor::new(&mut buf));
        let options =
            SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated);
        for (name, content) in entries {
            if name.ends_with('/') {
                writer.add_directory(*name, options).unwrap();
            } else {
                writer.start_file(*name, options).unwrap();
                writer.write_all(content.as_bytes()).unwrap();
            }
        }
        writer.finish().unwrap();
    }
    buf
}

/// Serve `body` once over HTTP on an ephemeral port and return its URL
pub async fn serve_archive_once(body: Vec<u8>) -> Url {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut buf = [0u8; 2048];
        let _ = socket.read(&mut buf).await;
        let head = format!(
            "HTTP/1.1 200 OK\r\nContent-Type: application/zip\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
            body.len()
        );
        socket.write_all(head.as_bytes()).await.unwrap();
        socket.write_all(&body).await.unwrap();
        socket.shutdown().await.unwrap();
    });
    Url::parse(&format!("http://{addr}/runs/100/logs.zip?sig=abc")).unwrap()
}

/// Serve one JSON response on an ephemeral port; yields the base URL and,
/// once served, the request line
pub async fn serve_json_once(body: &'static str) -> (String, tokio::task::JoinHandle<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut buf = [0u8; 2048];
        let n = socket.read(&mut buf).await.unwrap_or(0);
        let head = format!(
            "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
            body.len()
        );
        socket.write_all(head.as_bytes()).await.unwrap();
        socket.write_all(body.as_bytes()).await.unwrap();
        socket.shutdown().await.unwrap();
        let request = String::from_utf8_lossy(&buf[..n]).to_string();
        request.lines().next().unwrap_or_default().to_string()
    });
    (format!("http://{addr}"), handle)
}

/// Finished Drone build of `org/app` on `main` with one stage of two steps;
/// the second step is skipped
pub fn drone_build_payload() -> Value {
    json!({
        "event": "build",
        "action": "updated",
        "repo": {
            "id": 1,
            "namespace": "org",
            "name": "app",
            "slug": "org/app",
            "scm": "",
            "git_http_url": "https://git.example/org/app.git",
            "default_branch": "main"
        },
        "build": {
            "id": 42,
            "number": 17,
            "status": "success",
            "event": "push",
            "title": "",
            "message": "Add retries",
            "target": "main",
            "created": 1700000000,
            "started": 1700000001,
            "finished": 1700000060,
            "stages": [
                {"id": 3, "number": 1, "name": "default", "status": "success",
                 "started": 1700000001, "stopped": 1700000060,
                 "steps": [
                    {"id": 8, "step_id": 3, "number": 1, "name": "test", "status": "success",
                     "started": 1700000002, "stopped": 1700000059},
                    {"id": 9, "step_id": 3, "number": 2, "name": "deploy", "status": "skipped"}
                 ]}
            ]
        },
        "system": {"host": "drone.example", "version": "2.20.0"}
    })
}

/// Client for local test servers, immune to proxy settings in the environment
pub fn local_client() -> reqwest::Client {
    reqwest::Client::builder().no_proxy().build().unwrap()
}

/// Resolver that always answers with a fixed URL
pub struct StaticResolver(pub Url);

#[async_trait]
impl LogUrlResolver for StaticResolver {
    async fn resolve(&self, _: &str, _: &str, _: i64, _: i64) -> Result<Url, ResolveError> {
        Ok(self.0.clone())
    }
}

pub fn workflow_run_payload(run_id: i64, attempt: i64, conclusion: &str) -> Value {
    json!({
        "action": "completed",
        "workflow_run": {
            "id": run_id,
            "name": "CI",
            "run_attempt": attempt,
            "head_branch": "main",
            "head_sha": "abc123",
            "status": "completed",
            "conclusion": conclusion,
            "event": "push",
            "run_started_at": "2023-01-01T12:00:00Z",
            "updated_at": "2023-01-01T12:05:00Z"
        },
        "workflow": {"path": ".github/workflows/ci.yml"},
        "repository": {
            "name": "repo",
            "full_name": "org/repo",
            "owner": {"login": "org"},
            "default_branch": "main"
        }
    })
}

pub fn workflow_job_payload(repo: &str, action: &str, labels: &[&str]) -> Value {
    let conclusion = if action == "completed" {
        json!("success")
    } else {
        Value::Null
    };
    let name = repo.rsplit('/').next().unwrap_or(repo);
    json!({
        "action": action,
        "workflow_job": {
            "id": 7,
            "run_id": 100,
            "run_attempt": 1,
            "name": "build",
            "workflow_name": "CI",
            "head_branch": "feature",
            "status": action,
            "conclusion": conclusion,
            "labels": labels,
            "steps": [
                {"name": "Set up job", "number": 1, "status": "completed", "conclusion": "success",
                 "started_at": "2023-01-01T12:00:00Z", "completed_at": "2023-01-01T12:00:02Z"},
                {"name": "Build", "number": 2, "status": "completed", "conclusion": "success",
                 "started_at": "2023-01-01T12:00:02Z", "completed_at": "2023-01-01T12:01:00Z"}
            ]
        },
        "repository": {
            "name": name,
            "full_name": repo,
            "owner": {"login": "org"},
            "default_branch": "main"
        }
    })
}

pub fn event(event_type: &str, payload: &Value) -> WebhookEvent {
    WebhookEvent::parse(event_type, payload.to_string().as_bytes())
        .unwrap()
        .unwrap()
}
