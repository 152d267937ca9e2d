//! Log archive download
//!
//! Archives scale with step count and verbosity, so the body is streamed to an
//! anonymous temporary file rather than buffered. The file has no name on
//! disk and is released when the returned [`DownloadedArchive`] drops, which
//! covers success, decode failure, consumer error and cancellation alike.

use futures::StreamExt;
use std::fs::File;
use std::io::{Seek, SeekFrom};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::error::FetchError;

/// A fully downloaded, randomly seekable archive
#[derive(Debug)]
pub struct DownloadedArchive {
    file: File,
    size: u64,
}

impl DownloadedArchive {
    /// Bytes written to the temporary file
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Consume into the underlying file, positioned at the start
    pub fn into_file(self) -> File {
        self.file
    }
}

/// Downloads log archives from time-limited URLs
#[derive(Clone)]
pub struct ArchiveFetcher {
    client: reqwest::Client,
}

impl ArchiveFetcher {
    /// Create a fetcher whose downloads time out after `timeout`
    pub fn new(timeout: Duration) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("ci-otel/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()?;
        Ok(Self { client })
    }

    /// Create a fetcher around an existing client
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    /// Download `url` into a temporary file.
    ///
    /// Transport errors and non-2xx statuses are returned as-is; there is no
    /// local retry. Cancelling `cancel` aborts the transfer and the partial
    /// file is dropped before this returns.
    pub async fn fetch(
        &self,
        url: &str,
        cancel: &CancellationToken,
    ) -> Result<DownloadedArchive, FetchError> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!("Log archive download cancelled");
                Err(FetchError::Cancelled)
            }
            result = self.download(url) => result,
        }
    }

    async fn download(&self, url: &str) -> Result<DownloadedArchive, FetchError> {
        let temp = tempfile::tempfile().map_err(|err| {
            error!("Failed to create temp file: {}", err);
            FetchError::TempFile(err)
        })?;
        let mut out = tokio::fs::File::from_std(temp);

        let response = self.client.get(url).send().await.map_err(|err| {
            error!("Failed to download logs: {}", err);
            FetchError::Transport(err)
        })?;

        if !response.status().is_success() {
            return Err(FetchError::Status {
                status: response.status(),
                url: redact_query(url),
            });
        }

        let mut size = 0u64;
        let mut body = response.bytes_stream();
        while let Some(chunk) = body.next().await {
            let chunk = chunk?;
            out.write_all(&chunk).await.map_err(FetchError::Write)?;
            size += chunk.len() as u64;
        }
        out.flush().await.map_err(FetchError::Write)?;

        let mut file = out.into_std().await;
        file.seek(SeekFrom::Start(0)).map_err(FetchError::Write)?;

        debug!(bytes = size, "Downloaded log archive");
        Ok(DownloadedArchive { file, size })
    }
}

/// Strip the signed query string from a download URL before logging it
fn redact_query(url: &str) -> String {
    match url.split_once('?') {
        Some((base, _)) => format!("{base}?<redacted>"),
        None => url.to_string(),
    }
}
