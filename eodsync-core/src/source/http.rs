//! HTTP snapshot client.
//!
//! Downloads dated archives with a per-request timeout and bounded retries
//! (exponential backoff) for connection failures, timeouts, 429 and 5xx.
//! A 404 means the archive does not exist for that date and is never retried.

use super::archive;
use super::layout::SnapshotLayout;
use super::{FetchError, SnapshotSource};
use crate::config::SyncConfig;
use crate::domain::{FetchMode, SnapshotBatch, SourceKind};
use chrono::NaiveDate;
use reqwest::StatusCode;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, warn};

/// Fetches snapshot archives over HTTP.
pub struct HttpSnapshotClient {
    client: reqwest::blocking::Client,
    transaction: SnapshotLayout,
    index: SnapshotLayout,
    max_retries: u32,
    base_delay: Duration,
}

/// What a single attempt concluded.
enum Attempt {
    Done(Vec<u8>),
    Retry(String),
}

impl HttpSnapshotClient {
    pub fn from_config(config: &SyncConfig) -> Result<Self, FetchError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(config.fetch.timeout())
            .user_agent(config.fetch.user_agent.clone())
            .build()
            .map_err(|e| FetchError::transport("-", format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            transaction: SnapshotLayout::new(config.transaction.clone()),
            index: SnapshotLayout::new(config.index.clone()),
            max_retries: config.fetch.max_retries,
            base_delay: config.fetch.base_delay(),
        })
    }

    fn layout(&self, family: SourceKind) -> &SnapshotLayout {
        match family {
            SourceKind::Transaction => &self.transaction,
            SourceKind::Index => &self.index,
        }
    }

    /// Download with retry.
    fn download(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let mut last_error = String::new();

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = self.base_delay * 2u32.pow(attempt - 1);
                warn!(url, attempt, ?delay, error = %last_error, "retrying download");
                std::thread::sleep(delay);
            }

            match self.attempt(url)? {
                Attempt::Done(bytes) => return Ok(bytes),
                Attempt::Retry(message) => last_error = message,
            }
        }

        Err(FetchError::transport(
            url,
            format!("gave up after {} attempts: {last_error}", self.max_retries + 1),
        ))
    }

    fn attempt(&self, url: &str) -> Result<Attempt, FetchError> {
        let resp = match self.client.get(url).send() {
            Ok(resp) => resp,
            Err(e) if e.is_timeout() || e.is_connect() => return Ok(Attempt::Retry(e.to_string())),
            Err(e) => return Err(FetchError::transport(url, e)),
        };

        let status = resp.status();
        if status == StatusCode::NOT_FOUND {
            return Err(FetchError::NotYetPublished {
                url: url.to_string(),
            });
        }
        if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            return Ok(Attempt::Retry(format!("HTTP {status}")));
        }
        if !status.is_success() {
            return Err(FetchError::transport(url, format!("HTTP {status}")));
        }

        match resp.bytes() {
            Ok(body) => Ok(Attempt::Done(body.to_vec())),
            Err(e) if e.is_timeout() => Ok(Attempt::Retry(e.to_string())),
            Err(e) => Err(FetchError::transport(url, e)),
        }
    }
}

impl SnapshotSource for HttpSnapshotClient {
    fn name(&self) -> &str {
        "http"
    }

    fn fetch(
        &self,
        family: SourceKind,
        date: NaiveDate,
        mode: FetchMode,
        scratch: &Path,
    ) -> Result<SnapshotBatch, FetchError> {
        let layout = self.layout(family);
        let url = layout.url(date, mode);
        debug!(%family, %date, %mode, url = %url, "fetching snapshot");

        let bytes = self.download(&url)?;
        archive::unpack(
            scratch,
            family,
            date,
            mode,
            &url,
            &bytes,
            layout.tables(date, mode),
        )
    }
}
