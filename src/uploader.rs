//! Uploader (§4.6): periodically drains the Local Store's `data_buffer`
//! into the portal, compressing and marking batches uploaded atomically on
//! success. Grounded in the original's `upload_data` cycle.

use crate::diagnostics::UploadStats;
use crate::error::{GatewayError, Result, TransientError};
use crate::store::Store;
use crate::util::now_ms;
use flate2::write::GzEncoder;
use flate2::Compression;
use reqwest::Client;
use serde::Serialize;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

const BATCH_LIMIT: i64 = 1000;

#[derive(Serialize)]
struct SamplePayload {
    tag_id: String,
    value: f64,
    quality: u8,
    timestamp: i64,
}

#[derive(Serialize)]
struct UploadBatch {
    gateway_id: String,
    batch_id: Uuid,
    timestamp: i64,
    data: Vec<SamplePayload>,
}

pub struct Uploader {
    http: Client,
    store: Store,
    data_endpoint: String,
    api_key: String,
    gateway_id: String,
    compression_enabled: bool,
    upload_interval: Duration,
    stats: Arc<UploadStats>,
}

impl Uploader {
    pub fn new(
        http: Client,
        store: Store,
        data_endpoint: String,
        api_key: String,
        gateway_id: String,
        compression_enabled: bool,
        upload_interval: Duration,
    ) -> Self {
        Self::with_stats(
            http,
            store,
            data_endpoint,
            api_key,
            gateway_id,
            compression_enabled,
            upload_interval,
            Arc::new(UploadStats::default()),
        )
    }

    /// Like [`Uploader::new`] but shares an existing stats handle, so a
    /// restarted Uploader (§4.8) keeps contributing to the same counters
    /// the Heartbeat already holds a reference to.
    pub fn with_stats(
        http: Client,
        store: Store,
        data_endpoint: String,
        api_key: String,
        gateway_id: String,
        compression_enabled: bool,
        upload_interval: Duration,
        stats: Arc<UploadStats>,
    ) -> Self {
        Self {
            http,
            store,
            data_endpoint,
            api_key,
            gateway_id,
            compression_enabled,
            upload_interval,
            stats,
        }
    }

    pub fn stats(&self) -> Arc<UploadStats> {
        self.stats.clone()
    }

    /// One drain-and-send cycle (§4.6 steps 1-5). Returns the number of
    /// samples uploaded; `0` means there was nothing to send or the send
    /// failed (samples stay in line for the next cycle either way).
    pub async fn run_cycle(&self) -> Result<usize> {
        let samples = self.store.fetch_unuploaded(BATCH_LIMIT).await?;
        if samples.is_empty() {
            return Ok(0);
        }

        let ids: Vec<i64> = samples.iter().map(|s| s.id).collect();
        let batch = UploadBatch {
            gateway_id: self.gateway_id.clone(),
            batch_id: Uuid::new_v4(),
            timestamp: now_ms(),
            data: samples
                .into_iter()
                .map(|s| SamplePayload {
                    tag_id: s.tag_id,
                    value: s.value,
                    quality: s.quality,
                    timestamp: s.timestamp,
                })
                .collect(),
        };

        let body = serde_json::to_vec(&batch).map_err(|e| GatewayError::Decode(format!("upload batch: {e}")))?;

        let mut request = self
            .http
            .post(&self.data_endpoint)
            .bearer_auth(&self.api_key)
            .header("X-Gateway-ID", &self.gateway_id)
            .header("Content-Type", "application/json");

        if self.compression_enabled {
            let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
            encoder
                .write_all(&body)
                .map_err(|e| GatewayError::Decode(format!("gzip encode: {e}")))?;
            let compressed = encoder
                .finish()
                .map_err(|e| GatewayError::Decode(format!("gzip finish: {e}")))?;
            request = request.header("Content-Encoding", "gzip").body(compressed);
        } else {
            request = request.body(body);
        }

        let result = request.send().await;
        let now = now_ms();
        match result {
            Ok(response) if response.status().is_success() => {
                let count = ids.len();
                self.store.mark_uploaded(ids).await?;
                self.stats.record_attempt(true, now);
                debug!(count, "uploader: batch accepted");
                Ok(count)
            }
            Ok(response) => {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                self.stats.record_attempt(false, now);
                warn!(%status, %body, "uploader: portal rejected batch, retrying next cycle");
                Ok(0)
            }
            Err(e) => {
                self.stats.record_attempt(false, now);
                Err(GatewayError::Transient(TransientError::Network(e.to_string())))
            }
        }
    }

    /// Runs the periodic upload loop until cancelled (§4.6: governed by
    /// `settings.uploadInterval`, default 10s).
    pub async fn run(self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.upload_interval);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("uploader: shutting down");
                    return;
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.run_cycle().await {
                        warn!(error = %e, "uploader: cycle failed");
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, header_exists, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn run_cycle_marks_batch_uploaded_on_200() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/data"))
            .and(header("X-Gateway-ID", "gw-1"))
            .and(header_exists("Content-Encoding"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let store = Store::open_in_memory().unwrap();
        store.append_sample("t-1", 42.0, 192, 1000, 1000).await.unwrap();

        let uploader = Uploader::new(
            Client::new(),
            store.clone(),
            format!("{}/data", server.uri()),
            "key".into(),
            "gw-1".into(),
            true,
            Duration::from_secs(10),
        );

        let count = uploader.run_cycle().await.unwrap();
        assert_eq!(count, 1);
        assert_eq!(store.count_unuploaded().await.unwrap(), 0);
        assert_eq!(uploader.stats().success_rate(), 1.0);
    }

    #[tokio::test]
    async fn run_cycle_leaves_samples_unmarked_on_server_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/data"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let store = Store::open_in_memory().unwrap();
        store.append_sample("t-1", 1.0, 192, 1000, 1000).await.unwrap();

        let uploader = Uploader::new(
            Client::new(),
            store.clone(),
            format!("{}/data", server.uri()),
            "key".into(),
            "gw-1".into(),
            false,
            Duration::from_secs(10),
        );

        let count = uploader.run_cycle().await.unwrap();
        assert_eq!(count, 0);
        assert_eq!(store.count_unuploaded().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn run_cycle_is_noop_when_buffer_empty() {
        let store = Store::open_in_memory().unwrap();
        let uploader = Uploader::new(
            Client::new(),
            store,
            "http://localhost/data".into(),
            "key".into(),
            "gw-1".into(),
            true,
            Duration::from_secs(10),
        );
        assert_eq!(uploader.run_cycle().await.unwrap(), 0);
    }
}
