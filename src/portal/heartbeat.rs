//! Heartbeat (§4.7): periodic liveness POST carrying real computed metrics,
//! the fallback channel for config-update notification when the push
//! channel is down or absent.

use crate::config_sync::ConfigSyncHandle;
use crate::diagnostics::{ScanStats, UploadStats};
use crate::error::{GatewayError, Result, TransientError};
use crate::store::schema::PlcStatus;
use crate::store::Store;
use crate::util::now_ms;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use sysinfo::{CpuExt, DiskExt, System, SystemExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const PERIOD: Duration = Duration::from_secs(30);

#[derive(Serialize)]
struct Metrics {
    cpu_usage: f32,
    memory_usage: f32,
    disk_usage: f32,
    plcs_connected: i64,
    tags_active: i64,
    data_points_buffered: i64,
    last_upload: Option<i64>,
    upload_success_rate: f64,
    average_scan_time_ms: f64,
}

#[derive(Serialize)]
struct HeartbeatBody {
    gateway_id: String,
    timestamp: i64,
    uptime_s: u64,
    status: &'static str,
    metrics: Metrics,
}

#[derive(Deserialize, Default)]
struct HeartbeatResponse {
    #[serde(default)]
    config_update_available: bool,
}

pub struct Heartbeat {
    http: Client,
    store: Store,
    heartbeat_endpoint: String,
    api_key: String,
    gateway_id: String,
    upload_stats: Arc<UploadStats>,
    scan_stats: Arc<ScanStats>,
    config_sync: ConfigSyncHandle,
    started_at: Instant,
    system: std::sync::Mutex<System>,
}

impl Heartbeat {
    pub fn new(
        http: Client,
        store: Store,
        heartbeat_endpoint: String,
        api_key: String,
        gateway_id: String,
        upload_stats: Arc<UploadStats>,
        scan_stats: Arc<ScanStats>,
        config_sync: ConfigSyncHandle,
    ) -> Self {
        Self {
            http,
            store,
            heartbeat_endpoint,
            api_key,
            gateway_id,
            upload_stats,
            scan_stats,
            config_sync,
            started_at: Instant::now(),
            system: std::sync::Mutex::new(System::new_all()),
        }
    }

    async fn collect_metrics(&self) -> Result<Metrics> {
        let devices = self.store.list_devices(false).await?;
        let plcs_connected = devices.iter().filter(|d| d.status == PlcStatus::Connected).count() as i64;
        let tags_active = self.store.list_tags(None, true).await?.len() as i64;
        let data_points_buffered = self.store.count_unuploaded().await?;

        let (cpu_usage, memory_usage, disk_usage) = {
            let mut sys = self.system.lock().expect("sysinfo mutex poisoned");
            sys.refresh_cpu();
            sys.refresh_memory();
            sys.refresh_disks();
            let cpu_usage = sys.global_cpu_info().cpu_usage();
            let memory_usage = if sys.total_memory() > 0 {
                sys.used_memory() as f32 / sys.total_memory() as f32 * 100.0
            } else {
                0.0
            };
            let disk_usage = sys
                .disks()
                .first()
                .map(|d| {
                    let total = d.total_space();
                    if total == 0 {
                        0.0
                    } else {
                        (total - d.available_space()) as f32 / total as f32 * 100.0
                    }
                })
                .unwrap_or(0.0);
            (cpu_usage, memory_usage, disk_usage)
        };

        Ok(Metrics {
            cpu_usage,
            memory_usage,
            disk_usage,
            plcs_connected,
            tags_active,
            data_points_buffered,
            last_upload: self.upload_stats.last_success_ms(),
            upload_success_rate: self.upload_stats.success_rate(),
            average_scan_time_ms: self.scan_stats.average_scan_ms(),
        })
    }

    /// One heartbeat POST. On `config_update_available`, triggers a sync.
    pub async fn beat(&self) -> Result<()> {
        let metrics = self.collect_metrics().await?;
        let body = HeartbeatBody {
            gateway_id: self.gateway_id.clone(),
            timestamp: now_ms(),
            uptime_s: self.started_at.elapsed().as_secs(),
            status: "online",
            metrics,
        };

        let response = self
            .http
            .post(&self.heartbeat_endpoint)
            .bearer_auth(&self.api_key)
            .header("X-Gateway-ID", &self.gateway_id)
            .json(&body)
            .send()
            .await
            .map_err(|e| GatewayError::Transient(TransientError::Network(e.to_string())))?;

        if !response.status().is_success() {
            let status = response.status();
            return Err(GatewayError::Transient(TransientError::PortalServerError {
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            }));
        }

        let parsed: HeartbeatResponse = response.json().await.unwrap_or_default();
        if parsed.config_update_available {
            debug!("heartbeat: portal reports a config update, triggering sync");
            self.config_sync.trigger().await;
        }
        Ok(())
    }

    pub async fn run(self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(PERIOD);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("heartbeat: shutting down");
                    return;
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.beat().await {
                        warn!(error = %e, "heartbeat: cycle failed");
                    }
                }
            }
        }
    }
}
