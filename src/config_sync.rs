//! Config Synchronizer (§4.4): pulls PLC/tag configuration from the portal
//! and reconciles it against the Local Store, publishing a reconfigure
//! event to the Polling Engine on every successful apply.

use crate::error::{GatewayError, Result, TransientError};
use crate::store::schema::{AuditSource, DataType, PlcDeviceRow, PlcStatus, Protocol, TagDefinitionRow};
use crate::store::Store;
use crate::util::now_ms;
use reqwest::Client;
use serde::Deserialize;
use std::str::FromStr;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

const SYNC_PERIOD: Duration = Duration::from_secs(30);

fn default_true() -> bool {
    true
}

fn default_scaling_factor() -> f64 {
    1.0
}

#[derive(Debug, Deserialize)]
struct PortalScaling {
    #[serde(default)]
    enabled: bool,
    #[serde(default = "default_scaling_factor")]
    factor: f64,
    #[serde(default)]
    offset: f64,
}

#[derive(Debug, Deserialize)]
struct PortalTag {
    id: String,
    name: String,
    address: String,
    data_type: String,
    #[serde(default)]
    scan_class: Option<String>,
    #[serde(default = "default_true")]
    active: bool,
    #[serde(default)]
    unit: Option<String>,
    #[serde(default)]
    scaling: Option<PortalScaling>,
    #[serde(default)]
    min_value: Option<f64>,
    #[serde(default)]
    max_value: Option<f64>,
    #[serde(default)]
    deadband: Option<f64>,
    #[serde(default)]
    log_enabled: bool,
    #[serde(default)]
    alarm_enabled: bool,
    #[serde(default)]
    alarm_config: Option<serde_json::Value>,
    #[serde(default)]
    local_only: bool,
}

#[derive(Debug, Deserialize)]
struct PortalPlc {
    id: String,
    name: String,
    protocol: String,
    #[serde(default = "default_true")]
    enabled: bool,
    #[serde(default)]
    connection_config: serde_json::Value,
    #[serde(default)]
    scan_interval_ms: Option<u64>,
    #[serde(default)]
    timeout_ms: Option<u64>,
    #[serde(default)]
    retry_count: Option<u32>,
    #[serde(default)]
    local_only: bool,
    #[serde(default)]
    tags: Vec<PortalTag>,
}

#[derive(Debug, Deserialize)]
struct ConfigDocument {
    plcs: Vec<PortalPlc>,
    #[serde(default)]
    #[allow(dead_code)]
    settings: serde_json::Value,
}

/// Cheap handle other subsystems (Portal Channel, Heartbeat) use to force
/// an out-of-cycle sync (§4.4: "on demand when the Portal Channel delivers
/// a config_update or when a heartbeat reports config_update_available").
#[derive(Clone)]
pub struct ConfigSyncHandle {
    trigger_tx: mpsc::Sender<()>,
}

impl ConfigSyncHandle {
    pub async fn trigger(&self) {
        let _ = self.trigger_tx.send(()).await;
    }

    #[cfg(test)]
    pub fn for_test(trigger_tx: mpsc::Sender<()>) -> Self {
        Self { trigger_tx }
    }
}

pub struct ConfigSynchronizer {
    http: Client,
    store: Store,
    config_endpoint: String,
    api_key: String,
    gateway_id: String,
    reconfigure_tx: mpsc::Sender<()>,
    trigger_rx: mpsc::Receiver<()>,
}

impl ConfigSynchronizer {
    pub fn new(
        http: Client,
        store: Store,
        config_endpoint: String,
        api_key: String,
        gateway_id: String,
        reconfigure_tx: mpsc::Sender<()>,
    ) -> (Self, ConfigSyncHandle) {
        let (trigger_tx, trigger_rx) = mpsc::channel(8);
        (
            Self {
                http,
                store,
                config_endpoint,
                api_key,
                gateway_id,
                reconfigure_tx,
                trigger_rx,
            },
            ConfigSyncHandle { trigger_tx },
        )
    }

    /// One GET + reconcile + `config_version` bump (§4.4 steps 1-4).
    pub async fn sync_once(&self) -> Result<()> {
        let response = self
            .http
            .get(&self.config_endpoint)
            .bearer_auth(&self.api_key)
            .header("X-Gateway-ID", &self.gateway_id)
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

        let doc: ConfigDocument = response
            .json()
            .await
            .map_err(|e| GatewayError::Decode(format!("config document: {e}")))?;

        let now = now_ms();
        for plc in doc.plcs {
            // §3 invariant: a device marked local_only is ignored by
            // reconciliation (only applies if it's already local_only in
            // the store -- a portal payload declaring local_only=true is
            // honored as a hint but still upserted once, since the portal
            // has no local rows to clobber yet).
            if let Some(existing) = self.store.get_device(&plc.id).await? {
                if existing.local_only {
                    continue;
                }
            }

            let protocol = Protocol::from_str(&plc.protocol).unwrap_or(Protocol::Opcua);
            let device = PlcDeviceRow {
                id: plc.id.clone(),
                name: plc.name,
                protocol,
                enabled: plc.enabled,
                connection_config: plc.connection_config,
                scan_interval_ms: plc.scan_interval_ms.unwrap_or(1000),
                timeout_ms: plc.timeout_ms.unwrap_or(3000),
                retry_count: plc.retry_count.unwrap_or(3),
                status: PlcStatus::Disconnected,
                last_connect_time: None,
                last_error: None,
                stats: serde_json::Value::Null,
                portal_sync: true,
                local_only: plc.local_only,
            };
            self.store.upsert_device(device, AuditSource::Portal, now).await?;

            for tag in plc.tags {
                let data_type = DataType::from_str(&tag.data_type).unwrap_or(DataType::Float64);
                let scaling = tag.scaling.unwrap_or(PortalScaling {
                    enabled: false,
                    factor: 1.0,
                    offset: 0.0,
                });
                let tag_row = TagDefinitionRow {
                    id: tag.id,
                    plc_id: plc.id.clone(),
                    name: tag.name,
                    address: tag.address,
                    data_type,
                    scan_class: tag.scan_class.unwrap_or_else(|| "default".to_string()),
                    active: tag.active,
                    unit: tag.unit,
                    scaling_enabled: scaling.enabled,
                    scaling_factor: scaling.factor,
                    scaling_offset: scaling.offset,
                    min_value: tag.min_value,
                    max_value: tag.max_value,
                    deadband: tag.deadband,
                    log_enabled: tag.log_enabled,
                    alarm_enabled: tag.alarm_enabled,
                    alarm_config: tag.alarm_config,
                    last_value: None,
                    last_quality: None,
                    last_timestamp: None,
                    portal_sync: true,
                    local_only: tag.local_only,
                };
                self.store.upsert_tag(tag_row, AuditSource::Portal, now).await?;
            }
        }

        self.store.put_gateway_config("last_sync", &now.to_string()).await?;
        let new_version = self.store.get_config_version().await? + 1;
        self.store.set_config_version(new_version).await?;

        let _ = self.reconfigure_tx.send(()).await;
        info!(version = new_version, "config_sync: applied portal configuration");
        Ok(())
    }

    /// Runs the 30s periodic sync plus on-demand triggers until cancelled.
    pub async fn run(mut self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(SYNC_PERIOD);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("config_sync: shutting down");
                    return;
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.sync_once().await {
                        warn!(error = %e, "config_sync: periodic sync failed");
                    }
                }
                Some(()) = self.trigger_rx.recv() => {
                    if let Err(e) = self.sync_once().await {
                        warn!(error = %e, "config_sync: triggered sync failed");
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn sync_once_upserts_devices_and_tags_and_bumps_version() {
        let server = MockServer::start().await;
        let body = serde_json::json!({
            "plcs": [{
                "id": "plc-1",
                "name": "Line 1",
                "protocol": "modbus-tcp",
                "enabled": true,
                "connection_config": {"host": "10.0.0.5", "port": 502},
                "tags": [{
                    "id": "t-1",
                    "name": "Temperature",
                    "address": "40001",
                    "data_type": "INT16"
                }]
            }],
            "settings": {}
        });
        Mock::given(method("GET"))
            .and(path("/config"))
            .and(header("X-Gateway-ID", "gw-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .mount(&server)
            .await;

        let store = Store::open_in_memory().unwrap();
        let (reconfigure_tx, mut reconfigure_rx) = mpsc::channel(8);
        let (sync, _handle) = ConfigSynchronizer::new(
            Client::new(),
            store.clone(),
            format!("{}/config", server.uri()),
            "key".to_string(),
            "gw-1".to_string(),
            reconfigure_tx,
        );

        sync.sync_once().await.unwrap();

        assert!(reconfigure_rx.try_recv().is_ok());
        let devices = store.list_devices(false).await.unwrap();
        assert_eq!(devices.len(), 1);
        let tags = store.list_tags(Some("plc-1"), false).await.unwrap();
        assert_eq!(tags.len(), 1);
        assert_eq!(store.get_config_version().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn local_only_devices_are_skipped() {
        let server = MockServer::start().await;
        let body = serde_json::json!({
            "plcs": [{"id": "plc-1", "name": "renamed", "protocol": "opcua", "tags": []}],
            "settings": {}
        });
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .mount(&server)
            .await;

        let store = Store::open_in_memory().unwrap();
        store
            .upsert_device(
                PlcDeviceRow {
                    id: "plc-1".into(),
                    name: "original".into(),
                    protocol: Protocol::Opcua,
                    enabled: true,
                    connection_config: serde_json::Value::Null,
                    scan_interval_ms: 1000,
                    timeout_ms: 3000,
                    retry_count: 3,
                    status: PlcStatus::Disconnected,
                    last_connect_time: None,
                    last_error: None,
                    stats: serde_json::Value::Null,
                    portal_sync: true,
                    local_only: true,
                },
                AuditSource::Local,
                0,
            )
            .await
            .unwrap();

        let (reconfigure_tx, _reconfigure_rx) = mpsc::channel(8);
        let (sync, _handle) = ConfigSynchronizer::new(
            Client::new(),
            store.clone(),
            server.uri(),
            "key".to_string(),
            "gw-1".to_string(),
            reconfigure_tx,
        );
        sync.sync_once().await.unwrap();

        let device = store.get_device("plc-1").await.unwrap().unwrap();
        assert_eq!(device.name, "original", "local_only device must not be overwritten");
    }
}
