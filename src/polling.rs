//! Polling Engine (§4.5): one scan loop per enabled PLC, driving drivers
//! through the adapter contract, applying scaling, and enqueueing samples.
//! Grounded in the teacher's `main.rs` poll loop (non-drifting tick via
//! `last_tick + interval`), generalized to own one real driver instance per
//! device instead of reaching into a shared `HashMap` from outside.

use crate::diagnostics::ScanStats;
use crate::drivers::registry::build_driver;
use crate::drivers::scaling::Scaling;
use crate::drivers::traits::{DeviceDriver, DriverConfig, TagRequest};
use crate::store::schema::{PlcDeviceRow, PlcStatus, TagDefinitionRow};
use crate::store::Store;
use crate::tags::engine::TagEngine;
use crate::tags::structures::{Tag, TagMetadata, ValueVariant};
use crate::util::now_ms;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, RwLock};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const BATCH_THRESHOLD: usize = 10;
const MAX_BACKOFF: Duration = Duration::from_secs(60);

/// An operator-initiated action routed into the loop that owns the driver
/// (§5: "operator-initiated writes ... dispatched into the owning loop via
/// a bounded command queue rather than called directly").
pub enum PlcCommand {
    WriteTag {
        address: String,
        value: ValueVariant,
        respond: oneshot::Sender<bool>,
    },
}

struct LoopHandle {
    cancel: CancellationToken,
    command_tx: mpsc::Sender<PlcCommand>,
    join: JoinHandle<()>,
    protocol: String,
    connection_config: serde_json::Value,
}

type CommandMap = Arc<RwLock<HashMap<String, mpsc::Sender<PlcCommand>>>>;

/// Cheap handle the Portal Channel / REST API use to dispatch
/// operator-initiated writes into the loop owning a device, without
/// sharing the engine's reconcile state (§5).
#[derive(Clone)]
pub struct PollingHandle {
    commands: CommandMap,
}

impl PollingHandle {
    pub async fn write_tag(&self, device_id: &str, address: String, value: ValueVariant) -> Option<bool> {
        let command_tx = self.commands.read().await.get(device_id)?.clone();
        let (tx, rx) = oneshot::channel();
        command_tx
            .send(PlcCommand::WriteTag {
                address,
                value,
                respond: tx,
            })
            .await
            .ok()?;
        rx.await.ok()
    }
}

pub struct PollingEngine {
    store: Store,
    tag_engine: Arc<TagEngine>,
    reconfigure_rx: mpsc::Receiver<()>,
    scan_stats: Arc<ScanStats>,
    loops: HashMap<String, LoopHandle>,
    commands: CommandMap,
}

impl PollingEngine {
    pub fn new(
        store: Store,
        tag_engine: Arc<TagEngine>,
        reconfigure_rx: mpsc::Receiver<()>,
    ) -> (Self, PollingHandle) {
        let commands: CommandMap = Arc::new(RwLock::new(HashMap::new()));
        let engine = Self {
            store,
            tag_engine,
            reconfigure_rx,
            scan_stats: Arc::new(ScanStats::default()),
            loops: HashMap::new(),
            commands: commands.clone(),
        };
        (engine, PollingHandle { commands })
    }

    pub fn scan_stats(&self) -> Arc<ScanStats> {
        self.scan_stats.clone()
    }

    /// Main entry point: reconcile once up front, then react to
    /// reconfigure events until cancelled (§4.5 reconfigure protocol).
    pub async fn run(mut self, cancel: CancellationToken) {
        if let Err(e) = self.reconcile().await {
            error!(error = %e, "polling: initial reconcile failed");
        }
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    self.stop_all().await;
                    return;
                }
                msg = self.reconfigure_rx.recv() => {
                    match msg {
                        Some(()) => {
                            if let Err(e) = self.reconcile().await {
                                error!(error = %e, "polling: reconcile failed");
                            }
                        }
                        None => {
                            self.stop_all().await;
                            return;
                        }
                    }
                }
            }
        }
    }

    async fn stop_all(&mut self) {
        let ids: Vec<String> = self.loops.keys().cloned().collect();
        for id in ids {
            self.stop_loop(&id).await;
        }
    }

    async fn stop_loop(&mut self, device_id: &str) {
        if let Some(handle) = self.loops.remove(device_id) {
            self.commands.write().await.remove(device_id);
            handle.cancel.cancel();
            if let Err(e) = handle.join.await {
                warn!(device_id, error = %e, "polling: loop task join error");
            }
            self.tag_engine.remove_tags_for_driver(device_id);
            info!(device_id, "polling: loop stopped");
        }
    }

    /// Diffs the Store's device set against the live loop map and
    /// spawns/stops/respawns as needed (§4.5 reconfigure protocol).
    async fn reconcile(&mut self) -> crate::error::Result<()> {
        let devices = self.store.list_devices(false).await?;
        let mut seen = std::collections::HashSet::new();

        for device in &devices {
            seen.insert(device.id.clone());
            let should_run = device.enabled;
            match self.loops.get(&device.id) {
                None => {
                    if should_run {
                        self.spawn_loop(device.clone()).await;
                    }
                }
                Some(handle) => {
                    let changed = handle.protocol != device.protocol.as_str()
                        || handle.connection_config != device.connection_config;
                    if !should_run {
                        self.stop_loop(&device.id).await;
                    } else if changed {
                        self.stop_loop(&device.id).await;
                        self.spawn_loop(device.clone()).await;
                    }
                    // Tag-only changes: nothing to do, picked up next tick.
                }
            }
        }

        // Devices removed from the store entirely (not just disabled).
        let stale: Vec<String> = self
            .loops
            .keys()
            .filter(|id| !seen.contains(*id))
            .cloned()
            .collect();
        for id in stale {
            self.stop_loop(&id).await;
        }
        Ok(())
    }

    async fn spawn_loop(&mut self, device: PlcDeviceRow) {
        let cancel = CancellationToken::new();
        let (command_tx, command_rx) = mpsc::channel(16);
        let store = self.store.clone();
        let tag_engine = self.tag_engine.clone();
        let scan_stats = self.scan_stats.clone();
        let protocol = device.protocol.as_str().to_string();
        let connection_config = device.connection_config.clone();
        let loop_cancel = cancel.clone();
        let device_id = device.id.clone();

        let join = tokio::spawn(async move {
            run_device_loop(store, tag_engine, device, command_rx, scan_stats, loop_cancel).await;
        });

        info!(device_id = %device_id, "polling: loop spawned");
        self.commands.write().await.insert(device_id.clone(), command_tx.clone());
        self.loops.insert(
            device_id,
            LoopHandle {
                cancel,
                command_tx,
                join,
                protocol,
                connection_config,
            },
        );
    }
}

fn driver_config_from_device(device: &PlcDeviceRow) -> DriverConfig {
    let address = device
        .connection_config
        .get("endpoint")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .or_else(|| {
            let host = device.connection_config.get("host")?.as_str()?;
            let port = device.connection_config.get("port").and_then(|v| v.as_u64());
            Some(match port {
                Some(p) => format!("opc.tcp://{host}:{p}/"),
                None => format!("opc.tcp://{host}/"),
            })
        })
        .unwrap_or_else(|| device.id.clone());

    DriverConfig {
        id: device.id.clone(),
        name: device.name.clone(),
        address,
        scan_rate_ms: device.scan_interval_ms,
        timeout_ms: device.timeout_ms,
        retry_count: device.retry_count,
        connection_config: device.connection_config.clone(),
        application_name: None,
        application_uri: None,
        session_name: None,
        max_message_size: None,
        max_chunk_count: None,
        connect_retry_attempts: None,
        connect_retry_delay_ms: None,
        connect_retry_backoff: None,
        connect_timeout_ms: None,
    }
}

async fn run_device_loop(
    store: Store,
    tag_engine: Arc<TagEngine>,
    device: PlcDeviceRow,
    mut command_rx: mpsc::Receiver<PlcCommand>,
    scan_stats: Arc<ScanStats>,
    cancel: CancellationToken,
) {
    let device_id = device.id.clone();
    let driver: Arc<dyn DeviceDriver> = match build_driver(device.protocol.as_str(), driver_config_from_device(&device)) {
        Ok(d) => d,
        Err(e) => {
            error!(device_id = %device_id, error = %e, "polling: failed to build driver, loop exiting");
            return;
        }
    };

    let mut backoff = Duration::from_secs(1);
    let mut last_tick = Instant::now();

    loop {
        if cancel.is_cancelled() {
            let _ = driver.disconnect().await;
            return;
        }

        if !driver.connected().await {
            if let Err(e) = driver.connect().await {
                warn!(device_id = %device_id, error = %e, "polling: connect failed, backing off");
                let _ = store
                    .update_device_status(&device_id, PlcStatus::Error, None, Some(e.to_string()))
                    .await;
                tokio::select! {
                    _ = cancel.cancelled() => { return; }
                    _ = tokio::time::sleep(backoff) => {}
                }
                backoff = (backoff * 2).min(MAX_BACKOFF);
                continue;
            }
            backoff = Duration::from_secs(1);
            let _ = store
                .update_device_status(&device_id, PlcStatus::Connected, Some(now_ms()), None)
                .await;
        }

        let scan_started = Instant::now();

        let tags = match store.list_tags(Some(&device_id), true).await {
            Ok(t) => t,
            Err(e) => {
                error!(device_id = %device_id, error = %e, "polling: store unavailable, halting loop");
                return;
            }
        };

        if let Err(e) = scan_once(&store, &tag_engine, &device_id, &*driver, &tags).await {
            warn!(device_id = %device_id, error = %e, "polling: scan error");
        }

        // Drain any pending operator commands before sleeping; they must
        // not wait behind a full scan interval.
        while let Ok(cmd) = command_rx.try_recv() {
            handle_command(&*driver, &tags, cmd).await;
        }

        let elapsed_ms = scan_started.elapsed().as_millis() as u64;
        let interval = Duration::from_millis(device.scan_interval_ms);
        let overrun = scan_started.elapsed() >= interval;
        scan_stats.record_scan(elapsed_ms, overrun);

        let next_tick = last_tick + interval;
        last_tick = next_tick;
        if next_tick > Instant::now() {
            // Keep waiting out the rest of the interval across any number
            // of interleaved commands so ticks don't drift early (§4.5).
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => { let _ = driver.disconnect().await; return; }
                    Some(cmd) = command_rx.recv() => { handle_command(&*driver, &tags, cmd).await; }
                    _ = tokio::time::sleep_until(next_tick) => { break; }
                }
            }
        } else {
            // Scan overrun: fire the next tick immediately (§4.5 step 5).
            last_tick = Instant::now();
        }
    }
}

async fn handle_command(driver: &dyn DeviceDriver, tags: &[TagDefinitionRow], cmd: PlcCommand) {
    match cmd {
        PlcCommand::WriteTag { address, value, respond } => {
            let scaling = tags
                .iter()
                .find(|t| t.address == address)
                .map(|t| Scaling {
                    enabled: t.scaling_enabled,
                    factor: t.scaling_factor,
                    offset: t.scaling_offset,
                })
                .unwrap_or_default();
            let to_write = match &value {
                ValueVariant::Int(i) => ValueVariant::Float(scaling.apply_write(*i as f64)),
                ValueVariant::UInt(u) => ValueVariant::Float(scaling.apply_write(*u as f64)),
                ValueVariant::Float(f) => ValueVariant::Float(scaling.apply_write(*f)),
                other => other.clone(),
            };
            let ok = driver
                .write_tag(&TagRequest { address }, crate::tags::structures::TagValue::new(to_write, crate::tags::structures::Quality::Good))
                .await
                .unwrap_or(false);
            let _ = respond.send(ok);
        }
    }
}

async fn scan_once(
    store: &Store,
    tag_engine: &TagEngine,
    device_id: &str,
    driver: &dyn DeviceDriver,
    tags: &[TagDefinitionRow],
) -> crate::error::Result<()> {
    if tags.is_empty() {
        return Ok(());
    }

    let requests: Vec<TagRequest> = tags
        .iter()
        .map(|t| TagRequest {
            address: t.address.clone(),
        })
        .collect();

    let values: HashMap<String, ValueVariant> = if tags.len() > BATCH_THRESHOLD && driver.supports_batch() {
        match driver.read_batch(&requests).await {
            Ok(map) => map.into_iter().map(|(addr, tv)| (addr, tv.value)).collect(),
            Err(e) => {
                warn!(device_id, error = %e, "polling: batch read failed");
                HashMap::new()
            }
        }
    } else {
        let mut map = HashMap::new();
        for req in &requests {
            match driver.read_tag(req).await {
                Ok(tv) => {
                    map.insert(req.address.clone(), tv.value);
                }
                Err(e) => {
                    debug!(device_id, address = %req.address, error = %e, "polling: per-tag read failed");
                }
            }
        }
        map
    };

    let now = now_ms();
    for tag in tags {
        let Some(raw) = values.get(&tag.address) else {
            continue;
        };
        // Null signals a per-tag failure distinct from disconnection
        // (§4.1); the sample is dropped (§8 boundary behavior).
        if matches!(raw, ValueVariant::Null) {
            continue;
        }

        let scaling = Scaling {
            enabled: tag.scaling_enabled,
            factor: tag.scaling_factor,
            offset: tag.scaling_offset,
        };
        let scaled = scaling.apply_read(raw.clone());
        let numeric = scaled.as_f64();

        store
            .update_tag_value(&tag.id, numeric, 192, now, tag.log_enabled)
            .await?;
        store.append_sample(&tag.id, numeric, 192, now, now).await?;

        let tag_value = crate::tags::structures::TagValue::new(scaled, crate::tags::structures::Quality::Good);
        if !tag_engine.update_tag_value(&tag.id, tag_value.clone()) {
            tag_engine.register_tag(Tag {
                path: tag.id.clone(),
                value: tag_value,
                driver_id: device_id.to_string(),
                driver_address: tag.address.clone(),
                poll_rate_ms: 0,
                metadata: TagMetadata {
                    description: None,
                    eng_unit: tag.unit.clone(),
                    eng_low: tag.min_value,
                    eng_high: tag.max_value,
                    writable: true,
                },
            });
        }
    }

    Ok(())
}
