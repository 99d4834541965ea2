//! Supervisor (§4.8): starts every subsystem in order, restarts transient
//! failures with bounded backoff, and coordinates graceful shutdown.
//!
//! Grounded in the teacher's `main.rs`, which wired drivers and the poll
//! loop directly in `main`; here that direct wiring is replaced by owned
//! subsystems constructed from a `Settings` snapshot and supervised
//! independently, per spec.md §4.8/§5's "owned subsystems wired by the
//! Supervisor" redesign.

use crate::config::settings::Settings;
use crate::config_sync::ConfigSynchronizer;
use crate::error::{GatewayError, Result};
use crate::identity::{self, GatewayIdentity};
use crate::polling::PollingEngine;
use crate::portal::{Heartbeat, PushChannel};
use crate::secrets::SecretStore;
use crate::store::compactor::{self, CompactorConfig};
use crate::store::Store;
use crate::tags::engine::TagEngine;
use crate::uploader::Uploader;
use reqwest::Client;
use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

const RESTART_WINDOW: Duration = Duration::from_secs(3600);
const MAX_RESTARTS_IN_WINDOW: usize = 5;
const SHUTDOWN_DRAIN_BUDGET: Duration = Duration::from_secs(30);

fn backoff_for_attempt(attempt: usize) -> Duration {
    match attempt {
        1 => Duration::from_secs(5),
        2 => Duration::from_secs(10),
        _ => Duration::from_secs(30),
    }
}

/// Tracks a subsystem's restart timestamps within a 60-minute rolling
/// window and decides whether another restart is still within budget.
struct RestartBudget {
    name: &'static str,
    restarts: VecDeque<Instant>,
}

impl RestartBudget {
    fn new(name: &'static str) -> Self {
        Self {
            name,
            restarts: VecDeque::new(),
        }
    }

    /// Records a restart and returns the backoff to apply, or `None` if
    /// the restart budget has been exceeded (caller should escalate fatal).
    fn record(&mut self) -> Option<Duration> {
        let now = Instant::now();
        self.restarts.push_back(now);
        while let Some(&front) = self.restarts.front() {
            if now.duration_since(front) > RESTART_WINDOW {
                self.restarts.pop_front();
            } else {
                break;
            }
        }
        if self.restarts.len() > MAX_RESTARTS_IN_WINDOW {
            error!(
                subsystem = self.name,
                count = self.restarts.len(),
                "supervisor: restart budget exceeded, escalating to fatal"
            );
            None
        } else {
            Some(backoff_for_attempt(self.restarts.len()))
        }
    }
}

/// Runs `factory()` under restart-with-backoff supervision until `cancel`
/// fires or the restart budget is exceeded, in which case `escalate` is
/// cancelled to trigger process-wide fatal shutdown (§4.8).
async fn supervise<F, Fut>(name: &'static str, cancel: CancellationToken, escalate: CancellationToken, mut factory: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ()> + Send + 'static,
{
    let mut budget = RestartBudget::new(name);
    loop {
        if cancel.is_cancelled() {
            return;
        }
        let handle: JoinHandle<()> = tokio::spawn(factory());
        tokio::select! {
            _ = cancel.cancelled() => {
                handle.abort();
                return;
            }
            res = handle => {
                if cancel.is_cancelled() {
                    return;
                }
                match res {
                    Ok(()) => warn!(subsystem = name, "supervisor: subsystem exited unexpectedly"),
                    Err(e) => error!(subsystem = name, error = %e, "supervisor: subsystem task panicked"),
                }
            }
        }

        match budget.record() {
            Some(delay) => {
                warn!(subsystem = name, delay_s = delay.as_secs(), "supervisor: restarting after backoff");
                tokio::select! {
                    _ = cancel.cancelled() => { return; }
                    _ = tokio::time::sleep(delay) => {}
                }
            }
            None => {
                escalate.cancel();
                return;
            }
        }
    }
}

pub struct Supervisor {
    store: Store,
    identity: GatewayIdentity,
    api_key: String,
    settings: Settings,
    http: Client,
}

impl Supervisor {
    /// Runs activation (§4.3) and opens the Local Store, but does not yet
    /// start any background subsystem. Split from `run` so startup-time
    /// fatal errors (bad activation code, corrupt schema) can short-circuit
    /// `main` before any task is spawned.
    pub async fn bootstrap(settings: Settings, secrets: &dyn SecretStore) -> Result<Self> {
        let store = Store::open(&settings.store_path)?;
        let http = Client::new();

        let (api_key, identity) = identity::ensure_activated(
            secrets,
            &http,
            &settings.api_base,
            &settings.activation_code,
            &settings.gateway_name,
            env!("CARGO_PKG_VERSION"),
        )
        .await?;

        if identity.config_endpoint.is_empty() {
            return Err(GatewayError::Fatal(crate::error::FatalError::BadStartupConfig(
                "activation succeeded but no cached portal endpoints are available".to_string(),
            )));
        }

        secrets.set("identity", &serde_json::to_string(&identity).map_err(|e| GatewayError::Decode(e.to_string()))?).await?;

        Ok(Self {
            store,
            identity,
            api_key,
            settings,
            http,
        })
    }

    /// Starts every subsystem (§4.8 order) and runs until a shutdown signal
    /// arrives or a subsystem escalates a fatal failure.
    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        let cancel = CancellationToken::new();
        let escalate = CancellationToken::new();
        let tag_engine = Arc::new(TagEngine::new());

        let http = self.http.clone();
        let store = self.store.clone();
        let api_key = self.api_key.clone();
        let gateway_id = self.identity.gateway_id.clone();
        let config_endpoint = self.identity.config_endpoint.clone();
        let data_endpoint = self.identity.data_endpoint.clone();
        let heartbeat_endpoint = self.identity.heartbeat_endpoint.clone();
        let websocket_url = self.identity.websocket_url.clone();
        let compression_enabled = self.settings.compression_enabled;
        let upload_interval = Duration::from_millis(self.settings.upload_interval_ms);
        let compactor_config = CompactorConfig {
            period: Duration::from_secs(3600),
            history_max_rows: self.settings.tag_history_max_rows,
            buffer_retention_ms: self.settings.offline_buffer_ms(),
        };

        // Config Sync (one-shot initial sync, §4.8) + Polling Engine share a
        // reconfigure channel; they are supervised as a coupled unit since
        // restarting one without the other would orphan the channel.
        let (reconfigure_tx, reconfigure_rx) = mpsc::channel(4);
        let (config_sync, config_sync_handle) = ConfigSynchronizer::new(
            http.clone(),
            store.clone(),
            config_endpoint.clone(),
            api_key.clone(),
            gateway_id.clone(),
            reconfigure_tx,
        );
        if let Err(e) = config_sync.sync_once().await {
            warn!(error = %e, "supervisor: initial config sync failed, continuing with whatever is already in the store");
        }
        let (polling_engine, polling_handle) = PollingEngine::new(store.clone(), tag_engine, reconfigure_rx);

        let upload_stats = Arc::new(crate::diagnostics::UploadStats::default());
        let scan_stats = polling_engine.scan_stats();

        let mut tasks = Vec::new();

        tasks.push(tokio::spawn({
            let cancel = cancel.clone();
            async move { config_sync.run(cancel).await }
        }));
        tasks.push(tokio::spawn({
            let cancel = cancel.clone();
            async move { polling_engine.run(cancel).await }
        }));

        tasks.push(tokio::spawn(supervise("compactor", cancel.clone(), escalate.clone(), {
            let store = store.clone();
            move || {
                let store = store.clone();
                let config = CompactorConfig {
                    period: compactor_config.period,
                    history_max_rows: compactor_config.history_max_rows,
                    buffer_retention_ms: compactor_config.buffer_retention_ms,
                };
                let cancel = cancel.clone();
                async move { compactor::run(store, config, cancel).await }
            }
        })));

        tasks.push(tokio::spawn(supervise("uploader", cancel.clone(), escalate.clone(), {
            let http = http.clone();
            let store = store.clone();
            let data_endpoint = data_endpoint.clone();
            let api_key = api_key.clone();
            let gateway_id = gateway_id.clone();
            let upload_stats = upload_stats.clone();
            move || {
                let uploader = Uploader::with_stats(
                    http.clone(),
                    store.clone(),
                    data_endpoint.clone(),
                    api_key.clone(),
                    gateway_id.clone(),
                    compression_enabled,
                    upload_interval,
                    upload_stats.clone(),
                );
                let cancel = cancel.clone();
                async move { uploader.run(cancel).await }
            }
        })));

        tasks.push(tokio::spawn(supervise("heartbeat", cancel.clone(), escalate.clone(), {
            let http = http.clone();
            let store = store.clone();
            let heartbeat_endpoint = heartbeat_endpoint.clone();
            let api_key = api_key.clone();
            let gateway_id = gateway_id.clone();
            let upload_stats = upload_stats.clone();
            let scan_stats = scan_stats.clone();
            let config_sync_handle = config_sync_handle.clone();
            move || {
                let heartbeat = Heartbeat::new(
                    http.clone(),
                    store.clone(),
                    heartbeat_endpoint.clone(),
                    api_key.clone(),
                    gateway_id.clone(),
                    upload_stats.clone(),
                    scan_stats.clone(),
                    config_sync_handle.clone(),
                );
                let cancel = cancel.clone();
                async move { heartbeat.run(cancel).await }
            }
        })));

        tasks.push(tokio::spawn(supervise("push_channel", cancel.clone(), escalate.clone(), {
            let websocket_url = websocket_url.clone();
            let api_key = api_key.clone();
            let config_sync_handle = config_sync_handle.clone();
            let polling_handle = polling_handle.clone();
            move || {
                let push_channel = PushChannel::new(
                    websocket_url.clone(),
                    api_key.clone(),
                    config_sync_handle.clone(),
                    polling_handle.clone(),
                );
                let cancel = cancel.clone();
                async move { push_channel.run(cancel).await }
            }
        })));

        info!("supervisor: all subsystems started");

        tokio::select! {
            _ = shutdown.cancelled() => {
                info!("supervisor: shutdown signal received");
            }
            _ = escalate.cancelled() => {
                error!("supervisor: a subsystem exceeded its restart budget, shutting down");
            }
        }

        let escalated = escalate.is_cancelled();
        self.shutdown(cancel, tasks).await;

        if escalated {
            return Err(GatewayError::Fatal(crate::error::FatalError::StorageCorrupt(
                "a supervised subsystem exceeded its restart budget".to_string(),
            )));
        }
        Ok(())
    }

    /// §4.8 shutdown sequence: stop accepting new work, stop Polling Engine
    /// loops, drain one final Uploader cycle (best effort, bounded by 30s),
    /// close the Portal Channel, flush and close the Store.
    async fn shutdown(&self, cancel: CancellationToken, tasks: Vec<JoinHandle<()>>) {
        cancel.cancel();
        for task in tasks {
            let _ = task.await;
        }

        let drain = Uploader::new(
            self.http.clone(),
            self.store.clone(),
            self.identity.data_endpoint.clone(),
            self.api_key.clone(),
            self.identity.gateway_id.clone(),
            self.settings.compression_enabled,
            Duration::from_millis(self.settings.upload_interval_ms),
        );
        match tokio::time::timeout(SHUTDOWN_DRAIN_BUDGET, drain.run_cycle()).await {
            Ok(Ok(n)) => info!(samples = n, "supervisor: final drain upload completed"),
            Ok(Err(e)) => warn!(error = %e, "supervisor: final drain upload failed"),
            Err(_) => warn!("supervisor: final drain upload timed out after 30s"),
        }

        info!("supervisor: shutdown complete");
    }
}

/// Waits for SIGINT or SIGTERM (or Ctrl+C on platforms without Unix
/// signals) and cancels the returned token.
pub fn shutdown_signal() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
            let mut sigint = signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");
            tokio::select! {
                _ = sigterm.recv() => {}
                _ = sigint.recv() => {}
            }
        }
        #[cfg(not(unix))]
        {
            let _ = tokio::signal::ctrl_c().await;
        }
        trigger.cancel();
    });
    token
}
