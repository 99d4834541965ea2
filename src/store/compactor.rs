//! Periodic ring-bound enforcement (§4.2 SUPPLEMENT, §9 redesign note:
//! the original's per-insert DB trigger becomes a portable timer task with
//! identical observable behavior).

use crate::store::Store;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::time::{interval, Duration};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub struct CompactorConfig {
    pub period: Duration,
    pub history_max_rows: i64,
    pub buffer_retention_ms: i64,
}

impl Default for CompactorConfig {
    fn default() -> Self {
        Self {
            period: Duration::from_secs(3600),
            history_max_rows: 100_000,
            buffer_retention_ms: 7 * 24 * 3600 * 1000,
        }
    }
}

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

/// Runs until `cancel` fires, enforcing the `tag_history` ring bound and
/// pruning uploaded+aged `data_buffer` rows once per `config.period`.
pub async fn run(store: Store, config: CompactorConfig, cancel: CancellationToken) {
    let mut ticker = interval(config.period);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!("compactor: shutting down");
                return;
            }
            _ = ticker.tick() => {
                match store.prune_history(config.history_max_rows).await {
                    Ok(n) if n > 0 => info!(rows = n, "compactor: pruned tag_history ring buffer"),
                    Ok(_) => {}
                    Err(e) => warn!(error = %e, "compactor: tag_history prune failed"),
                }
                match store.compact_buffer(now_ms(), config.buffer_retention_ms).await {
                    Ok(n) if n > 0 => info!(rows = n, "compactor: pruned uploaded data_buffer rows"),
                    Ok(_) => {}
                    Err(e) => warn!(error = %e, "compactor: data_buffer compaction failed"),
                }
            }
        }
    }
}
