//! Push Channel (§4.7): a persistent, best-effort WebSocket connection to
//! the portal for low-latency config/command delivery. Its loss never
//! blocks the heartbeat-based fallback.

use crate::config_sync::ConfigSyncHandle;
use crate::polling::PollingHandle;
use crate::tags::structures::ValueVariant;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const LINEAR_PHASE_ATTEMPTS: u32 = 6; // 6 * 10s = 1 minute
const LINEAR_DELAY: Duration = Duration::from_secs(10);
const MAX_BACKOFF: Duration = Duration::from_secs(300);

#[derive(Deserialize)]
struct ServerMessage {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    command: Option<String>,
    #[serde(default)]
    device_id: Option<String>,
    #[serde(default)]
    address: Option<String>,
    #[serde(default)]
    value: Option<Value>,
}

fn json_to_value_variant(value: &Value) -> ValueVariant {
    match value {
        Value::Null => ValueVariant::Null,
        Value::Bool(b) => ValueVariant::Bool(*b),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                ValueVariant::Int(i)
            } else if let Some(u) = n.as_u64() {
                ValueVariant::UInt(u)
            } else {
                ValueVariant::Float(n.as_f64().unwrap_or(0.0))
            }
        }
        Value::String(s) => ValueVariant::String(s.clone()),
        other => ValueVariant::String(other.to_string()),
    }
}

pub struct PushChannel {
    websocket_url: String,
    api_key: String,
    config_sync: ConfigSyncHandle,
    polling: PollingHandle,
}

impl PushChannel {
    pub fn new(websocket_url: String, api_key: String, config_sync: ConfigSyncHandle, polling: PollingHandle) -> Self {
        Self {
            websocket_url,
            api_key,
            config_sync,
            polling,
        }
    }

    async fn handle_message(&self, raw: &str) {
        let parsed: ServerMessage = match serde_json::from_str(raw) {
            Ok(m) => m,
            Err(e) => {
                debug!(error = %e, "push: unparseable message, ignoring");
                return;
            }
        };

        match parsed.kind.as_str() {
            "auth_success" => {
                info!("push: authenticated");
            }
            "config_update" => {
                debug!("push: config_update received, triggering sync");
                self.config_sync.trigger().await;
            }
            "command" => self.handle_command(parsed).await,
            "pong" => {
                debug!("push: pong received");
            }
            other => {
                debug!(kind = other, "push: unrecognized message type");
            }
        }
    }

    async fn handle_command(&self, msg: ServerMessage) {
        match msg.command.as_deref() {
            Some("write_tag") => {
                let (Some(device_id), Some(address), Some(value)) = (msg.device_id, msg.address, msg.value) else {
                    warn!("push: write_tag command missing device_id/address/value");
                    return;
                };
                let variant = json_to_value_variant(&value);
                match self.polling.write_tag(&device_id, address, variant).await {
                    Some(true) => info!(device_id, "push: write_tag command applied"),
                    Some(false) => warn!(device_id, "push: write_tag command rejected by driver"),
                    None => warn!(device_id, "push: write_tag command has no matching running loop"),
                }
            }
            Some("restart") => {
                // Full-process restart is owned by the external service
                // supervisor (§6 Process control); this channel only logs
                // the request.
                info!("push: restart command received, deferring to the service supervisor");
            }
            other => {
                warn!(command = ?other, "push: unrecognized command");
            }
        }
    }

    /// Connects, authenticates, and services one WebSocket session until it
    /// drops or errors. Returns so `run` can apply reconnect backoff.
    async fn run_session(&self, cancel: &CancellationToken) {
        let (ws_stream, _response) = match connect_async(&self.websocket_url).await {
            Ok(pair) => pair,
            Err(e) => {
                warn!(error = %e, "push: connect failed");
                return;
            }
        };
        info!("push: connected");

        let (mut write, mut read) = ws_stream.split();
        let auth = serde_json::json!({"type": "auth", "token": self.api_key});
        if let Err(e) = write.send(Message::Text(auth.to_string().into())).await {
            warn!(error = %e, "push: failed to send auth frame");
            return;
        }

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    let _ = write.close().await;
                    return;
                }
                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => self.handle_message(&text).await,
                        Some(Ok(Message::Close(_))) | None => {
                            info!("push: connection closed");
                            return;
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            warn!(error = %e, "push: read error");
                            return;
                        }
                    }
                }
            }
        }
    }

    /// Runs reconnect-with-backoff until cancelled (§4.7: 10s linear for the
    /// first minute, then exponential to a 5-minute cap).
    pub async fn run(self, cancel: CancellationToken) {
        let mut attempt: u32 = 0;
        loop {
            if cancel.is_cancelled() {
                return;
            }
            self.run_session(&cancel).await;
            if cancel.is_cancelled() {
                return;
            }
            attempt += 1;
            let delay = if attempt <= LINEAR_PHASE_ATTEMPTS {
                LINEAR_DELAY
            } else {
                let exp = LINEAR_DELAY * 2u32.saturating_pow(attempt - LINEAR_PHASE_ATTEMPTS);
                exp.min(MAX_BACKOFF)
            };
            warn!(attempt, delay_s = delay.as_secs(), "push: reconnecting after backoff");
            tokio::select! {
                _ = cancel.cancelled() => { return; }
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_to_value_variant_maps_primitives() {
        assert_eq!(json_to_value_variant(&Value::Bool(true)), ValueVariant::Bool(true));
        assert_eq!(json_to_value_variant(&Value::from(42)), ValueVariant::Int(42));
        assert_eq!(
            json_to_value_variant(&Value::String("x".into())),
            ValueVariant::String("x".into())
        );
        assert_eq!(json_to_value_variant(&Value::Null), ValueVariant::Null);
    }

    #[test]
    fn backoff_is_linear_then_exponential() {
        let delay_for = |attempt: u32| -> Duration {
            if attempt <= LINEAR_PHASE_ATTEMPTS {
                LINEAR_DELAY
            } else {
                let exp = LINEAR_DELAY * 2u32.saturating_pow(attempt - LINEAR_PHASE_ATTEMPTS);
                exp.min(MAX_BACKOFF)
            }
        };
        assert_eq!(delay_for(1), Duration::from_secs(10));
        assert_eq!(delay_for(6), Duration::from_secs(10));
        assert_eq!(delay_for(7), Duration::from_secs(20));
        assert_eq!(delay_for(20), MAX_BACKOFF);
    }
}
