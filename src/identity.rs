//! Identity & Activation (§4.3): one-shot enrollment with the portal,
//! persistent credentials via the secret interface, endpoint discovery.

use crate::error::{FatalError, GatewayError, Result};
use crate::secrets::SecretStore;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use sysinfo::{CpuExt, System, SystemExt};
use tracing::{info, warn};

const API_KEY_SECRET: &str = "api_key";
const GATEWAY_ID_SECRET: &str = "gateway_id";
const BACKOFF_CAP: Duration = Duration::from_secs(300);

/// The portal-assigned identity of this gateway (§3 GatewayIdentity,
/// minus the bearer credential -- that stays in the secret interface per
/// §4.3, never serialized alongside the rest).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayIdentity {
    pub gateway_id: String,
    pub portal_base_url: String,
    pub config_endpoint: String,
    pub data_endpoint: String,
    pub heartbeat_endpoint: String,
    pub websocket_url: String,
    pub activated_at: i64,
}

#[derive(Serialize)]
struct ActivationRequest<'a> {
    activation_code: &'a str,
    hardware_id: &'a str,
    gateway_name: &'a str,
    os: &'a str,
    os_version: &'a str,
    gateway_version: &'a str,
}

#[derive(Deserialize)]
struct ActivationResponse {
    api_key: String,
    gateway_id: String,
    #[serde(default)]
    #[allow(dead_code)]
    user_id: Option<String>,
    config_endpoint: String,
    data_endpoint: String,
    heartbeat_endpoint: String,
    websocket_url: String,
}

/// Produces the stable-across-restarts hardware fingerprint (§4.3):
/// `MAC:{mac}-CPU:{cpu}-MACHINE:{machine}-NODE:{host}`, truncated to 255
/// chars. The teacher's stack has no MAC-address crate, so that segment
/// reports `unknown` rather than pulling in a new dependency for one field
/// (documented in DESIGN.md); CPU/host come from `sysinfo`/`gethostname`,
/// already pulled in for heartbeat metrics and the activation payload.
pub fn hardware_fingerprint() -> String {
    let mut sys = System::new();
    sys.refresh_cpu();
    let cpu = sys
        .cpus()
        .first()
        .map(|c| c.brand().trim().to_string())
        .filter(|s| !s.is_empty());
    let machine = std::env::consts::ARCH.to_string();
    let host = gethostname::gethostname().to_string_lossy().to_string();

    if cpu.is_none() && host.is_empty() {
        let mut bytes = [0u8; 8];
        rand::thread_rng().fill_bytes(&mut bytes);
        let hex: String = bytes.iter().map(|b| format!("{b:02x}")).collect();
        return format!("GENERIC-{hex}");
    }

    let fingerprint = format!(
        "MAC:unknown-CPU:{}-MACHINE:{}-NODE:{}",
        cpu.unwrap_or_else(|| "unknown".to_string()),
        machine,
        host
    );
    fingerprint.chars().take(255).collect()
}

fn os_fields() -> (&'static str, String) {
    (std::env::consts::OS, System::new().long_os_version().unwrap_or_default())
}

/// Consults the secret store; if credentials are already present, returns
/// them without making any HTTP request (§8 boundary behavior). Otherwise
/// activates against the portal and persists the result.
pub async fn ensure_activated(
    secrets: &dyn SecretStore,
    http: &reqwest::Client,
    portal_base_url: &str,
    activation_code: &str,
    gateway_name: &str,
    gateway_version: &str,
) -> Result<(String, GatewayIdentity)> {
    if let (Some(api_key), Some(gateway_id)) = (
        secrets.get(API_KEY_SECRET).await?,
        secrets.get(GATEWAY_ID_SECRET).await?,
    ) {
        if !api_key.is_empty() && !gateway_id.is_empty() {
            info!("identity: credentials already present, skipping activation");
            if let Some(raw) = secrets.get("identity").await? {
                if let Ok(identity) = serde_json::from_str::<GatewayIdentity>(&raw) {
                    return Ok((api_key, identity));
                }
            }
            // Credentials exist but the cached identity document doesn't;
            // endpoints are unknown until the next successful activation.
            let identity = GatewayIdentity {
                gateway_id: gateway_id.clone(),
                portal_base_url: portal_base_url.to_string(),
                config_endpoint: String::new(),
                data_endpoint: String::new(),
                heartbeat_endpoint: String::new(),
                websocket_url: String::new(),
                activated_at: 0,
            };
            return Ok((api_key, identity));
        }
    }

    let hardware_id = hardware_fingerprint();
    let (os, os_version) = os_fields();
    let body = ActivationRequest {
        activation_code,
        hardware_id: &hardware_id,
        gateway_name,
        os,
        os_version: &os_version,
        gateway_version,
    };

    let mut backoff = Duration::from_secs(1);
    let url = format!("{}/api/gateway/activate", portal_base_url.trim_end_matches('/'));

    loop {
        let response = http.post(&url).json(&body).send().await;
        match response {
            Ok(resp) => {
                let status = resp.status();
                if status.is_success() {
                    let parsed: ActivationResponse = resp
                        .json()
                        .await
                        .map_err(|e| GatewayError::Decode(format!("activation response: {e}")))?;
                    let now = crate::util::now_ms();
                    let identity = GatewayIdentity {
                        gateway_id: parsed.gateway_id.clone(),
                        portal_base_url: portal_base_url.to_string(),
                        config_endpoint: parsed.config_endpoint,
                        data_endpoint: parsed.data_endpoint,
                        heartbeat_endpoint: parsed.heartbeat_endpoint,
                        websocket_url: parsed.websocket_url,
                        activated_at: now,
                    };
                    secrets.set(API_KEY_SECRET, &parsed.api_key).await?;
                    secrets.set(GATEWAY_ID_SECRET, &parsed.gateway_id).await?;
                    if let Ok(raw) = serde_json::to_string(&identity) {
                        secrets.set("identity", &raw).await?;
                    }
                    info!(gateway_id = %parsed.gateway_id, "identity: activation succeeded");
                    return Ok((parsed.api_key, identity));
                } else if status.is_client_error() {
                    let body = resp.text().await.unwrap_or_default();
                    return Err(GatewayError::Fatal(FatalError::BadActivationCode(format!(
                        "portal rejected activation ({status}): {body}"
                    ))));
                } else {
                    let body = resp.text().await.unwrap_or_default();
                    warn!(%status, %body, "identity: activation server error, retrying");
                }
            }
            Err(e) => {
                warn!(error = %e, "identity: activation transport error, retrying");
            }
        }
        tokio::time::sleep(backoff).await;
        backoff = (backoff * 2).min(BACKOFF_CAP);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::secrets::MemorySecretStore;

    #[test]
    fn fingerprint_is_stable_and_bounded() {
        let a = hardware_fingerprint();
        let b = hardware_fingerprint();
        assert_eq!(a, b);
        assert!(a.len() <= 255);
    }

    #[tokio::test]
    async fn ensure_activated_skips_http_when_credentials_present() {
        let secrets = MemorySecretStore::default();
        secrets.set(API_KEY_SECRET, "existing-key").await.unwrap();
        secrets.set(GATEWAY_ID_SECRET, "gw-1").await.unwrap();

        let http = reqwest::Client::new();
        let (api_key, identity) =
            ensure_activated(&secrets, &http, "https://portal.example", "CODE", "gw", "1.0")
                .await
                .unwrap();
        assert_eq!(api_key, "existing-key");
        assert_eq!(identity.gateway_id, "gw-1");
    }
}
