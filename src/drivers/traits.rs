use crate::error::DriverError;
use crate::tags::structures::TagValue;
use async_trait::async_trait;
use serde::{Deserialize, Serialize}; // Added for config
use std::any::Any;
use std::collections::HashMap;

/// Common configuration for all drivers (§3 PlcDevice, §6 connection configs).
/// `connection_config` is the opaque, protocol-interpreted bag; the OPC UA
/// client fields below stay flat for backward compatibility with existing
/// config files, same as the teacher originally laid them out.
#[derive(Debug, Clone, Deserialize, Serialize)] // Added Deserialize, Serialize, and Debug
pub struct DriverConfig {
    pub id: String,        // Unique identifier for this device instance
    pub name: String,      // User-friendly name
    pub address: String,   // e.g., IP address, COM port, connection string
    pub scan_rate_ms: u64, // How often to poll tags (if applicable)
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_retry_count")]
    pub retry_count: u32,
    #[serde(default)]
    pub connection_config: serde_json::Value,
    // Additional optional OPC UA client parameters
    #[serde(default)]
    pub application_name: Option<String>,
    #[serde(default)]
    pub application_uri: Option<String>,
    #[serde(default)]
    pub session_name: Option<String>,
    #[serde(default)]
    pub max_message_size: Option<usize>,
    #[serde(default)]
    pub max_chunk_count: Option<usize>,
    #[serde(default)]
    pub connect_retry_attempts: Option<u32>,
    #[serde(default)]
    pub connect_retry_delay_ms: Option<u64>,
    #[serde(default)]
    pub connect_retry_backoff: Option<f64>,
    #[serde(default)]
    pub connect_timeout_ms: Option<u64>,
}

fn default_timeout_ms() -> u64 {
    3000
}

fn default_retry_count() -> u32 {
    3
}

/// Represents a request to read or write a tag
#[derive(Clone)]
pub struct TagRequest {
    pub address: String, // Protocol-specific tag address (e.g., "ns=1;s=MyTag", "40001", "Topic/Subtopic")
                         // Potentially add data type hint
}

/// Counters and last-error a driver reports, folded into heartbeat metrics.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DriverDiagnostics {
    pub reads: u64,
    pub writes: u64,
    pub errors: u64,
    pub reconnects: u64,
    pub avg_response_ms: f64,
    pub last_error: Option<String>,
}

// Type alias for results from driver operations
pub type DriverResult<T> = Result<T, DriverError>;

/// The core trait that all device protocol drivers must implement.
/// This allows the gateway to interact with different devices uniformly.
/// A driver instance is owned by exactly one Polling Engine loop (§5); there
/// is no cross-loop sharing.
#[async_trait]
pub trait DeviceDriver: Send + Sync {
    /// Get the configuration of this driver instance.
    fn config(&self) -> &DriverConfig;

    /// Connect to the underlying device. Idempotent when already connected.
    async fn connect(&self) -> DriverResult<()>;

    /// Disconnect from the underlying device. Always safe, including on a
    /// never-connected driver.
    async fn disconnect(&self) -> DriverResult<()>;

    /// Eventually-consistent connection hint; callers never block on it.
    async fn connected(&self) -> bool;

    /// Read a single tag. `None`/Bad quality signals a per-tag failure
    /// distinct from transport disconnection.
    async fn read_tag(&self, tag: &TagRequest) -> DriverResult<TagValue>;

    /// Read a batch of tags.
    /// Takes a list of tag addresses and returns a map of address to TagValue.
    /// Implementations MAY group the request on the wire; correctness MUST
    /// equal sequential `read_tag` calls.
    async fn read_batch(&self, tags: &[TagRequest]) -> DriverResult<HashMap<String, TagValue>>;

    /// Whether this driver advertises batch capability to the Polling Engine.
    fn supports_batch(&self) -> bool {
        true
    }

    /// Write a single tag. Required only for writable tags.
    async fn write_tag(&self, tag: &TagRequest, value: TagValue) -> DriverResult<bool>;

    /// Counters {reads, writes, errors, reconnects, avg_response_ms} plus
    /// last_error and selected config fields.
    async fn diagnostics(&self) -> DriverDiagnostics;

    /// Enable downcasting to concrete types
    fn as_any(&self) -> &dyn Any;

    // TODO: Add methods for subscription-based updates if the protocol supports it
    // async fn subscribe_tags(&mut self, tags: &[TagRequest]) -> DriverResult<()>;
    // async fn unsubscribe_tags(&mut self, tags: &[TagRequest]) -> DriverResult<()>;
    // Potentially return a stream or use a callback mechanism for subscription updates
}
