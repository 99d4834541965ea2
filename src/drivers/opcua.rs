use crate::drivers::traits::{
    DeviceDriver, DriverConfig, DriverDiagnostics, DriverResult, TagRequest,
};
use crate::error::DriverError;
use crate::tags::structures::{Quality, TagValue, ValueVariant};
use async_trait::async_trait;
use opcua::{
    client::Client,
    types::{DataValue, NodeId, ReadValueId, Variant, WriteValue},
};
use std::any::Any;
use std::collections::HashMap;
use std::fmt::Debug;
use std::time::Instant;
use tokio::sync::Mutex; // Using Mutex for interior mutability of the client
use tracing::{debug, info, warn};

#[derive(Debug, Default)]
struct Counters {
    reads: u64,
    writes: u64,
    errors: u64,
    reconnects: u64,
    total_response_ms: f64,
    response_samples: u64,
    last_error: Option<String>,
}

#[derive(Debug)] // Client is not Clone, so we derive Debug manually
pub struct OpcUaDriver {
    config: DriverConfig,
    // OPC UA Client needs to be mutable for operations, wrap in Mutex
    client: Mutex<Option<Client>>,
    counters: Mutex<Counters>,
}

impl OpcUaDriver {
    pub fn new(config: DriverConfig) -> Self {
        OpcUaDriver {
            config,
            client: Mutex::new(None),
            counters: Mutex::new(Counters::default()),
        }
    }

    // Helper to parse NodeId strings (e.g., "ns=2;s=MyTag")
    fn parse_node_id(node_id_str: &str) -> Result<NodeId, DriverError> {
        // Basic parsing, a real implementation might need more robust error handling
        // or support for different NodeId types (numeric, guid, bytestring)
        let parts: Vec<&str> = node_id_str.split(';').collect();
        if parts.len() != 2 {
            return Err(DriverError::InvalidAddress(node_id_str.to_string()));
        }
        let ns_part = parts[0];
        let identifier_part = parts[1];

        let ns = ns_part
            .trim_start_matches("ns=")
            .parse::<u16>()
            .map_err(|_| DriverError::InvalidAddress(node_id_str.to_string()))?;

        if let Some(name) = identifier_part.strip_prefix("s=") {
            Ok(NodeId::new_string(ns, name.to_string()))
        } else if let Some(num) = identifier_part.strip_prefix("i=") {
            let id = num
                .parse::<u32>()
                .map_err(|_| DriverError::InvalidAddress(node_id_str.to_string()))?;
            Ok(NodeId::new_numeric(ns, id))
        } else {
            Err(DriverError::InvalidAddress(node_id_str.to_string()))
        }
    }

    // Helper to convert OPC UA DataValue to our TagValue
    fn data_value_to_tag_value(dv: &DataValue) -> TagValue {
        let quality = match dv.status_code().is_good() {
            // TODO: Map more qualities
            true => Quality::Good,
            false => Quality::Bad,
        };
        let timestamp = dv.source_timestamp().map_or_else(
            || dv.server_timestamp().map_or(0, |dt| dt.timestamp_millis() as u64),
            |dt| dt.timestamp_millis() as u64,
        );

        let value_variant = match dv.value() {
            Some(variant) => match variant {
                Variant::Boolean(b) => ValueVariant::Bool(*b),
                Variant::SByte(i) => ValueVariant::Int(*i as i64),
                Variant::Byte(u) => ValueVariant::UInt(*u as u64),
                Variant::Int16(i) => ValueVariant::Int(*i as i64),
                Variant::UInt16(u) => ValueVariant::UInt(*u as u64),
                Variant::Int32(i) => ValueVariant::Int(*i as i64),
                Variant::UInt32(u) => ValueVariant::UInt(*u as u64),
                Variant::Int64(i) => ValueVariant::Int(*i),
                Variant::UInt64(u) => ValueVariant::UInt(*u),
                Variant::Float(f) => ValueVariant::Float(*f as f64),
                Variant::Double(d) => ValueVariant::Float(*d),
                Variant::String(s) => ValueVariant::String(s.to_string()),
                // TODO: Handle more types (DateTime, arrays, etc.)
                _ => ValueVariant::Null, // Unsupported type for now
            },
            None => ValueVariant::Null,
        };

        TagValue {
            value: value_variant,
            quality,
            timestamp,
        }
    }

    fn value_variant_to_write_variant(value: &ValueVariant) -> Variant {
        match value {
            ValueVariant::Null => Variant::Empty,
            ValueVariant::Bool(b) => Variant::Boolean(*b),
            ValueVariant::Int(i) => Variant::Int64(*i),
            ValueVariant::UInt(u) => Variant::UInt64(*u),
            ValueVariant::Float(f) => Variant::Double(*f),
            ValueVariant::String(s) => Variant::from(s.clone()),
        }
    }

    async fn record_success(&self, elapsed_ms: f64) {
        let mut counters = self.counters.lock().await;
        counters.total_response_ms += elapsed_ms;
        counters.response_samples += 1;
    }

    async fn record_error(&self, message: String) {
        let mut counters = self.counters.lock().await;
        counters.errors += 1;
        counters.last_error = Some(message);
    }
}

#[async_trait]
impl DeviceDriver for OpcUaDriver {
    fn config(&self) -> &DriverConfig {
        &self.config
    }

    async fn connect(&self) -> DriverResult<()> {
        // Ensure client is mutable through the Mutex guard
        let mut client_guard = self.client.lock().await;

        if client_guard.is_some() {
            debug!("OPC UA Driver [{}]: already connected.", self.config.id);
            return Ok(());
        }

        info!("OPC UA Driver [{}]: connecting to {}...", self.config.id, self.config.address);
        let endpoint_url = self.config.address.clone();

        // TODO: Make security (policies, user identity) configurable
        let client = Client::new(&endpoint_url, None, None)
            .map_err(|e| DriverError::ConnectFailed(e.to_string()))?;

        // Session activation happens internally on first read/write call.
        *client_guard = Some(client);
        self.counters.lock().await.reconnects += 1;
        Ok(())
    }

    async fn disconnect(&self) -> DriverResult<()> {
        let mut client_guard = self.client.lock().await;
        if client_guard.take().is_some() {
            info!("OPC UA Driver [{}]: disconnected.", self.config.id);
        }
        Ok(())
    }

    async fn connected(&self) -> bool {
        self.client.lock().await.is_some()
    }

    async fn read_tag(&self, tag: &TagRequest) -> DriverResult<TagValue> {
        let mut results = self.read_batch(std::slice::from_ref(tag)).await?;
        results
            .remove(&tag.address)
            .ok_or_else(|| DriverError::ReadFailed("no value returned".to_string()))
    }

    async fn read_batch(&self, tags: &[TagRequest]) -> DriverResult<HashMap<String, TagValue>> {
        let started = Instant::now();
        let mut client_guard = self.client.lock().await;
        let client = match client_guard.as_mut() {
            Some(c) => c,
            None => return Err(DriverError::NotConnected),
        };

        let mut read_requests = Vec::with_capacity(tags.len());
        let mut node_id_map = HashMap::new(); // Map NodeId back to original string address

        for req in tags {
            let node_id = Self::parse_node_id(&req.address)?;
            node_id_map.insert(node_id.clone(), req.address.clone());
            read_requests.push(ReadValueId {
                node_id,
                attribute_id: 13, // Value attribute
                index_range: None,
                data_encoding: None,
            });
        }

        // Perform the read operation
        let results = match client.read(&read_requests, 0.0).await {
            Ok(r) => r,
            Err(e) => {
                // A transport-level read failure invalidates the session so
                // the next invocation reconnects (§4.1 connection-loss
                // detection).
                *client_guard = None;
                drop(client_guard);
                warn!("OPC UA Driver [{}]: read failed: {}", self.config.id, e);
                self.record_error(e.to_string()).await;
                return Err(DriverError::ReadFailed(e.to_string()));
            }
        };

        let mut tag_values = HashMap::with_capacity(results.len());
        for (i, data_value) in results.iter().enumerate() {
            // Find the original NodeId string address using the index
            if let Some(node_id) = read_requests.get(i).map(|r| &r.node_id) {
                if let Some(original_address) = node_id_map.get(node_id) {
                    tag_values.insert(original_address.clone(), Self::data_value_to_tag_value(data_value));
                }
            }
        }

        drop(client_guard);
        self.counters.lock().await.reads += tags.len() as u64;
        self.record_success(started.elapsed().as_secs_f64() * 1000.0).await;
        Ok(tag_values)
    }

    async fn write_tag(&self, tag: &TagRequest, value: TagValue) -> DriverResult<bool> {
        let mut client_guard = self.client.lock().await;
        let client = match client_guard.as_mut() {
            Some(c) => c,
            None => return Err(DriverError::NotConnected),
        };

        let node_id = Self::parse_node_id(&tag.address)?;
        let variant = Self::value_variant_to_write_variant(&value.value);
        let write_value = WriteValue {
            node_id,
            attribute_id: 13,
            index_range: None.into(),
            value: DataValue::new_now(variant),
        };

        match client.write(&[write_value]).await {
            Ok(statuses) => {
                drop(client_guard);
                let ok = statuses.first().map(|s| s.is_good()).unwrap_or(false);
                self.counters.lock().await.writes += 1;
                Ok(ok)
            }
            Err(e) => {
                *client_guard = None;
                drop(client_guard);
                warn!("OPC UA Driver [{}]: write failed: {}", self.config.id, e);
                self.record_error(e.to_string()).await;
                Err(DriverError::WriteFailed(e.to_string()))
            }
        }
    }

    async fn diagnostics(&self) -> DriverDiagnostics {
        let counters = self.counters.lock().await;
        let avg_response_ms = if counters.response_samples > 0 {
            counters.total_response_ms / counters.response_samples as f64
        } else {
            0.0
        };
        DriverDiagnostics {
            reads: counters.reads,
            writes: counters.writes,
            errors: counters.errors,
            reconnects: counters.reconnects,
            avg_response_ms,
            last_error: counters.last_error.clone(),
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// A node surfaced by [`OpcUaDriver::discover_tags`]: enough to let an
/// operator build a `TagDefinition` without hand-typing the NodeId string.
#[derive(Debug, Clone, serde::Serialize)]
pub struct DiscoveredTag {
    pub node_id: String,
    pub display_name: String,
}

impl OpcUaDriver {
    /// Browse the direct children of `node_id`, returning their display
    /// names. Lets an operator walk the address space interactively before
    /// registering a tag.
    pub async fn browse_node(&self, node_id: &str) -> DriverResult<Vec<String>> {
        use opcua::types::{BrowseDescription, BrowseDirection, NodeClassMask, ResultMask};

        let mut client_guard = self.client.lock().await;
        let client = client_guard.as_mut().ok_or(DriverError::NotConnected)?;

        let target = Self::parse_node_id(node_id)?;
        let description = BrowseDescription {
            node_id: target,
            browse_direction: BrowseDirection::Forward,
            reference_type_id: opcua::types::ReferenceTypeId::HierarchicalReferences.into(),
            include_subtypes: true,
            node_class_mask: NodeClassMask::all().bits(),
            result_mask: ResultMask::all().bits(),
        };

        let results = client
            .browse(&[description])
            .await
            .map_err(|e| DriverError::ReadFailed(format!("browse failed: {e}")))?;

        let mut names = Vec::new();
        if let Some(result) = results.into_iter().next() {
            if let Some(refs) = result.references {
                names.extend(refs.into_iter().map(|r| r.display_name.to_string()));
            }
        }
        Ok(names)
    }

    /// Recursively walk the address space from the Objects folder, collecting
    /// every Variable node found up to a conservative depth. Exists so an
    /// operator can bulk-seed tag definitions rather than add them one at a
    /// time; depth is capped to avoid pathological server address spaces.
    pub async fn discover_tags(&self) -> DriverResult<Vec<DiscoveredTag>> {
        const ROOT: &str = "ns=0;i=85"; // Objects folder
        const MAX_DEPTH: u32 = 4;

        let mut discovered = Vec::new();
        let mut frontier = vec![ROOT.to_string()];
        let mut depth = 0;

        while !frontier.is_empty() && depth < MAX_DEPTH {
            let mut next_frontier = Vec::new();
            for node in &frontier {
                let children = self.browse_node(node).await?;
                for child in children {
                    // The Objects folder itself isn't a tag; its descendants are
                    // candidates. We can't tell Variable from Object nodes from
                    // the display name alone, so every leaf is reported and the
                    // operator picks real tags from the list.
                    discovered.push(DiscoveredTag {
                        node_id: node.clone(),
                        display_name: child.clone(),
                    });
                    next_frontier.push(child);
                }
            }
            frontier = next_frontier;
            depth += 1;
        }

        Ok(discovered)
    }
}
