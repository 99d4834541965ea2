//! Placeholder driver for protocols whose wire implementation is an external
//! collaborator (§1 out-of-scope: concrete Modbus/S7/EtherNet-IP beyond the
//! OPC-UA integration already present). Implements the full contract so the
//! Driver Registry and Polling Engine can treat every protocol tag
//! uniformly; every operation fails with `DriverError::Unimplemented`.

use crate::drivers::traits::{
    DeviceDriver, DriverConfig, DriverDiagnostics, DriverResult, TagRequest,
};
use crate::error::DriverError;
use crate::tags::structures::TagValue;
use async_trait::async_trait;
use std::any::Any;
use std::collections::HashMap;

pub struct StubDriver {
    config: DriverConfig,
    protocol: &'static str,
}

impl StubDriver {
    pub fn new(config: DriverConfig, protocol: &'static str) -> Self {
        Self { config, protocol }
    }
}

#[async_trait]
impl DeviceDriver for StubDriver {
    fn config(&self) -> &DriverConfig {
        &self.config
    }

    async fn connect(&self) -> DriverResult<()> {
        Err(DriverError::ConnectFailed(format!(
            "protocol '{}' has no wire implementation in this build",
            self.protocol
        )))
    }

    async fn disconnect(&self) -> DriverResult<()> {
        Ok(())
    }

    async fn connected(&self) -> bool {
        false
    }

    async fn read_tag(&self, _tag: &TagRequest) -> DriverResult<TagValue> {
        Err(DriverError::Unimplemented)
    }

    async fn read_batch(&self, _tags: &[TagRequest]) -> DriverResult<HashMap<String, TagValue>> {
        Err(DriverError::Unimplemented)
    }

    fn supports_batch(&self) -> bool {
        false
    }

    async fn write_tag(&self, _tag: &TagRequest, _value: TagValue) -> DriverResult<bool> {
        Err(DriverError::Unimplemented)
    }

    async fn diagnostics(&self) -> DriverDiagnostics {
        DriverDiagnostics {
            last_error: Some("unimplemented protocol".to_string()),
            ..Default::default()
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
