//! Looks up a driver constructor by protocol tag (§4.1, §3 PlcDevice
//! protocol field). Resolves the teacher's own TODO in `main.rs`:
//! "Add a 'driver_type' field to DriverConfig to select the correct driver."

use crate::drivers::opcua::OpcUaDriver;
use crate::drivers::stub::StubDriver;
use crate::drivers::traits::{DeviceDriver, DriverConfig};
use crate::error::DriverError;
use std::sync::Arc;

/// The closed set of supported protocol tags (§3).
pub const PROTOCOLS: &[&str] = &["modbus-tcp", "modbus-rtu", "s7", "ethernet-ip", "opcua"];

pub fn build_driver(
    protocol: &str,
    config: DriverConfig,
) -> Result<Arc<dyn DeviceDriver>, DriverError> {
    match protocol {
        "opcua" => Ok(Arc::new(OpcUaDriver::new(config))),
        "modbus-tcp" | "modbus-rtu" | "s7" | "ethernet-ip" => {
            // Leaked as 'static: protocol tags come from a small closed set,
            // not user input, so this never grows unbounded.
            let label: &'static str = match protocol {
                "modbus-tcp" => "modbus-tcp",
                "modbus-rtu" => "modbus-rtu",
                "s7" => "s7",
                "ethernet-ip" => "ethernet-ip",
                _ => unreachable!(),
            };
            Ok(Arc::new(StubDriver::new(config, label)))
        }
        other => Err(DriverError::ConnectFailed(format!(
            "unknown protocol '{other}'"
        ))),
    }
}
