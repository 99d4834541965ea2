//! Table definitions and row types for the Local Store (§3 data model, §4.2).
//!
//! One embedded SQLite database backs `gateway_config`, `plc_devices`,
//! `tag_definitions`, `tag_history`, `data_buffer`, `alarm_events` and
//! `config_audit` (§9 open question 4: a single-file layout, not the
//! original's split `buffer.db`/`gateway_config.db`, chosen because nothing
//! in §3's invariants requires the split).

use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub const DDL: &str = r#"
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS gateway_config (
    key   TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS plc_devices (
    id                TEXT PRIMARY KEY,
    name              TEXT NOT NULL,
    protocol          TEXT NOT NULL,
    enabled           INTEGER NOT NULL DEFAULT 1,
    connection_config TEXT NOT NULL DEFAULT '{}',
    scan_interval_ms  INTEGER NOT NULL DEFAULT 1000,
    timeout_ms        INTEGER NOT NULL DEFAULT 3000,
    retry_count       INTEGER NOT NULL DEFAULT 3,
    status            TEXT NOT NULL DEFAULT 'disconnected',
    last_connect_time INTEGER,
    last_error        TEXT,
    stats             TEXT NOT NULL DEFAULT '{}',
    portal_sync       INTEGER NOT NULL DEFAULT 1,
    local_only        INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS tag_definitions (
    id               TEXT PRIMARY KEY,
    plc_id           TEXT NOT NULL REFERENCES plc_devices(id) ON DELETE CASCADE,
    name             TEXT NOT NULL,
    address          TEXT NOT NULL,
    data_type        TEXT NOT NULL,
    scan_class       TEXT NOT NULL DEFAULT 'default',
    active           INTEGER NOT NULL DEFAULT 1,
    unit             TEXT,
    scaling_enabled  INTEGER NOT NULL DEFAULT 0,
    scaling_factor   REAL NOT NULL DEFAULT 1.0,
    scaling_offset   REAL NOT NULL DEFAULT 0.0,
    min_value        REAL,
    max_value        REAL,
    deadband         REAL,
    log_enabled      INTEGER NOT NULL DEFAULT 0,
    alarm_enabled    INTEGER NOT NULL DEFAULT 0,
    alarm_config     TEXT,
    last_value       REAL,
    last_quality     INTEGER,
    last_timestamp   INTEGER,
    portal_sync      INTEGER NOT NULL DEFAULT 1,
    local_only       INTEGER NOT NULL DEFAULT 0
);
CREATE INDEX IF NOT EXISTS idx_tag_definitions_plc ON tag_definitions(plc_id);

CREATE TABLE IF NOT EXISTS tag_history (
    id        INTEGER PRIMARY KEY AUTOINCREMENT,
    tag_id    TEXT NOT NULL,
    value     REAL NOT NULL,
    quality   INTEGER NOT NULL,
    timestamp INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_tag_history_tag ON tag_history(tag_id, timestamp);

CREATE TABLE IF NOT EXISTS data_buffer (
    id         INTEGER PRIMARY KEY AUTOINCREMENT,
    tag_id     TEXT NOT NULL,
    value      REAL NOT NULL,
    quality    INTEGER NOT NULL,
    timestamp  INTEGER NOT NULL,
    uploaded   INTEGER NOT NULL DEFAULT 0,
    created_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_data_buffer_uploaded ON data_buffer(uploaded, timestamp);

CREATE TABLE IF NOT EXISTS alarm_events (
    id         INTEGER PRIMARY KEY AUTOINCREMENT,
    tag_id     TEXT NOT NULL,
    condition  TEXT NOT NULL,
    active     INTEGER NOT NULL DEFAULT 1,
    raised_at  INTEGER NOT NULL,
    cleared_at INTEGER,
    message    TEXT
);

CREATE TABLE IF NOT EXISTS config_audit (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    entity_type TEXT NOT NULL,
    entity_id   TEXT NOT NULL,
    action      TEXT NOT NULL,
    prior_value TEXT,
    new_value   TEXT,
    source      TEXT NOT NULL,
    timestamp   INTEGER NOT NULL
);
"#;

pub fn apply_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(DDL)
}

/// Closed set of supported protocol tags (§3), shared with `drivers::registry`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Protocol {
    ModbusTcp,
    ModbusRtu,
    S7,
    EthernetIp,
    Opcua,
}

impl Protocol {
    pub fn as_str(self) -> &'static str {
        match self {
            Protocol::ModbusTcp => "modbus-tcp",
            Protocol::ModbusRtu => "modbus-rtu",
            Protocol::S7 => "s7",
            Protocol::EthernetIp => "ethernet-ip",
            Protocol::Opcua => "opcua",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Protocol {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "modbus-tcp" => Ok(Protocol::ModbusTcp),
            "modbus-rtu" => Ok(Protocol::ModbusRtu),
            "s7" => Ok(Protocol::S7),
            "ethernet-ip" => Ok(Protocol::EthernetIp),
            "opcua" => Ok(Protocol::Opcua),
            other => Err(format!("unknown protocol '{other}'")),
        }
    }
}

/// Closed set of tag data types (§3). `String` carries an optional max
/// length (`STRING[:N]`).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum DataType {
    Bool,
    Byte,
    Int16,
    Uint16,
    Int32,
    Uint32,
    Int64,
    Uint64,
    Float32,
    Float64,
    String(Option<u32>),
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataType::Bool => write!(f, "BOOL"),
            DataType::Byte => write!(f, "BYTE"),
            DataType::Int16 => write!(f, "INT16"),
            DataType::Uint16 => write!(f, "UINT16"),
            DataType::Int32 => write!(f, "INT32"),
            DataType::Uint32 => write!(f, "UINT32"),
            DataType::Int64 => write!(f, "INT64"),
            DataType::Uint64 => write!(f, "UINT64"),
            DataType::Float32 => write!(f, "FLOAT32"),
            DataType::Float64 => write!(f, "FLOAT64"),
            DataType::String(None) => write!(f, "STRING"),
            DataType::String(Some(n)) => write!(f, "STRING:{n}"),
        }
    }
}

impl FromStr for DataType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "BOOL" => Ok(DataType::Bool),
            "BYTE" => Ok(DataType::Byte),
            "INT16" => Ok(DataType::Int16),
            "UINT16" => Ok(DataType::Uint16),
            "INT32" => Ok(DataType::Int32),
            "UINT32" => Ok(DataType::Uint32),
            "INT64" => Ok(DataType::Int64),
            "UINT64" => Ok(DataType::Uint64),
            "FLOAT32" => Ok(DataType::Float32),
            "FLOAT64" => Ok(DataType::Float64),
            "STRING" => Ok(DataType::String(None)),
            other => match other.strip_prefix("STRING:") {
                Some(n) => n
                    .parse::<u32>()
                    .map(|n| DataType::String(Some(n)))
                    .map_err(|_| format!("invalid STRING length in '{other}'")),
                None => Err(format!("unknown data type '{other}'")),
            },
        }
    }
}

/// PlcDevice connection status (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlcStatus {
    Disconnected,
    Connecting,
    Connected,
    Error,
}

impl fmt::Display for PlcStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PlcStatus::Disconnected => "disconnected",
            PlcStatus::Connecting => "connecting",
            PlcStatus::Connected => "connected",
            PlcStatus::Error => "error",
        };
        f.write_str(s)
    }
}

impl FromStr for PlcStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "disconnected" => Ok(PlcStatus::Disconnected),
            "connecting" => Ok(PlcStatus::Connecting),
            "connected" => Ok(PlcStatus::Connected),
            "error" => Ok(PlcStatus::Error),
            other => Err(format!("unknown plc status '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditAction {
    Create,
    Update,
    Delete,
}

impl AuditAction {
    pub fn as_str(self) -> &'static str {
        match self {
            AuditAction::Create => "create",
            AuditAction::Update => "update",
            AuditAction::Delete => "delete",
        }
    }
}

impl FromStr for AuditAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "create" => Ok(AuditAction::Create),
            "update" => Ok(AuditAction::Update),
            "delete" => Ok(AuditAction::Delete),
            other => Err(format!("unknown audit action '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditSource {
    Portal,
    Local,
}

impl AuditSource {
    pub fn as_str(self) -> &'static str {
        match self {
            AuditSource::Portal => "portal",
            AuditSource::Local => "local",
        }
    }
}

impl FromStr for AuditSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "portal" => Ok(AuditSource::Portal),
            "local" => Ok(AuditSource::Local),
            other => Err(format!("unknown audit source '{other}'")),
        }
    }
}

/// Row shape for `plc_devices` (§3 PlcDevice).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlcDeviceRow {
    pub id: String,
    pub name: String,
    pub protocol: Protocol,
    pub enabled: bool,
    pub connection_config: serde_json::Value,
    pub scan_interval_ms: u64,
    pub timeout_ms: u64,
    pub retry_count: u32,
    pub status: PlcStatus,
    pub last_connect_time: Option<i64>,
    pub last_error: Option<String>,
    pub stats: serde_json::Value,
    pub portal_sync: bool,
    pub local_only: bool,
}

/// Row shape for `tag_definitions` (§3 TagDefinition).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TagDefinitionRow {
    pub id: String,
    pub plc_id: String,
    pub name: String,
    pub address: String,
    pub data_type: DataType,
    pub scan_class: String,
    pub active: bool,
    pub unit: Option<String>,
    pub scaling_enabled: bool,
    pub scaling_factor: f64,
    pub scaling_offset: f64,
    pub min_value: Option<f64>,
    pub max_value: Option<f64>,
    pub deadband: Option<f64>,
    pub log_enabled: bool,
    pub alarm_enabled: bool,
    pub alarm_config: Option<serde_json::Value>,
    pub last_value: Option<f64>,
    pub last_quality: Option<u8>,
    pub last_timestamp: Option<i64>,
    pub portal_sync: bool,
    pub local_only: bool,
}

/// Row shape for `data_buffer` (§3 Sample).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub id: i64,
    pub tag_id: String,
    pub value: f64,
    pub quality: u8,
    pub timestamp: i64,
    pub uploaded: bool,
    pub created_at: i64,
}

/// Row shape for `config_audit` (§3 AuditRecord).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: i64,
    pub entity_type: String,
    pub entity_id: String,
    pub action: AuditAction,
    pub prior_value: Option<serde_json::Value>,
    pub new_value: Option<serde_json::Value>,
    pub source: AuditSource,
    pub timestamp: i64,
}

/// Row shape for `alarm_events`. Schema present per §3; production is
/// deferred to a later iteration (§9) -- nothing in this crate writes to
/// this table yet.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlarmEvent {
    pub id: i64,
    pub tag_id: String,
    pub condition: String,
    pub active: bool,
    pub raised_at: i64,
    pub cleared_at: Option<i64>,
    pub message: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protocol_round_trips_through_str() {
        for p in [
            Protocol::ModbusTcp,
            Protocol::ModbusRtu,
            Protocol::S7,
            Protocol::EthernetIp,
            Protocol::Opcua,
        ] {
            assert_eq!(Protocol::from_str(p.as_str()).unwrap(), p);
        }
    }

    #[test]
    fn data_type_round_trips_through_str() {
        for dt in [
            DataType::Bool,
            DataType::Int32,
            DataType::Float64,
            DataType::String(None),
            DataType::String(Some(32)),
        ] {
            assert_eq!(DataType::from_str(&dt.to_string()).unwrap(), dt);
        }
    }

    #[test]
    fn schema_applies_cleanly() {
        let conn = Connection::open_in_memory().unwrap();
        apply_schema(&conn).unwrap();
        let count: i64 = conn
            .query_row(
                "SELECT count(*) FROM sqlite_master WHERE type='table'",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert!(count >= 7);
    }
}
