use std::time::{SystemTime, UNIX_EPOCH};

/// Represents the quality of a tag's value. `Good` carries OPC code 192,
/// matching the convention the Local Store and portal payloads use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Quality {
    Good,
    Uncertain,
    Bad,
    Initializing,
    CommFailure, // Specific bad quality
    ConfigError, // Specific bad quality
}

impl Quality {
    pub const GOOD_CODE: u8 = 192;

    pub fn code(self) -> u8 {
        match self {
            Quality::Good => Self::GOOD_CODE,
            Quality::Uncertain => 64,
            Quality::Bad | Quality::Initializing | Quality::CommFailure | Quality::ConfigError => 0,
        }
    }

    pub fn from_code(code: u8) -> Self {
        match code {
            192 => Quality::Good,
            64 => Quality::Uncertain,
            _ => Quality::Bad,
        }
    }
}

impl Default for Quality {
    fn default() -> Self {
        Quality::Initializing
    }
}

/// Represents the value, quality, and timestamp of a tag.
#[derive(Debug, Clone, PartialEq)]
pub struct TagValue {
    pub value: ValueVariant,
    pub quality: Quality,
    pub timestamp: u64, // Unix timestamp milliseconds
}

impl TagValue {
    // Helper to create a new TagValue with current time
    pub fn new(value: ValueVariant, quality: Quality) -> Self {
        TagValue {
            value,
            quality,
            timestamp: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_millis() as u64,
        }
    }

    // Helper for bad quality
    pub fn bad(_reason: &str) -> Self {
        Self::new(ValueVariant::Null, Quality::Bad)
    }
}

/// Possible data types for a tag's value.
#[derive(Debug, Clone, PartialEq)] // Add PartialEq for comparisons
pub enum ValueVariant {
    Null, // Representing no value or initial state
    Bool(bool),
    Int(i64),
    UInt(u64), // Added unsigned int
    Float(f64),
    String(String),
    // TODO: Add complex types: Array, Struct/Object
}

impl ValueVariant {
    /// Numeric coercion applied when a sample is pushed into the upload
    /// queue. Strings (and Null) coerce to 0.0 -- a preserved defect, see
    /// spec.md §9 open question 2.
    pub fn as_f64(&self) -> f64 {
        match self {
            ValueVariant::Null => 0.0,
            ValueVariant::Bool(b) => *b as u8 as f64,
            ValueVariant::Int(i) => *i as f64,
            ValueVariant::UInt(u) => *u as f64,
            ValueVariant::Float(f) => *f,
            ValueVariant::String(_) => 0.0,
        }
    }

    pub fn is_numeric(&self) -> bool {
        !matches!(self, ValueVariant::String(_) | ValueVariant::Null)
    }
}

/// Represents a single tag in the system.
#[derive(Debug, Clone)]
pub struct Tag {
    /// Unique path identifying the tag (e.g., "Folder/Device/TagName").
    pub path: String,
    /// Current value, quality, and timestamp.
    pub value: TagValue,
    /// Source driver ID providing this tag's value.
    pub driver_id: String,
    /// Protocol-specific address for this tag on the source device.
    pub driver_address: String,
    /// Poll rate in milliseconds.
    pub poll_rate_ms: u64,
    /// Metadata about the tag.
    pub metadata: TagMetadata,
}

/// Metadata associated with a tag.
#[derive(Debug, Clone, Default)] // Default trait for easy initialization
pub struct TagMetadata {
    pub description: Option<String>,
    pub eng_unit: Option<String>,
    pub eng_low: Option<f64>,
    pub eng_high: Option<f64>,
    pub writable: bool,
    // Add other relevant metadata: security, history settings etc.
}
