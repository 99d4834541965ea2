use thiserror::Error;

/// Errors that must stop the process: the Supervisor never restart-loops these.
#[derive(Debug, Error)]
pub enum FatalError {
    #[error("activation rejected by portal (bad activation code): {0}")]
    BadActivationCode(String),
    #[error("local store schema corrupt or unreadable: {0}")]
    StorageCorrupt(String),
    #[error("startup config.json missing or malformed: {0}")]
    BadStartupConfig(String),
}

/// Errors that should be retried with backoff; data stays buffered.
#[derive(Debug, Error)]
pub enum TransientError {
    #[error("network error: {0}")]
    Network(String),
    #[error("portal returned server error {status}: {body}")]
    PortalServerError { status: u16, body: String },
    #[error("request timed out")]
    Timeout,
}

/// Driver-level failures: connect/read/write. Never cross a PLC loop boundary.
#[derive(Debug, Error)]
pub enum DriverError {
    #[error("driver not connected")]
    NotConnected,
    #[error("connect failed: {0}")]
    ConnectFailed(String),
    #[error("read failed: {0}")]
    ReadFailed(String),
    #[error("write failed: {0}")]
    WriteFailed(String),
    #[error("invalid address '{0}'")]
    InvalidAddress(String),
    #[error("operation not implemented for this protocol")]
    Unimplemented,
}

/// Top-level error type threaded through the Supervisor and subsystem tasks.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error(transparent)]
    Fatal(#[from] FatalError),
    #[error(transparent)]
    Transient(#[from] TransientError),
    #[error(transparent)]
    Driver(#[from] DriverError),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("store error: {0}")]
    Store(#[from] rusqlite::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl GatewayError {
    /// Whether the Supervisor should treat this as fatal (stop, no restart).
    pub fn is_fatal(&self) -> bool {
        matches!(self, GatewayError::Fatal(_))
    }
}

pub type Result<T, E = GatewayError> = std::result::Result<T, E>;
