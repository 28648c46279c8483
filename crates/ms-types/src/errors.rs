use thiserror::Error;

/// Main error type for the MultiShot system
#[derive(Error, Debug)]
pub enum MsError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Bridge error: {0}")]
    Bridge(#[from] BridgeError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Validation error: {0}")]
    Validation(String),
}

impl MsError {
    /// True when the error means the experiment host is gone for good and the
    /// run cannot produce further costs.
    pub fn is_unrecoverable(&self) -> bool {
        matches!(self, MsError::Bridge(BridgeError::Unrecoverable { .. }))
    }
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid configuration: {message}")]
    Invalid { message: String },

    #[error("Failed to read configuration file {path}: {message}")]
    ReadFailed { path: String, message: String },

    #[error("Failed to parse configuration file {path}: {message}")]
    ParseFailed { path: String, message: String },
}

/// Errors raised by a single experiment-host request
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Request timed out after {timeout_ms} ms")]
    Timeout { timeout_ms: u64 },

    #[error("Connection to experiment host failed: {message}")]
    Connection { message: String },

    #[error("Malformed exchange with experiment host: {message}")]
    Protocol { message: String },
}

impl TransportError {
    /// Only timeouts are worth retrying.
    pub fn is_timeout(&self) -> bool {
        matches!(self, TransportError::Timeout { .. })
    }
}

/// Errors raised while the optimizer bridge evaluates a point
#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Experiment host unreachable after {attempts} attempts: {source}")]
    Unrecoverable {
        attempts: u32,
        #[source]
        source: TransportError,
    },

    #[error("Experiment request failed: {0}")]
    Request(#[source] TransportError),

    #[error("Result channel closed while waiting for iteration {iteration}")]
    ChannelClosed { iteration: u64 },

    #[error("Controller finished without a valid cost after {iterations} iterations")]
    NoValidCost { iterations: usize },
}

/// Result type alias for MultiShot operations
pub type MsResult<T> = Result<T, MsError>;

/// Macro for creating validation errors
#[macro_export]
macro_rules! validation_error {
    ($($arg:tt)*) => {
        $crate::MsError::Validation(format!($($arg)*))
    };
}

/// Macro for creating internal errors
#[macro_export]
macro_rules! internal_error {
    ($($arg:tt)*) => {
        $crate::MsError::Internal(format!($($arg)*))
    };
}

/// Macro for creating configuration errors
#[macro_export]
macro_rules! config_error {
    ($($arg:tt)*) => {
        $crate::MsError::Config($crate::ConfigError::Invalid {
            message: format!($($arg)*),
        })
    };
}
