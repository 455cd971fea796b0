//! Error types for the IEC 61850 control client.

use thiserror::Error;

/// Result type alias for control operations.
pub type Result<T> = std::result::Result<T, ControlError>;

/// IEC 61850 control client error types.
#[derive(Debug, Error)]
pub enum ControlError {
    /// Connection error reported by the transport layer
    #[error("Connection error: {0}")]
    Connection(String),

    /// Not connected to the IED
    #[error("Not connected")]
    NotConnected,

    /// Address does not resolve to a usable Data-Object reference
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    /// Service request rejected by the IED
    #[error("Service rejected (code {code}): {description}")]
    ServiceRejected {
        /// Device-reported error code
        code: i32,
        /// Fixed description for the code
        description: &'static str,
    },

    /// The IED-assigned ctlNum could not be determined after select
    #[error("ctlNum unavailable: polling and async capture both failed")]
    CtlNumUnavailable,

    /// Both the formal service tier and the raw-write fallback tier failed
    #[error("All {operation} strategies exhausted")]
    AllStrategiesExhausted {
        /// The operation that was attempted ("select", "operate")
        operation: &'static str,
    },

    /// A value could not be interpreted as required
    #[error("Invalid value: {0}")]
    InvalidValue(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ControlError {
    /// Create a connection error with a message.
    pub fn connection(msg: impl Into<String>) -> Self {
        Self::Connection(msg.into())
    }

    /// Create an invalid address error.
    pub fn invalid_address(msg: impl Into<String>) -> Self {
        Self::InvalidAddress(msg.into())
    }

    /// Create an invalid value error.
    pub fn invalid_value(msg: impl Into<String>) -> Self {
        Self::InvalidValue(msg.into())
    }

    /// Create a service rejection from a device-reported error code.
    pub fn service_rejected(code: i32) -> Self {
        Self::ServiceRejected {
            code,
            description: service_error_description(code),
        }
    }

    /// Check if this error indicates a connection problem.
    pub fn is_connection_error(&self) -> bool {
        matches!(self, Self::Connection(_) | Self::NotConnected | Self::Io(_))
    }
}

/// Map a device-reported service error code to a fixed description.
///
/// The code space follows the MMS client error enumeration exposed by
/// common IED client stacks.
pub fn service_error_description(code: i32) -> &'static str {
    match code {
        0 => "no error",
        1 => "not connected",
        2 => "already connected",
        3 => "connection lost",
        4 => "service not supported",
        5 => "connection rejected",
        6 => "outstanding call limit reached",
        7 => "invalid argument",
        8 => "report dataset mismatch",
        10 => "object reference invalid",
        11 => "unexpected value received",
        12 => "timeout",
        13 => "object access denied",
        14 => "object undefined",
        15 => "invalid address",
        16 => "hardware fault",
        17 => "type inconsistent",
        18 => "temporarily unavailable",
        19 => "object value invalid",
        20 => "option not supported",
        _ => "unknown error",
    }
}
