//! # Error Module
//!
//! This module provides custom error types for the `serial_probe` crate.
//! It uses the `thiserror` crate for ergonomic error handling.

use thiserror::Error;

/// Result type alias for `serial_probe` operations.
pub type Result<T> = std::result::Result<T, SerialProbeError>;

/// Main error type for the `serial_probe` crate.
#[derive(Debug, Error)]
pub enum SerialProbeError {
    /// The host has no usable serial capability.
    #[error("Serial ports are not supported on this platform: {0}")]
    UnsupportedPlatform(String),

    /// The user declined or the OS refused access to the device.
    #[error("Permission denied for serial port '{port_name}': {reason}")]
    PermissionDenied { port_name: String, reason: String },

    /// No port was selected or the named port does not exist.
    #[error("No serial port selected: {0}")]
    NoPortSelected(String),

    /// A connection is already being established or is live.
    #[error("Already connected")]
    AlreadyConnected,

    /// The operation requires a live connection.
    #[error("Not connected")]
    NotConnected,

    /// Outbound hex payload failed validation.
    #[error("Invalid hex format: {0}")]
    InvalidHexFormat(String),

    /// Read or write failure from the underlying transport.
    #[error("Device I/O error: {0}")]
    DeviceIo(String),

    /// The device refused the requested line settings.
    #[error("Configuration rejected: {0}")]
    ConfigurationRejected(String),

    /// File I/O error from settings persistence or export.
    #[error("File I/O error: {0}")]
    FileIo(#[from] std::io::Error),
}

impl SerialProbeError {
    /// Creates a new permission-denied error.
    #[must_use]
    pub fn permission_denied(port_name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::PermissionDenied {
            port_name: port_name.into(),
            reason: reason.into(),
        }
    }

    /// Creates a new device I/O error.
    #[must_use]
    pub fn device_io(msg: impl Into<String>) -> Self {
        Self::DeviceIo(msg.into())
    }

    /// Creates a new invalid-hex error.
    #[must_use]
    pub fn invalid_hex(msg: impl Into<String>) -> Self {
        Self::InvalidHexFormat(msg.into())
    }

    /// Creates a new configuration-rejected error.
    #[must_use]
    pub fn configuration_rejected(msg: impl Into<String>) -> Self {
        Self::ConfigurationRejected(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_permission_denied_error() {
        let error = SerialProbeError::permission_denied("/dev/ttyUSB0", "Access denied");
        let msg = error.to_string();
        assert!(msg.contains("/dev/ttyUSB0"));
        assert!(msg.contains("Access denied"));
    }

    #[test]
    fn test_device_io_error() {
        let error = SerialProbeError::device_io("Broken pipe");
        assert!(error.to_string().contains("Broken pipe"));
    }

    #[test]
    fn test_invalid_hex_error() {
        let error = SerialProbeError::invalid_hex("odd number of digits");
        assert!(error.to_string().contains("odd number of digits"));
    }

    #[test]
    fn test_state_errors() {
        assert_eq!(
            SerialProbeError::AlreadyConnected.to_string(),
            "Already connected"
        );
        assert_eq!(SerialProbeError::NotConnected.to_string(), "Not connected");
    }
}
