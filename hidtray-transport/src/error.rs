//! Transport error types

use thiserror::Error;

/// Errors that can occur while talking to the native HID layer
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Device disconnected")]
    Disconnected,

    #[error("Communication timeout")]
    Timeout,

    // HID-specific errors
    #[error("HID error: {0}")]
    HidError(String),

    #[error("HID permission denied: {0}")]
    HidPermissionDenied(String),

    /// Device answered with a HID++ error report
    #[error("HID++ error 0x{0:02X}")]
    Protocol(u8),

    // Hotplug notifier
    #[error("Hotplug error: {0}")]
    Hotplug(String),

    // Generic
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<hidapi::HidError> for TransportError {
    fn from(e: hidapi::HidError) -> Self {
        let msg = e.to_string();
        if msg.contains("Permission denied") || msg.contains("EPERM") {
            TransportError::HidPermissionDenied(msg)
        } else {
            TransportError::HidError(msg)
        }
    }
}

impl From<std::io::Error> for TransportError {
    fn from(e: std::io::Error) -> Self {
        if e.kind() == std::io::ErrorKind::PermissionDenied {
            TransportError::HidPermissionDenied(e.to_string())
        } else {
            TransportError::Hotplug(e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_permission_maps_to_permission_denied() {
        let err: TransportError =
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "nope").into();
        assert!(matches!(err, TransportError::HidPermissionDenied(_)));
    }

    #[test]
    fn test_other_io_maps_to_hotplug() {
        let err: TransportError = std::io::Error::other("socket closed").into();
        assert!(matches!(err, TransportError::Hotplug(_)));
        assert_eq!(err.to_string(), "Hotplug error: socket closed");
    }

    #[test]
    fn test_protocol_error_display() {
        assert_eq!(TransportError::Protocol(0x09).to_string(), "HID++ error 0x09");
    }
}
