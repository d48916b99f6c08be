//! Error types for the USB CAN driver stack
//!
//! This module defines the error taxonomy of the vendor-neutral driver
//! contract. Lower layers (USB session manager, message queue) return
//! their own conditions; the channel facade remaps them to this set.
//! Every variant carries a legacy negative return code for callers that
//! still speak the integer contract.

use thiserror::Error;

/// Result type alias for driver operations
pub type Result<T> = std::result::Result<T, CanError>;

/// Error conditions of the driver contract
#[derive(Error, Debug)]
pub enum CanError {
    /// Driver or channel not initialized
    #[error("Driver or channel not initialized")]
    NotInitialized,

    /// Channel already initialized
    #[error("Channel already initialized")]
    AlreadyInitialized,

    /// Handle out of range or not bound to a device
    #[error("Invalid channel handle")]
    InvalidHandle,

    /// A required buffer or value was missing
    #[error("Required argument missing")]
    NullPointer,

    /// Argument outside its legal range or inconsistent with the mode
    #[error("Illegal parameter: {0}")]
    IllegalParameter(&'static str),

    /// Bit-rate settings outside the controller's limits
    #[error("Invalid bit-rate settings")]
    InvalidBaudrate,

    /// Operation requires a started controller
    #[error("Controller not started")]
    ControllerOffline,

    /// Operation requires a stopped controller
    #[error("Controller already started")]
    ControllerOnline,

    /// One or more messages were lost by the controller
    #[error("Message lost")]
    MessageLost,

    /// Transmitter busy, try again
    #[error("Transmitter busy")]
    TransmitterBusy,

    /// No message available within the requested time
    #[error("Receiver empty")]
    ReceiverEmpty,

    /// Controller went bus-off
    #[error("Bus off")]
    BusOff,

    /// Controller reached the error warning level
    #[error("Error warning level reached")]
    ErrorWarning,

    /// Bus error (error passive)
    #[error("Bus error")]
    BusError,

    /// Operation timed out
    #[error("Operation timed out")]
    Timeout,

    /// Underlying USB subsystem failure
    #[error("Resource error: {0}")]
    ResourceError(rusb::Error),

    /// Requested feature or property not supported
    #[error("Not supported")]
    NotSupported,

    /// Unrecoverable lower-layer failure
    #[error("Fatal error")]
    Fatal,
}

impl CanError {
    /// Legacy negative return code of this error condition
    pub fn code(&self) -> i32 {
        match self {
            CanError::BusOff => -1,
            CanError::ErrorWarning => -2,
            CanError::BusError => -3,
            CanError::ControllerOnline => -8,
            CanError::ControllerOffline => -9,
            CanError::MessageLost => -10,
            CanError::TransmitterBusy => -20,
            CanError::ReceiverEmpty => -30,
            CanError::Timeout => -50,
            CanError::ResourceError(_) => -90,
            CanError::InvalidBaudrate => -91,
            CanError::InvalidHandle => -92,
            CanError::IllegalParameter(_) => -93,
            CanError::NullPointer => -94,
            CanError::NotInitialized => -95,
            CanError::AlreadyInitialized => -96,
            CanError::NotSupported => -98,
            CanError::Fatal => -99,
        }
    }

    /// Check whether this condition is an expected steady-state result
    /// that callers poll or retry on, rather than a failure
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            CanError::ReceiverEmpty | CanError::TransmitterBusy | CanError::Timeout
        )
    }
}

impl From<rusb::Error> for CanError {
    fn from(err: rusb::Error) -> Self {
        match err {
            rusb::Error::Timeout => CanError::Timeout,
            err => CanError::ResourceError(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes_are_negative() {
        assert_eq!(CanError::NotInitialized.code(), -95);
        assert_eq!(CanError::AlreadyInitialized.code(), -96);
        assert_eq!(CanError::InvalidHandle.code(), -92);
        assert_eq!(CanError::InvalidBaudrate.code(), -91);
        assert_eq!(CanError::ControllerOnline.code(), -8);
        assert_eq!(CanError::ControllerOffline.code(), -9);
        assert!(CanError::ReceiverEmpty.code() < 0);
    }

    #[test]
    fn test_transient_conditions() {
        assert!(CanError::ReceiverEmpty.is_transient());
        assert!(CanError::TransmitterBusy.is_transient());
        assert!(!CanError::Fatal.is_transient());
    }

    #[test]
    fn test_usb_error_mapping() {
        assert!(matches!(
            CanError::from(rusb::Error::Timeout),
            CanError::Timeout
        ));
        assert!(matches!(
            CanError::from(rusb::Error::NoDevice),
            CanError::ResourceError(rusb::Error::NoDevice)
        ));
    }
}
