//! Error types for the APIX panel hardware library.

use thiserror::Error;

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur when interacting with the panel.
#[derive(Error, Debug)]
pub enum Error {
    /// LCD device not found or could not be opened.
    #[error("LCD device not found (VID:PID 0402:3922)")]
    NoDevice,

    /// Interface claim or device reset failed.
    #[error("failed to claim interface {0}")]
    ClaimFailed(u8),

    /// USB transport error.
    #[error("USB error: {0}")]
    Usb(#[from] rusb::Error),

    /// A bulk transfer returned an OS error or moved fewer bytes than asked.
    #[error("bulk transfer failed: {0}")]
    TransferFailed(String),

    /// CSW signature or tag did not match the command.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The device rejected a command it should accept when ready.
    #[error("device not ready")]
    DeviceNotReady,

    /// The startup handshake did not settle before its deadline.
    #[error("handshake did not settle within {0} seconds")]
    HandshakeTimeout(u64),

    /// Frame buffer size mismatch.
    #[error("frame size mismatch: expected {expected}, got {actual}")]
    FrameSize { expected: usize, actual: usize },
}
