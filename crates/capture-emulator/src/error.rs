//! Emulator Error Types

use thiserror::Error;

/// Errors raised while acquiring a frame from the socket peer
#[derive(Debug, Error)]
pub enum SourceError {
    /// Socket could not be reached
    #[error("Failed to connect to {path}: {reason}")]
    Connect { path: String, reason: String },

    /// No data within the read window
    #[error("No frame data within {0}ms")]
    Timeout(u64),

    /// Peer reset or the read failed mid-frame
    #[error("Connection error: {0}")]
    Connection(String),

    /// Peer sent more bytes than the buffer holds
    #[error("Frame exceeds buffer capacity of {capacity} bytes")]
    Overflow { capacity: usize },

    /// Peer closed without sending anything
    #[error("No data received")]
    Empty,
}

/// Errors while validating the device configuration
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// Pixel encoding not in the supported set
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    /// Resolution with a zero dimension
    #[error("Invalid resolution {width}x{height}")]
    InvalidResolution { width: u32, height: u32 },
}

/// Errors returned by device operations
#[derive(Debug, Error)]
pub enum DeviceError {
    /// Configuration was rejected
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigError),

    /// Emulation is disabled for this process
    #[error("Emulation inactive: {0}")]
    Inactive(String),

    /// Handle does not refer to the open device
    #[error("Bad device handle {0}")]
    BadHandle(i32),

    /// Device already open
    #[error("Device already open (handle {0})")]
    Busy(i32),

    /// Path is not the emulated device
    #[error("{path} is not the emulated device {target}")]
    NotFound { path: String, target: String },

    /// Out-of-range index, wrong type, format mismatch and the like
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Completion queue is empty
    #[error("No buffer ready")]
    WouldBlock,

    /// Frame acquisition failed, the buffer was handed back to the queue
    #[error("Fetch into buffer {index} failed: {source}")]
    Fetch {
        index: usize,
        #[source]
        source: SourceError,
    },

    /// Completion queue or region failure
    #[error("I/O error: {0}")]
    Io(String),

    /// Control code not implemented
    #[error("Unsupported control request 0x{0:08x}")]
    Unsupported(u32),
}

impl DeviceError {
    /// errno value a V4L2 caller expects for this error
    pub fn errno(&self) -> i32 {
        match self {
            DeviceError::Configuration(_)
            | DeviceError::Inactive(_)
            | DeviceError::InvalidArgument(_) => libc::EINVAL,
            DeviceError::BadHandle(_) => libc::EBADF,
            DeviceError::Busy(_) => libc::EBUSY,
            DeviceError::NotFound { .. } => libc::ENOENT,
            DeviceError::WouldBlock => libc::EAGAIN,
            DeviceError::Fetch { .. } | DeviceError::Io(_) => libc::EIO,
            DeviceError::Unsupported(_) => libc::ENOTTY,
        }
    }

    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        DeviceError::InvalidArgument(msg.into())
    }
}

impl From<std::io::Error> for DeviceError {
    fn from(err: std::io::Error) -> Self {
        DeviceError::Io(err.to_string())
    }
}
