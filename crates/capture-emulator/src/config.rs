//! Device configuration

use std::path::PathBuf;
use std::time::Duration;

use crate::error::ConfigError;
use crate::format::{FrameFormat, PixelFormat};

/// Buffer pool ceiling
pub const MAX_BUFFERS: usize = 4;

/// Default socket read timeout
pub const DEFAULT_TIMEOUT_MS: u64 = 1000;

/// Validated configuration the emulator is built from
#[derive(Debug, Clone)]
pub struct DeviceConfig {
    /// Device node to answer for (e.g., "/dev/video0"); empty matches any path
    pub device: String,
    /// Capture width
    pub width: u32,
    /// Capture height
    pub height: u32,
    /// Pixel encoding
    pub pixel_format: PixelFormat,
    /// Unix socket serving frames
    pub socket_path: PathBuf,
    /// Per-read timeout on the frame socket
    pub timeout: Duration,
    /// Buffer count ceiling (at most MAX_BUFFERS)
    pub max_buffers: usize,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            device: "/dev/video0".to_string(),
            width: 1920,
            height: 1080,
            pixel_format: PixelFormat::Mjpeg,
            socket_path: PathBuf::new(),
            timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            max_buffers: MAX_BUFFERS,
        }
    }
}

impl DeviceConfig {
    /// Negotiated format derived from the configuration
    pub fn format(&self) -> FrameFormat {
        FrameFormat::new(self.width, self.height, self.pixel_format)
    }

    /// Reject empty resolutions and clamp the buffer ceiling
    ///
    /// Frames larger than `MAX_BUFFER_SIZE` are accepted here; format and
    /// buffer negotiation on the open device refuse them instead.
    pub fn validate(mut self) -> Result<Self, ConfigError> {
        if self.width == 0 || self.height == 0 {
            return Err(ConfigError::InvalidResolution {
                width: self.width,
                height: self.height,
            });
        }
        self.max_buffers = self.max_buffers.clamp(1, MAX_BUFFERS);
        Ok(self)
    }

    /// Whether `path` names the emulated device
    pub fn matches_device(&self, path: &str) -> bool {
        self.device.is_empty() || self.device == path
    }
}
