//! Software V4L2 Capture Device
//!
//! Emulates a memory-mapped V4L2 capture device whose frames come from a
//! local Unix stream socket instead of a sensor:
//! - Buffer pool of up to four mmap-style buffers
//! - Non-blocking completion queue with a pollable readiness descriptor
//! - Device state machine (open, format, buffers, streaming)
//! - Typed control requests mirroring the V4L2 ioctls

pub mod config;
pub mod control;
pub mod device;
pub mod error;
pub mod format;
pub mod pool;
pub mod queue;
pub mod source;

pub use config::{DeviceConfig, MAX_BUFFERS};
pub use control::{BufferReport, Capability, ControlReply, ControlRequest, FormatDescription};
pub use device::{BufferInfo, DeviceHandle, DeviceState, Emulator};
pub use error::{ConfigError, DeviceError, SourceError};
pub use format::{FrameFormat, FrameInterval, PixelFormat, MAX_BUFFER_SIZE};
pub use pool::Mapping;
pub use source::{Fetched, FrameSource, SocketSource};
