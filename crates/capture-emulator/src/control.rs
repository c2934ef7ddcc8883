//! Control Dispatcher
//!
//! Typed control requests (one variant per supported ioctl) and the handler
//! routing each to the device. Unknown codes are their own variant and are
//! answered with `DeviceError::Unsupported`.

use std::time::Duration;

use tracing::debug;

use crate::device::{BufferInfo, DeviceHandle, Emulator};
use crate::error::DeviceError;
use crate::format::{fourcc_str, FrameFormat, FrameInterval, PixelFormat};

/// V4L2_BUF_TYPE_VIDEO_CAPTURE
pub const BUF_TYPE_VIDEO_CAPTURE: u32 = 1;
/// V4L2_MEMORY_MMAP
pub const MEMORY_MMAP: u32 = 1;

/// Capability flags
pub mod caps {
    pub const VIDEO_CAPTURE: u32 = 0x0000_0001;
    pub const STREAMING: u32 = 0x0400_0000;
    pub const DEVICE_CAPS: u32 = 0x8000_0000;
    pub const TIMEPERFRAME: u32 = 0x1000;
}

/// Buffer flags
pub mod buf_flags {
    pub const MAPPED: u32 = 0x0000_0001;
    pub const QUEUED: u32 = 0x0000_0002;
    pub const DONE: u32 = 0x0000_0004;
    pub const TIMESTAMP_MONOTONIC: u32 = 0x0000_2000;
}

/// V4L2_FMT_FLAG_COMPRESSED
pub const FMT_FLAG_COMPRESSED: u32 = 0x0001;

/// Driver name reported by QUERYCAP
pub const DRIVER_NAME: &str = "v4l2-imposter";
/// Kernel version the driver claims (5.4.0)
pub const DRIVER_VERSION: u32 = 0x0005_0400;
/// Name of the only input
pub const INPUT_NAME: &str = "Camera";

/// A decoded control request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlRequest {
    QueryCapability,
    EnumFormat { buf_type: u32, index: u32 },
    GetFormat { buf_type: u32 },
    SetFormat { buf_type: u32, width: u32, height: u32, fourcc: u32 },
    TryFormat { buf_type: u32, width: u32, height: u32, fourcc: u32 },
    RequestBuffers { buf_type: u32, memory: u32, count: u32 },
    QueryBuffer { buf_type: u32, index: u32 },
    QueueBuffer { buf_type: u32, index: u32 },
    DequeueBuffer { buf_type: u32 },
    StreamOn { buf_type: u32 },
    StreamOff { buf_type: u32 },
    GetParam { buf_type: u32 },
    SetParam { buf_type: u32, interval: FrameInterval },
    EnumFrameSizes { index: u32, fourcc: u32 },
    EnumFrameIntervals { index: u32 },
    EnumInput { index: u32 },
    GetInput,
    SetInput { index: u32 },
    /// Request code the device does not implement
    Unsupported(u32),
}

/// QUERYCAP answer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Capability {
    pub driver: String,
    pub card: String,
    pub bus_info: String,
    pub version: u32,
    pub capabilities: u32,
    pub device_caps: u32,
}

/// ENUM_FMT answer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormatDescription {
    pub index: u32,
    pub flags: u32,
    pub description: String,
    pub fourcc: u32,
}

/// Buffer state reported by QUERYBUF / DQBUF
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferReport {
    pub index: u32,
    pub bytes_used: u32,
    pub length: u32,
    pub offset: u32,
    pub flags: u32,
    pub sequence: u32,
    pub timestamp: Duration,
}

impl BufferReport {
    fn from_info(info: BufferInfo, done: bool) -> Self {
        let mut flags = 0;
        if info.mapped {
            flags |= buf_flags::MAPPED;
        }
        if info.queued {
            flags |= buf_flags::QUEUED;
        }
        if done {
            flags |= buf_flags::DONE | buf_flags::TIMESTAMP_MONOTONIC;
        }
        Self {
            index: info.index as u32,
            bytes_used: info.bytes_used as u32,
            length: info.length as u32,
            offset: info.offset as u32,
            flags,
            sequence: info.sequence,
            timestamp: info.timestamp,
        }
    }
}

/// Answer to a control request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlReply {
    Capability(Capability),
    FormatDescription(FormatDescription),
    Format(FrameFormat),
    Buffers { count: u32 },
    Buffer(BufferReport),
    StreamParam { capability: u32, interval: FrameInterval },
    FrameSize { width: u32, height: u32 },
    FrameInterval(FrameInterval),
    Input { index: u32, name: &'static str },
    InputIndex(u32),
    Done,
}

fn require_capture(op: &str, buf_type: u32) -> Result<(), DeviceError> {
    if buf_type != BUF_TYPE_VIDEO_CAPTURE {
        debug!("{}: invalid type {}", op, buf_type);
        return Err(DeviceError::invalid(format!("{}: unsupported buffer type {}", op, buf_type)));
    }
    Ok(())
}

impl Emulator {
    /// Route one control request to its handler
    pub fn control(&self, handle: DeviceHandle, request: ControlRequest) -> Result<ControlReply, DeviceError> {
        self.check_handle(handle)?;

        match request {
            ControlRequest::QueryCapability => Ok(ControlReply::Capability(self.capability())),
            ControlRequest::EnumFormat { buf_type, index } => self.enum_format(buf_type, index),
            ControlRequest::GetFormat { buf_type } => {
                require_capture("G_FMT", buf_type)?;
                let format = self.query_format(handle)?;
                debug!(
                    "G_FMT: {}x{} fmt={}",
                    format.width,
                    format.height,
                    fourcc_str(format.pixel_format.fourcc())
                );
                Ok(ControlReply::Format(format))
            }
            ControlRequest::SetFormat {
                buf_type,
                width,
                height,
                fourcc,
            }
            | ControlRequest::TryFormat {
                buf_type,
                width,
                height,
                fourcc,
            } => {
                require_capture("S_FMT", buf_type)?;
                let format = self.set_format(handle, width, height, fourcc)?;
                debug!("S_FMT: {}x{} fmt={}", width, height, fourcc_str(fourcc));
                Ok(ControlReply::Format(format))
            }
            ControlRequest::RequestBuffers { buf_type, memory, count } => {
                require_capture("REQBUFS", buf_type)?;
                if memory != MEMORY_MMAP {
                    debug!("REQBUFS: invalid memory {}", memory);
                    return Err(DeviceError::invalid(format!("REQBUFS: unsupported memory type {}", memory)));
                }
                let count = self.request_buffers(handle, count as usize)?;
                Ok(ControlReply::Buffers { count: count as u32 })
            }
            ControlRequest::QueryBuffer { buf_type, index } => {
                require_capture("QUERYBUF", buf_type)?;
                let info = self.query_buffer(handle, index as usize)?;
                Ok(ControlReply::Buffer(BufferReport::from_info(info, false)))
            }
            ControlRequest::QueueBuffer { buf_type, index } => {
                require_capture("QBUF", buf_type)?;
                let info = self.enqueue(handle, index as usize)?;
                Ok(ControlReply::Buffer(BufferReport::from_info(info, false)))
            }
            ControlRequest::DequeueBuffer { buf_type } => {
                require_capture("DQBUF", buf_type)?;
                let info = self.dequeue(handle)?;
                Ok(ControlReply::Buffer(BufferReport::from_info(info, true)))
            }
            ControlRequest::StreamOn { buf_type } => {
                require_capture("STREAMON", buf_type)?;
                self.start_streaming(handle)?;
                Ok(ControlReply::Done)
            }
            ControlRequest::StreamOff { buf_type } => {
                require_capture("STREAMOFF", buf_type)?;
                self.stop_streaming(handle)?;
                Ok(ControlReply::Done)
            }
            ControlRequest::GetParam { buf_type } => {
                require_capture("G_PARM", buf_type)?;
                debug!("G_PARM");
                Ok(ControlReply::StreamParam {
                    capability: caps::TIMEPERFRAME,
                    interval: FrameInterval::DEFAULT,
                })
            }
            ControlRequest::SetParam { buf_type, interval } => {
                require_capture("S_PARM", buf_type)?;
                debug!("S_PARM: {}/{}", interval.numerator, interval.denominator);
                Ok(ControlReply::StreamParam {
                    capability: caps::TIMEPERFRAME,
                    interval: interval.or_default(),
                })
            }
            ControlRequest::EnumFrameSizes { index, fourcc } => {
                if index > 0 {
                    debug!("ENUM_FRAMESIZES: invalid index {}", index);
                    return Err(DeviceError::invalid(format!("frame size index {}", index)));
                }
                if fourcc != self.config().pixel_format.fourcc() {
                    debug!("ENUM_FRAMESIZES: invalid format {}", fourcc_str(fourcc));
                    return Err(DeviceError::invalid(format!("pixel format {}", fourcc_str(fourcc))));
                }
                Ok(ControlReply::FrameSize {
                    width: self.config().width,
                    height: self.config().height,
                })
            }
            ControlRequest::EnumFrameIntervals { index } => {
                if index > 0 {
                    debug!("ENUM_FRAMEINTERVALS: invalid index {}", index);
                    return Err(DeviceError::invalid(format!("frame interval index {}", index)));
                }
                Ok(ControlReply::FrameInterval(FrameInterval::DEFAULT))
            }
            ControlRequest::EnumInput { index } => {
                if index > 0 {
                    return Err(DeviceError::invalid(format!("input index {}", index)));
                }
                Ok(ControlReply::Input { index: 0, name: INPUT_NAME })
            }
            ControlRequest::GetInput => Ok(ControlReply::InputIndex(0)),
            ControlRequest::SetInput { index } => {
                // Only input 0 exists; selection requests are acknowledged
                debug!("S_INPUT: {}", index);
                Ok(ControlReply::InputIndex(0))
            }
            ControlRequest::Unsupported(code) => {
                debug!("Unhandled ioctl 0x{:x}", code);
                Err(DeviceError::Unsupported(code))
            }
        }
    }

    fn capability(&self) -> Capability {
        let config = self.config();
        let capability = Capability {
            driver: DRIVER_NAME.to_string(),
            card: format!("Imposter {}", config.device),
            bus_info: config.socket_path.display().to_string(),
            version: DRIVER_VERSION,
            capabilities: caps::VIDEO_CAPTURE | caps::STREAMING | caps::DEVICE_CAPS,
            device_caps: caps::VIDEO_CAPTURE | caps::STREAMING,
        };
        debug!(
            "QUERYCAP: driver={} card={} bus_info={}",
            capability.driver, capability.card, capability.bus_info
        );
        capability
    }

    fn enum_format(&self, buf_type: u32, index: u32) -> Result<ControlReply, DeviceError> {
        if index > 0 {
            debug!("ENUM_FMT: invalid index {}", index);
            return Err(DeviceError::invalid(format!("format index {}", index)));
        }
        require_capture("ENUM_FMT", buf_type)?;

        let pixel_format: PixelFormat = self.config().pixel_format;
        debug!("ENUM_FMT index={} format={}", index, pixel_format);
        Ok(ControlReply::FormatDescription(FormatDescription {
            index,
            flags: if pixel_format.is_compressed() { FMT_FLAG_COMPRESSED } else { 0 },
            description: pixel_format.name().to_string(),
            fourcc: pixel_format.fourcc(),
        }))
    }
}
