//! V4L2 ABI: structure layouts and ioctl codes (matches linux/videodev2.h)
//!
//! Layouts follow the kernel UAPI for the target's pointer width; the ioctl
//! codes are derived from the struct sizes the same way `_IOWR` does.

use std::mem::size_of;
use std::os::raw::{c_int, c_ulong, c_void};

use capture_emulator::control::BUF_TYPE_VIDEO_CAPTURE;
use capture_emulator::{BufferReport, ControlReply, ControlRequest, FrameFormat, FrameInterval};

const IOC_WRITE: u32 = 1;
const IOC_READ: u32 = 2;

const fn ioc(dir: u32, nr: u32, size: usize) -> u32 {
    (dir << 30) | ((size as u32) << 16) | ((b'V' as u32) << 8) | nr
}

pub const V4L2_FIELD_NONE: u32 = 1;
pub const V4L2_COLORSPACE_JPEG: u32 = 7;
pub const V4L2_MEMORY_MMAP: u32 = 1;
pub const V4L2_FRMSIZE_TYPE_DISCRETE: u32 = 1;
pub const V4L2_FRMIVAL_TYPE_DISCRETE: u32 = 1;
pub const V4L2_INPUT_TYPE_CAMERA: u32 = 2;

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct V4l2Capability {
    pub driver: [u8; 16],
    pub card: [u8; 32],
    pub bus_info: [u8; 32],
    pub version: u32,
    pub capabilities: u32,
    pub device_caps: u32,
    pub reserved: [u32; 3],
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct V4l2FmtDesc {
    pub index: u32,
    pub type_: u32,
    pub flags: u32,
    pub description: [u8; 32],
    pub pixelformat: u32,
    pub mbus_code: u32,
    pub reserved: [u32; 3],
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct V4l2PixFormat {
    pub width: u32,
    pub height: u32,
    pub pixelformat: u32,
    pub field: u32,
    pub bytesperline: u32,
    pub sizeimage: u32,
    pub colorspace: u32,
    pub priv_: u32,
    pub flags: u32,
    pub ycbcr_enc: u32,
    pub quantization: u32,
    pub xfer_func: u32,
}

/// `fmt` union of v4l2_format; pointer-aligned because of v4l2_window
#[repr(C)]
#[derive(Clone, Copy)]
pub union V4l2FormatUnion {
    pub pix: V4l2PixFormat,
    pub raw_data: [u8; 200],
    _align: [*mut c_void; 0],
}

#[repr(C)]
#[derive(Clone, Copy)]
pub struct V4l2Format {
    pub type_: u32,
    pub fmt: V4l2FormatUnion,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct V4l2RequestBuffers {
    pub count: u32,
    pub type_: u32,
    pub memory: u32,
    pub capabilities: u32,
    pub flags: u8,
    pub reserved: [u8; 3],
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct V4l2Timecode {
    pub type_: u32,
    pub flags: u32,
    pub frames: u8,
    pub seconds: u8,
    pub minutes: u8,
    pub hours: u8,
    pub userbits: [u8; 4],
}

#[repr(C)]
#[derive(Clone, Copy)]
pub union V4l2BufferM {
    pub offset: u32,
    pub userptr: c_ulong,
    pub planes: *mut c_void,
    pub fd: i32,
}

#[repr(C)]
#[derive(Clone, Copy)]
pub struct V4l2Buffer {
    pub index: u32,
    pub type_: u32,
    pub bytesused: u32,
    pub flags: u32,
    pub field: u32,
    pub timestamp: libc::timeval,
    pub timecode: V4l2Timecode,
    pub sequence: u32,
    pub memory: u32,
    pub m: V4l2BufferM,
    pub length: u32,
    pub reserved2: u32,
    pub request_fd: i32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct V4l2Fract {
    pub numerator: u32,
    pub denominator: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct V4l2CaptureParm {
    pub capability: u32,
    pub capturemode: u32,
    pub timeperframe: V4l2Fract,
    pub extendedmode: u32,
    pub readbuffers: u32,
    pub reserved: [u32; 4],
}

#[repr(C)]
#[derive(Clone, Copy)]
pub union V4l2StreamParmUnion {
    pub capture: V4l2CaptureParm,
    pub raw_data: [u8; 200],
}

#[repr(C)]
#[derive(Clone, Copy)]
pub struct V4l2StreamParm {
    pub type_: u32,
    pub parm: V4l2StreamParmUnion,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct V4l2FrmSizeDiscrete {
    pub width: u32,
    pub height: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct V4l2FrmSizeStepwise {
    pub min_width: u32,
    pub max_width: u32,
    pub step_width: u32,
    pub min_height: u32,
    pub max_height: u32,
    pub step_height: u32,
}

#[repr(C)]
#[derive(Clone, Copy)]
pub union V4l2FrmSizeUnion {
    pub discrete: V4l2FrmSizeDiscrete,
    pub stepwise: V4l2FrmSizeStepwise,
}

#[repr(C)]
#[derive(Clone, Copy)]
pub struct V4l2FrmSizeEnum {
    pub index: u32,
    pub pixel_format: u32,
    pub type_: u32,
    pub size: V4l2FrmSizeUnion,
    pub reserved: [u32; 2],
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct V4l2FrmIvalStepwise {
    pub min: V4l2Fract,
    pub max: V4l2Fract,
    pub step: V4l2Fract,
}

#[repr(C)]
#[derive(Clone, Copy)]
pub union V4l2FrmIvalUnion {
    pub discrete: V4l2Fract,
    pub stepwise: V4l2FrmIvalStepwise,
}

#[repr(C)]
#[derive(Clone, Copy)]
pub struct V4l2FrmIvalEnum {
    pub index: u32,
    pub pixel_format: u32,
    pub width: u32,
    pub height: u32,
    pub type_: u32,
    pub interval: V4l2FrmIvalUnion,
    pub reserved: [u32; 2],
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct V4l2Input {
    pub index: u32,
    pub name: [u8; 32],
    pub type_: u32,
    pub audioset: u32,
    pub tuner: u32,
    pub std: u64,
    pub status: u32,
    pub capabilities: u32,
    pub reserved: [u32; 3],
}

pub const VIDIOC_QUERYCAP: u32 = ioc(IOC_READ, 0, size_of::<V4l2Capability>());
pub const VIDIOC_ENUM_FMT: u32 = ioc(IOC_READ | IOC_WRITE, 2, size_of::<V4l2FmtDesc>());
pub const VIDIOC_G_FMT: u32 = ioc(IOC_READ | IOC_WRITE, 4, size_of::<V4l2Format>());
pub const VIDIOC_S_FMT: u32 = ioc(IOC_READ | IOC_WRITE, 5, size_of::<V4l2Format>());
pub const VIDIOC_REQBUFS: u32 = ioc(IOC_READ | IOC_WRITE, 8, size_of::<V4l2RequestBuffers>());
pub const VIDIOC_QUERYBUF: u32 = ioc(IOC_READ | IOC_WRITE, 9, size_of::<V4l2Buffer>());
pub const VIDIOC_QBUF: u32 = ioc(IOC_READ | IOC_WRITE, 15, size_of::<V4l2Buffer>());
pub const VIDIOC_DQBUF: u32 = ioc(IOC_READ | IOC_WRITE, 17, size_of::<V4l2Buffer>());
pub const VIDIOC_STREAMON: u32 = ioc(IOC_WRITE, 18, size_of::<c_int>());
pub const VIDIOC_STREAMOFF: u32 = ioc(IOC_WRITE, 19, size_of::<c_int>());
pub const VIDIOC_G_PARM: u32 = ioc(IOC_READ | IOC_WRITE, 21, size_of::<V4l2StreamParm>());
pub const VIDIOC_S_PARM: u32 = ioc(IOC_READ | IOC_WRITE, 22, size_of::<V4l2StreamParm>());
pub const VIDIOC_ENUMINPUT: u32 = ioc(IOC_READ | IOC_WRITE, 26, size_of::<V4l2Input>());
pub const VIDIOC_G_INPUT: u32 = ioc(IOC_READ, 38, size_of::<c_int>());
pub const VIDIOC_S_INPUT: u32 = ioc(IOC_READ | IOC_WRITE, 39, size_of::<c_int>());
pub const VIDIOC_TRY_FMT: u32 = ioc(IOC_READ | IOC_WRITE, 64, size_of::<V4l2Format>());
pub const VIDIOC_ENUM_FRAMESIZES: u32 = ioc(IOC_READ | IOC_WRITE, 74, size_of::<V4l2FrmSizeEnum>());
pub const VIDIOC_ENUM_FRAMEINTERVALS: u32 = ioc(IOC_READ | IOC_WRITE, 75, size_of::<V4l2FrmIvalEnum>());

/// Copy `src` into a fixed C string field, always NUL terminated
pub fn copy_str(dest: &mut [u8], src: &str) {
    dest.fill(0);
    let n = src.len().min(dest.len().saturating_sub(1));
    dest[..n].copy_from_slice(&src.as_bytes()[..n]);
}

/// Decode the request structure behind `arg`
///
/// # Safety
/// `arg` must be non-null and point to the structure `code` names.
pub unsafe fn read_request(code: u32, arg: *const c_void) -> ControlRequest {
    match code {
        VIDIOC_QUERYCAP => ControlRequest::QueryCapability,
        VIDIOC_ENUM_FMT => {
            let desc = &*(arg as *const V4l2FmtDesc);
            ControlRequest::EnumFormat {
                buf_type: desc.type_,
                index: desc.index,
            }
        }
        VIDIOC_G_FMT => {
            let fmt = &*(arg as *const V4l2Format);
            ControlRequest::GetFormat { buf_type: fmt.type_ }
        }
        VIDIOC_S_FMT | VIDIOC_TRY_FMT => {
            let fmt = &*(arg as *const V4l2Format);
            let pix = fmt.fmt.pix;
            if code == VIDIOC_S_FMT {
                ControlRequest::SetFormat {
                    buf_type: fmt.type_,
                    width: pix.width,
                    height: pix.height,
                    fourcc: pix.pixelformat,
                }
            } else {
                ControlRequest::TryFormat {
                    buf_type: fmt.type_,
                    width: pix.width,
                    height: pix.height,
                    fourcc: pix.pixelformat,
                }
            }
        }
        VIDIOC_REQBUFS => {
            let req = &*(arg as *const V4l2RequestBuffers);
            ControlRequest::RequestBuffers {
                buf_type: req.type_,
                memory: req.memory,
                count: req.count,
            }
        }
        VIDIOC_QUERYBUF | VIDIOC_QBUF | VIDIOC_DQBUF => {
            let buf = &*(arg as *const V4l2Buffer);
            match code {
                VIDIOC_QUERYBUF => ControlRequest::QueryBuffer {
                    buf_type: buf.type_,
                    index: buf.index,
                },
                VIDIOC_QBUF => ControlRequest::QueueBuffer {
                    buf_type: buf.type_,
                    index: buf.index,
                },
                _ => ControlRequest::DequeueBuffer { buf_type: buf.type_ },
            }
        }
        VIDIOC_STREAMON => ControlRequest::StreamOn {
            buf_type: *(arg as *const u32),
        },
        VIDIOC_STREAMOFF => ControlRequest::StreamOff {
            buf_type: *(arg as *const u32),
        },
        VIDIOC_G_PARM => {
            let parm = &*(arg as *const V4l2StreamParm);
            ControlRequest::GetParam { buf_type: parm.type_ }
        }
        VIDIOC_S_PARM => {
            let parm = &*(arg as *const V4l2StreamParm);
            let tpf = parm.parm.capture.timeperframe;
            ControlRequest::SetParam {
                buf_type: parm.type_,
                interval: FrameInterval {
                    numerator: tpf.numerator,
                    denominator: tpf.denominator,
                },
            }
        }
        VIDIOC_ENUM_FRAMESIZES => {
            let fsize = &*(arg as *const V4l2FrmSizeEnum);
            ControlRequest::EnumFrameSizes {
                index: fsize.index,
                fourcc: fsize.pixel_format,
            }
        }
        VIDIOC_ENUM_FRAMEINTERVALS => {
            let fival = &*(arg as *const V4l2FrmIvalEnum);
            ControlRequest::EnumFrameIntervals { index: fival.index }
        }
        VIDIOC_ENUMINPUT => {
            let input = &*(arg as *const V4l2Input);
            ControlRequest::EnumInput { index: input.index }
        }
        VIDIOC_G_INPUT => ControlRequest::GetInput,
        VIDIOC_S_INPUT => ControlRequest::SetInput {
            index: *(arg as *const u32),
        },
        other => ControlRequest::Unsupported(other),
    }
}

fn fill_pix(pix: &mut V4l2PixFormat, format: &FrameFormat) {
    pix.width = format.width;
    pix.height = format.height;
    pix.pixelformat = format.pixel_format.fourcc();
    pix.field = V4L2_FIELD_NONE;
    pix.bytesperline = format.bytes_per_line();
    pix.sizeimage = format.size_image() as u32;
    pix.colorspace = V4L2_COLORSPACE_JPEG;
}

fn fill_buffer(buf: &mut V4l2Buffer, report: &BufferReport) {
    buf.index = report.index;
    buf.type_ = BUF_TYPE_VIDEO_CAPTURE;
    buf.memory = V4L2_MEMORY_MMAP;
    buf.bytesused = report.bytes_used;
    buf.length = report.length;
    buf.m.offset = report.offset;
    buf.flags = report.flags;
    buf.field = V4L2_FIELD_NONE;
    buf.sequence = report.sequence;
    buf.timestamp = libc::timeval {
        tv_sec: report.timestamp.as_secs() as libc::time_t,
        tv_usec: report.timestamp.subsec_micros() as libc::suseconds_t,
    };
}

/// Write `reply` into the structure behind `arg`
///
/// # Safety
/// `arg` must be non-null and point to the writable structure `code` names.
pub unsafe fn write_reply(code: u32, arg: *mut c_void, reply: &ControlReply) {
    match (code, reply) {
        (VIDIOC_QUERYCAP, ControlReply::Capability(cap)) => {
            let out = &mut *(arg as *mut V4l2Capability);
            *out = std::mem::zeroed();
            copy_str(&mut out.driver, &cap.driver);
            copy_str(&mut out.card, &cap.card);
            copy_str(&mut out.bus_info, &cap.bus_info);
            out.version = cap.version;
            out.capabilities = cap.capabilities;
            out.device_caps = cap.device_caps;
        }
        (VIDIOC_ENUM_FMT, ControlReply::FormatDescription(desc)) => {
            let out = &mut *(arg as *mut V4l2FmtDesc);
            *out = std::mem::zeroed();
            out.index = desc.index;
            out.type_ = BUF_TYPE_VIDEO_CAPTURE;
            out.flags = desc.flags;
            out.pixelformat = desc.fourcc;
            copy_str(&mut out.description, &desc.description);
        }
        (VIDIOC_G_FMT | VIDIOC_S_FMT | VIDIOC_TRY_FMT, ControlReply::Format(format)) => {
            let out = &mut *(arg as *mut V4l2Format);
            fill_pix(&mut out.fmt.pix, format);
        }
        (VIDIOC_REQBUFS, ControlReply::Buffers { count }) => {
            let out = &mut *(arg as *mut V4l2RequestBuffers);
            out.count = *count;
        }
        (VIDIOC_QUERYBUF | VIDIOC_QBUF | VIDIOC_DQBUF, ControlReply::Buffer(report)) => {
            fill_buffer(&mut *(arg as *mut V4l2Buffer), report);
        }
        (VIDIOC_G_PARM | VIDIOC_S_PARM, ControlReply::StreamParam { capability, interval }) => {
            let out = &mut *(arg as *mut V4l2StreamParm);
            if code == VIDIOC_G_PARM {
                out.parm.raw_data = [0; 200];
            }
            out.parm.capture.capability = *capability;
            out.parm.capture.timeperframe = V4l2Fract {
                numerator: interval.numerator,
                denominator: interval.denominator,
            };
        }
        (VIDIOC_ENUM_FRAMESIZES, ControlReply::FrameSize { width, height }) => {
            let out = &mut *(arg as *mut V4l2FrmSizeEnum);
            out.type_ = V4L2_FRMSIZE_TYPE_DISCRETE;
            out.size.discrete = V4l2FrmSizeDiscrete {
                width: *width,
                height: *height,
            };
        }
        (VIDIOC_ENUM_FRAMEINTERVALS, ControlReply::FrameInterval(interval)) => {
            let out = &mut *(arg as *mut V4l2FrmIvalEnum);
            out.type_ = V4L2_FRMIVAL_TYPE_DISCRETE;
            out.interval.discrete = V4l2Fract {
                numerator: interval.numerator,
                denominator: interval.denominator,
            };
        }
        (VIDIOC_ENUMINPUT, ControlReply::Input { index, name }) => {
            let out = &mut *(arg as *mut V4l2Input);
            *out = std::mem::zeroed();
            out.index = *index;
            copy_str(&mut out.name, name);
            out.type_ = V4L2_INPUT_TYPE_CAMERA;
        }
        (VIDIOC_G_INPUT, ControlReply::InputIndex(index)) => {
            *(arg as *mut c_int) = *index as c_int;
        }
        _ => {}
    }
}
