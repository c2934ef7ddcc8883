//! Pixel formats and the single negotiated frame format

use std::fmt;
use std::str::FromStr;

use crate::error::ConfigError;

/// Largest buffer the device hands out (4 MiB)
pub const MAX_BUFFER_SIZE: usize = 4 * 1024 * 1024;

/// Bytes reserved per pixel regardless of encoding
pub const BYTES_PER_PIXEL: usize = 2;

/// Build a little-endian FourCC code
pub const fn fourcc(code: &[u8; 4]) -> u32 {
    (code[0] as u32) | ((code[1] as u32) << 8) | ((code[2] as u32) << 16) | ((code[3] as u32) << 24)
}

/// Render a FourCC code as text, replacing unprintable bytes
pub fn fourcc_str(code: u32) -> String {
    code.to_le_bytes()
        .iter()
        .map(|&b| if b.is_ascii_graphic() || b == b' ' { b as char } else { '.' })
        .collect()
}

/// Pixel encodings the emulated device can advertise
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    Mjpeg,
    Jpeg,
    Yuyv,
    Nv12,
}

impl PixelFormat {
    /// V4L2 FourCC identifier
    pub fn fourcc(self) -> u32 {
        match self {
            PixelFormat::Mjpeg => fourcc(b"MJPG"),
            PixelFormat::Jpeg => fourcc(b"JPEG"),
            PixelFormat::Yuyv => fourcc(b"YUYV"),
            PixelFormat::Nv12 => fourcc(b"NV12"),
        }
    }

    /// Configuration name, also used as the format description
    pub fn name(self) -> &'static str {
        match self {
            PixelFormat::Mjpeg => "MJPEG",
            PixelFormat::Jpeg => "JPEG",
            PixelFormat::Yuyv => "YUYV",
            PixelFormat::Nv12 => "NV12",
        }
    }

    /// Whether the encoding is a compressed codec
    pub fn is_compressed(self) -> bool {
        matches!(self, PixelFormat::Mjpeg | PixelFormat::Jpeg)
    }
}

impl FromStr for PixelFormat {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "MJPEG" => Ok(PixelFormat::Mjpeg),
            "JPEG" => Ok(PixelFormat::Jpeg),
            "YUYV" => Ok(PixelFormat::Yuyv),
            "NV12" => Ok(PixelFormat::Nv12),
            _ => Err(ConfigError::UnsupportedFormat(s.to_string())),
        }
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Field ordering; the device is always progressive
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    None,
}

/// Colorspace; fixed to JPEG (full range sRGB)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Colorspace {
    Jpeg,
}

/// The one frame format the device supports
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameFormat {
    pub width: u32,
    pub height: u32,
    pub pixel_format: PixelFormat,
    pub field: Field,
    pub colorspace: Colorspace,
}

impl FrameFormat {
    pub fn new(width: u32, height: u32, pixel_format: PixelFormat) -> Self {
        Self {
            width,
            height,
            pixel_format,
            field: Field::None,
            colorspace: Colorspace::Jpeg,
        }
    }

    /// Image size in bytes (width * height * 2)
    pub fn size_image(&self) -> usize {
        self.width as usize * self.height as usize * BYTES_PER_PIXEL
    }

    /// Line stride; zero lets the caller derive it (compressed formats have none)
    pub fn bytes_per_line(&self) -> u32 {
        0
    }

    /// Image size when it fits in a buffer
    pub fn checked_size_image(&self) -> Option<usize> {
        let size = self.size_image();
        (size <= MAX_BUFFER_SIZE).then_some(size)
    }
}

/// Frame interval as a fraction of a second
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameInterval {
    pub numerator: u32,
    pub denominator: u32,
}

impl FrameInterval {
    /// 1/30 s
    pub const DEFAULT: FrameInterval = FrameInterval {
        numerator: 1,
        denominator: 30,
    };

    /// Replace zero components with the defaults
    pub fn or_default(self) -> Self {
        Self {
            numerator: if self.numerator == 0 { Self::DEFAULT.numerator } else { self.numerator },
            denominator: if self.denominator == 0 { Self::DEFAULT.denominator } else { self.denominator },
        }
    }
}

impl Default for FrameInterval {
    fn default() -> Self {
        Self::DEFAULT
    }
}
