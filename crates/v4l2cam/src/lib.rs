// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

//! v4l2cam Library for Rust
//!
//! Memory-mapped frame capture from V4L2 video devices. The library opens a
//! capture device, negotiates pixel format, resolution and frame rate with the
//! driver, maps a small pool of kernel buffers into the process, and hands out
//! one filled buffer at a time through a strict checkout protocol.
//!
//! # Quick Start
//!
//! ```no_run
//! use v4l2cam::camera::Capture;
//! use v4l2cam::convert::yuyv_to_rgb;
//! use v4l2cam::fourcc::FourCC;
//! use v4l2cam::FrameFormat;
//!
//! let mut cam = Capture::new();
//! cam.open("/dev/video0", FrameFormat::new(FourCC(*b"YUYV"), 640, 480, 30))?;
//! cam.start()?;
//!
//! if let Some(token) = cam.wait_frame(1000)? {
//!     let format = cam.actual_format()?;
//!     let rgb = yuyv_to_rgb(cam.frame_data(&token)?, format.width, format.height)?;
//!     println!("frame {} -> {} RGB bytes", token.sequence(), rgb.len());
//!     cam.release_frame(token)?;
//! }
//!
//! cam.close();
//! # Ok::<(), v4l2cam::Error>(())
//! ```
//!
//! # Features
//!
//! - Capability negotiation (formats × resolutions × frame rates)
//! - Memory-mapped buffer pool with at-most-one outstanding frame
//! - Blocking frame acquisition with a timeout and no busy polling
//! - Packed YUYV (4:2:2) to interleaved RGB24 conversion
//! - Configuration from `Key=Value` property files
//!
//! # Support
//!
//! - Repository: <https://github.com/EdgeFirstAI/v4l2cam>
//! - Professional support: support@au-zone.com

use std::{error, fmt, io, path::PathBuf};

use fourcc::FourCC;

/// Broad classification of an [`Error`], for callers that branch on the
/// failure class rather than the exact variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Bad device path, unsupported format/resolution/rate, or invalid settings
    Configuration,
    /// A device call failed; carries the OS error
    DeviceIo,
    /// Mapping or buffer allocation failed
    Resource,
    /// The caller misused the checkout protocol or the state machine
    ProtocolViolation,
    /// The device reported something impossible, such as a buffer index out of range
    Corruption,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ErrorKind::Configuration => write!(f, "configuration error"),
            ErrorKind::DeviceIo => write!(f, "device I/O error"),
            ErrorKind::Resource => write!(f, "resource error"),
            ErrorKind::ProtocolViolation => write!(f, "protocol violation"),
            ErrorKind::Corruption => write!(f, "corruption error"),
        }
    }
}

/// Error type for v4l2cam operations
#[derive(Debug)]
pub enum Error {
    /// A pixel format string was not exactly four characters long
    InvalidFormatString(String),

    /// The device path exists but is not a character-special device
    NotACharacterDevice(PathBuf),

    /// The device node could not be inspected or opened
    DeviceOpenFailed { path: PathBuf, source: io::Error },

    /// The device lacks video capture or streaming I/O
    UnsupportedDevice { path: PathBuf, capabilities: u32 },

    /// The driver substituted a different pixel format
    UnsupportedFormat { requested: FourCC, actual: FourCC },

    /// A query ioctl (capabilities, format, buffer, enumeration) failed
    DeviceQuery {
        request: &'static str,
        source: io::Error,
    },

    /// A set ioctl (format, frame interval, buffer request) failed
    DeviceSet {
        request: &'static str,
        source: io::Error,
    },

    /// The driver granted fewer buffers than the engine can work with
    InsufficientBuffers { granted: u32, minimum: u32 },

    /// Mapping one of the driver buffers into memory failed
    MemoryMapFailed { index: u32, source: io::Error },

    /// The device rejected the stream-on command
    StreamOnFailed(io::Error),

    /// The device rejected the stream-off command
    StreamOffFailed(io::Error),

    /// Returning a buffer to the driver failed
    QueueFailed { index: u32, source: io::Error },

    /// Taking a filled buffer from the driver failed
    DequeueFailed(io::Error),

    /// Waiting for the device to become readable failed
    WaitFailed(io::Error),

    /// The operation is not valid in the engine's current state
    InvalidState {
        operation: &'static str,
        state: CaptureState,
    },

    /// A frame is still checked out; it must be released before waiting again
    FrameAlreadyCheckedOut { index: u32 },

    /// The released frame is not the one currently checked out
    NoOutstandingFrame { index: u32 },

    /// The driver returned a buffer index outside the pool
    CorruptBufferIndex { index: u32, pool_size: u32 },

    /// A frame buffer holds fewer bytes than its dimensions require
    FrameTooShort { expected: usize, actual: usize },

    /// A configuration value is missing or malformed
    Config { key: String, reason: String },

    /// The frame service worker is no longer running
    ServiceStopped,
}

impl Error {
    /// The failure class of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::InvalidFormatString(_)
            | Error::NotACharacterDevice(_)
            | Error::UnsupportedDevice { .. }
            | Error::UnsupportedFormat { .. }
            | Error::FrameTooShort { .. }
            | Error::Config { .. } => ErrorKind::Configuration,
            Error::DeviceOpenFailed { .. }
            | Error::DeviceQuery { .. }
            | Error::DeviceSet { .. }
            | Error::StreamOnFailed(_)
            | Error::StreamOffFailed(_)
            | Error::QueueFailed { .. }
            | Error::DequeueFailed(_)
            | Error::WaitFailed(_)
            | Error::ServiceStopped => ErrorKind::DeviceIo,
            Error::InsufficientBuffers { .. } | Error::MemoryMapFailed { .. } => {
                ErrorKind::Resource
            }
            Error::InvalidState { .. }
            | Error::FrameAlreadyCheckedOut { .. }
            | Error::NoOutstandingFrame { .. } => ErrorKind::ProtocolViolation,
            Error::CorruptBufferIndex { .. } => ErrorKind::Corruption,
        }
    }

    /// The OS error code carried by this error, if any.
    pub fn raw_os_error(&self) -> Option<i32> {
        match self {
            Error::DeviceOpenFailed { source, .. }
            | Error::DeviceQuery { source, .. }
            | Error::DeviceSet { source, .. }
            | Error::MemoryMapFailed { source, .. }
            | Error::QueueFailed { source, .. } => source.raw_os_error(),
            Error::StreamOnFailed(err)
            | Error::StreamOffFailed(err)
            | Error::DequeueFailed(err)
            | Error::WaitFailed(err) => err.raw_os_error(),
            _ => None,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::InvalidFormatString(s) => {
                write!(f, "pixel format must be exactly 4 characters: {:?}", s)
            }
            Error::NotACharacterDevice(path) => {
                write!(f, "{} is not a character device", path.display())
            }
            Error::DeviceOpenFailed { path, source } => {
                write!(f, "cannot open {}: {}", path.display(), source)
            }
            Error::UnsupportedDevice { path, capabilities } => write!(
                f,
                "{} does not support streaming video capture (capabilities 0x{:08x})",
                path.display(),
                capabilities
            ),
            Error::UnsupportedFormat { requested, actual } => write!(
                f,
                "device does not support pixel format {} (driver chose {})",
                requested, actual
            ),
            Error::DeviceQuery { request, source } => write!(f, "{} failed: {}", request, source),
            Error::DeviceSet { request, source } => write!(f, "{} failed: {}", request, source),
            Error::InsufficientBuffers { granted, minimum } => write!(
                f,
                "insufficient buffer memory: {} granted, {} required",
                granted, minimum
            ),
            Error::MemoryMapFailed { index, source } => {
                write!(f, "mmap of buffer {} failed: {}", index, source)
            }
            Error::StreamOnFailed(err) => write!(f, "VIDIOC_STREAMON failed: {}", err),
            Error::StreamOffFailed(err) => write!(f, "VIDIOC_STREAMOFF failed: {}", err),
            Error::QueueFailed { index, source } => {
                write!(f, "VIDIOC_QBUF of buffer {} failed: {}", index, source)
            }
            Error::DequeueFailed(err) => write!(f, "VIDIOC_DQBUF failed: {}", err),
            Error::WaitFailed(err) => write!(f, "waiting for frame failed: {}", err),
            Error::InvalidState { operation, state } => {
                write!(f, "cannot {} while {}", operation, state)
            }
            Error::FrameAlreadyCheckedOut { index } => write!(
                f,
                "buffer {} is still checked out, release it before waiting again",
                index
            ),
            Error::NoOutstandingFrame { index } => {
                write!(f, "buffer {} is not the checked out frame", index)
            }
            Error::CorruptBufferIndex { index, pool_size } => write!(
                f,
                "driver returned buffer index {} for a pool of {}",
                index, pool_size
            ),
            Error::FrameTooShort { expected, actual } => write!(
                f,
                "frame holds {} bytes, {} required",
                actual, expected
            ),
            Error::Config { key, reason } => write!(f, "configuration {}: {}", key, reason),
            Error::ServiceStopped => write!(f, "frame service has been shut down"),
        }
    }
}

impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            Error::DeviceOpenFailed { source, .. }
            | Error::DeviceQuery { source, .. }
            | Error::DeviceSet { source, .. }
            | Error::MemoryMapFailed { source, .. }
            | Error::QueueFailed { source, .. } => Some(source),
            Error::StreamOnFailed(err)
            | Error::StreamOffFailed(err)
            | Error::DequeueFailed(err)
            | Error::WaitFailed(err) => Some(err),
            _ => None,
        }
    }
}

/// Requested or actual capture mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameFormat {
    /// Pixel format code (e.g. `YUYV`)
    pub fourcc: FourCC,
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// Frames per second
    pub fps: u32,
}

impl FrameFormat {
    pub fn new(fourcc: FourCC, width: u32, height: u32, fps: u32) -> Self {
        FrameFormat {
            fourcc,
            width,
            height,
            fps,
        }
    }
}

impl fmt::Display for FrameFormat {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{} {}x{} @ {} fps",
            self.fourcc, self.width, self.height, self.fps
        )
    }
}

/// The buffer pool and its checkout protocol.
pub mod buffer;

/// The camera module provides the capture engine state machine.
pub mod camera;

/// Property-file configuration and the service description structs.
pub mod config;

/// Packed 4:2:2 to interleaved RGB conversion.
pub mod convert;

/// The fourcc module provides portable handling of fourcc codes.
pub mod fourcc;

/// Frame service call-ins for an external transport.
pub mod service;

/// V4L2 device access, capability enumeration, and device discovery.
pub mod v4l2;

pub use camera::CaptureState;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        assert_eq!(
            Error::InvalidFormatString("YUV".into()).kind(),
            ErrorKind::Configuration
        );
        assert_eq!(
            Error::InsufficientBuffers {
                granted: 1,
                minimum: 2
            }
            .kind(),
            ErrorKind::Resource
        );
        assert_eq!(
            Error::FrameAlreadyCheckedOut { index: 0 }.kind(),
            ErrorKind::ProtocolViolation
        );
        assert_eq!(
            Error::CorruptBufferIndex {
                index: 9,
                pool_size: 4
            }
            .kind(),
            ErrorKind::Corruption
        );
        assert_eq!(
            Error::StreamOnFailed(io::Error::from_raw_os_error(16)).kind(),
            ErrorKind::DeviceIo
        );
    }

    #[test]
    fn test_error_carries_os_code() {
        let err = Error::DeviceOpenFailed {
            path: PathBuf::from("/dev/video9"),
            source: io::Error::from_raw_os_error(2),
        };
        assert_eq!(err.raw_os_error(), Some(2));
        assert!(error::Error::source(&err).is_some());
        assert!(err.to_string().starts_with("cannot open /dev/video9"));
    }

    #[test]
    fn test_frame_format_display() {
        let fmt = FrameFormat::new(FourCC(*b"YUYV"), 320, 240, 10);
        assert_eq!(fmt.to_string(), "YUYV 320x240 @ 10 fps");
    }
}
