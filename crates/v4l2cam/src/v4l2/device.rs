// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

//! V4L2 device boundary
//!
//! This module defines the seam between the capture engine and the kernel:
//!
//! - [`Device`] - every device operation the engine performs, one method each
//! - [`Backend`] - opens a [`Device`] for a path
//! - [`V4l2Device`] / [`V4l2Backend`] - the ioctl-backed production implementation
//! - [`Capabilities`], [`FormatDescription`], [`FrameSize`], [`FrameInterval`] -
//!   the values the device reports
//!
//! Every method returns [`std::io::Result`] so OS error codes reach the
//! caller unchanged.

use std::ffi::CStr;
use std::fmt;
use std::fs::OpenOptions;
use std::io;
use std::num::NonZeroUsize;
use std::os::fd::{AsFd, AsRawFd, OwnedFd};
use std::os::raw::{c_int, c_void};
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use std::ptr::NonNull;
use std::slice;

use nix::errno::Errno;
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use nix::sys::mman::{mmap, munmap, MapFlags, ProtFlags};
use unix_ts::Timestamp;
use v4l2cam_sys as ffi;

use crate::fourcc::FourCC;

/// Capabilities reported by `VIDIOC_QUERYCAP`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Capabilities {
    /// Driver name (e.g. "uvcvideo")
    pub driver: String,
    /// Card/device name
    pub card: String,
    /// Bus information (e.g. "usb-0000:00:14.0-1")
    pub bus_info: String,
    /// Kernel version of the driver
    pub version: u32,
    /// Capabilities of the physical device as a whole
    pub capabilities: u32,
    /// Capabilities of this node, valid when `V4L2_CAP_DEVICE_CAPS` is set
    pub device_caps: u32,
}

impl Capabilities {
    /// Capability flags of the opened node.
    pub fn effective(&self) -> u32 {
        if self.capabilities & ffi::V4L2_CAP_DEVICE_CAPS != 0 {
            self.device_caps
        } else {
            self.capabilities
        }
    }

    pub fn is_capture(&self) -> bool {
        self.effective() & ffi::V4L2_CAP_VIDEO_CAPTURE != 0
    }

    pub fn supports_streaming(&self) -> bool {
        self.effective() & ffi::V4L2_CAP_STREAMING != 0
    }

    fn from_ffi(cap: &ffi::v4l2_capability) -> Self {
        Capabilities {
            driver: c_string(&cap.driver),
            card: c_string(&cap.card),
            bus_info: c_string(&cap.bus_info),
            version: cap.version,
            capabilities: cap.capabilities,
            device_caps: cap.device_caps,
        }
    }
}

/// One entry of `VIDIOC_ENUM_FMT`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormatDescription {
    pub fourcc: FourCC,
    /// Human-readable description from the driver
    pub description: String,
    pub compressed: bool,
    /// Provided by software conversion rather than the hardware
    pub emulated: bool,
}

impl fmt::Display for FormatDescription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.fourcc, self.description)?;
        if self.compressed {
            write!(f, " compressed")?;
        }
        Ok(())
    }
}

/// Video resolution in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// One entry of `VIDIOC_ENUM_FRAMESIZES`, in the shape the driver reported it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameSize {
    Discrete(Resolution),
    Stepwise {
        min: Resolution,
        max: Resolution,
        step: Resolution,
    },
    Continuous {
        min: Resolution,
        max: Resolution,
    },
    /// A frame size type this crate does not know
    Other(u32),
}

/// A time-per-frame fraction in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fraction {
    pub numerator: u32,
    pub denominator: u32,
}

impl Fraction {
    pub fn new(numerator: u32, denominator: u32) -> Self {
        Self {
            numerator,
            denominator,
        }
    }

    /// The interval for a whole frame rate, `1/fps` seconds.
    pub fn from_fps(fps: u32) -> Self {
        Self::new(1, fps)
    }

    /// Whole frames per second for this interval, `None` for a zero interval.
    pub fn as_fps(&self) -> Option<u32> {
        if self.numerator == 0 {
            None
        } else {
            Some(self.denominator / self.numerator)
        }
    }
}

impl From<ffi::v4l2_fract> for Fraction {
    fn from(f: ffi::v4l2_fract) -> Self {
        Fraction::new(f.numerator, f.denominator)
    }
}

/// One entry of `VIDIOC_ENUM_FRAMEINTERVALS`, in the shape the driver reported it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameInterval {
    Discrete(Fraction),
    Stepwise {
        min: Fraction,
        max: Fraction,
        step: Fraction,
    },
    Continuous {
        min: Fraction,
        max: Fraction,
    },
    Other(u32),
}

/// Active image format as returned by `VIDIOC_G_FMT` / `VIDIOC_S_FMT`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixFormat {
    pub fourcc: FourCC,
    pub width: u32,
    pub height: u32,
    pub bytes_per_line: u32,
    pub size_image: u32,
}

impl PixFormat {
    pub fn new(fourcc: FourCC, width: u32, height: u32) -> Self {
        PixFormat {
            fourcc,
            width,
            height,
            bytes_per_line: 0,
            size_image: 0,
        }
    }
}

/// Location of a driver buffer, from `VIDIOC_QUERYBUF`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferInfo {
    pub index: u32,
    pub offset: u32,
    pub length: u32,
}

/// A filled buffer taken from the driver with `VIDIOC_DQBUF`.
#[derive(Debug, Clone, Copy)]
pub struct Dequeued {
    pub index: u32,
    /// Bytes written by the hardware
    pub bytes_used: u32,
    pub sequence: u32,
    pub timestamp: Timestamp,
}

/// The operations the capture engine performs against a video device.
///
/// Enumeration methods return `Ok(None)` once the index passes the end of
/// the driver's list.
pub trait Device {
    /// A mapped driver buffer, unmapped when dropped
    type Mapping: AsRef<[u8]>;

    fn query_capabilities(&mut self) -> io::Result<Capabilities>;

    fn format(&mut self) -> io::Result<PixFormat>;

    /// Apply a format; returns what the driver actually selected.
    fn set_format(&mut self, format: &PixFormat) -> io::Result<PixFormat>;

    fn frame_interval(&mut self) -> io::Result<Fraction>;

    /// Apply a frame interval; returns what the driver actually selected.
    fn set_frame_interval(&mut self, interval: Fraction) -> io::Result<Fraction>;

    /// Ask for `count` memory-mapped buffers; returns how many were granted.
    fn request_buffers(&mut self, count: u32) -> io::Result<u32>;

    fn query_buffer(&mut self, index: u32) -> io::Result<BufferInfo>;

    fn map_buffer(&mut self, info: &BufferInfo) -> io::Result<Self::Mapping>;

    fn queue_buffer(&mut self, index: u32) -> io::Result<()>;

    /// Take one filled buffer. Fails with [`io::ErrorKind::WouldBlock`] when none is ready.
    fn dequeue_buffer(&mut self) -> io::Result<Dequeued>;

    /// Block until a filled buffer is ready or `timeout_ms` elapses.
    ///
    /// Returns `Ok(false)` on timeout. A signal arriving during the wait
    /// surfaces as [`io::ErrorKind::Interrupted`].
    fn wait_readable(&mut self, timeout_ms: u32) -> io::Result<bool>;

    fn stream_on(&mut self) -> io::Result<()>;

    fn stream_off(&mut self) -> io::Result<()>;

    fn enum_format(&mut self, index: u32) -> io::Result<Option<FormatDescription>>;

    fn enum_frame_size(&mut self, fourcc: FourCC, index: u32) -> io::Result<Option<FrameSize>>;

    fn enum_frame_interval(
        &mut self,
        fourcc: FourCC,
        resolution: Resolution,
        index: u32,
    ) -> io::Result<Option<FrameInterval>>;
}

/// Opens devices for the capture engine.
pub trait Backend {
    type Device: Device;

    fn open(&self, path: &Path) -> io::Result<Self::Device>;
}

/// Production backend opening real V4L2 nodes.
#[derive(Debug, Clone, Copy, Default)]
pub struct V4l2Backend;

impl Backend for V4l2Backend {
    type Device = V4l2Device;

    fn open(&self, path: &Path) -> io::Result<V4l2Device> {
        V4l2Device::open(path)
    }
}

/// An open V4L2 device node. The descriptor is closed on drop.
#[derive(Debug)]
pub struct V4l2Device {
    fd: OwnedFd,
    path: PathBuf,
}

impl V4l2Device {
    /// Open a node read/write and non-blocking.
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(ffi::libc::O_NONBLOCK)
            .open(path)?;
        log::debug!("opened {} as fd {}", path.display(), file.as_raw_fd());

        Ok(V4l2Device {
            fd: OwnedFd::from(file),
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn raw(&self) -> c_int {
        self.fd.as_raw_fd()
    }
}

fn errno_to_io(err: Errno) -> io::Error {
    io::Error::from_raw_os_error(err as i32)
}

/// `Ok(None)` for the `EINVAL` that terminates an enumeration.
fn end_of_list<T>(result: nix::Result<c_int>, value: impl FnOnce() -> T) -> io::Result<Option<T>> {
    match result {
        Ok(_) => Ok(Some(value())),
        Err(Errno::EINVAL) => Ok(None),
        Err(err) => Err(errno_to_io(err)),
    }
}

fn c_string(bytes: &[u8]) -> String {
    CStr::from_bytes_until_nul(bytes)
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|_| String::from_utf8_lossy(bytes).into_owned())
}

fn pix_from_ffi(fmt: &ffi::v4l2_format) -> PixFormat {
    // SAFETY: the union was filled by the driver for a VIDEO_CAPTURE type
    let pix = unsafe { fmt.fmt.pix };
    PixFormat {
        fourcc: FourCC::from_u32(pix.pixelformat),
        width: pix.width,
        height: pix.height,
        bytes_per_line: pix.bytesperline,
        size_image: pix.sizeimage,
    }
}

impl Device for V4l2Device {
    type Mapping = MmapRegion;

    fn query_capabilities(&mut self) -> io::Result<Capabilities> {
        let mut cap = ffi::v4l2_capability::default();
        unsafe { ffi::vidioc_querycap(self.raw(), &mut cap) }.map_err(errno_to_io)?;
        Ok(Capabilities::from_ffi(&cap))
    }

    fn format(&mut self) -> io::Result<PixFormat> {
        let mut fmt = ffi::v4l2_format {
            type_: ffi::V4L2_BUF_TYPE_VIDEO_CAPTURE,
            ..Default::default()
        };
        unsafe { ffi::vidioc_g_fmt(self.raw(), &mut fmt) }.map_err(errno_to_io)?;
        Ok(pix_from_ffi(&fmt))
    }

    fn set_format(&mut self, format: &PixFormat) -> io::Result<PixFormat> {
        let mut fmt = ffi::v4l2_format {
            type_: ffi::V4L2_BUF_TYPE_VIDEO_CAPTURE,
            ..Default::default()
        };
        fmt.fmt.pix = ffi::v4l2_pix_format {
            width: format.width,
            height: format.height,
            pixelformat: format.fourcc.as_u32(),
            field: ffi::V4L2_FIELD_ANY,
            ..Default::default()
        };
        unsafe { ffi::vidioc_s_fmt(self.raw(), &mut fmt) }.map_err(errno_to_io)?;
        Ok(pix_from_ffi(&fmt))
    }

    fn frame_interval(&mut self) -> io::Result<Fraction> {
        let mut parm = ffi::v4l2_streamparm {
            type_: ffi::V4L2_BUF_TYPE_VIDEO_CAPTURE,
            ..Default::default()
        };
        unsafe { ffi::vidioc_g_parm(self.raw(), &mut parm) }.map_err(errno_to_io)?;
        // SAFETY: capture member is the active one for a VIDEO_CAPTURE type
        Ok(unsafe { parm.parm.capture.timeperframe }.into())
    }

    fn set_frame_interval(&mut self, interval: Fraction) -> io::Result<Fraction> {
        let mut parm = ffi::v4l2_streamparm {
            type_: ffi::V4L2_BUF_TYPE_VIDEO_CAPTURE,
            ..Default::default()
        };
        parm.parm.capture = ffi::v4l2_captureparm {
            timeperframe: ffi::v4l2_fract {
                numerator: interval.numerator,
                denominator: interval.denominator,
            },
            ..Default::default()
        };
        unsafe { ffi::vidioc_s_parm(self.raw(), &mut parm) }.map_err(errno_to_io)?;
        // SAFETY: as above
        Ok(unsafe { parm.parm.capture.timeperframe }.into())
    }

    fn request_buffers(&mut self, count: u32) -> io::Result<u32> {
        let mut req = ffi::v4l2_requestbuffers {
            count,
            type_: ffi::V4L2_BUF_TYPE_VIDEO_CAPTURE,
            memory: ffi::V4L2_MEMORY_MMAP,
            ..Default::default()
        };
        unsafe { ffi::vidioc_reqbufs(self.raw(), &mut req) }.map_err(errno_to_io)?;
        Ok(req.count)
    }

    fn query_buffer(&mut self, index: u32) -> io::Result<BufferInfo> {
        let mut buf = ffi::v4l2_buffer {
            index,
            type_: ffi::V4L2_BUF_TYPE_VIDEO_CAPTURE,
            memory: ffi::V4L2_MEMORY_MMAP,
            ..Default::default()
        };
        unsafe { ffi::vidioc_querybuf(self.raw(), &mut buf) }.map_err(errno_to_io)?;
        Ok(BufferInfo {
            index,
            // SAFETY: offset is the active member for MMAP memory
            offset: unsafe { buf.m.offset },
            length: buf.length,
        })
    }

    fn map_buffer(&mut self, info: &BufferInfo) -> io::Result<MmapRegion> {
        let len = NonZeroUsize::new(info.length as usize)
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "zero-length buffer"))?;
        // SAFETY: mapping a driver-provided offset of our own descriptor; the
        // region is unmapped exactly once by MmapRegion::drop
        let ptr = unsafe {
            mmap(
                None,
                len,
                ProtFlags::PROT_READ | ProtFlags::PROT_WRITE,
                MapFlags::MAP_SHARED,
                self.fd.as_fd(),
                info.offset as ffi::libc::off_t,
            )
        }
        .map_err(errno_to_io)?;

        Ok(MmapRegion {
            ptr,
            len: len.get(),
        })
    }

    fn queue_buffer(&mut self, index: u32) -> io::Result<()> {
        let mut buf = ffi::v4l2_buffer {
            index,
            type_: ffi::V4L2_BUF_TYPE_VIDEO_CAPTURE,
            memory: ffi::V4L2_MEMORY_MMAP,
            ..Default::default()
        };
        unsafe { ffi::vidioc_qbuf(self.raw(), &mut buf) }.map_err(errno_to_io)?;
        Ok(())
    }

    fn dequeue_buffer(&mut self) -> io::Result<Dequeued> {
        let mut buf = ffi::v4l2_buffer {
            type_: ffi::V4L2_BUF_TYPE_VIDEO_CAPTURE,
            memory: ffi::V4L2_MEMORY_MMAP,
            ..Default::default()
        };
        unsafe { ffi::vidioc_dqbuf(self.raw(), &mut buf) }.map_err(errno_to_io)?;
        Ok(Dequeued {
            index: buf.index,
            bytes_used: buf.bytesused,
            sequence: buf.sequence,
            timestamp: Timestamp::new(
                buf.timestamp.tv_sec as i64,
                (buf.timestamp.tv_usec as u32).saturating_mul(1000),
            ),
        })
    }

    fn wait_readable(&mut self, timeout_ms: u32) -> io::Result<bool> {
        let mut fds = [PollFd::new(self.fd.as_fd(), PollFlags::POLLIN)];
        let timeout = PollTimeout::try_from(timeout_ms).unwrap_or(PollTimeout::MAX);
        let ready = poll(&mut fds, timeout).map_err(errno_to_io)?;
        Ok(ready > 0)
    }

    fn stream_on(&mut self) -> io::Result<()> {
        let kind = ffi::V4L2_BUF_TYPE_VIDEO_CAPTURE as c_int;
        unsafe { ffi::vidioc_streamon(self.raw(), &kind) }.map_err(errno_to_io)?;
        Ok(())
    }

    fn stream_off(&mut self) -> io::Result<()> {
        let kind = ffi::V4L2_BUF_TYPE_VIDEO_CAPTURE as c_int;
        unsafe { ffi::vidioc_streamoff(self.raw(), &kind) }.map_err(errno_to_io)?;
        Ok(())
    }

    fn enum_format(&mut self, index: u32) -> io::Result<Option<FormatDescription>> {
        let mut desc = ffi::v4l2_fmtdesc {
            index,
            type_: ffi::V4L2_BUF_TYPE_VIDEO_CAPTURE,
            ..Default::default()
        };
        let result = unsafe { ffi::vidioc_enum_fmt(self.raw(), &mut desc) };
        end_of_list(result, || FormatDescription {
            fourcc: FourCC::from_u32(desc.pixelformat),
            description: c_string(&desc.description),
            compressed: desc.flags & ffi::V4L2_FMT_FLAG_COMPRESSED != 0,
            emulated: desc.flags & ffi::V4L2_FMT_FLAG_EMULATED != 0,
        })
    }

    fn enum_frame_size(&mut self, fourcc: FourCC, index: u32) -> io::Result<Option<FrameSize>> {
        let mut size = ffi::v4l2_frmsizeenum {
            index,
            pixel_format: fourcc.as_u32(),
            ..Default::default()
        };
        let result = unsafe { ffi::vidioc_enum_framesizes(self.raw(), &mut size) };
        end_of_list(result, || {
            // SAFETY: the active union member is selected by type_
            unsafe {
                match size.type_ {
                    ffi::V4L2_FRMSIZE_TYPE_DISCRETE => FrameSize::Discrete(Resolution::new(
                        size.size.discrete.width,
                        size.size.discrete.height,
                    )),
                    ffi::V4L2_FRMSIZE_TYPE_STEPWISE => {
                        let s = size.size.stepwise;
                        FrameSize::Stepwise {
                            min: Resolution::new(s.min_width, s.min_height),
                            max: Resolution::new(s.max_width, s.max_height),
                            step: Resolution::new(s.step_width, s.step_height),
                        }
                    }
                    ffi::V4L2_FRMSIZE_TYPE_CONTINUOUS => {
                        let s = size.size.stepwise;
                        FrameSize::Continuous {
                            min: Resolution::new(s.min_width, s.min_height),
                            max: Resolution::new(s.max_width, s.max_height),
                        }
                    }
                    other => FrameSize::Other(other),
                }
            }
        })
    }

    fn enum_frame_interval(
        &mut self,
        fourcc: FourCC,
        resolution: Resolution,
        index: u32,
    ) -> io::Result<Option<FrameInterval>> {
        let mut ival = ffi::v4l2_frmivalenum {
            index,
            pixel_format: fourcc.as_u32(),
            width: resolution.width,
            height: resolution.height,
            ..Default::default()
        };
        let result = unsafe { ffi::vidioc_enum_frameintervals(self.raw(), &mut ival) };
        end_of_list(result, || {
            // SAFETY: the active union member is selected by type_
            unsafe {
                match ival.type_ {
                    ffi::V4L2_FRMIVAL_TYPE_DISCRETE => {
                        FrameInterval::Discrete(ival.interval.discrete.into())
                    }
                    ffi::V4L2_FRMIVAL_TYPE_STEPWISE => {
                        let s = ival.interval.stepwise;
                        FrameInterval::Stepwise {
                            min: s.min.into(),
                            max: s.max.into(),
                            step: s.step.into(),
                        }
                    }
                    ffi::V4L2_FRMIVAL_TYPE_CONTINUOUS => {
                        let s = ival.interval.stepwise;
                        FrameInterval::Continuous {
                            min: s.min.into(),
                            max: s.max.into(),
                        }
                    }
                    other => FrameInterval::Other(other),
                }
            }
        })
    }
}

/// A driver buffer mapped into this process with `mmap`.
#[derive(Debug)]
pub struct MmapRegion {
    ptr: NonNull<c_void>,
    len: usize,
}

// SAFETY: the region is plain shared memory owned by this value alone
unsafe impl Send for MmapRegion {}

impl AsRef<[u8]> for MmapRegion {
    fn as_ref(&self) -> &[u8] {
        // SAFETY: ptr/len describe a live PROT_READ mapping until drop
        unsafe { slice::from_raw_parts(self.ptr.as_ptr() as *const u8, self.len) }
    }
}

impl Drop for MmapRegion {
    fn drop(&mut self) {
        // SAFETY: ptr/len came from a successful mmap and are unmapped once
        if let Err(err) = unsafe { munmap(self.ptr, self.len) } {
            log::warn!("munmap of {} bytes failed: {}", self.len, err);
        }
    }
}
