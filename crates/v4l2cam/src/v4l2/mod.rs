// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

//! V4L2 Device Access and Capability Negotiation
//!
//! This module talks to Linux video capture devices through the V4L2 ioctl
//! interface and answers the question "what can this camera do?".
//!
//! # Features
//!
//! - **Device Seam**: [`Device`] and [`Backend`] describe every operation the
//!   capture engine performs, so the engine can run against a fake in tests
//! - **Format Discovery**: query supported pixel formats via `VIDIOC_ENUM_FMT`
//! - **Resolution Discovery**: query resolutions via `VIDIOC_ENUM_FRAMESIZES`
//! - **Frame Rate Discovery**: query frame rates via `VIDIOC_ENUM_FRAMEINTERVALS`
//! - **Device Enumeration**: scan `/dev/video*` and query capabilities
//!
//! # Quick Start
//!
//! ```no_run
//! use std::path::Path;
//! use v4l2cam::v4l2::{self, V4l2Device};
//!
//! let mut device = V4l2Device::open(Path::new("/dev/video0"))?;
//! let mut index = 0;
//! while let Some(fourcc) = v4l2::enumerate_format(&mut device, index)? {
//!     println!("format {}: {}", index, fourcc);
//!     index += 1;
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! # Range Reports
//!
//! | Shape | Resolution | Frame rate |
//! |-------|------------|------------|
//! | Discrete | reported value | reported value |
//! | Stepwise | maximum of the range | highest rate of the range |
//! | Continuous | not reported | highest rate of the range |

mod device;
mod enumerator;

pub use device::{
    Backend, BufferInfo, Capabilities, Dequeued, Device, FormatDescription, Fraction,
    FrameInterval, FrameSize, MmapRegion, PixFormat, Resolution, V4l2Backend, V4l2Device,
};
pub use enumerator::{
    capability_tree, describe_format, enumerate_format, enumerate_frame_rate,
    enumerate_resolution, formats, frame_rates, resolutions, DeviceDescription,
    DeviceEnumerator, DeviceInfo, FormatCapability, ResolutionCapability,
};

pub(crate) use enumerator::check_char_device;
