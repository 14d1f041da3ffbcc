// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

//! Capability negotiation and device discovery
//!
//! The `enumerate_*` functions walk the driver's capability lists one index at
//! a time. Each list is finite and restartable: call with index 0, 1, 2, ...
//! until `None` comes back, and the same indices give the same answers again.
//!
//! Frame sizes and frame intervals can be reported as a discrete value or as
//! a range. Ranges are collapsed to a single value:
//!
//! | Report | Resolution | Frame rate |
//! |--------|------------|------------|
//! | discrete | as reported | as reported |
//! | stepwise | maximum width/height | highest rate (minimum interval) |
//! | continuous | `None` | highest rate (minimum interval) |

use std::fs;
use std::os::unix::fs::FileTypeExt;
use std::path::{Path, PathBuf};

use crate::fourcc::FourCC;
use crate::Error;

use super::device::{
    Capabilities, Device, FormatDescription, FrameInterval, FrameSize, Resolution, V4l2Device,
};

/// The pixel format at `index` of the driver's capture format list.
pub fn enumerate_format<D: Device + ?Sized>(
    device: &mut D,
    index: u32,
) -> Result<Option<FourCC>, Error> {
    Ok(describe_format(device, index)?.map(|desc| desc.fourcc))
}

/// Like [`enumerate_format`] but with the driver's description and flags.
pub fn describe_format<D: Device + ?Sized>(
    device: &mut D,
    index: u32,
) -> Result<Option<FormatDescription>, Error> {
    device
        .enum_format(index)
        .map_err(|source| Error::DeviceQuery {
            request: "VIDIOC_ENUM_FMT",
            source,
        })
}

/// The resolution at `index` for `fourcc`.
///
/// Stepwise ranges report their maximum; continuous ranges and unknown
/// shapes report `None`.
pub fn enumerate_resolution<D: Device + ?Sized>(
    device: &mut D,
    fourcc: FourCC,
    index: u32,
) -> Result<Option<Resolution>, Error> {
    let size = device
        .enum_frame_size(fourcc, index)
        .map_err(|source| Error::DeviceQuery {
            request: "VIDIOC_ENUM_FRAMESIZES",
            source,
        })?;

    Ok(match size {
        Some(FrameSize::Discrete(res)) => Some(res),
        Some(FrameSize::Stepwise { max, .. }) => Some(max),
        Some(FrameSize::Continuous { .. }) | Some(FrameSize::Other(_)) | None => None,
    })
}

/// The frame rate at `index` for `fourcc` at `resolution`.
///
/// Stepwise and continuous ranges report the highest rate they allow.
pub fn enumerate_frame_rate<D: Device + ?Sized>(
    device: &mut D,
    fourcc: FourCC,
    resolution: Resolution,
    index: u32,
) -> Result<Option<u32>, Error> {
    let interval = device
        .enum_frame_interval(fourcc, resolution, index)
        .map_err(|source| Error::DeviceQuery {
            request: "VIDIOC_ENUM_FRAMEINTERVALS",
            source,
        })?;

    Ok(match interval {
        Some(FrameInterval::Discrete(f)) => f.as_fps(),
        Some(FrameInterval::Stepwise { min, .. }) | Some(FrameInterval::Continuous { min, .. }) => {
            min.as_fps()
        }
        Some(FrameInterval::Other(_)) | None => None,
    })
}

/// All capture formats, in driver order.
pub fn formats<D: Device + ?Sized>(device: &mut D) -> Result<Vec<FormatDescription>, Error> {
    let mut list = Vec::new();
    while let Some(desc) = describe_format(device, list.len() as u32)? {
        list.push(desc);
    }
    Ok(list)
}

/// All resolutions for `fourcc`, in driver order.
pub fn resolutions<D: Device + ?Sized>(
    device: &mut D,
    fourcc: FourCC,
) -> Result<Vec<Resolution>, Error> {
    let mut list = Vec::new();
    while let Some(res) = enumerate_resolution(device, fourcc, list.len() as u32)? {
        list.push(res);
    }
    Ok(list)
}

/// All frame rates for `fourcc` at `resolution`, in driver order.
pub fn frame_rates<D: Device + ?Sized>(
    device: &mut D,
    fourcc: FourCC,
    resolution: Resolution,
) -> Result<Vec<u32>, Error> {
    let mut list = Vec::new();
    while let Some(fps) = enumerate_frame_rate(device, fourcc, resolution, list.len() as u32)? {
        list.push(fps);
    }
    Ok(list)
}

/// A resolution with the frame rates the driver offers for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolutionCapability {
    pub resolution: Resolution,
    pub frame_rates: Vec<u32>,
}

/// A pixel format with every resolution and frame rate offered for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormatCapability {
    pub format: FormatDescription,
    pub resolutions: Vec<ResolutionCapability>,
}

/// Walk formats × resolutions × frame rates.
pub fn capability_tree<D: Device + ?Sized>(device: &mut D) -> Result<Vec<FormatCapability>, Error> {
    let mut tree = Vec::new();
    for format in formats(device)? {
        let mut entries = Vec::new();
        for resolution in resolutions(device, format.fourcc)? {
            let frame_rates = frame_rates(device, format.fourcc, resolution)?;
            entries.push(ResolutionCapability {
                resolution,
                frame_rates,
            });
        }
        log::debug!("{}: {} resolutions", format.fourcc, entries.len());
        tree.push(FormatCapability {
            format,
            resolutions: entries,
        });
    }
    Ok(tree)
}

/// A discovered video device node.
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    /// Device path (e.g., "/dev/video0")
    pub path: PathBuf,
    pub capabilities: Capabilities,
}

impl DeviceInfo {
    pub fn is_capture(&self) -> bool {
        self.capabilities.is_capture()
    }

    pub fn supports_streaming(&self) -> bool {
        self.capabilities.supports_streaming()
    }
}

/// A device with its full capability tree.
#[derive(Debug, Clone)]
pub struct DeviceDescription {
    pub info: DeviceInfo,
    pub formats: Vec<FormatCapability>,
}

/// V4L2 device discovery.
///
/// # Example
///
/// ```no_run
/// use v4l2cam::v4l2::DeviceEnumerator;
///
/// for device in DeviceEnumerator::enumerate()? {
///     println!("{}: {} ({})", device.path.display(), device.capabilities.card,
///         device.capabilities.driver);
/// }
/// # Ok::<(), v4l2cam::Error>(())
/// ```
pub struct DeviceEnumerator;

impl DeviceEnumerator {
    /// Scan `/dev/video*`.
    ///
    /// Nodes that are not character devices, or that cannot be opened or
    /// queried (busy, permission denied), are skipped. The result is sorted
    /// by device number.
    pub fn enumerate() -> Result<Vec<DeviceInfo>, Error> {
        Self::enumerate_in(Path::new("/dev"))
    }

    fn enumerate_in(dir: &Path) -> Result<Vec<DeviceInfo>, Error> {
        let entries = fs::read_dir(dir).map_err(|source| Error::DeviceOpenFailed {
            path: dir.to_path_buf(),
            source,
        })?;

        let mut devices = Vec::new();
        for entry in entries.flatten() {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if !name.starts_with("video") {
                continue;
            }

            let path = entry.path();
            match Self::query(&path) {
                Ok(info) => devices.push(info),
                Err(err) => log::debug!("skipping {}: {}", path.display(), err),
            }
        }

        devices.sort_by_key(|d| device_number(&d.path));
        Ok(devices)
    }

    /// Capabilities of a single node.
    pub fn query(path: &Path) -> Result<DeviceInfo, Error> {
        let mut device = open_char_device(path)?;
        let capabilities = device
            .query_capabilities()
            .map_err(|source| Error::DeviceQuery {
                request: "VIDIOC_QUERYCAP",
                source,
            })?;
        Ok(DeviceInfo {
            path: path.to_path_buf(),
            capabilities,
        })
    }

    /// Capabilities plus the full format × resolution × frame rate tree.
    pub fn describe(path: &Path) -> Result<DeviceDescription, Error> {
        let mut device = open_char_device(path)?;
        let capabilities = device
            .query_capabilities()
            .map_err(|source| Error::DeviceQuery {
                request: "VIDIOC_QUERYCAP",
                source,
            })?;
        let formats = capability_tree(&mut device)?;
        Ok(DeviceDescription {
            info: DeviceInfo {
                path: path.to_path_buf(),
                capabilities,
            },
            formats,
        })
    }
}

/// Fail unless `path` is a character device, before anything is opened.
pub(crate) fn check_char_device(path: &Path) -> Result<(), Error> {
    let meta = fs::metadata(path).map_err(|source| Error::DeviceOpenFailed {
        path: path.to_path_buf(),
        source,
    })?;
    if !meta.file_type().is_char_device() {
        return Err(Error::NotACharacterDevice(path.to_path_buf()));
    }
    Ok(())
}

fn open_char_device(path: &Path) -> Result<V4l2Device, Error> {
    check_char_device(path)?;
    V4l2Device::open(path).map_err(|source| Error::DeviceOpenFailed {
        path: path.to_path_buf(),
        source,
    })
}

fn device_number(path: &Path) -> u32 {
    path.file_name()
        .and_then(|n| n.to_str())
        .and_then(|n| n.trim_start_matches("video").parse().ok())
        .unwrap_or(u32::MAX)
}
