// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

//! Property-file configuration.
//!
//! A property file is a list of `Key=Value` lines. Blank lines and lines
//! starting with `#` are ignored and whitespace around keys and values is
//! trimmed. Camera settings live under a common prefix:
//!
//! ```text
//! CameraSrv.Camera.0.Uri=/dev/video0
//! CameraSrv.Camera.0.Name=front
//! CameraSrv.Camera.0.ImageWidth=640
//! CameraSrv.Camera.0.ImageHeight=480
//! CameraSrv.Camera.0.Format=YUYV
//! CameraSrv.Camera.0.fps=30
//! ```

use std::{collections::BTreeMap, fs, path::Path, path::PathBuf, str::FromStr};

use serde::Serialize;

use crate::{buffer::DEFAULT_BUFFER_COUNT, fourcc::FourCC, Error, FrameFormat};

/// Parsed `Key=Value` properties.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Properties {
    values: BTreeMap<String, String>,
}

impl Properties {
    pub fn new() -> Self {
        Properties::default()
    }

    /// Read and parse a property file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|err| Error::Config {
            key: path.display().to_string(),
            reason: err.to_string(),
        })?;
        let props = text.parse()?;
        log::debug!("loaded properties from {}", path.display());
        Ok(props)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn get_or<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.get(key).unwrap_or(default)
    }

    /// Integer value of `key`, or `default` when the key is absent.
    pub fn get_int_or(&self, key: &str, default: i64) -> Result<i64, Error> {
        match self.get(key) {
            None => Ok(default),
            Some(value) => value.parse().map_err(|_| Error::Config {
                key: key.to_owned(),
                reason: format!("expected an integer, found {:?}", value),
            }),
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl FromStr for Properties {
    type Err = Error;

    fn from_str(text: &str) -> Result<Self, Error> {
        let mut props = Properties::new();
        for (n, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                return Err(Error::Config {
                    key: format!("line {}", n + 1),
                    reason: format!("expected Key=Value, found {:?}", line),
                });
            };
            let key = key.trim();
            if key.is_empty() {
                return Err(Error::Config {
                    key: format!("line {}", n + 1),
                    reason: "empty key".to_owned(),
                });
            }
            props.set(key, value.trim());
        }
        Ok(props)
    }
}

/// Identity of a camera as presented to remote clients.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CameraDescription {
    pub name: String,
    pub short_description: String,
    pub streaming_uri: String,
}

/// Geometry and pixel format of the images a camera serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ImageDescription {
    pub width: u32,
    pub height: u32,
    pub format: FourCC,
}

impl From<FrameFormat> for ImageDescription {
    fn from(format: FrameFormat) -> Self {
        ImageDescription {
            width: format.width,
            height: format.height,
            format: format.fourcc,
        }
    }
}

/// Everything needed to open one camera, read from properties.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CameraConfig {
    pub device: PathBuf,
    pub format: FrameFormat,
    pub buffers: u32,
    pub camera: CameraDescription,
    pub image: ImageDescription,
}

impl CameraConfig {
    /// Read the camera under `prefix`, e.g. `CameraSrv.Camera.0.`.
    ///
    /// `Uri` is required; every other key has a default.
    pub fn from_properties(props: &Properties, prefix: &str) -> Result<Self, Error> {
        let key = |name: &str| format!("{}{}", prefix, name);

        let uri = key("Uri");
        let device = match props.get(&uri) {
            Some(value) if !value.is_empty() => PathBuf::from(value),
            _ => {
                return Err(Error::Config {
                    key: uri,
                    reason: "device path is required".to_owned(),
                })
            }
        };

        let camera = CameraDescription {
            name: props.get_or(&key("Name"), "").to_owned(),
            short_description: props.get_or(&key("ShortDescription"), "").to_owned(),
            streaming_uri: props.get_or(&key("StreamingUri"), "").to_owned(),
        };

        let fourcc = FourCC::parse(props.get_or(&key("Format"), "YUYV"))?;
        let format = FrameFormat::new(
            fourcc,
            positive(props, &key("ImageWidth"), 320)?,
            positive(props, &key("ImageHeight"), 240)?,
            positive(props, &key("fps"), 10)?,
        );
        let buffers = positive(props, &key("Buffers"), DEFAULT_BUFFER_COUNT)?;

        log::debug!("{}: {} {}", device.display(), camera.name, format);
        Ok(CameraConfig {
            device,
            format,
            buffers,
            image: ImageDescription::from(format),
            camera,
        })
    }
}

fn positive(props: &Properties, key: &str, default: u32) -> Result<u32, Error> {
    let value = props.get_int_or(key, default as i64)?;
    u32::try_from(value)
        .ok()
        .filter(|&v| v > 0)
        .ok_or_else(|| Error::Config {
            key: key.to_owned(),
            reason: format!("must be a positive integer, found {}", value),
        })
}
