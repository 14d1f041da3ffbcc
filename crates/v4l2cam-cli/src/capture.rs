// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

use crate::error::CliError;
use crate::utils;
use clap::Args as ClapArgs;
use serde::Serialize;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use v4l2cam::camera::{Capture, FrameToken};
use v4l2cam::config::{CameraConfig, ImageDescription, Properties};
use v4l2cam::convert::yuyv_to_rgb;
use v4l2cam::fourcc::FourCC;

/// Longest single wait, so Ctrl+C is noticed promptly
const WAIT_SLICE_MS: u64 = 100;

#[derive(ClapArgs, Debug)]
pub struct Args {
    /// Property file with the camera settings
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Key prefix of the camera in the property file
    #[arg(long, default_value = "CameraSrv.Camera.0.")]
    prefix: String,

    /// Camera device (overrides the property file)
    #[arg(short, long)]
    device: Option<PathBuf>,

    /// Resolution in WxH format (overrides the property file)
    #[arg(short, long)]
    resolution: Option<String>,

    /// Pixel format FOURCC (overrides the property file)
    #[arg(long)]
    format: Option<String>,

    /// Target frame rate (overrides the property file)
    #[arg(short = 'F', long)]
    fps: Option<u32>,

    /// Number of driver buffers (overrides the property file)
    #[arg(long)]
    buffers: Option<u32>,

    /// Write frames to this file
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Convert YUYV frames to RGB24 before writing
    #[arg(long)]
    rgb: bool,

    /// Number of frames to capture (0=unlimited)
    #[arg(short = 'n', long, default_value = "10")]
    frames: u64,

    /// Give up when no frame arrives within this many milliseconds
    #[arg(short, long, default_value = "2000")]
    timeout: u32,
}

#[derive(Debug, Default, Serialize)]
struct CaptureSummary {
    device: String,
    image: Option<ImageDescription>,
    fps: u32,
    frames: u64,
    bytes: u64,
    dropped_frames: u64,
    elapsed_ms: u64,
    #[serde(skip)]
    last_sequence: Option<u32>,
}

impl CaptureSummary {
    fn record(&mut self, sequence: u32, bytes: usize) {
        if let Some(prev) = self.last_sequence {
            let expected = prev.wrapping_add(1);
            if sequence > expected {
                self.dropped_frames += (sequence - expected) as u64;
            } else if sequence < expected {
                log::warn!("Frame sequence decreased: {} -> {}", prev, sequence);
            }
        }
        self.last_sequence = Some(sequence);
        self.frames += 1;
        self.bytes += bytes as u64;
    }

    fn capture_fps(&self) -> f64 {
        if self.elapsed_ms == 0 {
            0.0
        } else {
            self.frames as f64 * 1000.0 / self.elapsed_ms as f64
        }
    }
}

pub fn execute(args: Args, json: bool) -> Result<(), CliError> {
    log::debug!("Capture parameters: {:?}", args);

    let config = resolve_config(&args)?;
    if args.rgb && config.format.fourcc != FourCC::YUYV {
        return Err(CliError::InvalidArgs(format!(
            "--rgb needs YUYV input, not {}",
            config.format.fourcc
        )));
    }

    let term = utils::install_signal_handler()?;

    log::info!("Opening camera: {}", config.device.display());
    let mut cam = Capture::new().with_buffer_count(config.buffers);
    cam.open(&config.device, config.format)?;
    let format = cam.actual_format()?;
    log::info!("Negotiated {}", format);

    let mut output = match &args.output {
        Some(path) => Some(BufWriter::new(File::create(path)?)),
        None => None,
    };

    cam.start()?;

    let mut summary = CaptureSummary {
        device: config.device.display().to_string(),
        image: Some(ImageDescription::from(format)),
        fps: format.fps,
        ..Default::default()
    };
    let max_frames = if args.frames == 0 {
        u64::MAX
    } else {
        args.frames
    };

    log::info!(
        "Capturing {} frames (Ctrl+C to stop)...",
        if max_frames == u64::MAX {
            "unlimited".to_string()
        } else {
            max_frames.to_string()
        }
    );

    let started = Instant::now();
    while summary.frames < max_frames {
        let Some(token) = wait_for_frame(&mut cam, args.timeout, &term)? else {
            log::info!("Received Ctrl+C, stopping...");
            break;
        };

        let written = {
            let data = cam.frame_data(&token)?;
            match output.as_mut() {
                Some(out) if args.rgb => {
                    let rgb = yuyv_to_rgb(data, format.width, format.height)?;
                    out.write_all(rgb.as_slice())?;
                    rgb.len()
                }
                Some(out) => {
                    out.write_all(data)?;
                    data.len()
                }
                None => data.len(),
            }
        };

        summary.record(token.sequence(), written);
        log::trace!("Frame {} ({} bytes)", token.sequence(), written);
        cam.release_frame(token)?;

        if summary.frames % 30 == 0 {
            log::debug!("Captured {} frames", summary.frames);
        }
    }
    summary.elapsed_ms = started.elapsed().as_millis() as u64;

    if let Some(mut out) = output {
        out.flush()?;
    }
    cam.stop()?;
    cam.close();

    if json {
        let json_str = serde_json::to_string_pretty(&summary)
            .map_err(|e| CliError::General(format!("JSON serialization failed: {}", e)))?;
        println!("{}", json_str);
    } else {
        print_summary(&summary, args.output.as_ref());
    }

    Ok(())
}

/// Property file first, then command-line overrides
fn resolve_config(args: &Args) -> Result<CameraConfig, CliError> {
    let (mut props, prefix) = match &args.config {
        Some(path) => (Properties::load(path)?, args.prefix.as_str()),
        None => {
            let mut props = Properties::new();
            props.set("Uri", "/dev/video0");
            (props, "")
        }
    };

    let key = |name: &str| format!("{}{}", prefix, name);
    if let Some(device) = &args.device {
        props.set(key("Uri"), device.display().to_string());
    }
    if let Some(resolution) = &args.resolution {
        let (width, height) = utils::parse_resolution(resolution)?;
        props.set(key("ImageWidth"), width.to_string());
        props.set(key("ImageHeight"), height.to_string());
    }
    if let Some(format) = &args.format {
        props.set(key("Format"), utils::parse_fourcc(format)?.to_string());
    }
    if let Some(fps) = args.fps {
        props.set(key("fps"), fps.to_string());
    }
    if let Some(buffers) = args.buffers {
        props.set(key("Buffers"), buffers.to_string());
    }

    Ok(CameraConfig::from_properties(&props, prefix)?)
}

fn wait_for_frame(
    cam: &mut Capture,
    timeout_ms: u32,
    term: &AtomicBool,
) -> Result<Option<FrameToken>, CliError> {
    let deadline = Instant::now() + Duration::from_millis(timeout_ms as u64);
    loop {
        if term.load(Ordering::Relaxed) {
            return Ok(None);
        }
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(CliError::Timeout(format!(
                "no frame within {} ms",
                timeout_ms
            )));
        }
        let slice = remaining.min(Duration::from_millis(WAIT_SLICE_MS));
        if let Some(token) = cam.wait_frame(slice.as_millis().max(1) as u32)? {
            return Ok(Some(token));
        }
    }
}

fn print_summary(summary: &CaptureSummary, output: Option<&PathBuf>) {
    println!("\n=== Capture Summary ===");
    println!("Device:            {}", summary.device);
    if let Some(image) = &summary.image {
        println!(
            "Format:            {} {}x{} @ {} fps",
            image.format, image.width, image.height, summary.fps
        );
    }
    println!("Frames captured:   {}", summary.frames);
    println!(
        "Bytes written:     {} ({:.2} MB)",
        summary.bytes,
        summary.bytes as f64 / 1_048_576.0
    );
    println!(
        "Duration:          {:.2} s",
        summary.elapsed_ms as f64 / 1000.0
    );
    println!("Throughput:        {:.2} fps", summary.capture_fps());
    if summary.dropped_frames > 0 {
        println!("Dropped frames:    {}", summary.dropped_frames);
    }
    if let Some(path) = output {
        println!("Output:            {}", path.display());
    }
}
