// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

use crate::error::CliError;
use clap::Args as ClapArgs;
use serde::Serialize;
use std::path::PathBuf;
use v4l2cam::fourcc::FourCC;
use v4l2cam::v4l2::{DeviceDescription, DeviceEnumerator, Resolution};

#[derive(ClapArgs, Debug)]
pub struct Args {
    /// Camera device path
    #[arg(short, long, default_value = "/dev/video0")]
    device: PathBuf,

    /// Only list pixel formats, without resolutions and frame rates
    #[arg(long)]
    formats_only: bool,
}

#[derive(Debug, Serialize)]
struct DeviceReport {
    version: &'static str,
    device: String,
    card: String,
    driver: String,
    bus: String,
    capabilities: String,
    capture: bool,
    streaming: bool,
    formats: Vec<FormatReport>,
}

#[derive(Debug, Serialize)]
struct FormatReport {
    fourcc: FourCC,
    description: String,
    compressed: bool,
    emulated: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    resolutions: Vec<ResolutionReport>,
}

#[derive(Debug, Serialize)]
struct ResolutionReport {
    #[serde(flatten)]
    resolution: Resolution,
    frame_rates: Vec<u32>,
}

pub fn execute(args: Args, json: bool) -> Result<(), CliError> {
    log::debug!("Executing info command: {:?}", args);

    let description = DeviceEnumerator::describe(&args.device)?;
    let report = build_report(description, args.formats_only);

    if json {
        let json_str = serde_json::to_string_pretty(&report)
            .map_err(|e| CliError::General(format!("Failed to serialize JSON: {}", e)))?;
        println!("{}", json_str);
    } else {
        print_text_info(&report);
    }

    Ok(())
}

fn build_report(description: DeviceDescription, formats_only: bool) -> DeviceReport {
    let info = description.info;
    let caps = &info.capabilities;

    let formats = description
        .formats
        .into_iter()
        .map(|f| FormatReport {
            fourcc: f.format.fourcc,
            description: f.format.description,
            compressed: f.format.compressed,
            emulated: f.format.emulated,
            resolutions: if formats_only {
                Vec::new()
            } else {
                f.resolutions
                    .into_iter()
                    .map(|r| ResolutionReport {
                        resolution: r.resolution,
                        frame_rates: r.frame_rates,
                    })
                    .collect()
            },
        })
        .collect();

    DeviceReport {
        version: env!("CARGO_PKG_VERSION"),
        device: info.path.display().to_string(),
        card: caps.card.clone(),
        driver: caps.driver.clone(),
        bus: caps.bus_info.clone(),
        capabilities: format!("0x{:08x}", caps.effective()),
        capture: info.is_capture(),
        streaming: info.supports_streaming(),
        formats,
    }
}

fn print_text_info(report: &DeviceReport) {
    println!("v4l2cam {} - {}", report.version, report.device);
    println!("  Card: {}", report.card);
    println!("  Driver: {}", report.driver);
    println!("  Bus: {}", report.bus);
    println!("  Capabilities: {}", report.capabilities);
    println!(
        "  Streaming capture: {}",
        if report.capture && report.streaming {
            "✓ Supported"
        } else {
            "✗ Not supported"
        }
    );

    if report.formats.is_empty() {
        println!("  No capture formats reported");
        return;
    }

    println!("  Formats:");
    for format in &report.formats {
        let mut flags = Vec::new();
        if format.compressed {
            flags.push("compressed");
        }
        if format.emulated {
            flags.push("emulated");
        }
        if flags.is_empty() {
            println!("    {} ({})", format.fourcc, format.description);
        } else {
            println!(
                "    {} ({}) [{}]",
                format.fourcc,
                format.description,
                flags.join(", ")
            );
        }

        for res in &format.resolutions {
            let rates: Vec<String> = res.frame_rates.iter().map(|r| r.to_string()).collect();
            if rates.is_empty() {
                println!("      {}", res.resolution);
            } else {
                println!("      {} @ {} fps", res.resolution, rates.join(", "));
            }
        }
    }
}
