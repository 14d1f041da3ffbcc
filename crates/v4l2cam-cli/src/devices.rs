// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

//! V4L2 device enumeration with filtering and grouping by hardware.

use crate::error::CliError;
use clap::Args as ClapArgs;
use serde::Serialize;
use std::collections::BTreeMap;
use v4l2cam::v4l2::{self, DeviceEnumerator, DeviceInfo};

#[derive(ClapArgs, Debug)]
pub struct Args {
    /// Show only devices that can stream video capture
    #[arg(long)]
    cameras: bool,

    /// Show all device nodes (disable grouping by hardware)
    #[arg(long)]
    all: bool,

    /// Show bus, node capabilities, and pixel formats of each device
    #[arg(short = 'l', long = "long")]
    detailed: bool,
}

#[derive(Debug, Serialize)]
struct DevicesOutput {
    groups: Vec<DeviceGroup>,
    summary: Summary,
}

#[derive(Debug, Serialize)]
struct DeviceGroup {
    name: String,
    driver: String,
    bus: String,
    devices: Vec<NodeInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    formats: Option<Vec<String>>,
}

#[derive(Debug, Serialize)]
struct NodeInfo {
    path: String,
    capture: bool,
    streaming: bool,
}

#[derive(Debug, Serialize)]
struct Summary {
    total_devices: usize,
    hardware_units: usize,
    capture_devices: usize,
}

pub fn execute(args: Args, json: bool) -> Result<(), CliError> {
    log::debug!("Executing devices command: {:?}", args);

    let devices = DeviceEnumerator::enumerate()
        .map_err(|e| CliError::General(format!("Failed to enumerate V4L2 devices: {}", e)))?;
    let total_devices = devices.len();
    let capture_devices = devices
        .iter()
        .filter(|d| d.is_capture() && d.supports_streaming())
        .count();

    let selected: Vec<&DeviceInfo> = devices
        .iter()
        .filter(|d| !args.cameras || (d.is_capture() && d.supports_streaming()))
        .collect();

    let groups = if args.all {
        selected
            .iter()
            .map(|d| new_group(&[*d], args.detailed))
            .collect()
    } else {
        group_by_bus(&selected, args.detailed)
    };

    let output = DevicesOutput {
        summary: Summary {
            total_devices,
            hardware_units: groups.len(),
            capture_devices,
        },
        groups,
    };

    if json {
        let json_str = serde_json::to_string_pretty(&output)
            .map_err(|e| CliError::General(format!("JSON serialization failed: {}", e)))?;
        println!("{}", json_str);
    } else {
        print_text_output(&output, args.detailed);
    }

    Ok(())
}

/// Group nodes by bus_info so one camera exposing several nodes shows once
fn group_by_bus(devices: &[&DeviceInfo], verbose: bool) -> Vec<DeviceGroup> {
    let mut groups: BTreeMap<&str, Vec<&DeviceInfo>> = BTreeMap::new();
    for device in devices {
        groups
            .entry(device.capabilities.bus_info.as_str())
            .or_default()
            .push(*device);
    }

    let mut result: Vec<DeviceGroup> = groups
        .values()
        .map(|devs| new_group(devs, verbose))
        .collect();
    result.sort_by(|a, b| a.name.cmp(&b.name));
    result
}

fn new_group(devices: &[&DeviceInfo], verbose: bool) -> DeviceGroup {
    // the first capture-capable node describes the group
    let lead = devices
        .iter()
        .find(|d| d.is_capture())
        .or_else(|| devices.first())
        .copied();

    let (name, driver, bus) = match lead {
        Some(d) => (
            d.capabilities.card.clone(),
            d.capabilities.driver.clone(),
            d.capabilities.bus_info.clone(),
        ),
        None => Default::default(),
    };

    let formats = match lead {
        Some(d) if verbose && d.is_capture() => collect_formats(d),
        _ => None,
    };

    DeviceGroup {
        name,
        driver,
        bus,
        devices: devices
            .iter()
            .map(|d| NodeInfo {
                path: d.path.display().to_string(),
                capture: d.is_capture(),
                streaming: d.supports_streaming(),
            })
            .collect(),
        formats,
    }
}

fn collect_formats(device: &DeviceInfo) -> Option<Vec<String>> {
    let mut dev = match v4l2::V4l2Device::open(&device.path) {
        Ok(dev) => dev,
        Err(e) => {
            log::debug!("cannot open {}: {}", device.path.display(), e);
            return None;
        }
    };

    match v4l2::formats(&mut dev) {
        Ok(formats) if !formats.is_empty() => {
            Some(formats.iter().map(|f| f.to_string()).collect())
        }
        Ok(_) => None,
        Err(e) => {
            log::debug!("cannot list formats of {}: {}", device.path.display(), e);
            None
        }
    }
}

fn print_text_output(output: &DevicesOutput, verbose: bool) {
    println!(
        "V4L2 Devices ({} devices, {} hardware units, {} capture)\n",
        output.summary.total_devices,
        output.summary.hardware_units,
        output.summary.capture_devices
    );

    for group in &output.groups {
        print_device_group(group, verbose);
    }
}

fn print_device_group(group: &DeviceGroup, verbose: bool) {
    if group.devices.len() == 1 {
        println!("  {}: {}", group.devices[0].path, group.name);
    } else {
        let paths: Vec<&str> = group.devices.iter().map(|d| d.path.as_str()).collect();
        println!(
            "  {}: {} ({} nodes)",
            summarize_paths(&paths),
            group.name,
            group.devices.len()
        );
    }

    println!("    Driver: {}", group.driver);

    if verbose {
        println!("    Bus: {}", group.bus);
        for node in &group.devices {
            println!(
                "    {}: capture={} streaming={}",
                node.path, node.capture, node.streaming
            );
        }
    }

    if let Some(ref formats) = group.formats {
        println!("    Formats: {}", formats.join(", "));
    }
}

/// Summarize device paths like "/dev/video0-4" or "/dev/video{11,12,14}"
fn summarize_paths(paths: &[&str]) -> String {
    if paths.len() <= 1 {
        return paths.join(", ");
    }

    let mut nums: Vec<u32> = paths
        .iter()
        .filter_map(|p| {
            p.strip_prefix("/dev/video")
                .and_then(|s| s.parse::<u32>().ok())
        })
        .collect();
    nums.sort_unstable();

    let (Some(first), Some(last)) = (nums.first(), nums.last()) else {
        return paths.join(", ");
    };

    let is_consecutive = nums.windows(2).all(|w| w[1] == w[0] + 1);

    if is_consecutive && nums.len() > 2 {
        format!("/dev/video{}-{}", first, last)
    } else if nums.len() <= 4 {
        format!(
            "/dev/video{{{}}}",
            nums.iter()
                .map(|n| n.to_string())
                .collect::<Vec<_>>()
                .join(",")
        )
    } else {
        format!("/dev/video{{{},..}} ({} devices)", first, nums.len())
    }
}
