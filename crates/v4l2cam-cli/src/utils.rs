// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

use crate::error::CliError;
use signal_hook::consts::{SIGINT, SIGTERM};
use signal_hook::flag;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use v4l2cam::fourcc::FourCC;

/// Parse resolution string in format "WxH" or "W*H"
pub fn parse_resolution(s: &str) -> Result<(u32, u32), CliError> {
    let Some((width_str, height_str)) = s.split_once('x').or_else(|| s.split_once('*')) else {
        return Err(CliError::InvalidArgs(format!(
            "Invalid resolution format (expected WxH or W*H): {}",
            s
        )));
    };

    let width = width_str
        .parse::<u32>()
        .map_err(|_| CliError::InvalidArgs(format!("Invalid width in resolution: {}", s)))?;
    let height = height_str
        .parse::<u32>()
        .map_err(|_| CliError::InvalidArgs(format!("Invalid height in resolution: {}", s)))?;

    if width == 0 || height == 0 {
        return Err(CliError::InvalidArgs(format!(
            "Resolution dimensions must be positive: {}",
            s
        )));
    }

    Ok((width, height))
}

/// Parse a 4-character pixel format such as `YUYV`
pub fn parse_fourcc(s: &str) -> Result<FourCC, CliError> {
    FourCC::parse(s).map_err(|e| CliError::InvalidArgs(e.to_string()))
}

/// Install signal handler for graceful shutdown on Ctrl+C
///
/// Returns an Arc<AtomicBool> that will be set to true when SIGINT or SIGTERM
/// is received. Check this flag between frames to exit gracefully.
pub fn install_signal_handler() -> Result<Arc<AtomicBool>, CliError> {
    let term = Arc::new(AtomicBool::new(false));

    for signal in [SIGINT, SIGTERM] {
        flag::register(signal, Arc::clone(&term))
            .map_err(|e| CliError::General(format!("Failed to register signal handler: {}", e)))?;
    }

    log::debug!("Installed SIGINT/SIGTERM handler");
    Ok(term)
}
