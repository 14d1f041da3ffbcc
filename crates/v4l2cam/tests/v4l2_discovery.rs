// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies
//
// V4L2 Device Discovery Tests
//
// TESTING LAYERS:
//
// Layer 1 (Unit Tests - No hardware required):
//   - FourCC encode/decode
//   - Resolution and fraction conversions
//   - Graceful handling of missing or non-device paths
//
// Layer 3 (Hardware Integration - Requires V4L2 devices):
//   - Device enumeration
//   - Capability tree of the first capture device
//   - Streaming a few frames and converting them
//
// RUN LAYER 1:
//   cargo test --test v4l2_discovery
//
// RUN LAYER 3 (on hardware):
//   cargo test --test v4l2_discovery -- --ignored --nocapture

use rand::Rng;
use serial_test::serial;
use v4l2cam::camera::{create_camera, Capture};
use v4l2cam::convert::yuyv_to_rgb;
use v4l2cam::fourcc::{decode_format_code, encode_format_code, FourCC};
use v4l2cam::v4l2::{DeviceEnumerator, Fraction, Resolution};
use v4l2cam::{Error, ErrorKind, FrameFormat};

// =============================================================================
// Layer 1: Unit Tests (No Hardware Required)
// =============================================================================

// -----------------------------------------------------------------------------
// Format Code Tests
// -----------------------------------------------------------------------------

#[test]
fn test_format_code_known_values() {
    assert_eq!(encode_format_code("YUYV").unwrap(), 0x5659_5559);
    assert_eq!(encode_format_code("MJPG").unwrap(), 0x4750_4A4D);
    assert_eq!(decode_format_code(0x5659_5559), "YUYV");
}

#[test]
fn test_format_code_roundtrip() {
    let mut rng = rand::rng();
    for _ in 0..256 {
        let text: String = (0..4)
            .map(|_| rng.random_range(b' '..=b'~') as char)
            .collect();
        let code = encode_format_code(&text).unwrap();
        assert_eq!(decode_format_code(code), text);
    }
}

#[test]
fn test_format_code_length() {
    for text in ["", "YUV", "YUYV2", "NV12 "] {
        let err = encode_format_code(text).unwrap_err();
        assert!(matches!(err, Error::InvalidFormatString(_)));
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }
}

// -----------------------------------------------------------------------------
// Value Type Tests
// -----------------------------------------------------------------------------

#[test]
fn test_resolution_display() {
    assert_eq!(Resolution::new(1920, 1080).to_string(), "1920x1080");
    assert_eq!(Resolution::new(640, 480), Resolution::new(640, 480));
}

#[test]
fn test_fraction_fps() {
    assert_eq!(Fraction::from_fps(30).as_fps(), Some(30));
    assert_eq!(Fraction::new(1001, 30000).as_fps(), Some(29));
    assert_eq!(Fraction::new(0, 1).as_fps(), None);
}

// -----------------------------------------------------------------------------
// Missing Device Tests
// -----------------------------------------------------------------------------

#[test]
fn test_query_nonexistent_device() {
    let err = DeviceEnumerator::query("/dev/video-does-not-exist".as_ref()).unwrap_err();
    assert!(matches!(err, Error::DeviceOpenFailed { .. }));
    assert_eq!(err.raw_os_error(), Some(2));
}

#[test]
fn test_open_regular_file() {
    let file = tempfile::NamedTempFile::new().unwrap();
    let mut cap = Capture::new();
    let err = cap
        .open(file.path(), FrameFormat::new(FourCC::YUYV, 320, 240, 10))
        .unwrap_err();
    assert!(matches!(err, Error::NotACharacterDevice(_)));
}

#[test]
fn test_open_non_video_device() {
    // /dev/null is a character device that knows nothing of V4L2
    let mut cap = Capture::new();
    let err = cap
        .open("/dev/null", FrameFormat::new(FourCC::YUYV, 320, 240, 10))
        .unwrap_err();
    assert!(matches!(err, Error::DeviceQuery { .. }), "{:?}", err);
    assert_eq!(err.kind(), ErrorKind::DeviceIo);
}

// =============================================================================
// Layer 3: Hardware Integration Tests
// =============================================================================

#[test]
#[ignore = "requires V4L2 devices (run with --ignored on hardware)"]
fn test_enumerate_finds_devices() {
    let _ = env_logger::builder().is_test(true).try_init();

    let devices = DeviceEnumerator::enumerate().expect("enumerate should succeed");
    println!("Found {} V4L2 devices", devices.len());
    assert!(!devices.is_empty(), "expected at least one V4L2 device");

    for device in &devices {
        println!(
            "  {} {} ({}) capture={} streaming={}",
            device.path.display(),
            device.capabilities.card,
            device.capabilities.driver,
            device.is_capture(),
            device.supports_streaming()
        );
        assert!(device.path.to_string_lossy().starts_with("/dev/video"));
        assert!(!device.capabilities.driver.is_empty());
    }
}

#[test]
#[ignore = "requires camera (run with --ignored on hardware)"]
fn test_camera_has_capture_formats() {
    let devices = DeviceEnumerator::enumerate().expect("enumerate should succeed");
    let Some(camera) = devices.iter().find(|d| d.is_capture()) else {
        panic!("no capture device found");
    };

    let desc = DeviceEnumerator::describe(&camera.path).expect("describe should succeed");
    assert!(!desc.formats.is_empty());
    for format in &desc.formats {
        println!("  {}", format.format);
        for res in &format.resolutions {
            println!("    {} @ {:?}", res.resolution, res.frame_rates);
        }
    }
}

#[test]
#[ignore = "requires camera at /dev/video0 (run with --ignored on hardware)"]
#[serial]
fn test_stream_and_convert() -> Result<(), Error> {
    let _ = env_logger::builder().is_test(true).try_init();

    let mut cam = create_camera().open()?;
    let format = cam.format().expect("opened");
    cam.start()?;

    let mut converted = 0;
    for _ in 0..10 {
        let Some(token) = cam.wait_frame(2000)? else {
            continue;
        };
        let rgb = yuyv_to_rgb(cam.frame_data(&token)?, format.width, format.height)?;
        assert_eq!(rgb.len(), (format.width * format.height * 3) as usize);
        cam.release_frame(token)?;
        converted += 1;
    }

    cam.close();
    assert!(converted > 0, "no frames within the timeout");
    Ok(())
}
