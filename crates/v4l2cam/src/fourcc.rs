// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies
//
// Derived from https://docs.rs/crate/four-cc/latest, reworked for the V4L2
// packing which is little-endian regardless of host byte order.
#![forbid(unsafe_code)]

use core::{fmt, result::Result, str::FromStr};

use serde::{Serialize, Serializer};

use crate::Error;

/// Four-character pixel format code as used by V4L2.
///
/// The integer form packs the first character into the least significant
/// byte, matching the kernel's `v4l2_fourcc()` macro.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
#[repr(C, packed)]
pub struct FourCC(pub [u8; 4]);

impl FourCC {
    /// Packed YUV 4:2:2, `Y0 Cb Y1 Cr`
    pub const YUYV: FourCC = FourCC(*b"YUYV");
    /// Motion JPEG
    pub const MJPG: FourCC = FourCC(*b"MJPG");
    /// Interleaved 24-bit RGB
    pub const RGB3: FourCC = FourCC(*b"RGB3");

    pub const fn as_u32(self) -> u32 {
        u32::from_le_bytes(self.0)
    }

    pub const fn from_u32(val: u32) -> FourCC {
        FourCC(val.to_le_bytes())
    }

    /// Parse a 4-character string, one byte per character.
    ///
    /// Fails on any other character count, or on a character above U+00FF
    /// that cannot be packed into a byte.
    pub fn parse(text: &str) -> Result<FourCC, Error> {
        let invalid = || Error::InvalidFormatString(text.to_owned());
        let mut code = [0u8; 4];
        let mut chars = text.chars();
        for slot in code.iter_mut() {
            let c = chars.next().ok_or_else(invalid)?;
            *slot = u8::try_from(c).map_err(|_| invalid())?;
        }
        if chars.next().is_some() {
            return Err(invalid());
        }
        Ok(FourCC(code))
    }
}

/// Pack a 4-character pixel format string into its V4L2 integer code.
pub fn encode_format_code(text: &str) -> Result<u32, Error> {
    FourCC::parse(text).map(FourCC::as_u32)
}

/// Unpack a V4L2 integer code into its 4-character string, one character per byte.
pub fn decode_format_code(code: u32) -> String {
    code.to_le_bytes().iter().map(|&b| b as char).collect()
}

impl From<&[u8; 4]> for FourCC {
    fn from(buf: &[u8; 4]) -> FourCC {
        FourCC(*buf)
    }
}

impl From<u32> for FourCC {
    fn from(val: u32) -> FourCC {
        FourCC::from_u32(val)
    }
}

impl From<FourCC> for u32 {
    fn from(val: FourCC) -> Self {
        val.as_u32()
    }
}

impl FromStr for FourCC {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        FourCC::parse(s)
    }
}

impl fmt::Display for FourCC {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        let b = self.0;
        match core::str::from_utf8(&b) {
            Ok(s) => f.write_str(s),
            Err(_) => {
                // fmt::Error would make format!() panic, so escape instead
                f.write_fmt(format_args!(
                    "{}{}{}{}",
                    core::ascii::escape_default(b[0]),
                    core::ascii::escape_default(b[1]),
                    core::ascii::escape_default(b[2]),
                    core::ascii::escape_default(b[3])
                ))
            }
        }
    }
}

impl fmt::Debug for FourCC {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        let b = self.0;
        f.debug_tuple("FourCC")
            .field(&format_args!(
                "{}{}{}{}",
                core::ascii::escape_default(b[0]),
                core::ascii::escape_default(b[1]),
                core::ascii::escape_default(b[2]),
                core::ascii::escape_default(b[3])
            ))
            .finish()
    }
}

impl Serialize for FourCC {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    #[test]
    fn test_yuyv_code() {
        assert_eq!(encode_format_code("YUYV").unwrap(), 0x5659_5559);
        assert_eq!(decode_format_code(0x5659_5559), "YUYV");
        assert_eq!(FourCC::YUYV.as_u32(), 0x5659_5559);
    }

    #[test]
    fn test_wrong_length_rejected() {
        for text in ["", "Y", "YUY", "YUYV2", "MJPEG"] {
            match encode_format_code(text) {
                Err(Error::InvalidFormatString(s)) => assert_eq!(s, text),
                other => panic!("expected InvalidFormatString for {:?}, got {:?}", text, other),
            }
        }
    }

    #[test]
    fn test_round_trip_random_ascii() {
        let mut rng = rand::rng();
        for _ in 0..1000 {
            let text: String = (0..4)
                .map(|_| rng.random_range(0x20u8..0x7f) as char)
                .collect();
            let code = encode_format_code(&text).unwrap();
            assert_eq!(decode_format_code(code), text);
        }
    }

    #[test]
    fn test_latin1_characters() {
        assert_eq!(decode_format_code(0x4443_42C4), "ÄBCD");
        assert_eq!(encode_format_code("ÄBCD").unwrap(), 0x4443_42C4);

        // three characters, five UTF-8 bytes
        assert!(matches!(
            encode_format_code("YéY"),
            Err(Error::InvalidFormatString(_))
        ));
        assert!(matches!(
            encode_format_code("YUY€"),
            Err(Error::InvalidFormatString(_))
        ));
    }

    #[test]
    fn test_every_byte_round_trips() {
        let mut rng = rand::rng();
        for byte in 0..=255u8 {
            let code = u32::from_le_bytes([byte, rng.random(), rng.random(), byte]);
            let text = decode_format_code(code);
            assert_eq!(text.chars().count(), 4);
            assert_eq!(encode_format_code(&text).unwrap(), code);
        }
    }

    #[test]
    fn test_display_escapes_invalid_utf8() {
        let cc = FourCC([b'A', 0xff, b'B', b'C']);
        assert_eq!(cc.to_string(), "A\\xffBC");
        assert_eq!(format!("{:?}", FourCC::MJPG), "FourCC(MJPG)");
    }

    #[test]
    fn test_from_str() {
        let cc: FourCC = "NV12".parse().unwrap();
        assert_eq!(cc, FourCC(*b"NV12"));
        assert!("NV1".parse::<FourCC>().is_err());
    }
}
