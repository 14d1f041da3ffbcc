// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

//! Packed YUYV (4:2:2) to interleaved RGB24.
//!
//! Every two horizontal pixels share one chroma pair, stored as
//! `Y0 Cb Y1 Cr`. Each pair of source pixels expands to two RGB triples:
//!
//! ```text
//! R = Y + 1.4065 (Cr - 128)
//! G = Y - 0.3455 (Cb - 128) - 0.7169 (Cr - 128)
//! B = Y + 1.7790 (Cb - 128)
//! ```
//!
//! Channels are clamped to `[0, 255]` and truncated.

use crate::Error;

/// An RGB24 image owned by the caller, independent of any capture buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedFrame {
    data: Vec<u8>,
    width: u32,
    height: u32,
}

impl DecodedFrame {
    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Byte length, `width * height * 3`.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.data
    }

    /// RGB triple of the pixel at `(x, y)`.
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 3]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let at = (y as usize * self.width as usize + x as usize) * 3;
        Some([self.data[at], self.data[at + 1], self.data[at + 2]])
    }
}

impl AsRef<[u8]> for DecodedFrame {
    fn as_ref(&self) -> &[u8] {
        &self.data
    }
}

/// Convert a `width` x `height` YUYV frame to RGB24.
///
/// `data` may be longer than the frame (drivers pad buffers); extra bytes are
/// ignored. A shorter buffer fails with [`Error::FrameTooShort`].
pub fn yuyv_to_rgb(data: &[u8], width: u32, height: u32) -> Result<DecodedFrame, Error> {
    let pixels = width as usize * height as usize;
    let expected = pixels * 2;
    if data.len() < expected {
        return Err(Error::FrameTooShort {
            expected,
            actual: data.len(),
        });
    }

    let src = &data[..expected];
    let mut rgb = vec![0u8; pixels * 3];

    let mut dst_pairs = rgb.chunks_exact_mut(6);
    let mut src_pairs = src.chunks_exact(4);
    for (s, d) in (&mut src_pairs).zip(&mut dst_pairs) {
        let (cb, cr) = (s[1], s[3]);
        d[..3].copy_from_slice(&ycbcr_to_rgb(s[0], cb, cr));
        d[3..].copy_from_slice(&ycbcr_to_rgb(s[2], cb, cr));
    }

    // odd pixel count: the last pixel has no Cr sample
    let tail = src_pairs.remainder();
    let out = dst_pairs.into_remainder();
    if tail.len() == 2 && out.len() == 3 {
        out.copy_from_slice(&ycbcr_to_rgb(tail[0], tail[1], 128));
    }

    Ok(DecodedFrame {
        data: rgb,
        width,
        height,
    })
}

#[inline]
fn ycbcr_to_rgb(y: u8, cb: u8, cr: u8) -> [u8; 3] {
    let y = y as f32;
    let cb = cb as f32 - 128.0;
    let cr = cr as f32 - 128.0;

    let r = y + 1.4065 * cr;
    let g = y - 0.3455 * cb - 0.7169 * cr;
    let b = y + 1.7790 * cb;

    [channel(r), channel(g), channel(b)]
}

#[inline]
fn channel(v: f32) -> u8 {
    v.clamp(0.0, 255.0) as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    #[test]
    fn test_known_pair() {
        let frame = yuyv_to_rgb(&[100, 150, 250, 200], 2, 1).unwrap();
        assert_eq!(frame.len(), 6);
        assert_eq!(frame.pixel(0, 0), Some([201, 40, 139]));
        assert_eq!(frame.pixel(1, 0), Some([255, 190, 255]));
        assert_eq!(frame.pixel(2, 0), None);
    }

    #[test]
    fn test_clamps_low() {
        let frame = yuyv_to_rgb(&[0, 0, 0, 0], 2, 1).unwrap();
        assert_eq!(frame.as_slice(), &[0, 135, 0, 0, 135, 0]);
    }

    #[test]
    fn test_neutral_chroma_is_grey() {
        let frame = yuyv_to_rgb(&[128; 8], 2, 2).unwrap();
        assert!(frame.as_slice().iter().all(|&v| v == 128));

        let frame = yuyv_to_rgb(&[16, 128, 235, 128], 2, 1).unwrap();
        assert_eq!(frame.as_slice(), &[16, 16, 16, 235, 235, 235]);
    }

    #[test]
    fn test_short_and_padded_input() {
        match yuyv_to_rgb(&[0; 7], 2, 2) {
            Err(Error::FrameTooShort { expected, actual }) => {
                assert_eq!(expected, 8);
                assert_eq!(actual, 7);
            }
            other => panic!("expected FrameTooShort, got {:?}", other),
        }

        let frame = yuyv_to_rgb(&[128; 64], 2, 2).unwrap();
        assert_eq!(frame.len(), 12);
    }

    #[test]
    fn test_odd_pixel_count() {
        let frame = yuyv_to_rgb(&[128, 128, 128, 128, 90, 128], 3, 1).unwrap();
        assert_eq!(frame.len(), 9);
        assert_eq!(frame.pixel(2, 0), Some([90, 90, 90]));
    }

    #[test]
    fn test_random_frames() {
        let mut rng = rand::rng();
        for _ in 0..16 {
            let width = rng.random_range(1..64u32) * 2;
            let height = rng.random_range(1..48u32);
            let data: Vec<u8> = (0..width * height * 2).map(|_| rng.random()).collect();

            let a = yuyv_to_rgb(&data, width, height).unwrap();
            let b = yuyv_to_rgb(&data, width, height).unwrap();
            assert_eq!(a, b);
            assert_eq!(a.len(), (width * height * 3) as usize);

            // luma of each pixel survives unchanged when chroma is neutral
            let grey: Vec<u8> = data
                .chunks_exact(2)
                .flat_map(|p| [p[0], 128])
                .collect();
            let g = yuyv_to_rgb(&grey, width, height).unwrap();
            for (i, px) in g.as_slice().chunks_exact(3).enumerate() {
                let y = data[i * 2];
                assert_eq!(px, &[y, y, y]);
            }
        }
    }
}
