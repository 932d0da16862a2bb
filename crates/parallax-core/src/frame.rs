//! Frame buffer type for decoded video frames in CPU memory.
//!
//! Frames are packed RGB8, origin top-left, row-major, with no row padding
//! so a frame can be piped straight into an ffmpeg `rawvideo` encoder.

use crate::error::{ParallaxError, Result};
use serde::{Deserialize, Serialize};

/// Bytes per pixel of a packed RGB8 frame.
pub const CHANNELS: usize = 3;

/// An 8-bit RGB color.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Rgb(pub [u8; 3]);

impl Rgb {
    pub const BLACK: Self = Self([0, 0, 0]);
    pub const RED: Self = Self([255, 0, 0]);

    /// BT.601 luma in [0, 255].
    #[inline]
    pub fn luma(self) -> f32 {
        0.299 * self.0[0] as f32 + 0.587 * self.0[1] as f32 + 0.114 * self.0[2] as f32
    }
}

/// A video frame: H×W×3 grid of 8-bit samples.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Frame width in pixels
    pub width: u32,
    /// Frame height in pixels
    pub height: u32,
    /// Packed RGB samples, `width * height * 3` bytes
    pub data: Vec<u8>,
}

impl Frame {
    /// Create a black frame with the given dimensions.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            data: vec![0u8; width as usize * height as usize * CHANNELS],
        }
    }

    /// Create a frame filled with a single color.
    pub fn filled(width: u32, height: u32, color: Rgb) -> Self {
        let mut data = Vec::with_capacity(width as usize * height as usize * CHANNELS);
        for _ in 0..(width as usize * height as usize) {
            data.extend_from_slice(&color.0);
        }
        Self {
            width,
            height,
            data,
        }
    }

    /// Wrap raw packed RGB bytes, validating the buffer length.
    pub fn from_raw(width: u32, height: u32, data: Vec<u8>) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(ParallaxError::InvalidParameter(format!(
                "frame dimensions must be positive, got {width}x{height}"
            )));
        }
        let expected = width as usize * height as usize * CHANNELS;
        if data.len() != expected {
            return Err(ParallaxError::InvalidParameter(format!(
                "RGB frame {width}x{height} needs {expected} bytes, got {}",
                data.len()
            )));
        }
        Ok(Self {
            width,
            height,
            data,
        })
    }

    /// (width, height) of the frame.
    #[inline]
    pub fn dims(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Bytes per row.
    #[inline]
    pub fn stride(&self) -> usize {
        self.width as usize * CHANNELS
    }

    /// Get a row of pixel data.
    #[inline]
    pub fn row(&self, y: u32) -> &[u8] {
        let start = y as usize * self.stride();
        &self.data[start..start + self.stride()]
    }

    /// Get a mutable row of pixel data.
    #[inline]
    pub fn row_mut(&mut self, y: u32) -> &mut [u8] {
        let stride = self.stride();
        let start = y as usize * stride;
        &mut self.data[start..start + stride]
    }

    #[inline]
    pub fn pixel(&self, x: u32, y: u32) -> Rgb {
        let i = (y as usize * self.width as usize + x as usize) * CHANNELS;
        Rgb([self.data[i], self.data[i + 1], self.data[i + 2]])
    }

    #[inline]
    pub fn set_pixel(&mut self, x: u32, y: u32, color: Rgb) {
        let i = (y as usize * self.width as usize + x as usize) * CHANNELS;
        self.data[i..i + CHANNELS].copy_from_slice(&color.0);
    }

    /// Per-pixel BT.601 luma, row-major.
    pub fn luma(&self) -> Vec<f32> {
        self.data
            .chunks_exact(CHANNELS)
            .map(|px| Rgb([px[0], px[1], px[2]]).luma())
            .collect()
    }

    /// Create a test pattern frame (horizontal color bars).
    pub fn test_pattern(width: u32, height: u32) -> Self {
        const BARS: [[u8; 3]; 8] = [
            [255, 255, 255], // White
            [255, 255, 0],   // Yellow
            [0, 255, 255],   // Cyan
            [0, 255, 0],     // Green
            [255, 0, 255],   // Magenta
            [255, 0, 0],     // Red
            [0, 0, 255],     // Blue
            [16, 16, 16],    // Near black
        ];
        let mut frame = Self::new(width, height);
        for y in 0..height {
            let row = frame.row_mut(y);
            for x in 0..width {
                let bar = (x as usize * BARS.len()) / width as usize;
                let i = x as usize * CHANNELS;
                row[i..i + CHANNELS].copy_from_slice(&BARS[bar]);
            }
        }
        frame
    }
}
