// SPDX-License-Identifier: GPL-3.0-only

//! Shared frame and format types for capture sources and the filter pipeline

use crate::pipelines::filter::pool::PooledBuffer;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;

/// Frame data storage - either shared copied bytes or a buffer borrowed from a pool
///
/// Cloning never copies pixels. A `Pooled` buffer goes back to its pool once the
/// last clone of the frame is dropped.
#[derive(Clone)]
pub enum FrameData {
    /// Bytes owned by the frame (capture sources, tests, decoded photos)
    Copied(Arc<[u8]>),
    /// Output buffer of a filter stage
    Pooled(Arc<PooledBuffer>),
}

impl FrameData {
    /// Get the length of the frame data in bytes
    pub fn len(&self) -> usize {
        self.as_ref().len()
    }

    /// Check if the frame data is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether the data lives in a filter stage's pool
    pub fn is_pooled(&self) -> bool {
        matches!(self, FrameData::Pooled(_))
    }
}

impl std::fmt::Debug for FrameData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FrameData::Copied(data) => write!(f, "FrameData::Copied({} bytes)", data.len()),
            FrameData::Pooled(buf) => write!(f, "FrameData::Pooled({} bytes)", buf.len()),
        }
    }
}

impl AsRef<[u8]> for FrameData {
    fn as_ref(&self) -> &[u8] {
        match self {
            FrameData::Copied(data) => data.as_ref(),
            FrameData::Pooled(buf) => buf.as_slice(),
        }
    }
}

impl std::ops::Deref for FrameData {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.as_ref()
    }
}

impl From<Vec<u8>> for FrameData {
    fn from(data: Vec<u8>) -> Self {
        FrameData::Copied(Arc::from(data))
    }
}

/// Pixel layout of a frame. Both layouts are 8 bits per channel, 4 bytes per pixel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum PixelFormat {
    /// B G R A byte order (native camera output)
    #[default]
    Bgra8,
    /// R G B A byte order
    Rgba8,
}

impl PixelFormat {
    pub fn bytes_per_pixel(&self) -> usize {
        4
    }

    /// Byte offsets of the red, green and blue channels within a pixel
    pub fn channel_offsets(&self) -> [usize; 3] {
        match self {
            PixelFormat::Bgra8 => [2, 1, 0],
            PixelFormat::Rgba8 => [0, 1, 2],
        }
    }
}

impl std::fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PixelFormat::Bgra8 => write!(f, "BGRA8"),
            PixelFormat::Rgba8 => write!(f, "RGBA8"),
        }
    }
}

/// Color space the pixel values are encoded in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ColorSpace {
    /// Gamma-encoded sRGB
    #[default]
    Srgb,
    /// Linear-light sRGB primaries
    LinearSrgb,
}

impl ColorSpace {
    /// Convert one 8-bit channel value from `self` into `target`
    pub fn convert_channel(&self, value: u8, target: ColorSpace) -> u8 {
        if *self == target {
            return value;
        }
        let v = value as f32 / 255.0;
        let converted = match (self, target) {
            (ColorSpace::Srgb, ColorSpace::LinearSrgb) => srgb_to_linear(v),
            (ColorSpace::LinearSrgb, ColorSpace::Srgb) => linear_to_srgb(v),
            _ => v,
        };
        (converted.clamp(0.0, 1.0) * 255.0).round() as u8
    }

    /// 256-entry lookup table for converting into `target`
    pub fn conversion_table(&self, target: ColorSpace) -> [u8; 256] {
        let mut table = [0u8; 256];
        for (i, entry) in table.iter_mut().enumerate() {
            *entry = self.convert_channel(i as u8, target);
        }
        table
    }
}

fn srgb_to_linear(v: f32) -> f32 {
    if v <= 0.04045 {
        v / 12.92
    } else {
        ((v + 0.055) / 1.055).powf(2.4)
    }
}

fn linear_to_srgb(v: f32) -> f32 {
    if v <= 0.003_130_8 {
        v * 12.92
    } else {
        1.055 * v.powf(1.0 / 2.4) - 0.055
    }
}

/// Describes pixel layout, dimensions and color space of a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameFormat {
    pub pixel_format: PixelFormat,
    pub width: u32,
    pub height: u32,
    pub color_space: ColorSpace,
}

impl FrameFormat {
    pub fn new(pixel_format: PixelFormat, width: u32, height: u32) -> Self {
        Self {
            pixel_format,
            width,
            height,
            color_space: ColorSpace::default(),
        }
    }

    pub fn with_color_space(mut self, color_space: ColorSpace) -> Self {
        self.color_space = color_space;
        self
    }

    /// Bytes per row (no padding)
    pub fn stride(&self) -> usize {
        self.width as usize * self.pixel_format.bytes_per_pixel()
    }

    /// Size in bytes of one frame, `None` on overflow
    pub fn frame_size(&self) -> Option<usize> {
        self.stride().checked_mul(self.height as usize)
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

impl std::fmt::Display for FrameFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}x{} {} ({:?})",
            self.width, self.height, self.pixel_format, self.color_space
        )
    }
}

/// A single frame travelling through the pipeline
#[derive(Debug, Clone)]
pub struct CameraFrame {
    /// Monotonic id assigned by the capture source
    pub id: u64,
    pub format: FrameFormat,
    pub data: FrameData,
    pub captured_at: Instant,
}

impl CameraFrame {
    pub fn new(id: u64, format: FrameFormat, data: impl Into<FrameData>) -> Self {
        Self {
            id,
            format,
            data: data.into(),
            captured_at: Instant::now(),
        }
    }

    pub fn width(&self) -> u32 {
        self.format.width
    }

    pub fn height(&self) -> u32 {
        self.format.height
    }

    /// Whether two frames share the same pixel storage
    pub fn shares_data_with(&self, other: &CameraFrame) -> bool {
        std::ptr::eq(self.data.as_ptr(), other.data.as_ptr())
    }
}

/// Camera authorization state reported by a capture source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AuthorizationStatus {
    /// Access previously granted
    Authorized,
    /// The user has not been asked yet
    #[default]
    NotDetermined,
    /// The user denied access
    Denied,
    /// Access cannot be granted (policy)
    Restricted,
}

impl std::fmt::Display for AuthorizationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthorizationStatus::Authorized => write!(f, "authorized"),
            AuthorizationStatus::NotDetermined => write!(f, "not determined"),
            AuthorizationStatus::Denied => write!(f, "denied"),
            AuthorizationStatus::Restricted => write!(f, "restricted"),
        }
    }
}
