// SPDX-License-Identifier: GPL-3.0-only

//! Image processing context shared by all filter stages
//!
//! The context is the capability the stages use to turn frames into
//! processable images, run kernels on them, and render results back into
//! frame buffers. It is shared read-mostly; all renders are serialized through
//! the frame worker, so implementations need no internal locking.

use super::kernels::Kernel;
use crate::backends::camera::types::{CameraFrame, ColorSpace, FrameFormat};
use image::{DynamicImage, RgbaImage};
use tracing::debug;

/// An image inside the processing context together with its color space
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessingImage {
    pub pixels: RgbaImage,
    pub color_space: ColorSpace,
}

impl ProcessingImage {
    pub fn new(pixels: RgbaImage, color_space: ColorSpace) -> Self {
        Self {
            pixels,
            color_space,
        }
    }

    /// Wrap a decoded image (assumed sRGB)
    pub fn from_dynamic(image: DynamicImage) -> Self {
        Self::new(image.into_rgba8(), ColorSpace::Srgb)
    }

    /// Width and height of the image bounds
    pub fn extent(&self) -> (u32, u32) {
        self.pixels.dimensions()
    }
}

/// Capability interface over an image-processing backend
pub trait ImageProcessingContext: Send + Sync {
    /// Wrap a frame as an image, `None` if the frame data does not match its format
    fn create_image(&self, frame: &CameraFrame) -> Option<ProcessingImage>;

    /// Bind `input` to `kernel` and request the output image
    fn process_image(&self, kernel: &dyn Kernel, input: &ProcessingImage)
    -> Option<ProcessingImage>;

    /// Render `image` into `target` (laid out as `format`) within the image bounds,
    /// converting into `color_space`. Pixels outside the bounds are cleared.
    fn render(
        &self,
        image: &ProcessingImage,
        target: &mut [u8],
        format: &FrameFormat,
        color_space: ColorSpace,
    ) -> Result<(), String>;
}

/// CPU implementation of the processing context
#[derive(Debug, Default, Clone, Copy)]
pub struct SoftwareContext;

impl SoftwareContext {
    pub fn new() -> Self {
        Self
    }
}

impl ImageProcessingContext for SoftwareContext {
    fn create_image(&self, frame: &CameraFrame) -> Option<ProcessingImage> {
        let format = &frame.format;
        let expected = format.frame_size()?;
        if frame.data.len() < expected || format.is_empty() {
            debug!(
                frame_id = frame.id,
                expected,
                actual = frame.data.len(),
                "Frame data does not match its format"
            );
            return None;
        }

        let [r, g, b] = format.pixel_format.channel_offsets();
        let mut rgba = Vec::with_capacity(expected);
        for px in frame.data[..expected].chunks_exact(4) {
            rgba.extend_from_slice(&[px[r], px[g], px[b], px[3]]);
        }
        let pixels = RgbaImage::from_raw(format.width, format.height, rgba)?;
        Some(ProcessingImage::new(pixels, format.color_space))
    }

    fn process_image(
        &self,
        kernel: &dyn Kernel,
        input: &ProcessingImage,
    ) -> Option<ProcessingImage> {
        kernel
            .apply(&input.pixels)
            .map(|pixels| ProcessingImage::new(pixels, input.color_space))
    }

    fn render(
        &self,
        image: &ProcessingImage,
        target: &mut [u8],
        format: &FrameFormat,
        color_space: ColorSpace,
    ) -> Result<(), String> {
        let size = format
            .frame_size()
            .ok_or_else(|| format!("Frame size of {} overflows", format))?;
        if target.len() < size {
            return Err(format!(
                "Render target too small: {} < {} bytes",
                target.len(),
                size
            ));
        }

        let (img_w, img_h) = image.extent();
        let bounds_w = img_w.min(format.width) as usize;
        let bounds_h = img_h.min(format.height) as usize;
        let stride = format.stride();
        let [r, g, b] = format.pixel_format.channel_offsets();
        let table = image.color_space.conversion_table(color_space);

        target[..size].fill(0);
        let src = image.pixels.as_raw();
        let src_stride = img_w as usize * 4;
        for y in 0..bounds_h {
            let src_row = &src[y * src_stride..y * src_stride + bounds_w * 4];
            let dst_row = &mut target[y * stride..y * stride + bounds_w * 4];
            for (src_px, dst_px) in src_row.chunks_exact(4).zip(dst_row.chunks_exact_mut(4)) {
                dst_px[r] = table[src_px[0] as usize];
                dst_px[g] = table[src_px[1] as usize];
                dst_px[b] = table[src_px[2] as usize];
                dst_px[3] = src_px[3];
            }
        }
        Ok(())
    }
}
