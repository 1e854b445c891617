// SPDX-License-Identifier: GPL-3.0-only

//! Filter baking for encoded still photos
//!
//! The capture source delivers encoded photos. Baking the active filter
//! means decoding, running the kernel, applying the photo rotation and
//! re-encoding as JPEG. Any failure falls back to the original bytes.

use crate::pipelines::filter::{ImageProcessingContext, Kernel, ProcessingImage};
use crate::render::Rotation;
use image::{DynamicImage, RgbaImage, imageops};
use std::sync::Arc;
use tracing::{debug, warn};

/// Result of baking a filter into a photo
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilteredPhoto {
    pub data: Vec<u8>,
    /// `false` when `data` is the original encoded photo
    pub filtered: bool,
}

/// Filter snapshot taken when a photo is delivered
#[derive(Clone)]
pub struct PhotoFilter {
    kernel: Option<Arc<dyn Kernel>>,
    context: Arc<dyn ImageProcessingContext>,
    quality: u8,
    rotation: Rotation,
}

impl PhotoFilter {
    pub fn new(
        kernel: Option<Arc<dyn Kernel>>,
        context: Arc<dyn ImageProcessingContext>,
        quality: u8,
        rotation: Rotation,
    ) -> Self {
        Self {
            kernel,
            context,
            quality: quality.clamp(1, 100),
            rotation,
        }
    }

    pub fn kernel_name(&self) -> Option<&str> {
        self.kernel.as_ref().map(|k| k.name())
    }

    /// Whether the photo is saved exactly as delivered
    pub fn is_passthrough(&self) -> bool {
        self.kernel.is_none() && self.rotation == Rotation::Rotate0
    }

    /// Decode, filter, rotate and re-encode `encoded`
    pub fn apply(&self, encoded: &[u8]) -> Result<Vec<u8>, String> {
        let decoded =
            image::load_from_memory(encoded).map_err(|e| format!("Failed to decode photo: {}", e))?;
        let input = ProcessingImage::from_dynamic(decoded);

        let output = match &self.kernel {
            Some(kernel) => self
                .context
                .process_image(kernel.as_ref(), &input)
                .ok_or_else(|| format!("Kernel {} produced no output", kernel.name()))?,
            None => input,
        };

        let rotated = rotate(output.pixels, self.rotation);
        encode_jpeg(rotated, self.quality)
    }

    /// Bake the filter, or keep the original bytes if anything fails
    pub fn apply_or_original(&self, encoded: Vec<u8>) -> FilteredPhoto {
        if self.is_passthrough() {
            return FilteredPhoto {
                data: encoded,
                filtered: false,
            };
        }
        match self.apply(&encoded) {
            Ok(data) => {
                debug!(
                    kernel = self.kernel_name().unwrap_or("none"),
                    original = encoded.len(),
                    filtered = data.len(),
                    "Filter applied to photo"
                );
                FilteredPhoto {
                    data,
                    filtered: true,
                }
            }
            Err(e) => {
                warn!(error = %e, "Photo filtering failed, keeping original");
                FilteredPhoto {
                    data: encoded,
                    filtered: false,
                }
            }
        }
    }

    /// [`apply_or_original`](Self::apply_or_original) on the blocking pool
    pub async fn apply_async(&self, encoded: Vec<u8>) -> FilteredPhoto {
        if self.is_passthrough() {
            return FilteredPhoto {
                data: encoded,
                filtered: false,
            };
        }
        let original = Arc::new(encoded);
        let input = Arc::clone(&original);
        let filter = self.clone();
        let result = tokio::task::spawn_blocking(move || filter.apply(&input)).await;
        match result {
            Ok(Ok(data)) => FilteredPhoto {
                data,
                filtered: true,
            },
            Ok(Err(e)) => {
                warn!(error = %e, "Photo filtering failed, keeping original");
                FilteredPhoto {
                    data: Arc::try_unwrap(original).unwrap_or_else(|arc| (*arc).clone()),
                    filtered: false,
                }
            }
            Err(e) => {
                warn!(error = %e, "Photo filter task failed, keeping original");
                FilteredPhoto {
                    data: Arc::try_unwrap(original).unwrap_or_else(|arc| (*arc).clone()),
                    filtered: false,
                }
            }
        }
    }
}

impl std::fmt::Debug for PhotoFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PhotoFilter")
            .field("kernel", &self.kernel_name())
            .field("quality", &self.quality)
            .field("rotation", &self.rotation)
            .finish()
    }
}

fn rotate(pixels: RgbaImage, rotation: Rotation) -> RgbaImage {
    match rotation {
        Rotation::Rotate0 => pixels,
        Rotation::Rotate90 => imageops::rotate90(&pixels),
        Rotation::Rotate180 => imageops::rotate180(&pixels),
        Rotation::Rotate270 => imageops::rotate270(&pixels),
    }
}

/// Encode image as JPEG, dropping alpha
fn encode_jpeg(pixels: RgbaImage, quality: u8) -> Result<Vec<u8>, String> {
    let image = DynamicImage::ImageRgba8(pixels).into_rgb8();
    let mut buffer = Vec::new();
    let mut cursor = std::io::Cursor::new(&mut buffer);

    let mut encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut cursor, quality);
    encoder
        .encode(
            image.as_raw(),
            image.width(),
            image.height(),
            image::ExtendedColorType::Rgb8,
        )
        .map_err(|e| format!("JPEG encoding failed: {}", e))?;

    Ok(buffer)
}
