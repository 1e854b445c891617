// SPDX-License-Identifier: GPL-3.0-only

//! Named image kernels and the registry resolving identifiers to them
//!
//! Kernels operate on RGBA images. The registry maps the identifiers used by
//! the filter chain (`"CIGaussianBlur"`, `"CICrystallize"`, ...) to kernel
//! objects. The empty identifier, and any identifier the registry does not
//! know, resolve to no kernel at all, which the filter stage treats as an
//! identity pass-through.

use crate::config::KernelSettings;
use crate::constants::kernels as names;
use image::{Rgba, RgbaImage};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// A named image-processing operation
pub trait Kernel: Send + Sync {
    /// Identifier this kernel is registered under
    fn name(&self) -> &str;

    /// Produce the kernel output for `input`, or `None` if no output image
    /// can be produced
    fn apply(&self, input: &RgbaImage) -> Option<RgbaImage>;
}

impl std::fmt::Debug for dyn Kernel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Kernel({})", self.name())
    }
}

/// Resolves kernel identifiers to kernel objects
#[derive(Default, Clone)]
pub struct KernelRegistry {
    kernels: HashMap<String, Arc<dyn Kernel>>,
}

impl KernelRegistry {
    /// An empty registry: every identifier resolves to identity
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding all built-in software kernels
    pub fn with_builtin(settings: &KernelSettings) -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(GaussianBlur {
            radius: settings.blur_radius,
        }));
        registry.register(Arc::new(ComicEffect {
            levels: settings.comic_levels,
            edge_threshold: settings.comic_edge_threshold,
        }));
        registry.register(Arc::new(Crystallize {
            radius: settings.crystallize_radius,
        }));
        registry.register(Arc::new(PhotoEffectMono));
        registry.register(Arc::new(SepiaTone {
            intensity: settings.sepia_intensity,
        }));
        registry.register(Arc::new(ColorInvert));
        registry
    }

    /// Register a kernel under its own name, replacing any previous entry
    pub fn register(&mut self, kernel: Arc<dyn Kernel>) {
        self.kernels.insert(kernel.name().to_string(), kernel);
    }

    /// Look up a kernel; `None` means identity
    pub fn resolve(&self, identifier: &str) -> Option<Arc<dyn Kernel>> {
        if identifier == names::IDENTITY {
            return None;
        }
        let kernel = self.kernels.get(identifier).cloned();
        if kernel.is_none() {
            debug!(identifier, "Unknown kernel identifier, using identity");
        }
        kernel
    }

    /// Registered identifiers in sorted order
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.kernels.keys().cloned().collect();
        names.sort();
        names
    }
}

/// Rec. 709 luma of an RGBA pixel in 0..=255
fn luma(pixel: &Rgba<u8>) -> f32 {
    0.2126 * pixel[0] as f32 + 0.7152 * pixel[1] as f32 + 0.0722 * pixel[2] as f32
}

fn has_pixels(image: &RgbaImage) -> bool {
    image.width() > 0 && image.height() > 0
}

/// Gaussian blur, edges clamped so the output keeps the input extent
pub struct GaussianBlur {
    pub radius: f32,
}

impl Kernel for GaussianBlur {
    fn name(&self) -> &str {
        names::GAUSSIAN_BLUR
    }

    fn apply(&self, input: &RgbaImage) -> Option<RgbaImage> {
        if !has_pixels(input) {
            return None;
        }
        if self.radius <= 0.0 {
            return Some(input.clone());
        }
        Some(image::imageops::blur(input, self.radius))
    }
}

/// Posterized colors with dark outlines along strong luminance edges
pub struct ComicEffect {
    pub levels: u8,
    pub edge_threshold: f32,
}

impl Kernel for ComicEffect {
    fn name(&self) -> &str {
        names::COMIC_EFFECT
    }

    fn apply(&self, input: &RgbaImage) -> Option<RgbaImage> {
        if !has_pixels(input) {
            return None;
        }
        let (width, height) = input.dimensions();
        let levels = self.levels.max(2) as f32 - 1.0;
        let luma_at = |x: i64, y: i64| {
            let x = x.clamp(0, width as i64 - 1) as u32;
            let y = y.clamp(0, height as i64 - 1) as u32;
            luma(input.get_pixel(x, y))
        };

        let mut output = RgbaImage::new(width, height);
        for (x, y, out) in output.enumerate_pixels_mut() {
            let (xi, yi) = (x as i64, y as i64);

            // Sobel gradient on luma
            let gx = -luma_at(xi - 1, yi - 1) - 2.0 * luma_at(xi - 1, yi) - luma_at(xi - 1, yi + 1)
                + luma_at(xi + 1, yi - 1)
                + 2.0 * luma_at(xi + 1, yi)
                + luma_at(xi + 1, yi + 1);
            let gy = -luma_at(xi - 1, yi - 1) - 2.0 * luma_at(xi, yi - 1) - luma_at(xi + 1, yi - 1)
                + luma_at(xi - 1, yi + 1)
                + 2.0 * luma_at(xi, yi + 1)
                + luma_at(xi + 1, yi + 1);
            let magnitude = (gx * gx + gy * gy).sqrt();

            let src = input.get_pixel(x, y);
            if magnitude > self.edge_threshold {
                *out = Rgba([0, 0, 0, src[3]]);
                continue;
            }
            let posterize = |c: u8| ((c as f32 / 255.0 * levels).round() / levels * 255.0) as u8;
            *out = Rgba([posterize(src[0]), posterize(src[1]), posterize(src[2]), src[3]]);
        }
        Some(output)
    }
}

/// Voronoi cells of roughly `radius` pixels, each filled with the color at its seed
pub struct Crystallize {
    pub radius: f32,
}

impl Crystallize {
    /// Deterministic per-cell jitter in [0, 1)
    fn jitter(cell_x: i64, cell_y: i64, salt: u64) -> f32 {
        let mut h = (cell_x as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15)
            ^ (cell_y as u64).wrapping_mul(0xC2B2_AE3D_27D4_EB4F)
            ^ salt;
        h ^= h >> 33;
        h = h.wrapping_mul(0xFF51_AFD7_ED55_8CCD);
        h ^= h >> 33;
        (h >> 40) as f32 / (1u64 << 24) as f32
    }

    fn seed(cell_x: i64, cell_y: i64, cell: f32) -> (f32, f32) {
        (
            (cell_x as f32 + Self::jitter(cell_x, cell_y, 1)) * cell,
            (cell_y as f32 + Self::jitter(cell_x, cell_y, 2)) * cell,
        )
    }
}

impl Kernel for Crystallize {
    fn name(&self) -> &str {
        names::CRYSTALLIZE
    }

    fn apply(&self, input: &RgbaImage) -> Option<RgbaImage> {
        if !has_pixels(input) {
            return None;
        }
        let (width, height) = input.dimensions();
        let cell = self.radius.max(1.0);

        let mut output = RgbaImage::new(width, height);
        for (x, y, out) in output.enumerate_pixels_mut() {
            let px = x as f32 + 0.5;
            let py = y as f32 + 0.5;
            let cx = (px / cell).floor() as i64;
            let cy = (py / cell).floor() as i64;

            let mut best = (f32::MAX, 0.0, 0.0);
            for dy in -1..=1 {
                for dx in -1..=1 {
                    let (sx, sy) = Self::seed(cx + dx, cy + dy, cell);
                    let dist = (sx - px).powi(2) + (sy - py).powi(2);
                    if dist < best.0 {
                        best = (dist, sx, sy);
                    }
                }
            }

            let sx = (best.1 as i64).clamp(0, width as i64 - 1) as u32;
            let sy = (best.2 as i64).clamp(0, height as i64 - 1) as u32;
            *out = *input.get_pixel(sx, sy);
        }
        Some(output)
    }
}

/// Desaturate to luma
pub struct PhotoEffectMono;

impl Kernel for PhotoEffectMono {
    fn name(&self) -> &str {
        names::PHOTO_EFFECT_MONO
    }

    fn apply(&self, input: &RgbaImage) -> Option<RgbaImage> {
        if !has_pixels(input) {
            return None;
        }
        let mut output = input.clone();
        for pixel in output.pixels_mut() {
            let y = luma(pixel).round().clamp(0.0, 255.0) as u8;
            *pixel = Rgba([y, y, y, pixel[3]]);
        }
        Some(output)
    }
}

/// Warm brown tint blended by `intensity`
pub struct SepiaTone {
    pub intensity: f32,
}

impl Kernel for SepiaTone {
    fn name(&self) -> &str {
        names::SEPIA_TONE
    }

    fn apply(&self, input: &RgbaImage) -> Option<RgbaImage> {
        if !has_pixels(input) {
            return None;
        }
        let amount = self.intensity.clamp(0.0, 1.0);
        let mut output = input.clone();
        for pixel in output.pixels_mut() {
            let [r, g, b, a] = pixel.0.map(|c| c as f32);
            let sepia = [
                0.393 * r + 0.769 * g + 0.189 * b,
                0.349 * r + 0.686 * g + 0.168 * b,
                0.272 * r + 0.534 * g + 0.131 * b,
            ];
            let mix = |orig: f32, tinted: f32| {
                (orig + (tinted - orig) * amount).round().clamp(0.0, 255.0) as u8
            };
            *pixel = Rgba([
                mix(r, sepia[0]),
                mix(g, sepia[1]),
                mix(b, sepia[2]),
                a as u8,
            ]);
        }
        Some(output)
    }
}

/// Invert the color channels, alpha untouched
pub struct ColorInvert;

impl Kernel for ColorInvert {
    fn name(&self) -> &str {
        names::COLOR_INVERT
    }

    fn apply(&self, input: &RgbaImage) -> Option<RgbaImage> {
        if !has_pixels(input) {
            return None;
        }
        let mut output = input.clone();
        for pixel in output.pixels_mut() {
            *pixel = Rgba([255 - pixel[0], 255 - pixel[1], 255 - pixel[2], pixel[3]]);
        }
        Some(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gradient(width: u32, height: u32) -> RgbaImage {
        RgbaImage::from_fn(width, height, |x, y| {
            Rgba([(x * 255 / width.max(1)) as u8, (y * 255 / height.max(1)) as u8, 128, 255])
        })
    }

    #[test]
    fn test_registry_resolution() {
        let registry = KernelRegistry::with_builtin(&KernelSettings::default());
        assert!(registry.resolve(names::IDENTITY).is_none());
        assert!(registry.resolve("CINotAFilter").is_none());
        for name in [
            names::GAUSSIAN_BLUR,
            names::COMIC_EFFECT,
            names::CRYSTALLIZE,
            names::PHOTO_EFFECT_MONO,
            names::SEPIA_TONE,
            names::COLOR_INVERT,
        ] {
            let kernel = registry.resolve(name).unwrap();
            assert_eq!(kernel.name(), name);
        }
        assert_eq!(registry.names().len(), 6);
    }

    #[test]
    fn test_kernels_keep_extent() {
        let registry = KernelRegistry::with_builtin(&KernelSettings::default());
        let input = gradient(24, 16);
        for name in registry.names() {
            let output = registry.resolve(&name).unwrap().apply(&input).unwrap();
            assert_eq!(output.dimensions(), (24, 16), "{name}");
        }
    }

    #[test]
    fn test_kernels_fail_on_empty_input() {
        let registry = KernelRegistry::with_builtin(&KernelSettings::default());
        let empty = RgbaImage::new(0, 0);
        for name in registry.names() {
            assert!(registry.resolve(&name).unwrap().apply(&empty).is_none(), "{name}");
        }
    }

    #[test]
    fn test_invert_and_mono() {
        let input = RgbaImage::from_pixel(2, 2, Rgba([10, 200, 30, 77]));
        let inverted = ColorInvert.apply(&input).unwrap();
        assert_eq!(inverted.get_pixel(1, 1), &Rgba([245, 55, 225, 77]));

        let mono = PhotoEffectMono.apply(&input).unwrap();
        let p = mono.get_pixel(0, 0);
        assert_eq!(p[0], p[1]);
        assert_eq!(p[1], p[2]);
        assert_eq!(p[3], 77);
    }

    #[test]
    fn test_crystallize_is_piecewise_constant() {
        let input = gradient(64, 64);
        let output = Crystallize { radius: 16.0 }.apply(&input).unwrap();
        let mut distinct: Vec<[u8; 4]> = output.pixels().map(|p| p.0).collect();
        distinct.sort();
        distinct.dedup();
        // One color per cell, far fewer than pixels
        assert!(distinct.len() < 64);
        // Deterministic
        assert_eq!(output, Crystallize { radius: 16.0 }.apply(&input).unwrap());
    }

    #[test]
    fn test_comic_outlines_edges() {
        let input = RgbaImage::from_fn(16, 16, |x, _| {
            if x < 8 { Rgba([0, 0, 0, 255]) } else { Rgba([255, 255, 255, 255]) }
        });
        let output = ComicEffect {
            levels: 4,
            edge_threshold: 80.0,
        }
        .apply(&input)
        .unwrap();
        // The white side next to the edge is outlined, the far side stays white
        assert_eq!(output.get_pixel(8, 8), &Rgba([0, 0, 0, 255]));
        assert_eq!(output.get_pixel(15, 8), &Rgba([255, 255, 255, 255]));
    }
}
