// SPDX-License-Identifier: GPL-3.0-only

//! CPU surface backend
//!
//! Rasterizes the textured quad from the same vertex and texture coordinate
//! buffers the GPU backend uploads, into an RGBA canvas. Used for headless
//! previews and for checking geometry output pixel by pixel.

use super::geometry::RenderGeometry;
use super::surface::SurfaceBackend;
use crate::backends::camera::types::CameraFrame;
use crate::pipelines::filter::{ImageProcessingContext, SoftwareContext};
use image::{Rgba, RgbaImage};
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::debug;

/// Textures kept for redrawing recently staged frames
const TEXTURE_CACHE_SIZE: usize = 3;

const CLEAR_COLOR: Rgba<u8> = Rgba([0, 0, 0, 255]);

/// Software rasterizer backend
pub struct SoftwareBackend {
    canvas: RgbaImage,
    vertices: [f32; 16],
    tex_coords: [f32; 8],
    /// (frame id, texture), most recent last
    texture_cache: VecDeque<(u64, Arc<RgbaImage>)>,
    drawable_available: bool,
    presented: u64,
}

impl SoftwareBackend {
    pub fn new() -> Self {
        Self {
            canvas: RgbaImage::new(0, 0),
            vertices: [0.0; 16],
            tex_coords: [0.0; 8],
            texture_cache: VecDeque::with_capacity(TEXTURE_CACHE_SIZE),
            drawable_available: true,
            presented: 0,
        }
    }

    /// Last presented canvas
    pub fn canvas(&self) -> &RgbaImage {
        &self.canvas
    }

    /// Number of presented draws
    pub fn presented(&self) -> u64 {
        self.presented
    }

    pub fn cached_textures(&self) -> usize {
        self.texture_cache.len()
    }

    /// Simulate the host running out of drawables
    pub fn set_drawable_available(&mut self, available: bool) {
        self.drawable_available = available;
    }

    fn vertex(&self, index: usize) -> (f32, f32) {
        (self.vertices[index * 4], self.vertices[index * 4 + 1])
    }

    fn tex_coord(&self, index: usize) -> (f32, f32) {
        (self.tex_coords[index * 2], self.tex_coords[index * 2 + 1])
    }
}

impl Default for SoftwareBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn lerp(a: (f32, f32), b: (f32, f32), t: f32) -> (f32, f32) {
    (a.0 + (b.0 - a.0) * t, a.1 + (b.1 - a.1) * t)
}

impl SurfaceBackend for SoftwareBackend {
    type Texture = Arc<RgbaImage>;

    fn resize_drawable(&mut self, width: u32, height: u32) {
        if self.canvas.dimensions() != (width, height) {
            debug!(width, height, "Resizing software drawable");
            self.canvas = RgbaImage::from_pixel(width, height, CLEAR_COLOR);
        }
    }

    fn next_drawable(&mut self) -> bool {
        self.drawable_available
    }

    fn texture_for_frame(&mut self, frame: &CameraFrame) -> Option<Self::Texture> {
        if let Some((_, texture)) = self.texture_cache.iter().find(|(id, _)| *id == frame.id) {
            return Some(Arc::clone(texture));
        }
        let texture = Arc::new(SoftwareContext.create_image(frame)?.pixels);
        if self.texture_cache.len() == TEXTURE_CACHE_SIZE {
            self.texture_cache.pop_front();
        }
        self.texture_cache.push_back((frame.id, Arc::clone(&texture)));
        Some(texture)
    }

    fn texture_size(&self, texture: &Self::Texture) -> (u32, u32) {
        texture.dimensions()
    }

    fn flush_texture_cache(&mut self) {
        self.texture_cache.clear();
    }

    fn upload_geometry(&mut self, geometry: &RenderGeometry) {
        self.vertices = geometry.vertices;
        self.tex_coords = geometry.tex_coords;
    }

    fn draw_quad(&mut self, texture: &Self::Texture) -> Result<(), String> {
        let (canvas_w, canvas_h) = self.canvas.dimensions();
        let (tex_w, tex_h) = texture.dimensions();
        if tex_w == 0 || tex_h == 0 {
            return Err("Empty texture".to_string());
        }

        for px in self.canvas.pixels_mut() {
            *px = CLEAR_COLOR;
        }

        // Strip order: bottom-left, bottom-right, top-left, top-right
        let (bl, br, tl) = (self.vertex(0), self.vertex(1), self.vertex(2));
        let span_x = br.0 - bl.0;
        let span_y = tl.1 - bl.1;
        if span_x == 0.0 || span_y == 0.0 {
            self.presented += 1;
            return Ok(());
        }
        let tc = [
            self.tex_coord(0),
            self.tex_coord(1),
            self.tex_coord(2),
            self.tex_coord(3),
        ];

        for py in 0..canvas_h {
            let ndc_y = 1.0 - (py as f32 + 0.5) / canvas_h as f32 * 2.0;
            let t = (ndc_y - bl.1) / span_y;
            if !(0.0..1.0).contains(&t) {
                continue;
            }
            for px in 0..canvas_w {
                let ndc_x = (px as f32 + 0.5) / canvas_w as f32 * 2.0 - 1.0;
                let s = (ndc_x - bl.0) / span_x;
                if !(0.0..1.0).contains(&s) {
                    continue;
                }
                let bottom = lerp(tc[0], tc[1], s);
                let top = lerp(tc[2], tc[3], s);
                let (u, v) = lerp(bottom, top, t);
                let tx = ((u * tex_w as f32) as u32).min(tex_w - 1);
                let ty = ((v * tex_h as f32) as u32).min(tex_h - 1);
                self.canvas.put_pixel(px, py, *texture.get_pixel(tx, ty));
            }
        }

        self.presented += 1;
        Ok(())
    }
}
