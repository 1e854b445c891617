// SPDX-License-Identifier: GPL-3.0-only

//! Frame render surface
//!
//! The frame worker stages filtered frames into a [`FrameSlot`]; the surface
//! draws whatever was staged last on its own schedule. Staging never waits
//! for drawing and frames staged between two draws are coalesced.

use super::geometry::{GeometryInputs, Point, RenderGeometry, Rotation, ViewBounds};
use crate::backends::camera::types::CameraFrame;
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

#[derive(Default)]
struct SlotState {
    frame: Option<CameraFrame>,
    /// A frame was staged and the surface has not picked it up yet
    fresh: bool,
    staged: u64,
    coalesced: u64,
}

/// Counters of a [`FrameSlot`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SlotStats {
    /// Frames staged in total
    pub staged: u64,
    /// Frames replaced before the surface picked them up
    pub coalesced: u64,
}

/// Latest-frame-wins staging slot shared between the frame worker and the surface
#[derive(Clone, Default)]
pub struct FrameSlot {
    inner: Arc<Mutex<SlotState>>,
}

impl FrameSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the staged frame
    pub fn stage(&self, frame: CameraFrame) {
        let mut state = match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if state.fresh {
            state.coalesced += 1;
        }
        state.frame = Some(frame);
        state.fresh = true;
        state.staged += 1;
    }

    /// The most recently staged frame, if any
    ///
    /// The frame stays staged so the surface can redraw it.
    pub fn latest(&self) -> Option<CameraFrame> {
        let mut state = match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        state.fresh = false;
        state.frame.clone()
    }

    pub fn stats(&self) -> SlotStats {
        self.inner
            .lock()
            .map(|state| SlotStats {
                staged: state.staged,
                coalesced: state.coalesced,
            })
            .unwrap_or_default()
    }
}

impl std::fmt::Debug for FrameSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameSlot")
            .field("stats", &self.stats())
            .finish()
    }
}

/// Drawing backend of a [`FrameRenderSurface`]
pub trait SurfaceBackend {
    /// A texture wrapping one staged frame
    type Texture;

    /// Resize the drawable to the given size in device pixels
    fn resize_drawable(&mut self, width: u32, height: u32);

    /// Acquire the next drawable; `false` when none is available
    fn next_drawable(&mut self) -> bool;

    /// Look up or create a texture for the frame through the texture cache
    fn texture_for_frame(&mut self, frame: &CameraFrame) -> Option<Self::Texture>;

    /// Texture size in pixels
    fn texture_size(&self, texture: &Self::Texture) -> (u32, u32);

    /// Drop every cached texture
    fn flush_texture_cache(&mut self);

    /// Upload new vertex and texture coordinate buffers
    fn upload_geometry(&mut self, geometry: &RenderGeometry);

    /// Draw the quad as a 4 vertex triangle strip, then present and commit
    fn draw_quad(&mut self, texture: &Self::Texture) -> Result<(), String>;
}

/// Why a draw did not happen
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    NoFrame,
    NoDrawable,
    TextureUnavailable,
    DrawFailed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrawOutcome {
    Drawn { frame_id: u64 },
    Skipped(SkipReason),
}

/// Counters of a [`FrameRenderSurface`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrawStats {
    pub drawn: u64,
    pub skipped: u64,
    pub geometry_updates: u64,
}

/// Presents the most recently staged frame with aspect fit, mirroring and rotation
pub struct FrameRenderSurface<B: SurfaceBackend> {
    backend: B,
    slot: FrameSlot,
    bounds: ViewBounds,
    scale_factor: f64,
    mirroring: bool,
    rotation: Rotation,
    geometry: Option<RenderGeometry>,
    stats: DrawStats,
}

impl<B: SurfaceBackend> FrameRenderSurface<B> {
    /// Create a surface drawing `bounds` (in points) at `scale_factor` pixels per point
    pub fn new(backend: B, slot: FrameSlot, bounds: ViewBounds, scale_factor: f64) -> Self {
        let mut surface = Self {
            backend,
            slot,
            bounds,
            scale_factor,
            mirroring: false,
            rotation: Rotation::Rotate0,
            geometry: None,
            stats: DrawStats::default(),
        };
        surface.resize_backend();
        surface
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn slot(&self) -> &FrameSlot {
        &self.slot
    }

    pub fn bounds(&self) -> ViewBounds {
        self.bounds
    }

    pub fn mirroring(&self) -> bool {
        self.mirroring
    }

    pub fn rotation(&self) -> Rotation {
        self.rotation
    }

    pub fn geometry(&self) -> Option<&RenderGeometry> {
        self.geometry.as_ref()
    }

    pub fn stats(&self) -> DrawStats {
        self.stats
    }

    pub fn set_mirroring(&mut self, mirroring: bool) {
        self.mirroring = mirroring;
    }

    pub fn set_rotation(&mut self, rotation: Rotation) {
        self.rotation = rotation;
    }

    pub fn set_bounds(&mut self, bounds: ViewBounds, scale_factor: f64) {
        self.bounds = bounds;
        self.scale_factor = scale_factor;
        self.resize_backend();
    }

    fn resize_backend(&mut self) {
        let width = (self.bounds.width * self.scale_factor).round().max(0.0) as u32;
        let height = (self.bounds.height * self.scale_factor).round().max(0.0) as u32;
        self.backend.resize_drawable(width, height);
    }

    /// Draw the staged frame once
    pub fn draw(&mut self) -> DrawOutcome {
        let outcome = self.draw_inner();
        match outcome {
            DrawOutcome::Drawn { .. } => self.stats.drawn += 1,
            DrawOutcome::Skipped(_) => self.stats.skipped += 1,
        }
        outcome
    }

    fn draw_inner(&mut self) -> DrawOutcome {
        let Some(frame) = self.slot.latest() else {
            return DrawOutcome::Skipped(SkipReason::NoFrame);
        };
        if !self.backend.next_drawable() {
            return DrawOutcome::Skipped(SkipReason::NoDrawable);
        }

        let Some(texture) = self.backend.texture_for_frame(&frame) else {
            warn!(frame_id = frame.id, "Failed to create preview texture");
            self.backend.flush_texture_cache();
            return DrawOutcome::Skipped(SkipReason::TextureUnavailable);
        };

        let (texture_width, texture_height) = self.backend.texture_size(&texture);
        let inputs = GeometryInputs {
            texture_width,
            texture_height,
            bounds: self.bounds,
            mirroring: self.mirroring,
            rotation: self.rotation,
        };
        if self.geometry.as_ref().map(|g| g.inputs) != Some(inputs) {
            debug!(
                texture_width,
                texture_height,
                mirroring = self.mirroring,
                rotation = %self.rotation,
                "Recomputing preview geometry"
            );
            let geometry = RenderGeometry::compute(inputs);
            self.backend.upload_geometry(&geometry);
            self.geometry = Some(geometry);
            self.stats.geometry_updates += 1;
        }

        match self.backend.draw_quad(&texture) {
            Ok(()) => DrawOutcome::Drawn { frame_id: frame.id },
            Err(e) => {
                warn!(frame_id = frame.id, error = %e, "Preview draw failed");
                self.backend.flush_texture_cache();
                DrawOutcome::Skipped(SkipReason::DrawFailed)
            }
        }
    }

    /// Map a view point (in points) to source pixel coordinates
    ///
    /// `None` until the first frame has been drawn.
    pub fn view_to_texture(&self, point: Point) -> Option<Point> {
        self.geometry
            .as_ref()
            .map(|geometry| geometry.view_to_texture(point))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::camera::types::{FrameFormat, PixelFormat};

    fn frame(id: u64, width: u32, height: u32) -> CameraFrame {
        let format = FrameFormat::new(PixelFormat::Bgra8, width, height);
        CameraFrame::new(id, format, vec![0u8; (width * height * 4) as usize])
    }

    #[derive(Default)]
    struct RecordingBackend {
        drawable_available: bool,
        fail_textures: bool,
        uploads: usize,
        flushes: usize,
        draws: Vec<(u32, u32)>,
    }

    impl SurfaceBackend for RecordingBackend {
        type Texture = (u32, u32);

        fn resize_drawable(&mut self, _width: u32, _height: u32) {}

        fn next_drawable(&mut self) -> bool {
            self.drawable_available
        }

        fn texture_for_frame(&mut self, frame: &CameraFrame) -> Option<Self::Texture> {
            (!self.fail_textures).then(|| (frame.width(), frame.height()))
        }

        fn texture_size(&self, texture: &Self::Texture) -> (u32, u32) {
            *texture
        }

        fn flush_texture_cache(&mut self) {
            self.flushes += 1;
        }

        fn upload_geometry(&mut self, _geometry: &RenderGeometry) {
            self.uploads += 1;
        }

        fn draw_quad(&mut self, texture: &Self::Texture) -> Result<(), String> {
            self.draws.push(*texture);
            Ok(())
        }
    }

    fn surface() -> FrameRenderSurface<RecordingBackend> {
        let backend = RecordingBackend {
            drawable_available: true,
            ..Default::default()
        };
        FrameRenderSurface::new(backend, FrameSlot::new(), ViewBounds::new(320.0, 240.0), 2.0)
    }

    #[test]
    fn test_slot_latest_wins_and_counts_coalesced() {
        let slot = FrameSlot::new();
        slot.stage(frame(1, 4, 4));
        slot.stage(frame(2, 4, 4));
        slot.stage(frame(3, 4, 4));
        assert_eq!(slot.latest().map(|f| f.id), Some(3));
        slot.stage(frame(4, 4, 4));
        assert_eq!(
            slot.stats(),
            SlotStats {
                staged: 4,
                coalesced: 2
            }
        );
    }

    #[test]
    fn test_draw_without_frame_skips() {
        let mut surface = surface();
        assert_eq!(surface.draw(), DrawOutcome::Skipped(SkipReason::NoFrame));
        assert!(surface.backend().draws.is_empty());
    }

    #[test]
    fn test_draw_without_drawable_skips() {
        let mut surface = surface();
        surface.backend_mut().drawable_available = false;
        surface.slot().stage(frame(1, 8, 8));
        assert_eq!(surface.draw(), DrawOutcome::Skipped(SkipReason::NoDrawable));
    }

    #[test]
    fn test_texture_failure_flushes_cache() {
        let mut surface = surface();
        surface.backend_mut().fail_textures = true;
        surface.slot().stage(frame(1, 8, 8));
        assert_eq!(
            surface.draw(),
            DrawOutcome::Skipped(SkipReason::TextureUnavailable)
        );
        assert_eq!(surface.backend().flushes, 1);
    }

    #[test]
    fn test_geometry_recomputed_only_on_change() {
        let mut surface = surface();
        surface.slot().stage(frame(1, 8, 4));
        assert_eq!(surface.draw(), DrawOutcome::Drawn { frame_id: 1 });
        surface.slot().stage(frame(2, 8, 4));
        assert_eq!(surface.draw(), DrawOutcome::Drawn { frame_id: 2 });
        assert_eq!(surface.backend().uploads, 1);

        surface.set_mirroring(true);
        surface.draw();
        assert_eq!(surface.backend().uploads, 2);

        surface.slot().stage(frame(3, 16, 4));
        surface.draw();
        assert_eq!(surface.backend().uploads, 3);
        assert_eq!(surface.stats().geometry_updates, 3);
        assert_eq!(surface.backend().draws.len(), 4);
    }

    #[test]
    fn test_view_to_texture_after_draw() {
        let mut surface = surface();
        assert!(surface.view_to_texture(Point::new(0.0, 0.0)).is_none());
        surface.slot().stage(frame(1, 640, 480));
        surface.draw();
        let center = surface
            .view_to_texture(Point::new(160.0, 120.0))
            .unwrap();
        assert!((center.x - 320.0).abs() < 1e-6);
        assert!((center.y - 240.0).abs() < 1e-6);
    }
}
