// SPDX-License-Identifier: GPL-3.0-only

//! Preview render surface
//!
//! - [`geometry`]: aspect fit, mirroring, rotation and the view-to-texture transform
//! - [`surface`]: staging slot and the draw loop over a [`SurfaceBackend`]
//! - [`software`]: CPU rasterizer backend
//! - [`wgpu_backend`]: offscreen wgpu backend with readback

pub mod geometry;
pub mod software;
pub mod surface;
pub mod wgpu_backend;

pub use geometry::{AffineTransform, GeometryInputs, Point, RenderGeometry, Rotation, ViewBounds};
pub use software::SoftwareBackend;
pub use surface::{
    DrawOutcome, DrawStats, FrameRenderSurface, FrameSlot, SkipReason, SlotStats, SurfaceBackend,
};
pub use wgpu_backend::{PreviewTexture, WgpuBackend};
