// SPDX-License-Identifier: GPL-3.0-only

//! Filter Camera - real-time image filters between a camera and its preview
//!
//! Frames from a [`CaptureSource`](backends::camera::CaptureSource) pass
//! through the active stage of a filter chain and are drawn by a render
//! surface; still photos get the same filter baked in before they are saved.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - [`backends`]: Capture source abstraction and the test pattern source
//! - [`pipelines`]: Filter stages, the still capture pipeline and the coordinator
//! - [`render`]: Preview geometry and the render surface with its backends
//! - [`gpu`]: wgpu device creation
//! - [`config`]: User configuration handling
//! - [`storage`]: Photo storage

pub mod backends;
pub mod config;
pub mod constants;
pub mod errors;
pub mod gpu;
pub mod pipelines;
pub mod render;
pub mod storage;

// Re-export commonly used types
pub use backends::camera::{CaptureSource, TestPatternConfig, TestPatternSource};
pub use config::Config;
pub use errors::{AppError, AppResult, CaptureError, RenderError};
pub use pipelines::filter::Direction;
pub use pipelines::{CaptureCoordinator, LiveStats, PipelineState};
pub use render::{FrameRenderSurface, FrameSlot, Rotation};
pub use storage::{DirectorySaver, PhotoSaver};
