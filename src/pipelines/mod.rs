// SPDX-License-Identifier: GPL-3.0-only

//! Processing pipelines for live preview and still capture
//!
//! ```text
//! ┌──────────────┐     ┌───────────────────┐     ┌──────────────┐
//! │ CaptureSource│ ──▶ │  Frame worker     │ ──▶ │  FrameSlot   │ ──▶ render surface
//! │  (preview)   │     │  - active stage   │     │ (latest wins)│
//! └──────────────┘     └───────────────────┘     └──────────────┘
//!
//! ┌──────────────┐     ┌───────────────────┐     ┌──────────────┐
//! │ CaptureSource│ ──▶ │  Capture worker   │ ──▶ │  PhotoSaver  │
//! │   (photo)    │     │  - PhotoFilter    │     │              │
//! └──────────────┘     └───────────────────┘     └──────────────┘
//! ```
//!
//! The preview never waits on a photo, and a photo never waits on the preview.

pub mod coordinator;
pub mod filter;
pub mod photo;

pub use coordinator::{CaptureCoordinator, FrameOutcome, LiveStats, PipelineState};
