// SPDX-License-Identifier: GPL-3.0-only

//! Backend abstraction layer for camera capture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │             CaptureCoordinator              │
//! └────────────────────┬────────────────────────┘
//!                      │ CaptureSource
//! ┌────────────────────┴────────────────────────┐
//! │  preview frames → FrameSink (bounded queue) │
//! │  photos → CaptureEvent stream               │
//! └─────────────────────────────────────────────┘
//! ```
//!
//! - [`camera`]: Source trait, frame types and the synthetic test pattern source

pub mod camera;
