// SPDX-License-Identifier: GPL-3.0-only

//! Still photo pipeline
//!
//! ```text
//! capture() → CaptureSource → encoded photo → PhotoFilter (decode, kernel, JPEG) → PhotoSaver
//!                 │
//!                 └─ lifecycle events drive the PendingCapture state machine
//! ```
//!
//! Preview streaming continues while photos are processed.

pub mod capture;
pub mod encoding;

pub use capture::{
    CaptureCommand, CaptureHandle, CaptureNotification, CaptureOutcome, CapturePhase,
    CaptureWorker, CaptureWorkerInbox, FilterResolver, PendingCapture,
};
pub use encoding::{FilteredPhoto, PhotoFilter};
