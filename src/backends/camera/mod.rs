// SPDX-License-Identifier: GPL-3.0-only

//! Capture source abstraction
//!
//! ```text
//! ┌─────────────────────┐   frames (bounded)    ┌──────────────┐
//! │    CaptureSource    │ ────────────────────▶ │ frame worker │
//! │ (camera / pattern)  │                       └──────────────┘
//! │                     │   photo events        ┌──────────────┐
//! │                     │ ────────────────────▶ │capture worker│
//! └─────────────────────┘                       └──────────────┘
//! ```

pub mod frame_loop;
pub mod test_pattern;
pub mod types;

pub use frame_loop::{FrameLoopController, LoopAction};
pub use test_pattern::{TestPatternConfig, TestPatternSource};
pub use types::*;

use futures::future::BoxFuture;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{SyncSender, TrySendError};
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tracing::trace;

/// Identifier of one still capture request
pub type CaptureId = u64;

/// Still photo request handed to the source
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhotoRequest {
    pub id: CaptureId,
}

/// Lifecycle events a source emits for each photo request, in this order
#[derive(Debug, Clone, PartialEq)]
pub enum CaptureEvent {
    /// Settings are resolved; carries the expected processing time
    WillBegin {
        id: CaptureId,
        processing_estimate: Duration,
    },
    /// The exposure is about to happen
    WillCapture { id: CaptureId },
    /// Encoded photo data, or why there is none
    PhotoDelivered {
        id: CaptureId,
        result: Result<Vec<u8>, String>,
    },
    /// The source is done with the request
    Finished {
        id: CaptureId,
        error: Option<String>,
    },
}

impl CaptureEvent {
    pub fn id(&self) -> CaptureId {
        match self {
            CaptureEvent::WillBegin { id, .. }
            | CaptureEvent::WillCapture { id }
            | CaptureEvent::PhotoDelivered { id, .. }
            | CaptureEvent::Finished { id, .. } => *id,
        }
    }
}

pub type CaptureEventSender = UnboundedSender<CaptureEvent>;

/// Result of handing a frame to a [`FrameSink`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryResult {
    Queued,
    /// The queue was full and the frame was dropped
    Late,
    /// The consumer is gone
    Closed,
}

/// Bounded hand-off from a source's frame thread to the frame worker
///
/// Delivery never blocks; frames arriving while the queue is full are dropped.
#[derive(Clone)]
pub struct FrameSink {
    sender: SyncSender<CameraFrame>,
    late: Arc<AtomicU64>,
}

impl FrameSink {
    pub fn new(sender: SyncSender<CameraFrame>) -> Self {
        Self {
            sender,
            late: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn deliver(&self, frame: CameraFrame) -> DeliveryResult {
        match self.sender.try_send(frame) {
            Ok(()) => DeliveryResult::Queued,
            Err(TrySendError::Full(frame)) => {
                let late = self.late.fetch_add(1, Ordering::Relaxed) + 1;
                trace!(frame_id = frame.id, late, "Frame worker busy, dropping frame");
                DeliveryResult::Late
            }
            Err(TrySendError::Disconnected(_)) => DeliveryResult::Closed,
        }
    }

    /// Frames dropped because the worker was behind
    pub fn late_frames(&self) -> u64 {
        self.late.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for FrameSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameSink")
            .field("late", &self.late_frames())
            .finish()
    }
}

/// A camera-like source of preview frames and still photos
pub trait CaptureSource: Send + Sync {
    /// Current camera authorization
    fn authorization_status(&self) -> AuthorizationStatus;

    /// Ask for camera access; resolves to the resulting status
    fn request_access(&self) -> BoxFuture<'static, AuthorizationStatus>;

    /// Start delivering preview frames into `sink`
    fn start_streaming(&self, sink: FrameSink) -> Result<(), String>;

    /// Stop delivering preview frames
    fn stop_streaming(&self);

    fn is_streaming(&self) -> bool;

    /// Take one photo, emitting every [`CaptureEvent`] for the request exactly once
    fn capture_photo(&self, request: PhotoRequest, events: CaptureEventSender);
}
