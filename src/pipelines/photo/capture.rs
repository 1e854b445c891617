// SPDX-License-Identifier: GPL-3.0-only

//! Still capture worker
//!
//! Every capture request becomes a [`PendingCapture`] driven by the source's
//! lifecycle events:
//!
//! ```text
//! Requested ─WillBegin─▶ Began ─WillCapture─▶ Exposing ─PhotoDelivered─▶ Processing
//!                                                                          │
//!                              Completed ◀─SaveFinished─ Saving ◀─Finished─┘
//!                                  ▲                                       │
//!                                  └────── Finished (error / no data) ─────┘
//! ```
//!
//! The worker handles commands and events one at a time. An entry is removed
//! as soon as its capture completes, whatever the outcome. The filter baked
//! into a photo is the one active when its data is delivered, not the one
//! active when the shutter was pressed.

use super::encoding::{FilteredPhoto, PhotoFilter};
use crate::backends::camera::{CaptureEvent, CaptureId, CaptureSource, PhotoRequest};
use crate::constants::{JPEG_CONTENT_TYPE, PROCESSING_INDICATOR_THRESHOLD, SHUTTER_ANIMATION_DURATION};
use crate::storage::PhotoSaver;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, mpsc, watch};
use tracing::{debug, info, warn};

/// Where a pending capture is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapturePhase {
    Requested,
    Began,
    Exposing,
    Processing,
    Saving,
}

/// How a capture ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureOutcome {
    Saved { filtered: bool },
    SaveFailed(String),
    /// The source reported an error or delivered no photo; nothing was saved
    NoPhoto(String),
}

/// Observer-facing capture notifications
#[derive(Debug, Clone, PartialEq)]
pub enum CaptureNotification {
    /// Play the shutter fade
    ShutterAnimation { id: CaptureId, duration: Duration },
    /// Show or hide the processing indicator
    ProcessingIndicator { id: CaptureId, visible: bool },
    Completed { id: CaptureId, outcome: CaptureOutcome },
}

/// Builds the filter for a photo from the currently active filter
pub type FilterResolver = Arc<dyn Fn() -> PhotoFilter + Send + Sync>;

/// In-flight state of one capture request
#[derive(Debug)]
pub struct PendingCapture {
    pub id: CaptureId,
    pub phase: CapturePhase,
    pub processing_estimate: Option<Duration>,
    pub requested_at: Instant,
    indicator_visible: bool,
    photo: Option<FilteredPhoto>,
    source_error: Option<String>,
}

impl PendingCapture {
    fn new(id: CaptureId) -> Self {
        Self {
            id,
            phase: CapturePhase::Requested,
            processing_estimate: None,
            requested_at: Instant::now(),
            indicator_visible: false,
            photo: None,
            source_error: None,
        }
    }
}

/// Messages for the capture worker
#[derive(Debug)]
pub enum CaptureCommand {
    Capture { id: CaptureId },
    /// A save task completed
    SaveFinished {
        id: CaptureId,
        result: Result<(), String>,
        filtered: bool,
    },
    /// Exit once no capture is pending
    Shutdown,
}

/// Handle used to request captures and follow the pending count
///
/// The count is raised when a capture is requested, before the worker sees
/// it, so waiting for zero never misses a capture that is still queued.
#[derive(Clone)]
pub struct CaptureHandle {
    commands: mpsc::UnboundedSender<CaptureCommand>,
    pending: Arc<watch::Sender<usize>>,
}

impl CaptureHandle {
    /// Queue a capture; `false` if the worker is gone
    pub fn request(&self, id: CaptureId) -> bool {
        self.pending.send_modify(|n| *n += 1);
        if self.commands.send(CaptureCommand::Capture { id }).is_err() {
            self.pending.send_modify(|n| *n = n.saturating_sub(1));
            return false;
        }
        true
    }

    /// Ask the worker to exit once nothing is pending
    pub fn shutdown(&self) -> bool {
        self.commands.send(CaptureCommand::Shutdown).is_ok()
    }

    /// Captures requested and not yet completed
    pub fn pending(&self) -> usize {
        *self.pending.borrow()
    }

    /// Resolve once no capture is pending
    pub async fn wait_idle(&self) {
        let mut pending = self.pending.subscribe();
        let _ = pending.wait_for(|n| *n == 0).await;
    }
}

/// Serial owner of all pending captures
pub struct CaptureWorker {
    source: Arc<dyn CaptureSource>,
    saver: Arc<dyn PhotoSaver>,
    resolve_filter: FilterResolver,
    pending: HashMap<CaptureId, PendingCapture>,
    pending_count: Arc<watch::Sender<usize>>,
    notifications: broadcast::Sender<CaptureNotification>,
    commands_tx: mpsc::UnboundedSender<CaptureCommand>,
    events_tx: mpsc::UnboundedSender<CaptureEvent>,
    shutting_down: bool,
}

impl CaptureWorker {
    /// Build a worker plus the handle that drives it and the inbox it runs on
    pub fn new(
        source: Arc<dyn CaptureSource>,
        saver: Arc<dyn PhotoSaver>,
        resolve_filter: FilterResolver,
        notifications: broadcast::Sender<CaptureNotification>,
    ) -> (Self, CaptureHandle, CaptureWorkerInbox) {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (pending_count, _) = watch::channel(0);
        let pending_count = Arc::new(pending_count);
        let worker = Self {
            source,
            saver,
            resolve_filter,
            pending: HashMap::new(),
            pending_count: Arc::clone(&pending_count),
            notifications,
            commands_tx: commands_tx.clone(),
            events_tx,
            shutting_down: false,
        };
        let handle = CaptureHandle {
            commands: commands_tx,
            pending: pending_count,
        };
        let inbox = CaptureWorkerInbox {
            commands: commands_rx,
            events: events_rx,
        };
        (worker, handle, inbox)
    }

    pub fn pending(&self) -> &HashMap<CaptureId, PendingCapture> {
        &self.pending
    }

    /// Process commands and source events until shut down with nothing pending
    pub async fn run(mut self, inbox: CaptureWorkerInbox) {
        let CaptureWorkerInbox {
            mut commands,
            mut events,
        } = inbox;
        debug!("Capture worker started");

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command),
                    // Unreachable while the worker holds its own sender
                    None => break,
                },
                Some(event) = events.recv() => self.handle_event(event).await,
            }
            if self.shutting_down && self.pending.is_empty() {
                break;
            }
        }

        debug!("Capture worker exiting");
    }

    pub fn handle_command(&mut self, command: CaptureCommand) {
        match command {
            CaptureCommand::Capture { id } => {
                if self.shutting_down {
                    warn!(capture_id = id, "Capture requested during shutdown, ignoring");
                    self.release_count();
                    return;
                }
                info!(capture_id = id, "Capturing photo");
                self.pending.insert(id, PendingCapture::new(id));
                self.source
                    .capture_photo(PhotoRequest { id }, self.events_tx.clone());
            }
            CaptureCommand::SaveFinished {
                id,
                result,
                filtered,
            } => {
                let outcome = match result {
                    Ok(()) => CaptureOutcome::Saved { filtered },
                    Err(e) => {
                        warn!(capture_id = id, error = %e, "Failed to save photo");
                        CaptureOutcome::SaveFailed(e)
                    }
                };
                self.complete(id, outcome);
            }
            CaptureCommand::Shutdown => {
                debug!(pending = self.pending.len(), "Capture worker shutting down");
                self.shutting_down = true;
            }
        }
    }

    pub async fn handle_event(&mut self, event: CaptureEvent) {
        let id = event.id();
        let Some(capture) = self.pending.get_mut(&id) else {
            warn!(capture_id = id, ?event, "Event for unknown capture");
            return;
        };

        match event {
            CaptureEvent::WillBegin {
                processing_estimate,
                ..
            } => {
                capture.phase = CapturePhase::Began;
                capture.processing_estimate = Some(processing_estimate);
            }
            CaptureEvent::WillCapture { .. } => {
                capture.phase = CapturePhase::Exposing;
                let _ = self.notifications.send(CaptureNotification::ShutterAnimation {
                    id,
                    duration: SHUTTER_ANIMATION_DURATION,
                });
                if capture
                    .processing_estimate
                    .is_some_and(|estimate| estimate > PROCESSING_INDICATOR_THRESHOLD)
                {
                    capture.indicator_visible = true;
                    let _ = self
                        .notifications
                        .send(CaptureNotification::ProcessingIndicator { id, visible: true });
                }
            }
            CaptureEvent::PhotoDelivered { result, .. } => {
                capture.phase = CapturePhase::Processing;
                if capture.indicator_visible {
                    capture.indicator_visible = false;
                    let _ = self
                        .notifications
                        .send(CaptureNotification::ProcessingIndicator { id, visible: false });
                }
                match result {
                    Ok(data) => {
                        let filter = (self.resolve_filter)();
                        debug!(
                            capture_id = id,
                            filter = filter.kernel_name().unwrap_or("none"),
                            "Applying filter to photo"
                        );
                        let photo = filter.apply_async(data).await;
                        if let Some(capture) = self.pending.get_mut(&id) {
                            capture.photo = Some(photo);
                        }
                    }
                    Err(e) => {
                        warn!(capture_id = id, error = %e, "Error capturing photo");
                        capture.source_error = Some(e);
                    }
                }
            }
            CaptureEvent::Finished { error, .. } => {
                let photo = capture.photo.take();
                let reason = error.or_else(|| capture.source_error.take());
                match (reason, photo) {
                    (Some(e), _) => {
                        warn!(capture_id = id, error = %e, "Capture finished with error");
                        self.complete(id, CaptureOutcome::NoPhoto(e));
                    }
                    (None, None) => {
                        warn!(capture_id = id, "No photo data resource");
                        self.complete(id, CaptureOutcome::NoPhoto("No photo data".to_string()));
                    }
                    (None, Some(photo)) => {
                        capture.phase = CapturePhase::Saving;
                        self.spawn_save(id, photo);
                    }
                }
            }
        }
    }

    fn spawn_save(&self, id: CaptureId, photo: FilteredPhoto) {
        let save = self.saver.save(JPEG_CONTENT_TYPE, photo.data);
        let commands_tx = self.commands_tx.clone();
        let filtered = photo.filtered;
        tokio::spawn(async move {
            let result = save.await;
            let _ = commands_tx.send(CaptureCommand::SaveFinished {
                id,
                result,
                filtered,
            });
        });
    }

    fn complete(&mut self, id: CaptureId, outcome: CaptureOutcome) {
        let Some(capture) = self.pending.remove(&id) else {
            return;
        };
        info!(
            capture_id = id,
            ?outcome,
            elapsed_ms = capture.requested_at.elapsed().as_millis(),
            "Capture completed"
        );
        let _ = self
            .notifications
            .send(CaptureNotification::Completed { id, outcome });
        self.release_count();
    }

    fn release_count(&self) {
        self.pending_count.send_modify(|n| *n = n.saturating_sub(1));
    }
}

/// Receiving ends of the worker's channels
pub struct CaptureWorkerInbox {
    commands: mpsc::UnboundedReceiver<CaptureCommand>,
    events: mpsc::UnboundedReceiver<CaptureEvent>,
}
