// SPDX-License-Identifier: GPL-3.0-only

//! Capture-and-filter coordinator
//!
//! Owns the two workers of the pipeline:
//!
//! - the **frame worker**, a thread fed by a bounded queue, which filters each
//!   preview frame through the active stage and stages the result on the
//!   render surface slot
//! - the **capture worker**, an async task that drives still captures from
//!   request to save
//!
//! Filter selection and capture requests can come from any thread.

use super::filter::{
    BufferPoolAllocator, Direction, FilterChain, ImageProcessingContext, KernelRegistry,
    SoftwareContext,
};
use super::photo::{CaptureHandle, CaptureNotification, CaptureWorker, FilterResolver, PhotoFilter};
use crate::backends::camera::{
    AuthorizationStatus, CameraFrame, CaptureId, CaptureSource, FrameFormat, FrameLoopController,
    FrameSink, LoopAction,
};
use crate::config::Config;
use crate::constants::NOTIFICATION_CHANNEL_CAPACITY;
use crate::errors::CaptureError;
use crate::render::FrameSlot;
use crate::storage::PhotoSaver;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Lifecycle state of the pipeline
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    Running,
    /// Camera access was refused; the pipeline never started
    Unauthorized(AuthorizationStatus),
    /// Setup failed
    Failed(String),
    Stopped,
}

/// Live path counters, updated by the frame worker
#[derive(Debug, Default)]
pub struct LiveCounters {
    received: AtomicU64,
    filtered: AtomicU64,
    passed_through: AtomicU64,
    dropped: AtomicU64,
}

/// Snapshot of the live path counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LiveStats {
    /// Frames the worker took off the queue
    pub received: u64,
    /// Frames staged with a kernel applied
    pub filtered: u64,
    /// Frames staged unmodified (identity stage, unprepared stage or a format
    /// the stage is not prepared for)
    pub passed_through: u64,
    /// Frames the active stage could not render
    pub dropped: u64,
    /// Frames dropped before the worker because it was behind
    pub late: u64,
}

impl LiveCounters {
    pub fn snapshot(&self, late: u64) -> LiveStats {
        LiveStats {
            received: self.received.load(Ordering::Relaxed),
            filtered: self.filtered.load(Ordering::Relaxed),
            passed_through: self.passed_through.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            late,
        }
    }
}

/// What happened to one live frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    Filtered,
    PassedThrough,
    Dropped,
}

/// Per-worker memory of stages whose preparation failed, so a failing
/// allocation is not retried on every frame of the same format
#[derive(Debug, Default)]
pub struct FrameWorkerState {
    failed_preparations: HashSet<(usize, FrameFormat)>,
}

fn lock_chain(chain: &Mutex<FilterChain>) -> MutexGuard<'_, FilterChain> {
    match chain.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Filter one live frame through the active stage and stage the result
///
/// The chain stays locked for the duration of one render.
pub fn process_live_frame(
    chain: &Mutex<FilterChain>,
    frame: CameraFrame,
    retained_buffer_hint: usize,
    slot: &FrameSlot,
    counters: &LiveCounters,
    state: &mut FrameWorkerState,
) -> FrameOutcome {
    counters.received.fetch_add(1, Ordering::Relaxed);
    let mut chain = lock_chain(chain);
    let index = chain.index();

    let Some(stage) = chain.current_mut() else {
        counters.passed_through.fetch_add(1, Ordering::Relaxed);
        slot.stage(frame);
        return FrameOutcome::PassedThrough;
    };

    let needs_preparation = stage.kernel().is_some()
        && stage.input_format() != Some(&frame.format)
        && !state.failed_preparations.contains(&(index, frame.format));
    if needs_preparation {
        stage.prepare(&frame.format, retained_buffer_hint);
        if !stage.is_prepared() {
            state.failed_preparations.insert((index, frame.format));
        }
    }

    match stage.render(&frame) {
        Some(output) => {
            let outcome = if output.shares_data_with(&frame) {
                counters.passed_through.fetch_add(1, Ordering::Relaxed);
                FrameOutcome::PassedThrough
            } else {
                counters.filtered.fetch_add(1, Ordering::Relaxed);
                FrameOutcome::Filtered
            };
            drop(chain);
            slot.stage(output);
            outcome
        }
        None => {
            counters.dropped.fetch_add(1, Ordering::Relaxed);
            debug!(
                frame_id = frame.id,
                filter = %stage.identifier(),
                "Filter stage could not render frame, dropping"
            );
            FrameOutcome::Dropped
        }
    }
}

/// Ties a capture source, the filter chain, the render slot and the photo saver together
pub struct CaptureCoordinator {
    config: Config,
    source: Arc<dyn CaptureSource>,
    saver: Arc<dyn PhotoSaver>,
    context: Arc<dyn ImageProcessingContext>,
    chain: Arc<Mutex<FilterChain>>,
    slot: FrameSlot,
    counters: Arc<LiveCounters>,
    state: PipelineState,
    sink: Option<FrameSink>,
    frame_worker: Option<FrameLoopController>,
    capture: Option<(CaptureHandle, JoinHandle<()>)>,
    notifications: broadcast::Sender<CaptureNotification>,
    next_capture_id: AtomicU64,
}

impl CaptureCoordinator {
    /// Coordinator with the built-in kernels and the software processing context
    pub fn new(
        config: Config,
        source: Arc<dyn CaptureSource>,
        saver: Arc<dyn PhotoSaver>,
        slot: FrameSlot,
    ) -> Self {
        let registry = KernelRegistry::with_builtin(&config.kernels);
        Self::with_parts(config, &registry, Arc::new(SoftwareContext), source, saver, slot)
    }

    pub fn with_parts(
        config: Config,
        registry: &KernelRegistry,
        context: Arc<dyn ImageProcessingContext>,
        source: Arc<dyn CaptureSource>,
        saver: Arc<dyn PhotoSaver>,
        slot: FrameSlot,
    ) -> Self {
        let allocator = BufferPoolAllocator::new(config.max_pool_bytes);
        let chain = FilterChain::initialize(&config.filters, registry, Arc::clone(&context), allocator);
        info!(filters = ?chain.names(), "Filter chain initialized");
        let (notifications, _) = broadcast::channel(NOTIFICATION_CHANNEL_CAPACITY);

        Self {
            config,
            source,
            saver,
            context,
            chain: Arc::new(Mutex::new(chain)),
            slot,
            counters: Arc::new(LiveCounters::default()),
            state: PipelineState::Idle,
            sink: None,
            frame_worker: None,
            capture: None,
            notifications,
            next_capture_id: AtomicU64::new(1),
        }
    }

    pub fn state(&self) -> &PipelineState {
        &self.state
    }

    pub fn slot(&self) -> &FrameSlot {
        &self.slot
    }

    /// Check authorization, then start both workers and the source stream
    ///
    /// Must be called within a tokio runtime.
    pub async fn start(&mut self) -> PipelineState {
        if self.state == PipelineState::Running {
            return self.state.clone();
        }

        let mut status = self.source.authorization_status();
        if status == AuthorizationStatus::NotDetermined {
            info!("Requesting camera access");
            status = self.source.request_access().await;
        }
        if status != AuthorizationStatus::Authorized {
            warn!(%status, "Camera access not granted, pipeline not started");
            self.state = PipelineState::Unauthorized(status);
            return self.state.clone();
        }

        if let Err(e) = self.start_workers() {
            error!(error = %e, "Failed to start capture pipeline");
            self.stop_workers();
            self.state = PipelineState::Failed(e.to_string());
            return self.state.clone();
        }

        info!("Capture pipeline running");
        self.state = PipelineState::Running;
        self.state.clone()
    }

    fn start_workers(&mut self) -> Result<(), CaptureError> {
        let (frame_tx, frame_rx) = std::sync::mpsc::sync_channel(self.config.frame_queue_depth.max(1));
        let chain = Arc::clone(&self.chain);
        let slot = self.slot.clone();
        let counters = Arc::clone(&self.counters);
        let hint = self.config.retained_buffer_hint;
        let mut worker_state = FrameWorkerState::default();

        let frame_worker = FrameLoopController::start_receiving("frame-worker", frame_rx, move |frame| {
            process_live_frame(&chain, frame, hint, &slot, &counters, &mut worker_state);
            LoopAction::Continue
        })
        .map_err(CaptureError::SourceFailed)?;
        self.frame_worker = Some(frame_worker);

        let (worker, handle, inbox) = CaptureWorker::new(
            Arc::clone(&self.source),
            Arc::clone(&self.saver),
            self.photo_filter_resolver(),
            self.notifications.clone(),
        );
        let task = tokio::spawn(worker.run(inbox));
        self.capture = Some((handle, task));

        let sink = FrameSink::new(frame_tx);
        self.source
            .start_streaming(sink.clone())
            .map_err(CaptureError::SourceFailed)?;
        self.sink = Some(sink);
        Ok(())
    }

    /// Resolver reading the active stage's kernel each time a photo arrives
    fn photo_filter_resolver(&self) -> FilterResolver {
        let chain = Arc::clone(&self.chain);
        let context = Arc::clone(&self.context);
        let quality = self.config.photo_quality;
        let rotation = self.config.photo_rotation;
        Arc::new(move || {
            let kernel = lock_chain(&chain)
                .current()
                .and_then(|stage| stage.kernel().cloned());
            PhotoFilter::new(kernel, Arc::clone(&context), quality, rotation)
        })
    }

    fn stop_workers(&mut self) {
        self.source.stop_streaming();
        self.sink = None;
        if let Some(mut worker) = self.frame_worker.take() {
            worker.stop();
        }
        if let Some((handle, task)) = self.capture.take() {
            handle.shutdown();
            task.abort();
        }
    }

    /// Move the active filter one step; returns whether it changed
    ///
    /// Waits for at most one in-progress frame render.
    pub fn select_filter(&self, direction: Direction) -> bool {
        lock_chain(&self.chain).select(direction)
    }

    pub fn active_filter_name(&self) -> Option<String> {
        lock_chain(&self.chain).current_name().map(str::to_string)
    }

    pub fn active_filter_index(&self) -> usize {
        lock_chain(&self.chain).index()
    }

    pub fn filter_names(&self) -> Vec<String> {
        lock_chain(&self.chain)
            .names()
            .into_iter()
            .map(str::to_string)
            .collect()
    }

    /// Request a still photo
    ///
    /// The filter active when the photo data arrives is baked in. `None` when
    /// the pipeline is not running.
    pub fn capture(&self) -> Option<CaptureId> {
        let (handle, _) = self.capture.as_ref()?;
        if self.state != PipelineState::Running {
            return None;
        }

        let id = self.next_capture_id.fetch_add(1, Ordering::SeqCst);
        if !handle.request(id) {
            warn!(capture_id = id, "Capture worker gone, dropping request");
            return None;
        }
        Some(id)
    }

    /// Captures requested and not yet completed
    pub fn pending_captures(&self) -> usize {
        self.capture
            .as_ref()
            .map(|(handle, _)| handle.pending())
            .unwrap_or(0)
    }

    /// Resolve once every requested capture has completed
    pub async fn wait_for_captures(&self) {
        if let Some((handle, _)) = &self.capture {
            handle.wait_idle().await;
        }
    }

    /// Receive capture notifications from now on
    pub fn subscribe(&self) -> broadcast::Receiver<CaptureNotification> {
        self.notifications.subscribe()
    }

    pub fn stats(&self) -> LiveStats {
        let late = self.sink.as_ref().map(|s| s.late_frames()).unwrap_or(0);
        self.counters.snapshot(late)
    }

    /// Stop streaming, wait for outstanding captures, then stop both workers
    pub async fn stop(&mut self) {
        if self.state != PipelineState::Running {
            return;
        }
        info!("Stopping capture pipeline");
        self.source.stop_streaming();
        if let Some(mut worker) = self.frame_worker.take() {
            worker.stop();
        }
        if let Some((handle, task)) = self.capture.take() {
            handle.wait_idle().await;
            handle.shutdown();
            if let Err(e) = task.await {
                warn!(error = %e, "Capture worker task failed");
            }
        }
        self.state = PipelineState::Stopped;
    }
}

impl Drop for CaptureCoordinator {
    fn drop(&mut self) {
        self.stop_workers();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::camera::PixelFormat;
    use crate::pipelines::filter::kernels::ColorInvert;
    use crate::pipelines::filter::{FilterStage, Kernel};
    use image::RgbaImage;

    struct FailingKernel;

    impl Kernel for FailingKernel {
        fn name(&self) -> &str {
            "Failing"
        }

        fn apply(&self, _input: &RgbaImage) -> Option<RgbaImage> {
            None
        }
    }

    fn frame(id: u64) -> CameraFrame {
        CameraFrame::new(id, FrameFormat::new(PixelFormat::Bgra8, 4, 2), vec![10u8; 32])
    }

    fn chain(kernels: Vec<Option<Arc<dyn Kernel>>>, allocator: BufferPoolAllocator) -> Mutex<FilterChain> {
        let stages = kernels
            .into_iter()
            .enumerate()
            .map(|(i, kernel)| {
                FilterStage::with_kernel(&format!("stage-{i}"), kernel, Arc::new(SoftwareContext), allocator)
            })
            .collect();
        Mutex::new(FilterChain::from_stages(stages))
    }

    #[test]
    fn test_identity_stage_passes_frames_through() {
        let chain = chain(vec![None], BufferPoolAllocator::default());
        let slot = FrameSlot::new();
        let counters = LiveCounters::default();
        let mut state = FrameWorkerState::default();
        let input = frame(1);

        let outcome = process_live_frame(&chain, input.clone(), 3, &slot, &counters, &mut state);
        assert_eq!(outcome, FrameOutcome::PassedThrough);
        assert!(slot.latest().unwrap().shares_data_with(&input));
        assert!(!chain.lock().unwrap().current().unwrap().is_prepared());
    }

    #[test]
    fn test_kernel_stage_prepares_once_and_filters() {
        let chain = chain(vec![Some(Arc::new(ColorInvert))], BufferPoolAllocator::default());
        let slot = FrameSlot::new();
        let counters = LiveCounters::default();
        let mut state = FrameWorkerState::default();

        for id in 0..5 {
            let outcome = process_live_frame(&chain, frame(id), 3, &slot, &counters, &mut state);
            assert_eq!(outcome, FrameOutcome::Filtered);
        }
        let staged = slot.latest().unwrap();
        assert_eq!(staged.id, 4);
        assert!(staged.data.is_pooled());
        assert_eq!(staged.data[0], 245);

        let guard = chain.lock().unwrap();
        let pool = guard.current().unwrap().output_pool().unwrap();
        assert_eq!(pool.capacity(), 3);
        drop(guard);
        assert_eq!(counters.snapshot(0).filtered, 5);
    }

    #[test]
    fn test_kernel_failure_drops_frame() {
        let chain = chain(vec![Some(Arc::new(FailingKernel))], BufferPoolAllocator::default());
        let slot = FrameSlot::new();
        let counters = LiveCounters::default();
        let mut state = FrameWorkerState::default();

        let outcome = process_live_frame(&chain, frame(1), 3, &slot, &counters, &mut state);
        assert_eq!(outcome, FrameOutcome::Dropped);
        assert!(slot.latest().is_none());
        assert_eq!(counters.snapshot(0).dropped, 1);
    }

    #[test]
    fn test_failed_allocation_is_not_retried() {
        // Too small for even one 4x2 frame: the stage stays unprepared and passes through
        let chain = chain(vec![Some(Arc::new(ColorInvert))], BufferPoolAllocator::new(8));
        let slot = FrameSlot::new();
        let counters = LiveCounters::default();
        let mut state = FrameWorkerState::default();

        for id in 0..3 {
            let outcome = process_live_frame(&chain, frame(id), 3, &slot, &counters, &mut state);
            assert_eq!(outcome, FrameOutcome::PassedThrough);
        }
        assert_eq!(state.failed_preparations.len(), 1);
    }

    #[test]
    fn test_failed_format_passes_through_after_other_format_prepared() {
        // Fits three 4x2 buffers but not three 8x8 ones
        let chain = chain(vec![Some(Arc::new(ColorInvert))], BufferPoolAllocator::new(200));
        let slot = FrameSlot::new();
        let counters = LiveCounters::default();
        let mut state = FrameWorkerState::default();
        let large = |id| CameraFrame::new(id, FrameFormat::new(PixelFormat::Bgra8, 8, 8), vec![10u8; 256]);

        let first = large(1);
        let outcome = process_live_frame(&chain, first.clone(), 3, &slot, &counters, &mut state);
        assert_eq!(outcome, FrameOutcome::PassedThrough);
        assert!(slot.latest().unwrap().shares_data_with(&first));

        let outcome = process_live_frame(&chain, frame(2), 3, &slot, &counters, &mut state);
        assert_eq!(outcome, FrameOutcome::Filtered);

        let again = large(3);
        let outcome = process_live_frame(&chain, again.clone(), 3, &slot, &counters, &mut state);
        assert_eq!(outcome, FrameOutcome::PassedThrough);
        let staged = slot.latest().unwrap();
        assert!(staged.shares_data_with(&again));
        assert_eq!(staged.format, again.format);
        assert_eq!(staged.data.len(), 256);

        let guard = chain.lock().unwrap();
        assert_eq!(guard.current().unwrap().input_format(), Some(&frame(0).format));
    }
}
