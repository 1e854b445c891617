// SPDX-License-Identifier: GPL-3.0-only
//! Thread lifecycle management for frame loops
//!
//! Capture sources run their frame producer on a loop thread and the filter
//! pipeline runs its serial frame worker on one. Both share the same stop
//! signal handling and join-on-drop behavior.

use crate::constants::WORKER_POLL_INTERVAL;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::thread::{self, JoinHandle};
use tracing::{debug, info, warn};

/// Returned by each loop iteration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopAction {
    Continue,
    /// End the loop; the thread exits after this iteration
    Stop,
}

/// Owns one loop thread and stops it on drop
///
/// ```ignore
/// let (tx, rx) = std::sync::mpsc::sync_channel(2);
/// let worker = FrameLoopController::start_receiving("frame-worker", rx, |frame| {
///     render(frame);
///     LoopAction::Continue
/// })?;
/// ```
pub struct FrameLoopController {
    thread_handle: Option<JoinHandle<()>>,
    stop_signal: Arc<AtomicBool>,
    name: String,
}

impl FrameLoopController {
    /// Spawn a thread that builds its state with `init_fn`, then runs
    /// `loop_fn` until it returns [`LoopAction::Stop`] or the controller stops
    ///
    /// A failing `init_fn` ends the thread before the first iteration.
    pub fn start_with_init<S, I, F>(name: &str, init_fn: I, mut loop_fn: F) -> Result<Self, String>
    where
        S: 'static,
        I: FnOnce() -> Result<S, String> + Send + 'static,
        F: FnMut(&mut S) -> LoopAction + Send + 'static,
    {
        let stop_signal = Arc::new(AtomicBool::new(false));
        let thread_stop = Arc::clone(&stop_signal);
        let thread_name = name.to_string();

        let thread_handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                let mut state = match init_fn() {
                    Ok(state) => state,
                    Err(e) => {
                        warn!(name = %thread_name, error = %e, "Frame loop initialization failed");
                        return;
                    }
                };

                while !thread_stop.load(Ordering::SeqCst) {
                    if loop_fn(&mut state) == LoopAction::Stop {
                        debug!(name = %thread_name, "Frame loop ended itself");
                        break;
                    }
                }
                debug!(name = %thread_name, "Frame loop thread exiting");
            })
            .map_err(|e| format!("Failed to spawn {} thread: {}", name, e))?;

        info!(name, "Frame loop started");
        Ok(Self {
            thread_handle: Some(thread_handle),
            stop_signal,
            name: name.to_string(),
        })
    }

    /// Spawn a thread handling items from `receiver` one at a time, in order
    ///
    /// Besides stopping like any loop, it ends once every sender is gone.
    pub fn start_receiving<T, F>(name: &str, receiver: Receiver<T>, mut handler: F) -> Result<Self, String>
    where
        T: Send + 'static,
        F: FnMut(T) -> LoopAction + Send + 'static,
    {
        let loop_name = name.to_string();
        Self::start_with_init(
            name,
            move || Ok(receiver),
            move |receiver| match receiver.recv_timeout(WORKER_POLL_INTERVAL) {
                Ok(item) => handler(item),
                Err(RecvTimeoutError::Timeout) => LoopAction::Continue,
                Err(RecvTimeoutError::Disconnected) => {
                    debug!(name = %loop_name, "All senders dropped");
                    LoopAction::Stop
                }
            },
        )
    }

    pub fn is_running(&self) -> bool {
        self.thread_handle
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Signal the loop and wait for its thread
    pub fn stop(&mut self) {
        self.stop_signal.store(true, Ordering::SeqCst);
        self.join();
    }

    /// Wait for the thread without signalling it
    pub fn join(&mut self) {
        let Some(handle) = self.thread_handle.take() else {
            return;
        };
        // Dropped from inside its own loop
        if handle.thread().id() == thread::current().id() {
            return;
        }
        match handle.join() {
            Ok(()) => debug!(name = %self.name, "Frame loop joined"),
            Err(e) => warn!(name = %self.name, "Frame loop thread panicked: {:?}", e),
        }
    }
}

impl Drop for FrameLoopController {
    fn drop(&mut self) {
        if self.thread_handle.is_some() {
            self.stop();
        }
    }
}
