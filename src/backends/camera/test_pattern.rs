// SPDX-License-Identifier: GPL-3.0-only

//! Synthetic capture source
//!
//! Produces moving color bars as BGRA preview frames and JPEG stills, with a
//! configurable authorization state. Used by the CLI when no camera is
//! wired up and by the pipeline tests.

use super::frame_loop::{FrameLoopController, LoopAction};
use super::types::{AuthorizationStatus, CameraFrame, FrameFormat, PixelFormat};
use super::{CaptureEvent, CaptureEventSender, CaptureSource, DeliveryResult, FrameSink, PhotoRequest};
use crate::constants::{
    DEFAULT_FRAME_RATE, DEFAULT_PHOTO_HEIGHT, DEFAULT_PHOTO_WIDTH, DEFAULT_PREVIEW_HEIGHT,
    DEFAULT_PREVIEW_WIDTH,
};
use futures::future::BoxFuture;
use image::RgbImage;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Bar colors (R, G, B)
const BARS: [[u8; 3]; 8] = [
    [235, 235, 235],
    [235, 235, 16],
    [16, 235, 235],
    [16, 235, 16],
    [235, 16, 235],
    [235, 16, 16],
    [16, 16, 235],
    [16, 16, 16],
];

/// JPEG quality of the stills the source delivers
const PHOTO_JPEG_QUALITY: u8 = 92;

#[derive(Debug, Clone)]
pub struct TestPatternConfig {
    pub preview_width: u32,
    pub preview_height: u32,
    pub frame_rate: u32,
    pub photo_width: u32,
    pub photo_height: u32,
    /// Initial authorization state
    pub authorization: AuthorizationStatus,
    /// Status granted when access is requested while `NotDetermined`
    pub grant_on_request: bool,
    /// Processing time announced in `WillBegin`
    pub processing_estimate: Duration,
    /// Fail every photo with this message
    pub photo_error: Option<String>,
}

impl Default for TestPatternConfig {
    fn default() -> Self {
        Self {
            preview_width: DEFAULT_PREVIEW_WIDTH,
            preview_height: DEFAULT_PREVIEW_HEIGHT,
            frame_rate: DEFAULT_FRAME_RATE,
            photo_width: DEFAULT_PHOTO_WIDTH,
            photo_height: DEFAULT_PHOTO_HEIGHT,
            authorization: AuthorizationStatus::Authorized,
            grant_on_request: true,
            processing_estimate: Duration::from_millis(200),
            photo_error: None,
        }
    }
}

/// Color bars scrolled horizontally by `phase` pixels, as packed RGB
fn pattern_rgb(width: u32, height: u32, phase: u32) -> RgbImage {
    let bar_width = (width / BARS.len() as u32).max(1);
    RgbImage::from_fn(width, height, |x, y| {
        let bar = (((x + phase) / bar_width) as usize) % BARS.len();
        let [r, g, b] = BARS[bar];
        // Bottom quarter is a luma ramp so motion and rotation stay visible
        if y >= height - height / 4 {
            let v = ((x * 255) / width.max(1)) as u8;
            image::Rgb([v, v, v])
        } else {
            image::Rgb([r, g, b])
        }
    })
}

/// Preview frame in BGRA layout
pub fn pattern_frame(id: u64, width: u32, height: u32) -> CameraFrame {
    let rgb = pattern_rgb(width, height, (id as u32).wrapping_mul(4));
    let mut data = Vec::with_capacity(width as usize * height as usize * 4);
    for px in rgb.pixels() {
        let [r, g, b] = px.0;
        data.extend_from_slice(&[b, g, r, 255]);
    }
    CameraFrame::new(id, FrameFormat::new(PixelFormat::Bgra8, width, height), data)
}

fn encode_photo(width: u32, height: u32, phase: u32) -> Result<Vec<u8>, String> {
    let image = pattern_rgb(width, height, phase);
    let mut buffer = Vec::new();
    let mut cursor = std::io::Cursor::new(&mut buffer);
    let mut encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut cursor, PHOTO_JPEG_QUALITY);
    encoder
        .encode(
            image.as_raw(),
            image.width(),
            image.height(),
            image::ExtendedColorType::Rgb8,
        )
        .map_err(|e| format!("JPEG encoding failed: {}", e))?;
    Ok(buffer)
}

/// Capture source producing a synthetic test pattern
pub struct TestPatternSource {
    config: TestPatternConfig,
    authorization: Mutex<AuthorizationStatus>,
    stream: Mutex<Option<FrameLoopController>>,
    next_frame_id: Arc<AtomicU64>,
    access_requests: AtomicU32,
    stream_starts: AtomicU32,
}

impl TestPatternSource {
    pub fn new(config: TestPatternConfig) -> Self {
        Self {
            authorization: Mutex::new(config.authorization),
            config,
            stream: Mutex::new(None),
            next_frame_id: Arc::new(AtomicU64::new(1)),
            access_requests: AtomicU32::new(0),
            stream_starts: AtomicU32::new(0),
        }
    }

    pub fn config(&self) -> &TestPatternConfig {
        &self.config
    }

    /// Number of `request_access` calls so far
    pub fn access_requests(&self) -> u32 {
        self.access_requests.load(Ordering::SeqCst)
    }

    /// Number of successful `start_streaming` calls so far
    pub fn stream_starts(&self) -> u32 {
        self.stream_starts.load(Ordering::SeqCst)
    }

    /// Preview format of the produced frames
    pub fn preview_format(&self) -> FrameFormat {
        FrameFormat::new(
            PixelFormat::Bgra8,
            self.config.preview_width,
            self.config.preview_height,
        )
    }
}

impl Default for TestPatternSource {
    fn default() -> Self {
        Self::new(TestPatternConfig::default())
    }
}

impl CaptureSource for TestPatternSource {
    fn authorization_status(&self) -> AuthorizationStatus {
        self.authorization
            .lock()
            .map(|status| *status)
            .unwrap_or(AuthorizationStatus::Restricted)
    }

    fn request_access(&self) -> BoxFuture<'static, AuthorizationStatus> {
        self.access_requests.fetch_add(1, Ordering::SeqCst);
        let status = match self.authorization.lock() {
            Ok(mut status) => {
                if *status == AuthorizationStatus::NotDetermined {
                    *status = if self.config.grant_on_request {
                        AuthorizationStatus::Authorized
                    } else {
                        AuthorizationStatus::Denied
                    };
                }
                *status
            }
            Err(_) => AuthorizationStatus::Restricted,
        };
        debug!(%status, "Test pattern access requested");
        Box::pin(futures::future::ready(status))
    }

    fn start_streaming(&self, sink: FrameSink) -> Result<(), String> {
        if self.authorization_status() != AuthorizationStatus::Authorized {
            return Err("Camera access not authorized".to_string());
        }
        let mut stream = self
            .stream
            .lock()
            .map_err(|_| "Stream state poisoned".to_string())?;
        if stream.as_ref().is_some_and(|s| s.is_running()) {
            return Err("Already streaming".to_string());
        }

        let (width, height) = (self.config.preview_width, self.config.preview_height);
        let interval = Duration::from_secs(1) / self.config.frame_rate.max(1);
        let next_frame_id = Arc::clone(&self.next_frame_id);
        info!(width, height, frame_rate = self.config.frame_rate, "Starting test pattern stream");

        let controller = FrameLoopController::start_with_init(
            "test-pattern",
            move || Ok(Instant::now()),
            move |next_due| {
                let id = next_frame_id.fetch_add(1, Ordering::SeqCst);
                if sink.deliver(pattern_frame(id, width, height)) == DeliveryResult::Closed {
                    debug!("Frame consumer gone, stopping test pattern");
                    return LoopAction::Stop;
                }
                *next_due += interval;
                let now = Instant::now();
                if *next_due > now {
                    std::thread::sleep(*next_due - now);
                } else {
                    *next_due = now;
                }
                LoopAction::Continue
            },
        )?;
        *stream = Some(controller);
        self.stream_starts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn stop_streaming(&self) {
        let controller = self.stream.lock().ok().and_then(|mut stream| stream.take());
        if let Some(mut controller) = controller {
            controller.stop();
            info!("Test pattern stream stopped");
        }
    }

    fn is_streaming(&self) -> bool {
        self.stream
            .lock()
            .map(|stream| stream.as_ref().is_some_and(|s| s.is_running()))
            .unwrap_or(false)
    }

    fn capture_photo(&self, request: PhotoRequest, events: CaptureEventSender) {
        let id = request.id;
        let (width, height) = (self.config.photo_width, self.config.photo_height);
        let estimate = self.config.processing_estimate;
        let photo_error = self.config.photo_error.clone();
        let phase = self.next_frame_id.load(Ordering::SeqCst) as u32;
        let thread_events = events.clone();

        let spawned = std::thread::Builder::new()
            .name("test-pattern-photo".to_string())
            .spawn(move || {
                let events = thread_events;
                let _ = events.send(CaptureEvent::WillBegin {
                    id,
                    processing_estimate: estimate,
                });
                let _ = events.send(CaptureEvent::WillCapture { id });
                let result = match &photo_error {
                    Some(e) => Err(e.clone()),
                    None => encode_photo(width, height, phase),
                };
                let error = result.as_ref().err().cloned();
                let _ = events.send(CaptureEvent::PhotoDelivered { id, result });
                let _ = events.send(CaptureEvent::Finished { id, error });
            });

        if let Err(e) = spawned {
            warn!(capture_id = id, error = %e, "Failed to start photo thread");
            let error = format!("Failed to start photo thread: {}", e);
            let _ = events.send(CaptureEvent::WillBegin {
                id,
                processing_estimate: Duration::ZERO,
            });
            let _ = events.send(CaptureEvent::WillCapture { id });
            let _ = events.send(CaptureEvent::PhotoDelivered {
                id,
                result: Err(error.clone()),
            });
            let _ = events.send(CaptureEvent::Finished {
                id,
                error: Some(error),
            });
        }
    }
}

impl Drop for TestPatternSource {
    fn drop(&mut self) {
        self.stop_streaming();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_config() -> TestPatternConfig {
        TestPatternConfig {
            preview_width: 16,
            preview_height: 8,
            frame_rate: 200,
            photo_width: 32,
            photo_height: 24,
            ..Default::default()
        }
    }

    #[test]
    fn test_pattern_frame_layout() {
        let frame = pattern_frame(0, 16, 8);
        assert_eq!(frame.data.len(), 16 * 8 * 4);
        // First bar is light grey, alpha opaque
        assert_eq!(&frame.data[..4], &[235, 235, 235, 255]);
    }

    #[test]
    fn test_request_access_resolves_not_determined_once() {
        let source = TestPatternSource::new(TestPatternConfig {
            authorization: AuthorizationStatus::NotDetermined,
            grant_on_request: false,
            ..small_config()
        });
        let status = pollster::block_on(source.request_access());
        assert_eq!(status, AuthorizationStatus::Denied);
        assert_eq!(source.authorization_status(), AuthorizationStatus::Denied);
        assert_eq!(source.access_requests(), 1);
    }

    #[test]
    fn test_unauthorized_source_refuses_to_stream() {
        let source = TestPatternSource::new(TestPatternConfig {
            authorization: AuthorizationStatus::Denied,
            ..small_config()
        });
        let (tx, _rx) = std::sync::mpsc::sync_channel(1);
        assert!(source.start_streaming(FrameSink::new(tx)).is_err());
        assert_eq!(source.stream_starts(), 0);
    }

    #[test]
    fn test_streams_frames_until_stopped() {
        let source = TestPatternSource::new(small_config());
        let (tx, rx) = std::sync::mpsc::sync_channel(2);
        source.start_streaming(FrameSink::new(tx)).unwrap();
        assert!(source.is_streaming());

        let first = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        let second = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert!(second.id > first.id);
        assert_eq!((first.width(), first.height()), (16, 8));

        source.stop_streaming();
        assert!(!source.is_streaming());
    }

    #[tokio::test]
    async fn test_photo_events_in_order() {
        let source = TestPatternSource::new(small_config());
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        source.capture_photo(PhotoRequest { id: 7 }, tx);

        assert!(matches!(rx.recv().await, Some(CaptureEvent::WillBegin { id: 7, .. })));
        assert_eq!(rx.recv().await, Some(CaptureEvent::WillCapture { id: 7 }));
        match rx.recv().await {
            Some(CaptureEvent::PhotoDelivered { id: 7, result: Ok(bytes) }) => {
                let decoded = image::load_from_memory(&bytes).unwrap();
                assert_eq!((decoded.width(), decoded.height()), (32, 24));
            }
            other => panic!("unexpected event {:?}", other),
        }
        assert_eq!(rx.recv().await, Some(CaptureEvent::Finished { id: 7, error: None }));
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test]
    async fn test_photo_error_reported() {
        let source = TestPatternSource::new(TestPatternConfig {
            photo_error: Some("sensor unplugged".to_string()),
            ..small_config()
        });
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        source.capture_photo(PhotoRequest { id: 1 }, tx);

        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        assert_eq!(events.len(), 4);
        assert_eq!(
            events[3],
            CaptureEvent::Finished {
                id: 1,
                error: Some("sensor unplugged".to_string())
            }
        );
    }
}
