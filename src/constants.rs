// SPDX-License-Identifier: GPL-3.0-only

//! Application-wide constants

use std::time::Duration;

/// Kernel identifiers understood by the built-in registry
pub mod kernels {
    /// The empty identifier selects the identity filter
    pub const IDENTITY: &str = "";
    pub const GAUSSIAN_BLUR: &str = "CIGaussianBlur";
    pub const COMIC_EFFECT: &str = "CIComicEffect";
    pub const CRYSTALLIZE: &str = "CICrystallize";
    pub const PHOTO_EFFECT_MONO: &str = "CIPhotoEffectMono";
    pub const SEPIA_TONE: &str = "CISepiaTone";
    pub const COLOR_INVERT: &str = "CIColorInvert";
}

/// Filter chain used when the configuration does not name one
pub const DEFAULT_FILTERS: [&str; 4] = [
    kernels::IDENTITY,
    kernels::GAUSSIAN_BLUR,
    kernels::COMIC_EFFECT,
    kernels::CRYSTALLIZE,
];

/// Output buffers each filter stage keeps in its pool.
///
/// Covers the frame being rendered, the frame staged on the preview surface
/// and the frame the surface is currently drawing.
pub const OUTPUT_RETAINED_BUFFER_COUNT_HINT: usize = 3;

/// Upper bound for a single stage's output pool (256 MiB)
pub const DEFAULT_MAX_POOL_BYTES: usize = 256 * 1024 * 1024;

/// Raw frames allowed to wait for the frame worker before new ones are dropped
pub const DEFAULT_FRAME_QUEUE_DEPTH: usize = 2;

/// How often idle workers check their stop signal
pub const WORKER_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Estimated photo processing time above which the processing indicator is shown
pub const PROCESSING_INDICATOR_THRESHOLD: Duration = Duration::from_secs(1);

/// Duration of the shutter fade played when a photo is exposed
pub const SHUTTER_ANIMATION_DURATION: Duration = Duration::from_millis(250);

/// Content type handed to the save collaborator for still photos
pub const JPEG_CONTENT_TYPE: &str = "image/jpeg";

/// JPEG quality used when re-encoding filtered photos
pub const FULL_JPEG_QUALITY: u8 = 100;

/// Notifications buffered per observer before the oldest are discarded
pub const NOTIFICATION_CHANNEL_CAPACITY: usize = 64;

/// Default preview size produced by the test pattern source
pub const DEFAULT_PREVIEW_WIDTH: u32 = 640;
pub const DEFAULT_PREVIEW_HEIGHT: u32 = 480;

/// Default still photo size produced by the test pattern source
pub const DEFAULT_PHOTO_WIDTH: u32 = 1920;
pub const DEFAULT_PHOTO_HEIGHT: u32 = 1440;

/// Default frame rate of the test pattern source
pub const DEFAULT_FRAME_RATE: u32 = 30;
