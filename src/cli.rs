// SPDX-License-Identifier: GPL-3.0-only

//! CLI commands for the filter pipeline
//!
//! This module provides command-line functionality for:
//! - Listing filters
//! - Rendering a filtered preview frame to an image file
//! - Taking filtered photos

use filter_camera::backends::camera::{TestPatternConfig, TestPatternSource};
use filter_camera::config::Config;
use filter_camera::constants::kernels;
use filter_camera::errors::CaptureError;
use filter_camera::pipelines::CaptureCoordinator;
use filter_camera::pipelines::filter::KernelRegistry;
use filter_camera::pipelines::photo::{CaptureNotification, CaptureOutcome};
use filter_camera::render::{
    DrawOutcome, FrameRenderSurface, FrameSlot, Rotation, SoftwareBackend, SurfaceBackend,
    ViewBounds, WgpuBackend,
};
use filter_camera::storage::{DirectorySaver, latest_photo};
use filter_camera::{LiveStats, PipelineState};
use image::RgbaImage;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tracing::warn;

/// Options shared by the commands that run the pipeline
#[derive(Debug, Clone, Default)]
pub struct PipelineOptions {
    /// Config file to use instead of the default location
    pub config: Option<PathBuf>,
    /// Run only this filter
    pub filter: Option<String>,
    /// Preview frame size of the test pattern source
    pub size: Option<(u32, u32)>,
}

/// Options of the preview command
#[derive(Debug, Clone)]
pub struct PreviewOptions {
    pub pipeline: PipelineOptions,
    pub output: PathBuf,
    pub frames: u64,
    pub view: (f64, f64),
    pub scale: f64,
    pub mirror: Option<bool>,
    pub rotation: Option<i32>,
    pub gpu: bool,
}

fn load_config(options: &PipelineOptions) -> Result<Config, Box<dyn std::error::Error>> {
    let mut config = match &options.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load(),
    };
    if let Some(filter) = &options.filter {
        config.filters = vec![filter.clone()];
    }
    Ok(config)
}

fn test_pattern(options: &PipelineOptions) -> TestPatternSource {
    let mut source_config = TestPatternConfig::default();
    if let Some((width, height)) = options.size {
        source_config.preview_width = width;
        source_config.preview_height = height;
    }
    TestPatternSource::new(source_config)
}

/// Start the coordinator, mapping a refused start to an error
async fn start(coordinator: &mut CaptureCoordinator) -> Result<(), Box<dyn std::error::Error>> {
    match coordinator.start().await {
        PipelineState::Running => Ok(()),
        PipelineState::Unauthorized(status) => Err(CaptureError::NotAuthorized(status).into()),
        PipelineState::Failed(msg) => Err(CaptureError::SourceFailed(msg).into()),
        _ => Err(CaptureError::NotRunning.into()),
    }
}

fn filter_label(name: &str) -> &str {
    if name == kernels::IDENTITY { "(none)" } else { name }
}

fn print_stats(stats: &LiveStats) {
    println!(
        "Frames: {} received, {} filtered, {} passed through, {} dropped, {} late",
        stats.received, stats.filtered, stats.passed_through, stats.dropped, stats.late
    );
}

/// List the configured filter chain and every available kernel
pub fn list_filters(config_path: Option<PathBuf>) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config(&PipelineOptions {
        config: config_path,
        ..Default::default()
    })?;
    let registry = KernelRegistry::with_builtin(&config.kernels);

    println!("Filter chain:");
    for (index, name) in config.filters.iter().enumerate() {
        let label = filter_label(name);
        let resolved = if name == kernels::IDENTITY || registry.resolve(name).is_some() {
            ""
        } else {
            "  [unknown, passes frames through]"
        };
        println!("  [{}] {}{}", index, label, resolved);
    }
    println!();
    println!("Available kernels:");
    for name in registry.names() {
        println!("  {}", name);
    }

    Ok(())
}

/// Run the live pipeline on the test pattern and write one drawn preview frame
pub fn render_preview(options: PreviewOptions) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = load_config(&options.pipeline)?;
    if let Some(mirror) = options.mirror {
        config.mirror_preview = mirror;
    }
    if let Some(degrees) = options.rotation {
        config.preview_rotation = Rotation::from_degrees(degrees)
            .ok_or_else(|| format!("Unsupported rotation: {} degrees", degrees))?;
    }

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(async move {
        let source = Arc::new(test_pattern(&options.pipeline));
        let slot = FrameSlot::new();
        let saver = Arc::new(DirectorySaver::new(config.photo_dir()));
        let mirroring = config.mirror_preview;
        let rotation = config.preview_rotation;
        let mut coordinator = CaptureCoordinator::new(config, source, saver, slot.clone());
        start(&mut coordinator).await?;

        if let Some(name) = coordinator.active_filter_name() {
            println!("Filter: {}", filter_label(&name));
        }

        let deadline = Instant::now() + Duration::from_secs(10);
        while coordinator.stats().received < options.frames && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        let stats = coordinator.stats();
        coordinator.stop().await;
        print_stats(&stats);

        let bounds = ViewBounds::new(options.view.0, options.view.1);
        let image = if options.gpu {
            let backend = WgpuBackend::new().await?;
            println!(
                "GPU: {} ({:?})",
                backend.device_info().adapter_name,
                backend.device_info().backend
            );
            let surface = draw_once(backend, slot, bounds, options.scale, mirroring, rotation)?;
            surface.backend().read_drawable()?
        } else {
            let surface = draw_once(SoftwareBackend::new(), slot, bounds, options.scale, mirroring, rotation)?;
            surface.backend().canvas().clone()
        };

        save_image(&image, &options.output)?;
        println!("Preview saved to: {}", options.output.display());
        Ok::<(), Box<dyn std::error::Error>>(())
    })
}

fn draw_once<B: SurfaceBackend>(
    backend: B,
    slot: FrameSlot,
    bounds: ViewBounds,
    scale: f64,
    mirroring: bool,
    rotation: Rotation,
) -> Result<FrameRenderSurface<B>, Box<dyn std::error::Error>> {
    let mut surface = FrameRenderSurface::new(backend, slot, bounds, scale);
    surface.set_mirroring(mirroring);
    surface.set_rotation(rotation);
    match surface.draw() {
        DrawOutcome::Drawn { frame_id } => {
            println!("Drew frame {}", frame_id);
            Ok(surface)
        }
        DrawOutcome::Skipped(reason) => Err(format!("Nothing drawn: {:?}", reason).into()),
    }
}

fn save_image(image: &RgbaImage, path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    image.save(path)?;
    Ok(())
}

/// Capture outcomes seen by [`report_completions`]
#[derive(Debug, Default, PartialEq, Eq)]
struct CaptureTally {
    saved: u32,
    failed: u32,
    /// Notifications lost because the receiver fell behind
    missed: u64,
}

impl CaptureTally {
    fn record(&mut self, notification: CaptureNotification) {
        let CaptureNotification::Completed { id, outcome } = notification else {
            return;
        };
        match outcome {
            CaptureOutcome::Saved { filtered } => {
                self.saved += 1;
                println!("  Photo {} saved{}", id, if filtered { " (filtered)" } else { "" });
            }
            CaptureOutcome::SaveFailed(e) => {
                self.failed += 1;
                println!("  Photo {} not saved: {}", id, e);
            }
            CaptureOutcome::NoPhoto(e) => {
                self.failed += 1;
                println!("  Photo {} failed: {}", id, e);
            }
        }
    }
}

/// Print capture completions until `idle` resolves
///
/// `idle` decides when to stop, so lost notifications cannot stall the wait.
/// Completions still queued when it resolves are reported too.
async fn report_completions(
    notifications: &mut broadcast::Receiver<CaptureNotification>,
    idle: impl Future<Output = ()>,
) -> CaptureTally {
    let mut tally = CaptureTally::default();
    tokio::pin!(idle);
    loop {
        tokio::select! {
            biased;
            received = notifications.recv() => match received {
                Ok(notification) => tally.record(notification),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Capture notifications lost");
                    tally.missed += skipped;
                }
                Err(RecvError::Closed) => break,
            },
            () = &mut idle => break,
        }
    }
    loop {
        match notifications.try_recv() {
            Ok(notification) => tally.record(notification),
            Err(TryRecvError::Lagged(skipped)) => tally.missed += skipped,
            Err(_) => break,
        }
    }
    tally
}

/// Take `count` filtered photos from the test pattern source
pub fn take_photos(
    options: PipelineOptions,
    output: Option<PathBuf>,
    count: u32,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = load_config(&options)?;
    if let Some(dir) = output {
        config.output_dir = Some(dir);
    }
    let output_dir = config.photo_dir();

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(async move {
        let source = Arc::new(test_pattern(&options));
        let saver = Arc::new(DirectorySaver::new(&output_dir));
        let mut coordinator = CaptureCoordinator::new(config, source, saver, FrameSlot::new());
        let mut notifications = coordinator.subscribe();
        start(&mut coordinator).await?;

        println!("Capturing {} photo(s)...", count);
        for _ in 0..count {
            coordinator.capture().ok_or(CaptureError::WorkerStopped)?;
        }

        let tally = report_completions(&mut notifications, coordinator.wait_for_captures()).await;
        coordinator.stop().await;

        if tally.missed > 0 {
            println!("  {} capture notification(s) missed", tally.missed);
        }
        if tally.saved == 0 && tally.missed == 0 {
            return Err("No photos were saved".into());
        }
        if let Some(path) = latest_photo(&output_dir) {
            println!("Latest photo: {}", path.display());
        }
        Ok::<(), Box<dyn std::error::Error>>(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn completed(id: u64) -> CaptureNotification {
        CaptureNotification::Completed {
            id,
            outcome: CaptureOutcome::Saved { filtered: true },
        }
    }

    #[tokio::test]
    async fn test_lagged_receiver_still_finishes() {
        let (tx, mut rx) = broadcast::channel(2);
        for id in 1..=5 {
            tx.send(completed(id)).unwrap();
        }

        let idle = std::future::ready(());
        let tally = tokio::time::timeout(Duration::from_secs(2), report_completions(&mut rx, idle))
            .await
            .expect("reporting finished once idle");
        assert_eq!(
            tally,
            CaptureTally {
                saved: 2,
                failed: 0,
                missed: 3
            }
        );
        drop(tx);
    }

    #[tokio::test]
    async fn test_completions_queued_at_idle_are_reported() {
        let (tx, mut rx) = broadcast::channel(8);
        tx.send(CaptureNotification::ProcessingIndicator { id: 1, visible: false })
            .unwrap();
        tx.send(completed(1)).unwrap();
        tx.send(CaptureNotification::Completed {
            id: 2,
            outcome: CaptureOutcome::NoPhoto("no data".to_string()),
        })
        .unwrap();

        let tally = report_completions(&mut rx, std::future::ready(())).await;
        assert_eq!(
            tally,
            CaptureTally {
                saved: 1,
                failed: 1,
                missed: 0
            }
        );
    }

    #[test]
    fn test_identity_filter_label() {
        assert_eq!(filter_label(kernels::IDENTITY), "(none)");
        assert_eq!(filter_label("CISepiaTone"), "CISepiaTone");
    }
}
