// SPDX-License-Identifier: GPL-3.0-only

//! A single kernel wrapped with its own output buffer pool

use super::context::ImageProcessingContext;
use super::kernels::{Kernel, KernelRegistry};
use super::pool::{BufferPoolAllocator, FramePool};
use crate::backends::camera::types::{CameraFrame, ColorSpace, FrameData, FrameFormat};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Per-kernel unit that prepares output buffers and renders filtered frames
///
/// A stage starts Unprepared. `prepare` allocates its output pool for an input
/// format and marks it Prepared; every `prepare` begins with a reset, so a
/// failed allocation leaves the stage Unprepared. While Unprepared, when the
/// identifier resolved to no kernel, or for frames of another format than the
/// prepared one, `render` passes frames through untouched.
pub struct FilterStage {
    identifier: String,
    kernel: Option<Arc<dyn Kernel>>,
    context: Arc<dyn ImageProcessingContext>,
    allocator: BufferPoolAllocator,
    output_pool: Option<FramePool>,
    output_color_space: Option<ColorSpace>,
    output_format: Option<FrameFormat>,
    input_format: Option<FrameFormat>,
    prepared: bool,
}

impl FilterStage {
    /// Create a stage for `identifier`, resolving the kernel through `registry`
    pub fn new(
        identifier: &str,
        registry: &KernelRegistry,
        context: Arc<dyn ImageProcessingContext>,
        allocator: BufferPoolAllocator,
    ) -> Self {
        Self::with_kernel(identifier, registry.resolve(identifier), context, allocator)
    }

    /// Create a stage around an already resolved kernel (`None` = identity)
    pub fn with_kernel(
        identifier: &str,
        kernel: Option<Arc<dyn Kernel>>,
        context: Arc<dyn ImageProcessingContext>,
        allocator: BufferPoolAllocator,
    ) -> Self {
        Self {
            identifier: identifier.to_string(),
            kernel,
            context,
            allocator,
            output_pool: None,
            output_color_space: None,
            output_format: None,
            input_format: None,
            prepared: false,
        }
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn kernel(&self) -> Option<&Arc<dyn Kernel>> {
        self.kernel.as_ref()
    }

    pub fn is_prepared(&self) -> bool {
        self.prepared
    }

    pub fn input_format(&self) -> Option<&FrameFormat> {
        self.input_format.as_ref()
    }

    pub fn output_format(&self) -> Option<&FrameFormat> {
        self.output_format.as_ref()
    }

    pub fn output_color_space(&self) -> Option<ColorSpace> {
        self.output_color_space
    }

    pub fn output_pool(&self) -> Option<&FramePool> {
        self.output_pool.as_ref()
    }

    /// Allocate output buffers for `input_format`
    ///
    /// `retained_count_hint` must cover every frame that can be held downstream
    /// at once, otherwise rendering starts dropping frames on pool exhaustion.
    pub fn prepare(&mut self, input_format: &FrameFormat, retained_count_hint: usize) {
        self.reset();

        let Some((pool, color_space, output_format)) =
            self.allocator.allocate(input_format, retained_count_hint)
        else {
            warn!(
                filter = %self.identifier,
                format = %input_format,
                "Output buffer pool allocation failed, filter stays unprepared"
            );
            return;
        };

        self.output_pool = Some(pool);
        self.output_color_space = Some(color_space);
        self.output_format = Some(output_format);
        self.input_format = Some(*input_format);
        self.prepared = true;

        info!(
            filter = %self.identifier,
            format = %input_format,
            retained_count_hint,
            "Filter stage prepared"
        );
    }

    /// Drop all cached state and return to Unprepared
    pub fn reset(&mut self) {
        self.output_color_space = None;
        self.output_pool = None;
        self.output_format = None;
        self.input_format = None;
        self.prepared = false;
    }

    /// Filter one frame
    ///
    /// Returns the input unchanged when Unprepared, without a kernel, or when
    /// the frame's format is not the prepared one. Returns the filtered frame
    /// on success, and `None` when this frame cannot be filtered
    /// (kernel produced no image, pool exhausted, render failed).
    pub fn render(&mut self, frame: &CameraFrame) -> Option<CameraFrame> {
        let Some(kernel) = self.kernel.as_ref() else {
            return Some(frame.clone());
        };
        if !self.prepared {
            return Some(frame.clone());
        }
        if self.input_format.as_ref() != Some(&frame.format) {
            debug!(
                filter = %self.identifier,
                frame_id = frame.id,
                format = %frame.format,
                "Frame format differs from prepared format, passing through"
            );
            return Some(frame.clone());
        }

        let source = self.context.create_image(frame)?;
        let Some(filtered) = self.context.process_image(kernel.as_ref(), &source) else {
            debug!(filter = %self.identifier, frame_id = frame.id, "Kernel failed to render image");
            return None;
        };

        let pool = self.output_pool.as_ref()?;
        let output_format = self.output_format?;
        let color_space = self.output_color_space?;

        let Some(mut buffer) = pool.allocate() else {
            debug!(filter = %self.identifier, frame_id = frame.id, "Output buffer pool exhausted");
            return None;
        };

        if let Err(e) = self
            .context
            .render(&filtered, buffer.as_mut_slice(), &output_format, color_space)
        {
            debug!(filter = %self.identifier, error = %e, "Failed to render filtered image");
            return None;
        }

        Some(CameraFrame {
            id: frame.id,
            format: output_format,
            data: FrameData::Pooled(Arc::new(buffer)),
            captured_at: frame.captured_at,
        })
    }
}

impl std::fmt::Debug for FilterStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FilterStage")
            .field("identifier", &self.identifier)
            .field("has_kernel", &self.kernel.is_some())
            .field("prepared", &self.prepared)
            .field("input_format", &self.input_format)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::camera::types::PixelFormat;
    use crate::pipelines::filter::context::SoftwareContext;
    use crate::pipelines::filter::kernels::ColorInvert;
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
        let format = FrameFormat::new(PixelFormat::Bgra8, 4, 2);
        CameraFrame::new(id, format, vec![100u8; 32])
    }

    fn stage(kernel: Option<Arc<dyn Kernel>>, allocator: BufferPoolAllocator) -> FilterStage {
        FilterStage::with_kernel("test", kernel, Arc::new(SoftwareContext), allocator)
    }

    #[test]
    fn test_unprepared_stage_passes_through() {
        let mut stage = stage(Some(Arc::new(ColorInvert)), BufferPoolAllocator::default());
        let input = frame(1);
        let output = stage.render(&input).unwrap();
        assert!(output.shares_data_with(&input));
        assert_eq!(output.id, 1);
    }

    #[test]
    fn test_identity_stage_passes_through_when_prepared() {
        let mut stage = stage(None, BufferPoolAllocator::default());
        let input = frame(2);
        stage.prepare(&input.format, 3);
        assert!(stage.is_prepared());
        assert!(stage.render(&input).unwrap().shares_data_with(&input));
    }

    #[test]
    fn test_allocation_failure_keeps_stage_unprepared() {
        let mut stage = stage(Some(Arc::new(ColorInvert)), BufferPoolAllocator::new(16));
        let input = frame(3);
        stage.prepare(&input.format, 3);
        assert!(!stage.is_prepared());
        assert!(stage.input_format().is_none());
        assert!(stage.render(&input).unwrap().shares_data_with(&input));
    }

    #[test]
    fn test_prepare_twice_is_idempotent() {
        let mut stage = stage(Some(Arc::new(ColorInvert)), BufferPoolAllocator::default());
        let input = frame(4);
        stage.prepare(&input.format, 3);
        let first = (stage.is_prepared(), stage.input_format().copied());
        stage.prepare(&input.format, 3);
        let second = (stage.is_prepared(), stage.input_format().copied());
        assert_eq!(first, second);
        assert_eq!(second, (true, Some(input.format)));
        assert_eq!(stage.output_pool().unwrap().capacity(), 3);
    }

    #[test]
    fn test_render_filters_into_pool_buffer() {
        let mut stage = stage(Some(Arc::new(ColorInvert)), BufferPoolAllocator::default());
        let input = frame(5);
        stage.prepare(&input.format, 3);

        let output = stage.render(&input).unwrap();
        assert!(output.data.is_pooled());
        assert_eq!(output.id, 5);
        assert_eq!(output.format, input.format);
        // 100 inverted is 155 on color channels, alpha untouched
        assert_eq!(&output.data[..4], &[155, 155, 155, 100]);
        assert_eq!(stage.output_pool().unwrap().in_flight(), 1);

        drop(output);
        assert_eq!(stage.output_pool().unwrap().in_flight(), 0);
    }

    #[test]
    fn test_other_format_passes_through_when_prepared() {
        let mut stage = stage(Some(Arc::new(ColorInvert)), BufferPoolAllocator::default());
        stage.prepare(&frame(8).format, 3);

        let larger = CameraFrame::new(9, FrameFormat::new(PixelFormat::Bgra8, 8, 8), vec![100u8; 256]);
        let output = stage.render(&larger).unwrap();
        assert!(output.shares_data_with(&larger));
        assert_eq!(output.format, larger.format);
        assert_eq!(stage.output_pool().unwrap().in_flight(), 0);
    }

    #[test]
    fn test_kernel_failure_drops_frame() {
        let mut stage = stage(Some(Arc::new(FailingKernel)), BufferPoolAllocator::default());
        let input = frame(6);
        stage.prepare(&input.format, 3);
        assert!(stage.render(&input).is_none());
    }

    #[test]
    fn test_pool_exhaustion_drops_frame() {
        let mut stage = stage(Some(Arc::new(ColorInvert)), BufferPoolAllocator::default());
        let input = frame(7);
        stage.prepare(&input.format, 2);

        let held_a = stage.render(&input).unwrap();
        let held_b = stage.render(&input).unwrap();
        assert!(stage.render(&input).is_none());

        drop(held_a);
        assert!(stage.render(&input).is_some());
        drop(held_b);
    }
}
