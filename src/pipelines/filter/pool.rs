// SPDX-License-Identifier: GPL-3.0-only

//! Bounded pools of reusable output frame buffers
//!
//! Every filter stage owns one pool sized for the number of frames that can be
//! in flight downstream of it (worker hand-off, staged frame, frame being drawn).
//! Allocation from a pool never blocks: when every buffer is out, `allocate`
//! returns `None` and the caller drops the frame.

use crate::backends::camera::types::{ColorSpace, FrameFormat};
use crate::constants::DEFAULT_MAX_POOL_BYTES;
use std::sync::{Arc, Mutex, Weak};
use tracing::{debug, warn};

/// Creates output buffer pools matching a reference frame format
#[derive(Debug, Clone, Copy)]
pub struct BufferPoolAllocator {
    max_pool_bytes: usize,
}

impl BufferPoolAllocator {
    /// Create an allocator refusing pools larger than `max_pool_bytes` in total
    pub fn new(max_pool_bytes: usize) -> Self {
        Self { max_pool_bytes }
    }

    pub fn max_pool_bytes(&self) -> usize {
        self.max_pool_bytes
    }

    /// Allocate a pool of `retained_count_hint` buffers for `format`
    ///
    /// The output format (and with it the color space) matches the reference
    /// format exactly, so the processing context can render into pool buffers
    /// without conversion. Returns `None` when the pool cannot be created.
    pub fn allocate(
        &self,
        format: &FrameFormat,
        retained_count_hint: usize,
    ) -> Option<(FramePool, ColorSpace, FrameFormat)> {
        if retained_count_hint == 0 || format.is_empty() {
            warn!(%format, retained_count_hint, "Refusing to allocate empty buffer pool");
            return None;
        }

        let Some(buffer_size) = format.frame_size() else {
            warn!(%format, "Frame size overflows");
            return None;
        };
        let total = buffer_size.checked_mul(retained_count_hint);
        if total.is_none_or(|total| total > self.max_pool_bytes) {
            warn!(
                %format,
                retained_count_hint,
                max_pool_bytes = self.max_pool_bytes,
                "Buffer pool exceeds allocation limit"
            );
            return None;
        }

        let mut buffers: Vec<Vec<u8>> = Vec::new();
        if buffers.try_reserve_exact(retained_count_hint).is_err() {
            warn!(retained_count_hint, "Failed to reserve buffer pool slots");
            return None;
        }
        for _ in 0..retained_count_hint {
            let mut buffer = Vec::new();
            if buffer.try_reserve_exact(buffer_size).is_err() {
                warn!(buffer_size, "Failed to allocate pool buffer");
                return None;
            }
            buffer.resize(buffer_size, 0);
            buffers.push(buffer);
        }

        debug!(
            %format,
            buffers = retained_count_hint,
            buffer_size,
            "Allocated output buffer pool"
        );

        let pool = FramePool {
            shared: Arc::new(PoolShared {
                free: Mutex::new(buffers),
                buffer_size,
                capacity: retained_count_hint,
            }),
            format: *format,
        };

        Some((pool, format.color_space, *format))
    }
}

impl Default for BufferPoolAllocator {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_POOL_BYTES)
    }
}

struct PoolShared {
    free: Mutex<Vec<Vec<u8>>>,
    buffer_size: usize,
    capacity: usize,
}

/// Bounded collection of reusable buffers of one frame format
pub struct FramePool {
    shared: Arc<PoolShared>,
    format: FrameFormat,
}

impl FramePool {
    /// Take a free buffer, or `None` if every buffer is still in use
    pub fn allocate(&self) -> Option<PooledBuffer> {
        let data = self.shared.free.lock().ok()?.pop()?;
        Some(PooledBuffer {
            data,
            pool: Arc::downgrade(&self.shared),
        })
    }

    pub fn format(&self) -> &FrameFormat {
        &self.format
    }

    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    pub fn buffer_size(&self) -> usize {
        self.shared.buffer_size
    }

    /// Number of buffers currently free
    pub fn available(&self) -> usize {
        self.shared.free.lock().map(|free| free.len()).unwrap_or(0)
    }

    /// Number of buffers handed out and not yet returned
    pub fn in_flight(&self) -> usize {
        self.capacity().saturating_sub(self.available())
    }
}

impl std::fmt::Debug for FramePool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FramePool")
            .field("format", &self.format)
            .field("capacity", &self.capacity())
            .field("available", &self.available())
            .finish()
    }
}

/// A buffer on loan from a `FramePool`; returned to the pool on drop
pub struct PooledBuffer {
    data: Vec<u8>,
    pool: Weak<PoolShared>,
}

impl PooledBuffer {
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl std::ops::Deref for PooledBuffer {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.data
    }
}

impl std::ops::DerefMut for PooledBuffer {
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        // The pool may have been reset while this buffer was still displayed
        let Some(shared) = self.pool.upgrade() else {
            return;
        };
        if let Ok(mut free) = shared.free.lock() {
            free.push(std::mem::take(&mut self.data));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::camera::types::PixelFormat;

    fn format() -> FrameFormat {
        FrameFormat::new(PixelFormat::Bgra8, 8, 4)
    }

    #[test]
    fn test_allocate_matches_reference_format() {
        let format = format().with_color_space(ColorSpace::LinearSrgb);
        let (pool, color_space, output_format) =
            BufferPoolAllocator::default().allocate(&format, 3).unwrap();

        assert_eq!(output_format, format);
        assert_eq!(color_space, ColorSpace::LinearSrgb);
        assert_eq!(pool.capacity(), 3);
        assert_eq!(pool.available(), 3);
        assert_eq!(pool.buffer_size(), 8 * 4 * 4);
    }

    #[test]
    fn test_allocation_failures() {
        let allocator = BufferPoolAllocator::default();
        assert!(allocator.allocate(&format(), 0).is_none());
        assert!(
            allocator
                .allocate(&FrameFormat::new(PixelFormat::Bgra8, 0, 4), 3)
                .is_none()
        );

        // 3 buffers of 128 bytes do not fit in 300 bytes
        let tight = BufferPoolAllocator::new(300);
        assert!(tight.allocate(&format(), 3).is_none());
        assert!(tight.allocate(&format(), 2).is_some());
    }

    #[test]
    fn test_pool_exhaustion_and_recycling() {
        let (pool, _, _) = BufferPoolAllocator::default().allocate(&format(), 2).unwrap();

        let a = pool.allocate().unwrap();
        let b = pool.allocate().unwrap();
        assert!(pool.allocate().is_none());
        assert_eq!(pool.in_flight(), 2);

        drop(a);
        assert_eq!(pool.available(), 1);
        let c = pool.allocate().unwrap();
        assert_eq!(c.len(), pool.buffer_size());

        drop(b);
        drop(c);
        assert_eq!(pool.available(), 2);
    }

    #[test]
    fn test_buffer_outlives_pool() {
        let (pool, _, _) = BufferPoolAllocator::default().allocate(&format(), 1).unwrap();
        let buffer = pool.allocate().unwrap();
        drop(pool);
        // Dropping after the pool is gone just frees the memory
        assert_eq!(buffer.len(), 128);
        drop(buffer);
    }

    #[test]
    fn test_independent_pools() {
        let allocator = BufferPoolAllocator::default();
        let (first, _, _) = allocator.allocate(&format(), 1).unwrap();
        let (second, _, _) = allocator.allocate(&format(), 1).unwrap();
        let _held = first.allocate().unwrap();
        assert!(first.allocate().is_none());
        assert!(second.allocate().is_some());
    }
}
