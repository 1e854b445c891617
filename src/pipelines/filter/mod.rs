// SPDX-License-Identifier: GPL-3.0-only

//! Real-time filter pipeline
//!
//! ```text
//! ┌──────────────┐     ┌──────────────┐     ┌──────────────┐
//! │  Raw frame   │ ──▶ │ FilterChain  │ ──▶ │ FilterStage  │ ──▶ staged on the surface
//! │   (BGRA)     │     │  (current)   │     │  kernel+pool │
//! └──────────────┘     └──────────────┘     └──────────────┘
//! ```
//!
//! - [`pool`]: bounded output buffer pools and their allocator
//! - [`kernels`]: named kernels and the registry resolving them
//! - [`context`]: processing context shared by all stages
//! - [`stage`]: one kernel with its own pool
//! - [`chain`]: ordered stages and the active selection

pub mod chain;
pub mod context;
pub mod kernels;
pub mod pool;
pub mod stage;

pub use chain::{Direction, FilterChain};
pub use context::{ImageProcessingContext, ProcessingImage, SoftwareContext};
pub use kernels::{Kernel, KernelRegistry};
pub use pool::{BufferPoolAllocator, FramePool, PooledBuffer};
pub use stage::FilterStage;
