// SPDX-License-Identifier: GPL-3.0-only

//! Ordered, navigable list of filter stages

use super::context::ImageProcessingContext;
use super::kernels::KernelRegistry;
use super::pool::BufferPoolAllocator;
use super::stage::FilterStage;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

/// Navigation direction for filter selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Next,
    Previous,
}

/// Filter stages plus the index of the active one
///
/// The index moves one step at a time and is clamped at both ends; a request
/// past either end is ignored. Switching never resets the stage being left,
/// so it keeps its buffer pool for fast re-selection.
#[derive(Debug, Default)]
pub struct FilterChain {
    stages: Vec<FilterStage>,
    index: usize,
}

impl FilterChain {
    /// Build one stage per identifier; `""` is the identity filter
    pub fn initialize<S: AsRef<str>>(
        names: &[S],
        registry: &KernelRegistry,
        context: Arc<dyn ImageProcessingContext>,
        allocator: BufferPoolAllocator,
    ) -> Self {
        let stages = names
            .iter()
            .map(|name| FilterStage::new(name.as_ref(), registry, Arc::clone(&context), allocator))
            .collect();
        Self::from_stages(stages)
    }

    /// Build a chain from ready stages, starting at the first one
    pub fn from_stages(stages: Vec<FilterStage>) -> Self {
        Self { stages, index: 0 }
    }

    /// Step to the neighbouring stage; returns whether the selection changed
    pub fn select(&mut self, direction: Direction) -> bool {
        let candidate = match direction {
            Direction::Next => self.index.checked_add(1),
            Direction::Previous => self.index.checked_sub(1),
        };
        match candidate {
            Some(index) if index < self.stages.len() => {
                self.index = index;
                debug!(index, filter = %self.stages[index].identifier(), "Filter selected");
                true
            }
            _ => false,
        }
    }

    /// The only stage eligible to render, `None` for an empty chain
    pub fn current(&self) -> Option<&FilterStage> {
        self.stages.get(self.index)
    }

    pub fn current_mut(&mut self) -> Option<&mut FilterStage> {
        self.stages.get_mut(self.index)
    }

    /// Identifier of the active stage
    pub fn current_name(&self) -> Option<&str> {
        self.current().map(FilterStage::identifier)
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        self.stages.iter().map(FilterStage::identifier).collect()
    }

    pub fn stages(&self) -> &[FilterStage] {
        &self.stages
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::camera::types::{FrameFormat, PixelFormat};
    use crate::config::KernelSettings;
    use crate::pipelines::filter::context::SoftwareContext;

    const NAMES: [&str; 4] = ["", "CIGaussianBlur", "CIComicEffect", "CICrystallize"];

    fn chain(names: &[&str]) -> FilterChain {
        FilterChain::initialize(
            names,
            &KernelRegistry::with_builtin(&KernelSettings::default()),
            Arc::new(SoftwareContext),
            BufferPoolAllocator::default(),
        )
    }

    #[test]
    fn test_initial_state() {
        let chain = chain(&NAMES);
        assert_eq!(chain.len(), 4);
        assert_eq!(chain.index(), 0);
        assert_eq!(chain.current_name(), Some(""));
        assert!(chain.current().unwrap().kernel().is_none());
        assert_eq!(chain.names(), NAMES.to_vec());
    }

    #[test]
    fn test_next_clamps_at_end() {
        let mut chain = chain(&NAMES);
        assert!(chain.select(Direction::Next));
        assert!(chain.select(Direction::Next));
        assert!(chain.select(Direction::Next));
        assert_eq!(chain.index(), 3);
        assert_eq!(chain.current_name(), Some("CICrystallize"));

        assert!(!chain.select(Direction::Next));
        assert_eq!(chain.index(), 3);
    }

    #[test]
    fn test_previous_clamps_at_start() {
        let mut chain = chain(&NAMES);
        assert!(!chain.select(Direction::Previous));
        assert_eq!(chain.index(), 0);
        chain.select(Direction::Next);
        assert!(chain.select(Direction::Previous));
        assert_eq!(chain.index(), 0);
    }

    #[test]
    fn test_index_stays_in_bounds_for_any_sequence() {
        let mut chain = chain(&NAMES);
        // Deterministic pseudo-random walk
        let mut state = 0x2545_F491_u32;
        for _ in 0..500 {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            let direction = if state & 1 == 0 {
                Direction::Next
            } else {
                Direction::Previous
            };
            let before = chain.index();
            let changed = chain.select(direction);
            assert!(chain.index() < chain.len());
            if !changed {
                assert_eq!(chain.index(), before);
                assert!(before == 0 || before == chain.len() - 1);
            }
        }
    }

    #[test]
    fn test_empty_chain() {
        let mut chain = chain(&[]);
        assert!(chain.is_empty());
        assert!(chain.current().is_none());
        assert!(!chain.select(Direction::Next));
        assert!(!chain.select(Direction::Previous));
    }

    #[test]
    fn test_switching_keeps_previous_stage_prepared() {
        let mut chain = chain(&NAMES);
        chain.select(Direction::Next);
        let format = FrameFormat::new(PixelFormat::Bgra8, 4, 4);
        chain.current_mut().unwrap().prepare(&format, 3);

        chain.select(Direction::Next);
        assert!(!chain.current().unwrap().is_prepared());
        chain.select(Direction::Previous);
        assert!(chain.current().unwrap().is_prepared());
    }
}
