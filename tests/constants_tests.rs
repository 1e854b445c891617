// SPDX-License-Identifier: GPL-3.0-only

//! Integration tests for constants module

use filter_camera::constants::{
    DEFAULT_FILTERS, OUTPUT_RETAINED_BUFFER_COUNT_HINT, PROCESSING_INDICATOR_THRESHOLD, kernels,
};
use filter_camera::config::KernelSettings;
use filter_camera::pipelines::filter::KernelRegistry;
use std::time::Duration;

#[test]
fn test_default_filters_start_with_identity() {
    assert_eq!(DEFAULT_FILTERS[0], kernels::IDENTITY);
}

#[test]
fn test_default_filters_resolve() {
    // Every non-identity default must map to a built-in kernel
    let registry = KernelRegistry::with_builtin(&KernelSettings::default());
    for name in DEFAULT_FILTERS.iter().filter(|name| !name.is_empty()) {
        assert!(registry.resolve(name).is_some(), "Unknown default filter {}", name);
    }
}

#[test]
fn test_builtin_kernel_names() {
    let registry = KernelRegistry::with_builtin(&KernelSettings::default());
    let names = registry.names();
    for name in [
        kernels::GAUSSIAN_BLUR,
        kernels::COMIC_EFFECT,
        kernels::CRYSTALLIZE,
        kernels::PHOTO_EFFECT_MONO,
        kernels::SEPIA_TONE,
        kernels::COLOR_INVERT,
    ] {
        assert!(names.iter().any(|n| n == name), "{} not registered", name);
    }
}

#[test]
fn test_pipeline_constants() {
    assert_eq!(OUTPUT_RETAINED_BUFFER_COUNT_HINT, 3);
    assert_eq!(PROCESSING_INDICATOR_THRESHOLD, Duration::from_secs(1));
}
