// SPDX-License-Identifier: GPL-3.0-only

use crate::constants::{
    DEFAULT_FILTERS, DEFAULT_FRAME_QUEUE_DEPTH, DEFAULT_MAX_POOL_BYTES, FULL_JPEG_QUALITY,
    OUTPUT_RETAINED_BUFFER_COUNT_HINT,
};
use crate::errors::AppError;
use crate::render::Rotation;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Directory name used under the platform config directory
const CONFIG_DIR_NAME: &str = "filter-camera";
const CONFIG_FILE_NAME: &str = "config.json";

/// Tunable parameters of the built-in kernels
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KernelSettings {
    /// Gaussian blur sigma in pixels
    pub blur_radius: f32,
    /// Crystallize cell size in pixels
    pub crystallize_radius: f32,
    /// Color levels per channel of the comic effect
    pub comic_levels: u8,
    /// Sobel magnitude above which the comic effect draws an outline
    pub comic_edge_threshold: f32,
    /// Sepia blend, 0.0 (none) to 1.0 (full)
    pub sepia_intensity: f32,
}

impl Default for KernelSettings {
    fn default() -> Self {
        Self {
            blur_radius: 10.0,
            crystallize_radius: 20.0,
            comic_levels: 4,
            comic_edge_threshold: 160.0,
            sepia_intensity: 1.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Kernel identifiers of the filter chain, in swipe order ("" = no filter)
    pub filters: Vec<String>,
    /// Mirror the preview horizontally (selfie mode)
    pub mirror_preview: bool,
    /// Rotation applied to preview frames on the render surface
    pub preview_rotation: Rotation,
    /// Output buffers per filter stage
    pub retained_buffer_hint: usize,
    /// Raw frames allowed to queue for the frame worker
    pub frame_queue_depth: usize,
    /// Largest output pool a stage may allocate, in bytes
    pub max_pool_bytes: usize,
    /// JPEG quality for filtered still photos (1-100)
    pub photo_quality: u8,
    /// Rotation baked into saved photos
    pub photo_rotation: Rotation,
    /// Where captured photos are written (default: ~/Pictures/filter-camera)
    pub output_dir: Option<PathBuf>,
    /// Kernel parameters
    pub kernels: KernelSettings,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            filters: DEFAULT_FILTERS.iter().map(|name| name.to_string()).collect(),
            mirror_preview: true, // Front camera preview is mirrored
            preview_rotation: Rotation::Rotate90,
            retained_buffer_hint: OUTPUT_RETAINED_BUFFER_COUNT_HINT,
            frame_queue_depth: DEFAULT_FRAME_QUEUE_DEPTH,
            max_pool_bytes: DEFAULT_MAX_POOL_BYTES,
            photo_quality: FULL_JPEG_QUALITY,
            photo_rotation: Rotation::Rotate0,
            output_dir: None,
            kernels: KernelSettings::default(),
        }
    }
}

impl Config {
    /// Default location of the config file
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME))
    }

    /// Load from the default location, falling back to defaults
    pub fn load() -> Self {
        let Some(path) = Self::default_path() else {
            debug!("No config directory available, using defaults");
            return Self::default();
        };
        if !path.exists() {
            debug!(path = %path.display(), "No config file, using defaults");
            return Self::default();
        }
        match Self::load_from(&path) {
            Ok(config) => config,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Invalid config, using defaults");
                Self::default()
            }
        }
    }

    /// Load and validate a config file
    pub fn load_from(path: &Path) -> Result<Self, AppError> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&contents)
            .map_err(|e| AppError::Config(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        info!(path = %path.display(), filters = config.filters.len(), "Loaded config");
        Ok(config)
    }

    /// Write the config as pretty JSON, creating parent directories
    pub fn save_to(&self, path: &Path) -> Result<(), AppError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)
            .map_err(|e| AppError::Config(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Reject values the pipeline cannot run with
    pub fn validate(&self) -> Result<(), AppError> {
        if self.retained_buffer_hint == 0 {
            return Err(AppError::Config(
                "retained_buffer_hint must be at least 1".to_string(),
            ));
        }
        if self.frame_queue_depth == 0 {
            return Err(AppError::Config(
                "frame_queue_depth must be at least 1".to_string(),
            ));
        }
        if !(1..=100).contains(&self.photo_quality) {
            return Err(AppError::Config(format!(
                "photo_quality must be within 1-100, got {}",
                self.photo_quality
            )));
        }
        Ok(())
    }

    /// Directory photos are saved to
    pub fn photo_dir(&self) -> PathBuf {
        self.output_dir.clone().unwrap_or_else(default_photo_dir)
    }
}

/// `~/Pictures/filter-camera`, or the working directory if there is no picture dir
pub fn default_photo_dir() -> PathBuf {
    dirs::picture_dir()
        .map(|dir| dir.join(CONFIG_DIR_NAME))
        .unwrap_or_else(|| PathBuf::from("."))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: Config = serde_json::from_str(r#"{ "mirror_preview": false }"#).unwrap();
        assert!(!config.mirror_preview);
        assert_eq!(config.filters.len(), 4);
        assert_eq!(config.kernels, KernelSettings::default());
    }

    #[test]
    fn test_validate() {
        assert!(Config::default().validate().is_ok());

        let config = Config {
            retained_buffer_hint: 0,
            ..Config::default()
        };
        assert!(config.validate().is_err());

        let config = Config {
            photo_quality: 0,
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_save_and_load() {
        let dir = std::env::temp_dir().join(format!("filter-camera-config-{}", std::process::id()));
        let path = dir.join("config.json");
        let config = Config {
            filters: vec!["".to_string(), "CISepiaTone".to_string()],
            preview_rotation: Rotation::Rotate270,
            ..Config::default()
        };
        config.save_to(&path).unwrap();
        assert_eq!(Config::load_from(&path).unwrap(), config);
        let _ = std::fs::remove_dir_all(&dir);
    }
}
