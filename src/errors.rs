// SPDX-License-Identifier: GPL-3.0-only

//! Error types for the filter camera

use crate::backends::camera::types::AuthorizationStatus;
use std::fmt;

/// Result type alias using AppError
pub type AppResult<T> = Result<T, AppError>;

/// Main application error type
#[derive(Debug, Clone)]
pub enum AppError {
    /// Capture pipeline errors
    Capture(CaptureError),
    /// Preview rendering errors
    Render(RenderError),
    /// Configuration errors
    Config(String),
    /// Storage/filesystem errors
    Storage(String),
    /// Generic error with message
    Other(String),
}

/// Capture pipeline errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureError {
    /// The capture source refused camera access
    NotAuthorized(AuthorizationStatus),
    /// The pipeline is not running
    NotRunning,
    /// The capture source failed to start
    SourceFailed(String),
    /// The capture worker is gone
    WorkerStopped,
}

/// Preview rendering errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenderError {
    /// No GPU adapter available
    NoAdapter,
    /// Device creation failed
    DeviceFailed(String),
    /// Reading back the drawable failed
    ReadbackFailed(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Capture(e) => write!(f, "Capture error: {}", e),
            AppError::Render(e) => write!(f, "Render error: {}", e),
            AppError::Config(msg) => write!(f, "Configuration error: {}", msg),
            AppError::Storage(msg) => write!(f, "Storage error: {}", msg),
            AppError::Other(msg) => write!(f, "{}", msg),
        }
    }
}

impl fmt::Display for CaptureError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CaptureError::NotAuthorized(status) => write!(f, "Camera access {}", status),
            CaptureError::NotRunning => write!(f, "Capture pipeline is not running"),
            CaptureError::SourceFailed(msg) => write!(f, "Capture source failed: {}", msg),
            CaptureError::WorkerStopped => write!(f, "Capture worker stopped"),
        }
    }
}

impl fmt::Display for RenderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RenderError::NoAdapter => write!(f, "No suitable GPU adapter found"),
            RenderError::DeviceFailed(msg) => write!(f, "Failed to create GPU device: {}", msg),
            RenderError::ReadbackFailed(msg) => write!(f, "Drawable readback failed: {}", msg),
        }
    }
}

impl std::error::Error for AppError {}
impl std::error::Error for CaptureError {}
impl std::error::Error for RenderError {}

impl From<CaptureError> for AppError {
    fn from(err: CaptureError) -> Self {
        AppError::Capture(err)
    }
}

impl From<RenderError> for AppError {
    fn from(err: RenderError) -> Self {
        AppError::Render(err)
    }
}

impl From<String> for AppError {
    fn from(msg: String) -> Self {
        AppError::Other(msg)
    }
}

impl From<&str> for AppError {
    fn from(msg: &str) -> Self {
        AppError::Other(msg.to_string())
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Storage(err.to_string())
    }
}
