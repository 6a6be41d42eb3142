// SPDX-License-Identifier: GPL-3.0-only

//! Error types for the frame pipeline

use std::fmt;
use std::io;
use std::path::PathBuf;
use std::time::Duration;

/// Result type alias using PipelineError
pub type PipelineResult<T> = Result<T, PipelineError>;

/// Fatal pipeline errors
///
/// Transient conditions (the source has no frame ready yet) never become a
/// `PipelineError`; they are reported as [`crate::pipelines::AcquireOutcome::Retry`].
#[derive(Debug)]
pub enum PipelineError {
    /// Not enough buffers granted, or buffer memory could not be set up
    Allocation(String),
    /// A source operation failed (open, ioctl, dequeue, enqueue, ...)
    Source {
        /// Name of the failing operation, e.g. `VIDIOC_DQBUF`
        operation: &'static str,
        /// Underlying cause
        source: io::Error,
    },
    /// The source did not become ready within the configured wait
    Timeout(Duration),
    /// A frame did not satisfy a stage's input contract
    InputContract(String),
    /// A buffer was moved outside its ownership cycle
    Lifecycle(String),
    /// Output file could not be created or written
    Storage {
        /// Destination path
        path: PathBuf,
        /// Underlying cause
        source: io::Error,
    },
    /// Invalid configuration
    Config(String),
}

impl PipelineError {
    /// Wrap an I/O error from a named source operation
    pub fn io(operation: &'static str, source: io::Error) -> Self {
        PipelineError::Source { operation, source }
    }

    /// Wrap an I/O error against an output path
    pub fn storage(path: impl Into<PathBuf>, source: io::Error) -> Self {
        PipelineError::Storage {
            path: path.into(),
            source,
        }
    }
}

impl fmt::Display for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineError::Allocation(msg) => write!(f, "Buffer allocation failed: {}", msg),
            PipelineError::Source { operation, source } => {
                write!(f, "{} error {}, {}", operation, source.raw_os_error().unwrap_or(0), source)
            }
            PipelineError::Timeout(wait) => {
                write!(f, "select timeout: no frame ready after {:.3}s", wait.as_secs_f64())
            }
            PipelineError::InputContract(msg) => write!(f, "Invalid frame: {}", msg),
            PipelineError::Lifecycle(msg) => write!(f, "Buffer ownership violation: {}", msg),
            PipelineError::Storage { path, source } => {
                write!(f, "Cannot write '{}': {}", path.display(), source)
            }
            PipelineError::Config(msg) => write!(f, "Configuration error: {}", msg),
        }
    }
}

impl std::error::Error for PipelineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            PipelineError::Source { source, .. } | PipelineError::Storage { source, .. } => {
                Some(source)
            }
            _ => None,
        }
    }
}

impl From<serde_json::Error> for PipelineError {
    fn from(err: serde_json::Error) -> Self {
        PipelineError::Config(err.to_string())
    }
}
