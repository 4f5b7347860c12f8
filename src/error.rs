//! Render error types.
//!
//! Every device call returns a [`RenderResult`]. Nothing inside the crate
//! terminates the process; the application decides what is fatal through
//! [`RenderError::is_fatal`] and [`OrAbort`].

use std::time::Duration;

use thiserror::Error;

/// Errors that can occur while creating resources or rendering.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RenderError {
    #[error("failed to create device: {0}")]
    DeviceCreation(String),
    #[error("failed to create {kind}: {message}")]
    ResourceCreation { kind: &'static str, message: String },
    #[error("shader compilation failed for '{label}': {message}")]
    ShaderCompilation { label: String, message: String },
    #[error("pipeline creation failed for '{label}': {message}")]
    PipelineCreation { label: String, message: String },
    #[error("queue submission failed: {0}")]
    Submission(String),
    #[error("presentation failed: {0}")]
    Presentation(String),
    #[error("fence wait timed out after {0:?}")]
    FenceTimeout(Duration),
    #[error("GPU device lost")]
    DeviceLost,
    #[error("unsupported: {0}")]
    Unsupported(String),
    #[error("invalid state: {0}")]
    InvalidState(String),
    #[error("surface error: {0}")]
    Surface(String),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

pub type RenderResult<T> = Result<T, RenderError>;

impl RenderError {
    pub(crate) fn resource(kind: &'static str, message: impl ToString) -> Self {
        Self::ResourceCreation {
            kind,
            message: message.to_string(),
        }
    }

    /// Whether the renderer can continue after this error.
    ///
    /// GPU call failures, fence timeouts and unsupported devices leave the
    /// device in an unknown state. Only an out-of-date surface is
    /// recoverable (by recreating the swapchain).
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::Surface(_))
    }
}

/// Terminate the process on a fatal render error.
///
/// Used at the application boundary, where a lost device or a failed GPU
/// call cannot be recovered from.
pub trait OrAbort<T> {
    fn or_abort(self) -> T;
}

impl<T> OrAbort<T> for RenderResult<T> {
    fn or_abort(self) -> T {
        match self {
            Ok(value) => value,
            Err(e) => {
                log::error!("fatal render error: {e}");
                std::process::abort();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = RenderError::DeviceLost;
        assert_eq!(err.to_string(), "GPU device lost");

        let err = RenderError::resource("buffer", "out of memory");
        assert_eq!(err.to_string(), "failed to create buffer: out of memory");

        let err = RenderError::FenceTimeout(Duration::from_secs(1));
        assert_eq!(err.to_string(), "fence wait timed out after 1s");
    }

    #[test]
    fn test_fatal_classification() {
        assert!(RenderError::FenceTimeout(Duration::from_secs(1)).is_fatal());
        assert!(RenderError::Submission("lost".into()).is_fatal());
        assert!(RenderError::Unsupported("no dynamic rendering".into()).is_fatal());
        assert!(!RenderError::Surface("out of date".into()).is_fatal());
    }

    #[test]
    fn test_or_abort_passes_values_through() {
        let ok: RenderResult<u32> = Ok(7);
        assert_eq!(ok.or_abort(), 7);
    }
}
