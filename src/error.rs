//! Error types for the `clipsmith` crate.
//!
//! This module defines [`PipelineError`], the unified error type returned by
//! every fallible operation in the pipeline, and [`ErrorKind`], the flat
//! taxonomy callers match on when they only care about the category of a
//! failure.

use std::{io::Error as IoError, time::Duration};

use image::ImageError;
use thiserror::Error;

/// The unified error type for all `clipsmith` operations.
///
/// Every public method that can fail returns `Result<T, PipelineError>`.
/// Variants carry enough context to diagnose the problem without needing
/// additional logging at the call site.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum PipelineError {
    /// The media resource could not be decoded, or reported zero dimensions.
    #[error("Source error: {reason}")]
    Source {
        /// Underlying reason the source was rejected.
        reason: String,
    },

    /// No frame was delivered within the bounded seek wait.
    #[error("Seek to {timestamp:?} timed out after {waited:?}")]
    SeekTimeout {
        /// The requested playback position.
        timestamp: Duration,
        /// How long the source was allowed to deliver a frame.
        waited: Duration,
    },

    /// The encoder sink or output container failed.
    #[error("Encode error: {0}")]
    Encode(String),

    /// The host rejected the requested encoder configuration.
    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),

    /// Caller parameters are incompatible with the source.
    #[error("Validation error: {0}")]
    Validation(String),

    /// The invocation was cancelled via a
    /// [`CancellationToken`](crate::CancellationToken).
    #[error("Operation cancelled")]
    Cancelled,

    /// An operation was attempted in a capture-session state that does not
    /// allow it.
    #[error("Cannot {operation} while session is {state}")]
    InvalidState {
        /// The attempted operation.
        operation: &'static str,
        /// The state the session was in.
        state: String,
    },

    /// An I/O error occurred while persisting an artifact.
    #[error("I/O error: {0}")]
    Io(#[from] IoError),

    /// An error from the `image` crate while encoding a still sample.
    #[error("Image processing error: {0}")]
    Image(#[from] ImageError),
}

/// Coarse error category, independent of the context a variant carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Undecodable resource or zero dimensions.
    SourceError,
    /// Frame not delivered within the seek bound.
    SeekTimeout,
    /// Sink, container, or persistence failure.
    EncodeError,
    /// Host rejected the encoder configuration.
    ResourceExhausted,
    /// Caller parameters incompatible with the source or session.
    ValidationError,
    /// Caller-initiated cancellation.
    Cancelled,
}

impl PipelineError {
    /// Shorthand for a [`PipelineError::Source`] with the given reason.
    pub fn source_error(reason: impl Into<String>) -> Self {
        PipelineError::Source {
            reason: reason.into(),
        }
    }

    /// The coarse category of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            PipelineError::Source { .. } => ErrorKind::SourceError,
            PipelineError::SeekTimeout { .. } => ErrorKind::SeekTimeout,
            PipelineError::Encode(_) | PipelineError::Io(_) | PipelineError::Image(_) => {
                ErrorKind::EncodeError
            }
            PipelineError::ResourceExhausted(_) => ErrorKind::ResourceExhausted,
            PipelineError::Validation(_) | PipelineError::InvalidState { .. } => {
                ErrorKind::ValidationError
            }
            PipelineError::Cancelled => ErrorKind::Cancelled,
        }
    }

    /// Returns `true` for caller-initiated cancellation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, PipelineError::Cancelled)
    }
}

#[cfg(feature = "ffmpeg")]
impl From<ffmpeg_next::Error> for PipelineError {
    fn from(error: ffmpeg_next::Error) -> Self {
        PipelineError::Source {
            reason: format!("FFmpeg error: {error}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_follow_taxonomy() {
        assert_eq!(PipelineError::source_error("bad").kind(), ErrorKind::SourceError);
        assert_eq!(
            PipelineError::SeekTimeout {
                timestamp: Duration::from_secs(1),
                waited: Duration::from_millis(150),
            }
            .kind(),
            ErrorKind::SeekTimeout
        );
        assert_eq!(
            PipelineError::InvalidState {
                operation: "push a frame",
                state: "Idle".to_string(),
            }
            .kind(),
            ErrorKind::ValidationError
        );
        assert!(PipelineError::Cancelled.is_cancelled());
    }

    #[test]
    fn messages_carry_context() {
        let message = PipelineError::SeekTimeout {
            timestamp: Duration::from_secs(5),
            waited: Duration::from_millis(150),
        }
        .to_string();
        assert!(message.contains("5s"), "{message}");
        assert!(message.contains("150ms"), "{message}");
    }
}
