//! Error type shared by every stage of the grabber.

use std::time::Duration;

use thiserror::Error;

use crate::types::{PixelFormat, Size, StreamKind};

#[derive(Debug, Error)]
pub enum GrabberError {
    /// No device matched the requested URI, or the provider refused to open it.
    #[error("couldn't open device: {0}")]
    Device(String),

    /// The device has no sensor of this kind.
    #[error("couldn't create {0} stream")]
    StreamUnavailable(StreamKind),

    /// A stream refused a mode change, start, or read.
    #[error("{kind} stream: {message}")]
    Stream { kind: StreamKind, message: String },

    /// The stream's producer went away; no further frames will arrive.
    #[error("{0} stream closed")]
    StreamClosed(StreamKind),

    #[error("unexpected frame format {format:?} on {kind} stream")]
    UnexpectedFormat { kind: StreamKind, format: PixelFormat },

    #[error("buffer size mismatch: expected {expected}, got {actual}")]
    BufferSizeMismatch { expected: usize, actual: usize },

    #[error("depth frame is {actual}, registrar expects {expected}")]
    SizeMismatch { expected: Size, actual: Size },

    /// A configuration value is out of its usable range.
    #[error("invalid config: {0}")]
    Config(String),

    /// Registrar rejected its parameters or was used before `init`.
    #[error("registration: {0}")]
    Registration(String),

    /// No stream became ready within the wait bound.
    #[error("wait failed (timeout is {} ms)", .0.as_millis())]
    WaitTimeout(Duration),

    /// The readiness channel at this index of a wait set lost its sender.
    #[error("readiness channel {0} disconnected")]
    Disconnected(usize),

    /// The wait was abandoned by an external stop request.
    #[error("capture stopped")]
    Stopped,

    #[error("color worker disconnected")]
    WorkerGone,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Image(#[from] image::ImageError),

    #[error(transparent)]
    Glob(#[from] glob::PatternError),
}

impl GrabberError {
    #[must_use]
    pub const fn buffer_mismatch(expected: usize, actual: usize) -> Self {
        Self::BufferSizeMismatch { expected, actual }
    }

    pub fn stream(kind: StreamKind, message: impl Into<String>) -> Self {
        Self::Stream {
            kind,
            message: message.into(),
        }
    }

    /// Conditions that end the capture loop without being a failure.
    pub fn is_graceful_end(&self) -> bool {
        matches!(
            self,
            GrabberError::Stopped | GrabberError::StreamClosed(_) | GrabberError::Disconnected(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, GrabberError>;
