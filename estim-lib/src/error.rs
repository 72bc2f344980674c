use std::io;
use thiserror::Error;

/// Errors produced while decoding a fixed-layout frame.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("Unknown frame head: {0:#04x}")]
    UnknownHead(u8),

    #[error("Invalid frame length: expected {expected} bytes, got {actual}")]
    InvalidLength { expected: usize, actual: usize },

    #[error("Checksum mismatch: computed {expected:#04x}, frame carries {actual:#04x}")]
    ChecksumMismatch { expected: u8, actual: u8 },

    #[error("Bad frame tail: {0:#04x}")]
    BadTail(u8),
}

/// Errors produced by a device link.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Link unavailable: {path}")]
    LinkUnavailable { path: String },

    #[error("Transfer failed on {path}: {reason}")]
    TransferFailed { path: String, reason: String },

    #[error("Telemetry consumer already attached")]
    AlreadyAttached,

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Rejections from caller-side parameter validation.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParamError {
    #[error("{field} must be finite, got {value}")]
    NotFinite { field: &'static str, value: f32 },

    #[error("{field} must not be negative, got {value}")]
    Negative { field: &'static str, value: f32 },
}

/// Errors returned by a [`crate::controller::SessionHandle`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("Session controller has shut down")]
    Closed,
}
