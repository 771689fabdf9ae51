//! Error types for janus-mr
//!
//! Transport failures are scoped to a single connection, payload failures
//! to a single worker. The coordinator state machine itself never fails.

use std::path::PathBuf;
use thiserror::Error;

/// Top-level error type
#[derive(Error, Debug)]
pub enum MrError {
    /// Framing / encoding errors on a connection
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    /// Map or reduce execution failed
    #[error("Payload error: {0}")]
    Payload(#[from] PayloadError),

    /// Synthetic workload generation or manifest loading failed
    #[error("Workload error: {0}")]
    Workload(String),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors reading or writing a frame
#[derive(Error, Debug)]
pub enum CodecError {
    /// Peer closed the connection between frames
    #[error("connection closed by peer")]
    Closed,

    /// Peer closed the connection in the middle of a frame
    #[error("connection closed mid-frame after {read} of {expected} bytes")]
    Truncated { read: usize, expected: usize },

    /// Frame length prefix (or decompressed body) over the limit
    #[error("frame of {size} bytes exceeds limit of {max} bytes")]
    FrameTooLarge { size: usize, max: usize },

    /// Frame body is not valid zlib data
    #[error("failed to decompress frame: {0}")]
    Decompress(std::io::Error),

    /// Frame body is not a valid envelope
    #[error("failed to decode envelope: {0}")]
    Decode(#[from] prost::DecodeError),

    /// Envelope decoded but carries no body
    #[error("envelope has no body")]
    MissingBody,

    /// A response arrived where a request was expected, or vice versa
    #[error("unexpected '{kind}' message")]
    UnexpectedMessage { kind: &'static str },

    /// Socket errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CodecError {
    /// Whether this is an orderly disconnect rather than a broken stream
    pub fn is_closed(&self) -> bool {
        matches!(self, CodecError::Closed)
    }
}

/// Map / reduce execution errors
#[derive(Error, Debug)]
pub enum PayloadError {
    /// Unknown application name
    #[error("unknown application '{0}'")]
    UnknownApp(String),

    /// Could not read an input partition
    #[error("cannot read partition '{path}': {source}")]
    ReadInput {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Could not read an intermediate result
    #[error("cannot read intermediate result '{path}': {reason}")]
    ReadIntermediate { path: PathBuf, reason: String },

    /// Could not persist an output
    #[error("cannot write '{path}': {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Blocking task panicked or was cancelled
    #[error("payload task aborted: {0}")]
    Aborted(String),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, MrError>;

/// Result type for frame operations
pub type CodecResult<T> = std::result::Result<T, CodecError>;
