//! Error types for the OpenDOTT transfer core.
//!
//! Every variant of [`Error`] is one category of the failure taxonomy. All of
//! them are recovered locally: the session resolves to `Failed`, the buffer is
//! released and control returns to `Idle`.

use crate::format::ImageFormat;
use thiserror::Error;

/// Transfer errors, one variant per failure category
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// Malformed control frame
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Allocation or commit failure, invalid declared size
    #[error("resource error: {0}")]
    Resource(#[from] ResourceError),

    /// Chunk exceeds remaining capacity
    #[error("overflow: {received} + {len} exceeds limit of {limit} bytes")]
    Overflow {
        /// Bytes accepted before the offending chunk
        received: usize,
        /// Length of the offending chunk
        len: usize,
        /// Capacity or declared size that would be exceeded
        limit: usize,
    },

    /// Unrecognized content
    #[error("format error: {0}")]
    Format(#[from] FormatError),

    /// Format-specific bound violated
    #[error("structural error: {0}")]
    Structural(#[from] StructuralError),

    /// Link lost or session cancelled
    #[error("link error: {0}")]
    Link(#[from] LinkError),
}

impl Error {
    /// Taxonomy name of this error, used in logs and status reports
    #[must_use]
    pub fn category(&self) -> &'static str {
        match self {
            Self::Protocol(_) => "ProtocolError",
            Self::Resource(_) => "ResourceError",
            Self::Overflow { .. } => "OverflowError",
            Self::Format(_) => "FormatError",
            Self::Structural(_) => "StructuralError",
            Self::Link(_) => "LinkError",
        }
    }
}

/// Control frame errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// Empty control write
    #[error("empty control frame")]
    Empty,

    /// Frame shorter than its opcode requires
    #[error("frame too short for opcode 0x{opcode:02X}: expected {expected}, got {actual}")]
    TooShort {
        /// Opcode byte
        opcode: u8,
        /// Required length
        expected: usize,
        /// Actual length
        actual: usize,
    },

    /// Trigger write of the wrong length
    #[error("invalid trigger length: {0} (expected 4)")]
    TriggerLength(usize),

    /// Trigger write with an unknown value
    #[error("unknown trigger value: 0x{0:08X}")]
    UnknownTrigger(u32),

    /// Unknown opcode
    #[error("unknown opcode: 0x{0:02X}")]
    UnknownOpcode(u8),

    /// Control frame arrived for the other protocol variant
    #[error("control frame not supported in {0} mode")]
    WrongMode(&'static str),
}

/// Resource errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResourceError {
    /// Declared size outside `(0, max]`
    #[error("invalid declared size: {size} (must be 1..={max})")]
    InvalidSize {
        /// Declared size
        size: u64,
        /// Configured maximum
        max: usize,
    },

    /// Buffer allocation failed
    #[error("failed to allocate {0} byte transfer buffer")]
    Allocation(usize),

    /// Committed image could not be persisted
    #[error("commit failed: {0}")]
    Commit(#[from] StorageError),
}

/// Content classification errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FormatError {
    /// Leading bytes match no known magic
    #[error("unrecognized magic bytes: {0}")]
    Unrecognized(String),

    /// Session ended without any data
    #[error("no data")]
    NoData,
}

/// Structural validation errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StructuralError {
    /// Buffer below the format's minimum size
    #[error("{format} too small: {size} bytes (minimum {minimum})")]
    TooSmall {
        /// Detected format
        format: ImageFormat,
        /// Buffer size
        size: usize,
        /// Minimum size for the format
        minimum: usize,
    },

    /// Dimensions outside `(0, 4096]`
    #[error("invalid {format} dimensions: {width}x{height}")]
    Dimensions {
        /// Detected format
        format: ImageFormat,
        /// Width as read from the header
        width: i64,
        /// Height as read from the header
        height: i64,
    },

    /// PNG without IHDR at offset 12
    #[error("PNG missing IHDR chunk")]
    MissingIhdr,

    /// JPEG without start-of-image marker
    #[error("invalid JPEG start-of-image marker")]
    BadJpegMarker,
}

/// Link-level errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum LinkError {
    /// Peer disconnected mid-session
    #[error("peer disconnected")]
    Disconnected,

    /// Peer cancelled the transfer
    #[error("transfer cancelled by peer")]
    Cancelled,

    /// A new start superseded the session
    #[error("superseded by a new transfer")]
    Superseded,
}

/// Blob store errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StorageError {
    /// No blob under this name
    #[error("blob not found: {0}")]
    NotFound(String),

    /// Name is not a plain file name
    #[error("invalid blob name: {0}")]
    InvalidName(String),

    /// Blob larger than the store accepts
    #[error("blob too large: {size} bytes (maximum {max})")]
    TooLarge {
        /// Blob size
        size: usize,
        /// Maximum accepted size
        max: usize,
    },

    /// Not enough free space
    #[error("no space: need {needed} bytes, {available} available")]
    NoSpace {
        /// Bytes needed
        needed: u64,
        /// Bytes available
        available: u64,
    },

    /// Underlying I/O failure
    #[error("storage I/O error: {0}")]
    Io(String),
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::NotFound {
            Self::NotFound(err.to_string())
        } else {
            Self::Io(err.to_string())
        }
    }
}

/// Render errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RenderError {
    /// Buffer failed re-validation before drawing
    #[error("refusing to render invalid image: {0}")]
    Invalid(String),

    /// No decoder for this format
    #[error("{0} decoding not implemented")]
    Unsupported(ImageFormat),
}

/// Result alias for transfer operations
pub type Result<T> = std::result::Result<T, Error>;
