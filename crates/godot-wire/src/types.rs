use std::io;

use thiserror::Error;

/// Errors produced while encoding, decoding or transporting debugger frames.
///
/// Every decode failure is fatal for the frame it occurred in: once a frame is
/// rejected the byte stream can no longer be trusted, so callers tear the
/// connection down instead of retrying.
#[derive(Debug, Error)]
pub enum WireError {
    #[error("malformed variant at offset {offset}: {reason}")]
    MalformedVariant { offset: usize, reason: String },

    #[error("frame of {len} bytes exceeds the {max} byte limit")]
    FrameTooLarge { len: usize, max: usize },

    #[error("frame decoded with {remaining} trailing bytes")]
    TrailingBytes { remaining: usize },

    #[error("a null object cannot carry properties")]
    NullObjectProperties,

    #[error("malformed command: {0}")]
    MalformedCommand(String),

    #[error("connection closed")]
    ConnectionClosed,

    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, WireError>;
