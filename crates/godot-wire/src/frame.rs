//! Length-prefixed framing.
//!
//! A frame is a little-endian `u32` length followed by exactly that many bytes
//! of payload. TCP reads do not respect frame boundaries, so [`FrameSplitter`]
//! keeps whatever tail of the stream has not formed a complete frame yet.

use crate::types::{Result, WireError};

pub const FRAME_HEADER_LEN: usize = 4;

/// Default cap on a single inbound frame.
pub const DEFAULT_MAX_FRAME_BYTES: usize = 64 * 1024 * 1024;

/// Prefixes `payload` with its length.
pub fn encode_frame(payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(FRAME_HEADER_LEN + payload.len());
    out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    out.extend_from_slice(payload);
    out
}

#[derive(Debug)]
pub struct FrameSplitter {
    stash: Vec<u8>,
    max_frame_bytes: usize,
}

impl Default for FrameSplitter {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_BYTES)
    }
}

impl FrameSplitter {
    pub fn new(max_frame_bytes: usize) -> Self {
        Self {
            stash: Vec::new(),
            max_frame_bytes,
        }
    }

    /// Bytes received but not yet delivered as part of a frame.
    pub fn buffered(&self) -> usize {
        self.stash.len()
    }

    /// Appends `bytes` and returns every frame payload completed by them, in
    /// stream order.
    ///
    /// A declared length above the configured maximum is an error; the
    /// splitter must not be fed again afterwards since the stream position is
    /// lost.
    pub fn push(&mut self, bytes: &[u8]) -> Result<Vec<Vec<u8>>> {
        self.stash.extend_from_slice(bytes);

        let mut frames = Vec::new();
        let mut consumed = 0;
        loop {
            let rest = &self.stash[consumed..];
            if rest.len() < FRAME_HEADER_LEN {
                break;
            }
            let len = u32::from_le_bytes([rest[0], rest[1], rest[2], rest[3]]) as usize;
            if len > self.max_frame_bytes {
                return Err(WireError::FrameTooLarge {
                    len,
                    max: self.max_frame_bytes,
                });
            }
            let end = FRAME_HEADER_LEN + len;
            if rest.len() < end {
                break;
            }
            frames.push(rest[FRAME_HEADER_LEN..end].to_vec());
            consumed += end;
        }

        self.stash.drain(..consumed);
        Ok(frames)
    }
}
