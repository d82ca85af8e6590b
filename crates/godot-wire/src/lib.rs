//! Godot remote debugger wire protocol.
//!
//! `godot-dap` consumes this crate to talk to a running engine: the Variant
//! codec ([`variant`]), length-prefixed framing ([`frame`]), the command layer
//! ([`command`]) and a tokio transport with one reader and one FIFO writer
//! ([`connection`]).

pub mod command;
pub mod connection;
pub mod frame;
pub mod types;
pub mod variant;

pub use command::{
    Command, EngineMessage, FrameVars, ProtocolRevision, SceneNode, ScopeKind, ScopeVars,
    StackFrameInfo,
};
pub use connection::{Connection, ConnectionConfig, ConnectionEvent};
pub use frame::{encode_frame, FrameSplitter, DEFAULT_MAX_FRAME_BYTES};
pub use types::{Result, WireError};
pub use variant::{
    decode_variant, decode_variant_exact, encode_variant, Variant, VariantType, DEFAULT_MAX_DEPTH,
};

// The mock engine is only needed for tests and downstream integration suites.
// Compile it for godot-wire's own unit tests unconditionally (via `cfg(test)`), while keeping
// it behind the `wire-test-support` feature for normal builds and for downstream crates.
#[cfg(any(test, feature = "wire-test-support"))]
pub mod mock;

/// Runs arbitrary bytes through the inbound path: splitting, decoding and
/// command parsing. Used by the fuzz targets; must never panic.
#[cfg(feature = "fuzzing")]
pub fn decode_stream_bytes(input: &[u8]) -> Vec<Result<EngineMessage>> {
    let mut splitter = FrameSplitter::new(1 << 20);
    let payloads = match splitter.push(input) {
        Ok(payloads) => payloads,
        Err(err) => return vec![Err(err)],
    };
    payloads
        .iter()
        .map(|payload| Command::decode(payload, DEFAULT_MAX_DEPTH).and_then(EngineMessage::parse))
        .collect()
}
