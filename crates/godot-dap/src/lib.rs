//! Debug adapter for the Godot engine's remote debugger.
//!
//! This crate provides:
//! - A session actor that owns the engine connection, the run/pause state
//!   machine, the breakpoint table and the object fetch cache, driven through
//!   the cloneable [`DebugSession`] handle.
//! - Variable rendering and expansion on top of resolved objects.
//! - A DAP server speaking the Debug Adapter Protocol over stdio.

pub mod breakpoints;
pub mod dap_tokio;
pub mod error;
pub mod format;
pub mod handles;
pub mod hardening;
pub mod launch;
pub mod paths;
pub mod pending;
pub mod resolve;
pub mod session;
pub mod state;
pub mod variables;
pub mod wire_server;

pub use crate::breakpoints::Breakpoint;
pub use crate::error::{DebugError, DebugResult};
pub use crate::handles::{GodotIdWithPath, HandleMapper, RootId};
pub use crate::launch::{LaunchArgs, Launched};
pub use crate::resolve::{ObjectSource, VariableView};
pub use crate::session::{
    DebugSession, DebugSessionConfig, OutputCategory, ScopeHandles, SessionEvent,
};
pub use crate::state::{PauseReason, StackFrame};
pub use crate::variables::GodotObject;
