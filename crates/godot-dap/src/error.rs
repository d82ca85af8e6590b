use thiserror::Error;

use crate::handles::RootId;

pub type DebugResult<T> = Result<T, DebugError>;

#[derive(Error, Debug)]
pub enum DebugError {
    #[error("wire: {0}")]
    Wire(#[from] godot_wire::WireError),
    #[error("timed out waiting for object {0}")]
    ResolutionTimeout(RootId),
    #[error("fetch of object {id} failed: {reason}")]
    FetchRejected { id: RootId, reason: String },
    #[error("unknown variablesReference {0}")]
    UnknownHandle(i64),
    #[error("a handle already exists for {0}")]
    DuplicateHandle(String),
    #[error("Cannot retrieve path '{path}'. Following subpath not found: '{segment}'")]
    PathNotFound { path: String, segment: String },
    #[error("no engine is connected")]
    NotConnected,
    #[error("paused on an exception; only terminate is allowed")]
    ExceptionMode,
    #[error("debug session closed")]
    SessionClosed,
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}
