use std::{collections::HashMap, fmt};

use godot_wire::ScopeKind;

use crate::error::{DebugError, DebugResult};

/// What a fetch is keyed on: an engine instance or one scope of a frame.
///
/// Instance ids are opaque 64-bit values. RefCounted instances have the top
/// bit set, so they must not go through a signed integer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RootId {
    Object(u64),
    Scope { frame_id: u32, kind: ScopeKind },
}

impl RootId {
    pub fn scope(frame_id: u32, kind: ScopeKind) -> Self {
        RootId::Scope { frame_id, kind }
    }

    pub fn object_id(self) -> Option<u64> {
        match self {
            RootId::Object(id) => Some(id),
            RootId::Scope { .. } => None,
        }
    }

    pub fn is_scope(self) -> bool {
        matches!(self, RootId::Scope { .. })
    }
}

impl From<u64> for RootId {
    fn from(id: u64) -> Self {
        RootId::Object(id)
    }
}

impl fmt::Display for RootId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RootId::Object(id) => write!(f, "{id}"),
            RootId::Scope { frame_id, kind } => write!(f, "{}@{frame_id}", kind.label()),
        }
    }
}

/// A value reachable from a root: the root plus the names walked from it.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct GodotIdWithPath {
    pub root: RootId,
    pub path: Vec<String>,
}

impl GodotIdWithPath {
    pub fn new(root: impl Into<RootId>, path: Vec<String>) -> Self {
        Self {
            root: root.into(),
            path,
        }
    }

    pub fn root(root: impl Into<RootId>) -> Self {
        Self::new(root, Vec::new())
    }

    pub fn child(&self, name: &str) -> Self {
        let mut path = self.path.clone();
        path.push(name.to_string());
        Self::new(self.root, path)
    }
}

impl fmt::Display for GodotIdWithPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.root, self.path.join("/"))
    }
}

/// Bidirectional `GodotIdWithPath <-> handle` map backing DAP
/// `variablesReference` values.
///
/// Handles start at 1 (0 means "not expandable" in DAP) and are never reused
/// within a session.
#[derive(Debug)]
pub struct HandleMapper {
    next_handle: i64,
    by_key: HashMap<GodotIdWithPath, i64>,
    by_handle: HashMap<i64, GodotIdWithPath>,
}

impl Default for HandleMapper {
    fn default() -> Self {
        Self {
            next_handle: 1,
            by_key: HashMap::new(),
            by_handle: HashMap::new(),
        }
    }
}

impl HandleMapper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates a handle for `key`. A key that already has one is a caller bug.
    pub fn create(&mut self, key: GodotIdWithPath) -> DebugResult<i64> {
        if self.by_key.contains_key(&key) {
            return Err(DebugError::DuplicateHandle(key.to_string()));
        }
        let handle = self.next_handle;
        self.next_handle += 1;
        self.by_handle.insert(handle, key.clone());
        self.by_key.insert(key, handle);
        Ok(handle)
    }

    pub fn get_or_create(&mut self, key: GodotIdWithPath) -> i64 {
        if let Some(handle) = self.by_key.get(&key) {
            return *handle;
        }
        let handle = self.next_handle;
        self.next_handle += 1;
        self.by_handle.insert(handle, key.clone());
        self.by_key.insert(key, handle);
        handle
    }

    pub fn handle(&self, key: &GodotIdWithPath) -> Option<i64> {
        self.by_key.get(key).copied()
    }

    pub fn lookup(&self, handle: i64) -> DebugResult<&GodotIdWithPath> {
        self.by_handle
            .get(&handle)
            .ok_or(DebugError::UnknownHandle(handle))
    }

    pub fn len(&self) -> usize {
        self.by_handle.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_handle.is_empty()
    }
}
