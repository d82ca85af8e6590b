//! Turning resolved objects into rows of the variables view.
//!
//! These walks run in the caller's task, not in the session actor, because
//! rendering a row can wait on further fetches (an object reference needs its
//! class name). They only talk to the actor through [`ObjectSource`].

use std::{future::Future, sync::Arc};

use godot_wire::{ScopeKind, Variant};
use serde::Serialize;

use crate::{
    error::{DebugError, DebugResult},
    format,
    handles::{GodotIdWithPath, RootId},
    variables::{self, GodotObject},
};

/// Access to the session's fetch cache and handle table.
pub trait ObjectSource: Send + Sync {
    /// The instance or scope behind `id`, fetching it when not cached.
    fn object(
        &self,
        id: RootId,
        force_refresh: bool,
    ) -> impl Future<Output = DebugResult<Arc<GodotObject>>> + Send;

    fn handle_for(&self, key: GodotIdWithPath) -> impl Future<Output = DebugResult<i64>> + Send;

    fn key_for(&self, handle: i64) -> impl Future<Output = DebugResult<GodotIdWithPath>> + Send;
}

/// One row of the variables view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VariableView {
    pub name: String,
    pub value: String,
    #[serde(rename = "type")]
    pub type_name: String,
    /// Handle to expand this row with, `0` for leaves.
    pub variables_reference: i64,
}

/// The children of the value behind `handle`.
pub async fn variables<S: ObjectSource>(
    source: &S,
    handle: i64,
    max_depth: usize,
) -> DebugResult<Vec<VariableView>> {
    let key = source.key_for(handle).await?;
    if key.path.len() > max_depth {
        return Err(DebugError::InvalidRequest(format!(
            "variable path deeper than {max_depth} levels"
        )));
    }
    let root = source.object(key.root, false).await?;
    let entries = if key.path.is_empty() {
        root.sub_values.clone()
    } else {
        variables::children(&walk(&root, &key.path)?)
    };

    let mut rows = Vec::with_capacity(entries.len());
    for (name, value) in entries {
        rows.push(render_variable(source, &key, name, value).await?);
    }
    Ok(rows)
}

/// Follows `path` from the properties of `root`.
pub fn walk(root: &GodotObject, path: &[String]) -> DebugResult<Variant> {
    let not_found = |segment: &str| DebugError::PathNotFound {
        path: path.join("."),
        segment: segment.to_string(),
    };
    let Some((first, rest)) = path.split_first() else {
        return Err(DebugError::InvalidRequest("empty variable path".to_string()));
    };
    let mut value = root.get(first).cloned().ok_or_else(|| not_found(first))?;
    for segment in rest {
        value = variables::child(&value, segment).ok_or_else(|| not_found(segment))?;
    }
    Ok(value)
}

/// Renders `name = value`, found under `parent`, and hands out the handle to
/// expand it with.
pub async fn render_variable<S: ObjectSource>(
    source: &S,
    parent: &GodotIdWithPath,
    name: String,
    value: Variant,
) -> DebugResult<VariableView> {
    let type_name = value.type_name().to_string();
    if let Variant::ObjectId(id) = value {
        if id == 0 {
            return Ok(VariableView {
                name,
                value: "null".to_string(),
                type_name,
                variables_reference: 0,
            });
        }
        let rendered = match source.object(RootId::Object(id), false).await {
            Ok(object) => format::render_object_ref(&object.class_name, id, object.repr()),
            Err(err) => {
                tracing::warn!(
                    target: "godot.dap.variables",
                    object_id = id,
                    error = %err,
                    "could not resolve object reference"
                );
                format::render_value(&value)
            }
        };
        let variables_reference = source.handle_for(GodotIdWithPath::root(id)).await?;
        return Ok(VariableView {
            name,
            value: rendered,
            type_name,
            variables_reference,
        });
    }

    let variables_reference = if variables::is_expandable(&value) {
        source.handle_for(parent.child(&name)).await?
    } else {
        0
    };
    Ok(VariableView {
        name,
        value: format::render_value(&value),
        type_name,
        variables_reference,
    })
}

/// Looks up a dotted name (`player.stats.hp`) as seen from `frame_id`. The
/// first segment is searched in locals, then members, then globals.
pub async fn variable_by_name<S: ObjectSource>(
    source: &S,
    frame_id: u32,
    expression: &str,
    max_depth: usize,
) -> DebugResult<VariableView> {
    let expression = expression.trim();
    let segments: Vec<&str> = expression.split('.').collect();
    if segments.iter().any(|s| s.is_empty()) {
        return Err(DebugError::InvalidRequest(format!(
            "not a variable path: {expression:?}"
        )));
    }
    if segments.len() > max_depth {
        return Err(DebugError::InvalidRequest(format!(
            "variable path deeper than {max_depth} levels"
        )));
    }
    let not_found = |segment: &str| DebugError::PathNotFound {
        path: expression.to_string(),
        segment: segment.to_string(),
    };

    let first = segments[0];
    let mut found = None;
    for kind in ScopeKind::ALL {
        let scope_id = RootId::scope(frame_id, kind);
        let scope = source.object(scope_id, false).await?;
        if let Some(value) = scope.get(first) {
            found = Some((GodotIdWithPath::root(scope_id), value.clone()));
            break;
        }
    }
    let (mut parent, mut value) = found.ok_or_else(|| not_found(first))?;
    let mut name = first.to_string();

    for &segment in &segments[1..] {
        match &value {
            Variant::ObjectId(id) => {
                let object = source.object(RootId::Object(*id), false).await?;
                let next = object.get(segment).cloned().ok_or_else(|| not_found(segment))?;
                parent = GodotIdWithPath::root(*id);
                value = next;
            }
            _ => {
                let next = variables::child(&value, segment).ok_or_else(|| not_found(segment))?;
                parent = parent.child(&name);
                value = next;
            }
        }
        name = segment.to_string();
    }

    let mut view = render_variable(source, &parent, name, value).await?;
    view.name = expression.to_string();
    Ok(view)
}
