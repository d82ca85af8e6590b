use godot_wire::{ScopeKind, ScopeVars, Variant};

use crate::{format, handles::RootId};

/// A resolved remote value: an inspected instance or one scope of a frame.
#[derive(Debug, Clone, PartialEq)]
pub struct GodotObject {
    pub id: RootId,
    pub class_name: String,
    /// Properties (or scope variables) in engine order.
    pub sub_values: Vec<(String, Variant)>,
}

impl GodotObject {
    pub fn new(
        id: impl Into<RootId>,
        class_name: impl Into<String>,
        sub_values: Vec<(String, Variant)>,
    ) -> Self {
        Self {
            id: id.into(),
            class_name: class_name.into(),
            sub_values,
        }
    }

    /// The object standing for `kind` of frame `frame_id`.
    pub fn scope(frame_id: u32, kind: ScopeKind, vars: Vec<(String, Variant)>) -> Self {
        Self::new(RootId::scope(frame_id, kind), kind.label(), vars)
    }

    pub fn get(&self, name: &str) -> Option<&Variant> {
        self.sub_values
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value)
    }

    /// A user-provided string that replaces the default `Class<id>` rendering.
    pub fn repr(&self) -> Option<&str> {
        match self.get("repr") {
            Some(Variant::String(text)) => Some(text),
            _ => None,
        }
    }
}

/// Outcome of feeding one `stack_frame_var` into the accumulator.
#[derive(Debug, PartialEq)]
pub enum Accumulated {
    Incomplete,
    Complete(ScopeVars),
    /// More variables arrived than the header announced.
    Unexpected,
}

/// Collects the `stack_frame_var` stream that follows a
/// `stack_frame_vars <count>` header.
#[derive(Debug, Default)]
pub struct FrameVarsAccumulator {
    remaining: usize,
    vars: ScopeVars,
}

impl FrameVarsAccumulator {
    /// Starts a new batch. A count of zero completes immediately.
    pub fn begin(&mut self, count: usize) -> Option<ScopeVars> {
        self.vars = ScopeVars::default();
        self.remaining = count;
        if count == 0 {
            return Some(std::mem::take(&mut self.vars));
        }
        None
    }

    pub fn push(&mut self, name: String, scope: ScopeKind, value: Variant) -> Accumulated {
        if self.remaining == 0 {
            return Accumulated::Unexpected;
        }
        self.vars.scope_mut(scope).push((name, value));
        self.remaining -= 1;
        if self.remaining == 0 {
            return Accumulated::Complete(std::mem::take(&mut self.vars));
        }
        Accumulated::Incomplete
    }

    pub fn is_collecting(&self) -> bool {
        self.remaining > 0
    }
}

/// The expandable parts of `value`, in display order. Scalars have none.
pub fn children(value: &Variant) -> Vec<(String, Variant)> {
    fn indexed<T>(items: &[T], f: impl Fn(&T) -> Variant) -> Vec<(String, Variant)> {
        items
            .iter()
            .enumerate()
            .map(|(i, item)| (i.to_string(), f(item)))
            .collect()
    }
    fn named(parts: Vec<(&str, Variant)>) -> Vec<(String, Variant)> {
        parts
            .into_iter()
            .map(|(name, value)| (name.to_string(), value))
            .collect()
    }

    match value {
        Variant::Nil
        | Variant::Bool(_)
        | Variant::Int(_)
        | Variant::Float(_)
        | Variant::String(_)
        | Variant::Rid(_)
        | Variant::Callable
        | Variant::Signal(_) => Vec::new(),
        Variant::Vector2(v) => named(vec![("x", v.x.into()), ("y", v.y.into())]),
        Variant::Vector2i(v) => named(vec![("x", v.x.into()), ("y", v.y.into())]),
        Variant::Vector3(v) => named(vec![("x", v.x.into()), ("y", v.y.into()), ("z", v.z.into())]),
        Variant::Vector3i(v) => named(vec![("x", v.x.into()), ("y", v.y.into()), ("z", v.z.into())]),
        Variant::Vector4(v) => named(vec![
            ("x", v.x.into()),
            ("y", v.y.into()),
            ("z", v.z.into()),
            ("w", v.w.into()),
        ]),
        Variant::Vector4i(v) => named(vec![
            ("x", v.x.into()),
            ("y", v.y.into()),
            ("z", v.z.into()),
            ("w", v.w.into()),
        ]),
        Variant::Rect2(r) => named(vec![
            ("position", r.position.into()),
            ("size", r.size.into()),
        ]),
        Variant::Rect2i(r) => named(vec![
            ("position", Variant::Vector2i(r.position)),
            ("size", Variant::Vector2i(r.size)),
        ]),
        Variant::Aabb(b) => named(vec![
            ("position", b.position.into()),
            ("size", b.size.into()),
        ]),
        Variant::Transform2D(t) => named(vec![
            ("origin", t.origin.into()),
            ("x", t.x.into()),
            ("y", t.y.into()),
        ]),
        Variant::Transform3D(t) => named(vec![
            ("basis", Variant::Basis(t.basis)),
            ("origin", t.origin.into()),
        ]),
        Variant::Basis(b) => named(vec![("x", b.x.into()), ("y", b.y.into()), ("z", b.z.into())]),
        Variant::Plane(p) => named(vec![
            ("x", p.normal.x.into()),
            ("y", p.normal.y.into()),
            ("z", p.normal.z.into()),
            ("d", p.d.into()),
        ]),
        Variant::Quaternion(q) => named(vec![
            ("x", q.x.into()),
            ("y", q.y.into()),
            ("z", q.z.into()),
            ("w", q.w.into()),
        ]),
        Variant::Projection(p) => named(vec![
            ("x", Variant::Vector4(p.x)),
            ("y", Variant::Vector4(p.y)),
            ("z", Variant::Vector4(p.z)),
            ("w", Variant::Vector4(p.w)),
        ]),
        Variant::Color(c) => named(vec![
            ("r", f64::from(c.r).into()),
            ("g", f64::from(c.g).into()),
            ("b", f64::from(c.b).into()),
            ("a", f64::from(c.a).into()),
        ]),
        Variant::StringName(s) => named(vec![("value", s.as_str().into())]),
        Variant::NodePath(p) => named(vec![
            ("names", Variant::PackedStringArray(p.names.clone())),
            ("sub_names", Variant::PackedStringArray(p.subnames.clone())),
            ("absolute", p.absolute.into()),
        ]),
        Variant::Object(dump) => dump.properties().to_vec(),
        Variant::ObjectId(id) => named(vec![("id", Variant::Int(*id as i64))]),
        Variant::Dictionary(entries) => entries
            .iter()
            .map(|(key, value)| (format::render_key(key), value.clone()))
            .collect(),
        Variant::Array(items) | Variant::TypedArray { items, .. } => indexed(items, Clone::clone),
        Variant::PackedByteArray(items) => indexed(items, |b| Variant::Int(i64::from(*b))),
        Variant::PackedInt32Array(items) => indexed(items, |v| Variant::Int(i64::from(*v))),
        Variant::PackedInt64Array(items) => indexed(items, |v| Variant::Int(*v)),
        Variant::PackedFloat32Array(items) => indexed(items, |v| Variant::Float(f64::from(*v))),
        Variant::PackedFloat64Array(items) => indexed(items, |v| Variant::Float(*v)),
        Variant::PackedStringArray(items) => indexed(items, |s| Variant::String(s.clone())),
        Variant::PackedVector2Array(items) => indexed(items, |v| Variant::Vector2(*v)),
        Variant::PackedVector3Array(items) => indexed(items, |v| Variant::Vector3(*v)),
        Variant::PackedColorArray(items) => indexed(items, |c| Variant::Color(*c)),
        Variant::PackedVector4Array(items) => indexed(items, |v| Variant::Vector4(*v)),
    }
}

/// Whether `value` gets a handle of its own when listed as a variable.
pub fn is_expandable(value: &Variant) -> bool {
    !matches!(value, Variant::ObjectId(_)) && !children(value).is_empty()
}

/// The child `name` of `value`, if it has one.
pub fn child(value: &Variant, name: &str) -> Option<Variant> {
    children(value)
        .into_iter()
        .find(|(key, _)| key == name)
        .map(|(_, value)| value)
}
