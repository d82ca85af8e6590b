//! Human-readable rendering of Variant values for the variables view.

use godot_wire::{
    variant::{Basis, Vector2, Vector3, Vector4},
    Variant,
};

/// How many array elements are shown inline before the list is cut off.
pub const ARRAY_PREVIEW_LEN: usize = 10;

/// Floats shown on their own keep up to five fractional digits.
pub fn format_float(value: f64) -> String {
    if !value.is_finite() {
        return value.to_string();
    }
    let text = format!("{value:.5}");
    let text = text.trim_end_matches('0').trim_end_matches('.');
    match text {
        "-0" => "0".to_string(),
        _ => text.to_string(),
    }
}

/// Aggregate components are rounded to one decimal.
pub fn clean_number(value: f64) -> String {
    if !value.is_finite() {
        return value.to_string();
    }
    let rounded = (value * 10.0).round() / 10.0;
    if rounded == 0.0 {
        return "0".to_string();
    }
    rounded.to_string()
}

fn vec2(v: &Vector2) -> String {
    format!("({}, {})", clean_number(v.x), clean_number(v.y))
}

fn vec3(v: &Vector3) -> String {
    format!(
        "({}, {}, {})",
        clean_number(v.x),
        clean_number(v.y),
        clean_number(v.z)
    )
}

fn vec4(v: &Vector4) -> String {
    format!(
        "({}, {}, {}, {})",
        clean_number(v.x),
        clean_number(v.y),
        clean_number(v.z),
        clean_number(v.w)
    )
}

fn basis(b: &Basis) -> String {
    format!("({}, {}, {})", vec3(&b.x), vec3(&b.y), vec3(&b.z))
}

fn list<T>(items: &[T], f: impl Fn(&T) -> String) -> String {
    let shown: Vec<String> = items.iter().take(ARRAY_PREVIEW_LEN).map(f).collect();
    format!("({}) [{}]", items.len(), shown.join(", "))
}

/// The component list that follows the type name, e.g. `(1, 2)`.
fn components(value: &Variant) -> String {
    match value {
        Variant::Vector2(v) => vec2(v),
        Variant::Vector2i(v) => format!("({}, {})", v.x, v.y),
        Variant::Vector3(v) => vec3(v),
        Variant::Vector3i(v) => format!("({}, {}, {})", v.x, v.y, v.z),
        Variant::Vector4(v) => vec4(v),
        Variant::Vector4i(v) => format!("({}, {}, {}, {})", v.x, v.y, v.z, v.w),
        Variant::Rect2(r) => format!("({} - {})", vec2(&r.position), vec2(&r.size)),
        Variant::Rect2i(r) => format!(
            "(({}, {}) - ({}, {}))",
            r.position.x, r.position.y, r.size.x, r.size.y
        ),
        Variant::Aabb(b) => format!("({}, {})", vec3(&b.position), vec3(&b.size)),
        Variant::Transform2D(t) => {
            format!("({} - ({}, {}))", vec2(&t.origin), vec2(&t.x), vec2(&t.y))
        }
        Variant::Transform3D(t) => format!("({} - {})", basis(&t.basis), vec3(&t.origin)),
        Variant::Basis(b) => basis(b),
        Variant::Plane(p) => format!(
            "({}, {}, {}, {})",
            clean_number(p.normal.x),
            clean_number(p.normal.y),
            clean_number(p.normal.z),
            clean_number(p.d)
        ),
        Variant::Quaternion(q) => format!(
            "({}, {}, {}, {})",
            clean_number(q.x),
            clean_number(q.y),
            clean_number(q.z),
            clean_number(q.w)
        ),
        Variant::Projection(p) => format!(
            "({}, {}, {}, {})",
            vec4(&p.x),
            vec4(&p.y),
            vec4(&p.z),
            vec4(&p.w)
        ),
        Variant::Color(c) => format!(
            "({}, {}, {}, {})",
            clean_number(f64::from(c.r)),
            clean_number(f64::from(c.g)),
            clean_number(f64::from(c.b)),
            clean_number(f64::from(c.a))
        ),
        Variant::NodePath(p) => {
            let mut out = format!("(/{}", p.names.join("/"));
            if !p.subnames.is_empty() {
                out.push(':');
                out.push_str(&p.subnames.join(":"));
            }
            out.push(')');
            out
        }
        Variant::Rid(id) => format!("({id})"),
        Variant::Callable => "()".to_string(),
        Variant::Signal(s) => format!("{}() <{}>", s.name, s.object_id),
        Variant::ObjectId(id) => format!("<{id}>"),
        _ => String::new(),
    }
}

/// Renders `value` without contacting the engine. Bare object references
/// render as `Object<id>`; [`render_object_ref`] gives the resolved form.
pub fn render_value(value: &Variant) -> String {
    match value {
        Variant::Nil => "null".to_string(),
        Variant::Bool(b) => b.to_string(),
        Variant::Int(i) => i.to_string(),
        Variant::Float(f) => format_float(*f),
        Variant::String(s) | Variant::StringName(s) => s.clone(),
        Variant::Object(dump) => dump.class_name().to_string(),
        Variant::Dictionary(entries) => dictionary_label(entries),
        Variant::Array(items) | Variant::TypedArray { items, .. } => list(items, render_value),
        Variant::PackedByteArray(items) => list(items, u8::to_string),
        Variant::PackedInt32Array(items) => list(items, i32::to_string),
        Variant::PackedInt64Array(items) => list(items, i64::to_string),
        Variant::PackedFloat32Array(items) => list(items, |v| format_float(f64::from(*v))),
        Variant::PackedFloat64Array(items) => list(items, |v| format_float(*v)),
        Variant::PackedStringArray(items) => list(items, Clone::clone),
        Variant::PackedVector2Array(items) => list(items, |v| format!("Vector2{}", vec2(v))),
        Variant::PackedVector3Array(items) => list(items, |v| format!("Vector3{}", vec3(v))),
        Variant::PackedColorArray(items) => {
            list(items, |c| format!("Color{}", components(&Variant::Color(*c))))
        }
        Variant::PackedVector4Array(items) => list(items, |v| format!("Vector4{}", vec4(v))),
        Variant::ObjectId(_) => format!("Object{}", components(value)),
        other => format!("{}{}", other.type_name(), components(other)),
    }
}

/// Label for a resolved object reference: its `repr` when it has one,
/// `Class<id>` otherwise.
pub fn render_object_ref(class_name: &str, object_id: u64, repr: Option<&str>) -> String {
    match repr {
        Some(repr) => repr.to_string(),
        None => format!("{class_name}<{object_id}>"),
    }
}

fn dictionary_label(entries: &[(Variant, Variant)]) -> String {
    let class_name = entries.iter().find_map(|(key, value)| match (key, value) {
        (Variant::String(k) | Variant::StringName(k), Variant::String(v)) if k == "class_name" => {
            Some(v.clone())
        }
        _ => None,
    });
    class_name.unwrap_or_else(|| format!("Dictionary({})", entries.len()))
}

/// Name under which a dictionary entry is listed.
pub fn render_key(key: &Variant) -> String {
    render_value(key)
}
