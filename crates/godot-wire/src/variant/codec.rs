use super::{
    Aabb, Basis, Color, NodePath, ObjectDump, Plane, Projection, Quaternion, Rect2, Rect2i, Signal,
    Transform2D, Transform3D, Variant, VariantType, Vector2, Vector2i, Vector3, Vector3i, Vector4,
    Vector4i, ENCODE_FLAG_64, ENCODE_FLAG_OBJECT_AS_ID, ENCODE_FLAG_TYPED, TYPE_MASK,
};
use crate::types::{Result, WireError};

/// Nesting limit applied when decoding untrusted payloads.
pub const DEFAULT_MAX_DEPTH: usize = 64;

const NODE_PATH_NEW_FORMAT: u32 = 0x8000_0000;
const NODE_PATH_FLAG_ABSOLUTE: u32 = 1;
const NODE_PATH_FLAG_OLD_SUBNAME: u32 = 2;

/// Encodes `value` into a freshly allocated buffer.
///
/// The exact size is computed first so the output is allocated once.
pub fn encode_variant(value: &Variant) -> Vec<u8> {
    let size = encoded_size(value);
    let mut w = VariantWriter::with_capacity(size);
    w.write_variant(value);
    debug_assert_eq!(w.len(), size, "encoded_size disagrees with writer");
    w.into_vec()
}

/// Decodes the first value in `bytes`, ignoring anything after it.
pub fn decode_variant(bytes: &[u8]) -> Result<Variant> {
    VariantReader::new(bytes).read_variant()
}

/// Decodes exactly one value; leftover bytes are an error.
pub fn decode_variant_exact(bytes: &[u8]) -> Result<Variant> {
    let mut r = VariantReader::new(bytes);
    let value = r.read_variant()?;
    match r.remaining() {
        0 => Ok(value),
        remaining => Err(WireError::TrailingBytes { remaining }),
    }
}

fn fits_f32(v: f64) -> bool {
    v.is_nan() || (v as f32) as f64 == v
}

fn all_f32(values: &[f64]) -> bool {
    values.iter().all(|v| fits_f32(*v))
}

fn v2(v: &Vector2) -> [f64; 2] {
    [v.x, v.y]
}

fn v3(v: &Vector3) -> [f64; 3] {
    [v.x, v.y, v.z]
}

fn v4(v: &Vector4) -> [f64; 4] {
    [v.x, v.y, v.z, v.w]
}

/// Whether `value` needs the 64-bit payload (`ENCODE_FLAG_64`).
fn needs_wide(value: &Variant) -> bool {
    match value {
        Variant::Int(v) => i32::try_from(*v).is_err(),
        Variant::Float(v) => !fits_f32(*v),
        Variant::Vector2(v) => !all_f32(&v2(v)),
        Variant::Rect2(r) => !(all_f32(&v2(&r.position)) && all_f32(&v2(&r.size))),
        Variant::Vector3(v) => !all_f32(&v3(v)),
        Variant::Transform2D(t) => {
            !(all_f32(&v2(&t.x)) && all_f32(&v2(&t.y)) && all_f32(&v2(&t.origin)))
        }
        Variant::Vector4(v) => !all_f32(&v4(v)),
        Variant::Plane(p) => !(all_f32(&v3(&p.normal)) && fits_f32(p.d)),
        Variant::Quaternion(q) => !all_f32(&[q.x, q.y, q.z, q.w]),
        Variant::Aabb(b) => !(all_f32(&v3(&b.position)) && all_f32(&v3(&b.size))),
        Variant::Basis(b) => !basis_fits(b),
        Variant::Transform3D(t) => !(basis_fits(&t.basis) && all_f32(&v3(&t.origin))),
        Variant::Projection(p) => ![&p.x, &p.y, &p.z, &p.w].iter().all(|c| all_f32(&v4(c))),
        Variant::PackedVector2Array(items) => !items.iter().all(|v| all_f32(&v2(v))),
        Variant::PackedVector3Array(items) => !items.iter().all(|v| all_f32(&v3(v))),
        Variant::PackedVector4Array(items) => !items.iter().all(|v| all_f32(&v4(v))),
        _ => false,
    }
}

fn basis_fits(b: &Basis) -> bool {
    all_f32(&v3(&b.x)) && all_f32(&v3(&b.y)) && all_f32(&v3(&b.z))
}

fn padded(len: usize) -> usize {
    (len + 3) & !3
}

fn string_size(s: &str) -> usize {
    4 + padded(s.len())
}

/// Exact number of bytes [`encode_variant`] produces for `value`, header included.
pub fn encoded_size(value: &Variant) -> usize {
    let real = if needs_wide(value) { 8 } else { 4 };
    let body = match value {
        Variant::Nil | Variant::Callable => 0,
        Variant::Bool(_) => 4,
        Variant::Int(_) | Variant::Float(_) => real,
        Variant::String(s) | Variant::StringName(s) => string_size(s),
        Variant::Vector2(_) => 2 * real,
        Variant::Vector2i(_) => 8,
        Variant::Rect2(_) => 4 * real,
        Variant::Rect2i(_) => 16,
        Variant::Vector3(_) => 3 * real,
        Variant::Vector3i(_) => 12,
        Variant::Transform2D(_) => 6 * real,
        Variant::Vector4(_) => 4 * real,
        Variant::Vector4i(_) => 16,
        Variant::Plane(_) | Variant::Quaternion(_) => 4 * real,
        Variant::Aabb(_) => 6 * real,
        Variant::Basis(_) => 9 * real,
        Variant::Transform3D(_) => 12 * real,
        Variant::Projection(_) => 16 * real,
        Variant::Color(_) => 16,
        Variant::NodePath(path) => {
            12 + path
                .names
                .iter()
                .chain(path.subnames.iter())
                .map(|s| string_size(s))
                .sum::<usize>()
        }
        Variant::Rid(_) | Variant::ObjectId(_) => 8,
        Variant::Object(dump) if dump.is_null() => 4,
        Variant::Object(dump) => {
            string_size(&dump.class_name)
                + 4
                + dump
                    .properties
                    .iter()
                    .map(|(name, value)| string_size(name) + encoded_size(value))
                    .sum::<usize>()
        }
        Variant::Signal(signal) => string_size(&signal.name) + 8,
        Variant::Dictionary(entries) => {
            4 + entries
                .iter()
                .map(|(k, v)| encoded_size(k) + encoded_size(v))
                .sum::<usize>()
        }
        Variant::Array(items) => 4 + items.iter().map(encoded_size).sum::<usize>(),
        Variant::TypedArray { items, .. } => 8 + items.iter().map(encoded_size).sum::<usize>(),
        Variant::PackedByteArray(bytes) => 4 + padded(bytes.len()),
        Variant::PackedInt32Array(items) => 4 + 4 * items.len(),
        Variant::PackedInt64Array(items) => 4 + 8 * items.len(),
        Variant::PackedFloat32Array(items) => 4 + 4 * items.len(),
        Variant::PackedFloat64Array(items) => 4 + 8 * items.len(),
        Variant::PackedStringArray(items) => 4 + items.iter().map(|s| string_size(s)).sum::<usize>(),
        Variant::PackedVector2Array(items) => 4 + 2 * real * items.len(),
        Variant::PackedVector3Array(items) => 4 + 3 * real * items.len(),
        Variant::PackedColorArray(items) => 4 + 16 * items.len(),
        Variant::PackedVector4Array(items) => 4 + 4 * real * items.len(),
    };
    4 + body
}

pub struct VariantWriter {
    buf: Vec<u8>,
}

impl Default for VariantWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl VariantWriter {
    pub fn new() -> Self {
        Self { buf: Vec::new() }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
        }
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.buf
    }

    pub fn write_u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn write_i32(&mut self, v: i32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn write_u64(&mut self, v: u64) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn write_i64(&mut self, v: i64) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn write_f32(&mut self, v: f32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn write_f64(&mut self, v: f64) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    fn write_real(&mut self, v: f64, wide: bool) {
        if wide {
            self.write_f64(v);
        } else {
            self.write_f32(v as f32);
        }
    }

    fn write_padding(&mut self, len: usize) {
        let pad = padded(len) - len;
        self.buf.extend(std::iter::repeat(0u8).take(pad));
    }

    /// Length-prefixed UTF-8, zero padded to a multiple of four bytes.
    pub fn write_string(&mut self, s: &str) {
        self.write_u32(s.len() as u32);
        self.buf.extend_from_slice(s.as_bytes());
        self.write_padding(s.len());
    }

    fn write_vector2(&mut self, v: &Vector2, wide: bool) {
        self.write_real(v.x, wide);
        self.write_real(v.y, wide);
    }

    fn write_vector3(&mut self, v: &Vector3, wide: bool) {
        self.write_real(v.x, wide);
        self.write_real(v.y, wide);
        self.write_real(v.z, wide);
    }

    fn write_vector4(&mut self, v: &Vector4, wide: bool) {
        self.write_real(v.x, wide);
        self.write_real(v.y, wide);
        self.write_real(v.z, wide);
        self.write_real(v.w, wide);
    }

    fn write_basis(&mut self, b: &Basis, wide: bool) {
        self.write_vector3(&b.x, wide);
        self.write_vector3(&b.y, wide);
        self.write_vector3(&b.z, wide);
    }

    fn write_color(&mut self, c: &Color) {
        self.write_f32(c.r);
        self.write_f32(c.g);
        self.write_f32(c.b);
        self.write_f32(c.a);
    }

    fn write_count(&mut self, len: usize) {
        self.write_u32(len as u32);
    }

    pub fn write_variant(&mut self, value: &Variant) {
        let wide = needs_wide(value);
        let mut header = value.variant_type().tag();
        match value {
            Variant::ObjectId(_) => header |= ENCODE_FLAG_OBJECT_AS_ID,
            Variant::TypedArray { .. } => header |= ENCODE_FLAG_TYPED,
            _ if wide => header |= ENCODE_FLAG_64,
            _ => {}
        }
        self.write_u32(header);

        match value {
            Variant::Nil | Variant::Callable => {}
            Variant::Bool(v) => self.write_u32(u32::from(*v)),
            Variant::Int(v) => {
                if wide {
                    self.write_i64(*v);
                } else {
                    self.write_i32(*v as i32);
                }
            }
            Variant::Float(v) => self.write_real(*v, wide),
            Variant::String(s) | Variant::StringName(s) => self.write_string(s),
            Variant::Vector2(v) => self.write_vector2(v, wide),
            Variant::Vector2i(v) => {
                self.write_i32(v.x);
                self.write_i32(v.y);
            }
            Variant::Rect2(r) => {
                self.write_vector2(&r.position, wide);
                self.write_vector2(&r.size, wide);
            }
            Variant::Rect2i(r) => {
                self.write_i32(r.position.x);
                self.write_i32(r.position.y);
                self.write_i32(r.size.x);
                self.write_i32(r.size.y);
            }
            Variant::Vector3(v) => self.write_vector3(v, wide),
            Variant::Vector3i(v) => {
                self.write_i32(v.x);
                self.write_i32(v.y);
                self.write_i32(v.z);
            }
            Variant::Transform2D(t) => {
                self.write_vector2(&t.x, wide);
                self.write_vector2(&t.y, wide);
                self.write_vector2(&t.origin, wide);
            }
            Variant::Vector4(v) => self.write_vector4(v, wide),
            Variant::Vector4i(v) => {
                self.write_i32(v.x);
                self.write_i32(v.y);
                self.write_i32(v.z);
                self.write_i32(v.w);
            }
            Variant::Plane(p) => {
                self.write_vector3(&p.normal, wide);
                self.write_real(p.d, wide);
            }
            Variant::Quaternion(q) => {
                self.write_real(q.x, wide);
                self.write_real(q.y, wide);
                self.write_real(q.z, wide);
                self.write_real(q.w, wide);
            }
            Variant::Aabb(b) => {
                self.write_vector3(&b.position, wide);
                self.write_vector3(&b.size, wide);
            }
            Variant::Basis(b) => self.write_basis(b, wide),
            Variant::Transform3D(t) => {
                self.write_basis(&t.basis, wide);
                self.write_vector3(&t.origin, wide);
            }
            Variant::Projection(p) => {
                self.write_vector4(&p.x, wide);
                self.write_vector4(&p.y, wide);
                self.write_vector4(&p.z, wide);
                self.write_vector4(&p.w, wide);
            }
            Variant::Color(c) => self.write_color(c),
            Variant::NodePath(path) => {
                self.write_u32(path.names.len() as u32 | NODE_PATH_NEW_FORMAT);
                self.write_count(path.subnames.len());
                self.write_u32(if path.absolute {
                    NODE_PATH_FLAG_ABSOLUTE
                } else {
                    0
                });
                for name in path.names.iter().chain(path.subnames.iter()) {
                    self.write_string(name);
                }
            }
            Variant::Rid(id) | Variant::ObjectId(id) => self.write_u64(*id),
            Variant::Object(dump) => {
                // Null objects are the bare empty class name.
                self.write_string(&dump.class_name);
                if !dump.is_null() {
                    self.write_count(dump.properties.len());
                    for (name, value) in &dump.properties {
                        self.write_string(name);
                        self.write_variant(value);
                    }
                }
            }
            Variant::Signal(signal) => {
                self.write_string(&signal.name);
                self.write_u64(signal.object_id);
            }
            Variant::Dictionary(entries) => {
                self.write_count(entries.len());
                for (key, value) in entries {
                    self.write_variant(key);
                    self.write_variant(value);
                }
            }
            Variant::Array(items) => {
                self.write_count(items.len());
                for item in items {
                    self.write_variant(item);
                }
            }
            Variant::TypedArray {
                element_type,
                items,
            } => {
                self.write_u32(element_type.tag());
                self.write_count(items.len());
                for item in items {
                    self.write_variant(item);
                }
            }
            Variant::PackedByteArray(bytes) => {
                self.write_count(bytes.len());
                self.buf.extend_from_slice(bytes);
                self.write_padding(bytes.len());
            }
            Variant::PackedInt32Array(items) => {
                self.write_count(items.len());
                items.iter().for_each(|v| self.write_i32(*v));
            }
            Variant::PackedInt64Array(items) => {
                self.write_count(items.len());
                items.iter().for_each(|v| self.write_i64(*v));
            }
            Variant::PackedFloat32Array(items) => {
                self.write_count(items.len());
                items.iter().for_each(|v| self.write_f32(*v));
            }
            Variant::PackedFloat64Array(items) => {
                self.write_count(items.len());
                items.iter().for_each(|v| self.write_f64(*v));
            }
            Variant::PackedStringArray(items) => {
                self.write_count(items.len());
                items.iter().for_each(|s| self.write_string(s));
            }
            Variant::PackedVector2Array(items) => {
                self.write_count(items.len());
                items.iter().for_each(|v| self.write_vector2(v, wide));
            }
            Variant::PackedVector3Array(items) => {
                self.write_count(items.len());
                items.iter().for_each(|v| self.write_vector3(v, wide));
            }
            Variant::PackedColorArray(items) => {
                self.write_count(items.len());
                items.iter().for_each(|c| self.write_color(c));
            }
            Variant::PackedVector4Array(items) => {
                self.write_count(items.len());
                items.iter().for_each(|v| self.write_vector4(v, wide));
            }
        }
    }
}

/// Cursor over an encoded buffer.
///
/// `offset() + remaining()` always equals the buffer length, and every read
/// either consumes exactly its wire size or fails without moving the cursor
/// past the end.
pub struct VariantReader<'a> {
    buf: &'a [u8],
    pos: usize,
    max_depth: usize,
}

impl<'a> VariantReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self {
            buf,
            pos: 0,
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn offset(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.buf.len().saturating_sub(self.pos)
    }

    fn malformed(&self, reason: impl Into<String>) -> WireError {
        WireError::MalformedVariant {
            offset: self.pos,
            reason: reason.into(),
        }
    }

    fn require(&self, n: usize) -> Result<()> {
        if n > self.remaining() {
            return Err(self.malformed(format!(
                "buffer underflow: need {n} bytes, have {}",
                self.remaining()
            )));
        }
        Ok(())
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        self.require(n)?;
        let bytes = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(bytes)
    }

    fn take_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.take_array()?))
    }

    pub fn read_i32(&mut self) -> Result<i32> {
        Ok(i32::from_le_bytes(self.take_array()?))
    }

    pub fn read_u64(&mut self) -> Result<u64> {
        Ok(u64::from_le_bytes(self.take_array()?))
    }

    pub fn read_i64(&mut self) -> Result<i64> {
        Ok(i64::from_le_bytes(self.take_array()?))
    }

    pub fn read_f32(&mut self) -> Result<f32> {
        Ok(f32::from_le_bytes(self.take_array()?))
    }

    pub fn read_f64(&mut self) -> Result<f64> {
        Ok(f64::from_le_bytes(self.take_array()?))
    }

    fn read_real(&mut self, wide: bool) -> Result<f64> {
        if wide {
            self.read_f64()
        } else {
            Ok(self.read_f32()? as f64)
        }
    }

    pub fn read_string(&mut self) -> Result<String> {
        let len = self.read_u32()? as usize;
        let start = self.pos;
        self.require(padded(len))?;
        let bytes = self.take(len)?;
        self.take(padded(len) - len)?;
        String::from_utf8(bytes.to_vec()).map_err(|e| WireError::MalformedVariant {
            offset: start,
            reason: format!("invalid utf-8 string: {e}"),
        })
    }

    /// Reads an element count, rejecting counts that cannot possibly fit in
    /// the rest of the buffer before anything is allocated for them.
    fn read_count(&mut self, min_element_size: usize) -> Result<usize> {
        let count = self.read_u32()? as usize;
        match count.checked_mul(min_element_size) {
            Some(needed) if needed <= self.remaining() => Ok(count),
            _ => Err(self.malformed(format!(
                "element count {count} exceeds the {} remaining bytes",
                self.remaining()
            ))),
        }
    }

    fn read_vector2(&mut self, wide: bool) -> Result<Vector2> {
        Ok(Vector2 {
            x: self.read_real(wide)?,
            y: self.read_real(wide)?,
        })
    }

    fn read_vector2i(&mut self) -> Result<Vector2i> {
        Ok(Vector2i {
            x: self.read_i32()?,
            y: self.read_i32()?,
        })
    }

    fn read_vector3(&mut self, wide: bool) -> Result<Vector3> {
        Ok(Vector3 {
            x: self.read_real(wide)?,
            y: self.read_real(wide)?,
            z: self.read_real(wide)?,
        })
    }

    fn read_vector4(&mut self, wide: bool) -> Result<Vector4> {
        Ok(Vector4 {
            x: self.read_real(wide)?,
            y: self.read_real(wide)?,
            z: self.read_real(wide)?,
            w: self.read_real(wide)?,
        })
    }

    fn read_basis(&mut self, wide: bool) -> Result<Basis> {
        Ok(Basis {
            x: self.read_vector3(wide)?,
            y: self.read_vector3(wide)?,
            z: self.read_vector3(wide)?,
        })
    }

    fn read_color(&mut self) -> Result<Color> {
        Ok(Color {
            r: self.read_f32()?,
            g: self.read_f32()?,
            b: self.read_f32()?,
            a: self.read_f32()?,
        })
    }

    fn read_node_path(&mut self) -> Result<NodePath> {
        let name_count = (self.read_u32()? & !NODE_PATH_NEW_FORMAT) as usize;
        let mut subname_count = self.read_u32()? as usize;
        let flags = self.read_u32()?;
        if flags & NODE_PATH_FLAG_OLD_SUBNAME != 0 {
            subname_count += 1;
        }
        let total = name_count.saturating_add(subname_count);
        if total.saturating_mul(4) > self.remaining() {
            return Err(self.malformed(format!("node path with {total} segments overruns buffer")));
        }

        let mut names = Vec::with_capacity(name_count);
        for _ in 0..name_count {
            names.push(self.read_string()?);
        }
        let mut subnames = Vec::with_capacity(subname_count);
        for _ in 0..subname_count {
            subnames.push(self.read_string()?);
        }
        Ok(NodePath {
            names,
            subnames,
            absolute: flags & NODE_PATH_FLAG_ABSOLUTE != 0,
        })
    }

    pub fn read_variant(&mut self) -> Result<Variant> {
        self.read_variant_at(0)
    }

    fn read_variant_at(&mut self, depth: usize) -> Result<Variant> {
        if depth > self.max_depth {
            return Err(self.malformed(format!("nesting exceeds {} levels", self.max_depth)));
        }

        let header_offset = self.pos;
        let header = self.read_u32()?;
        let tag = header & TYPE_MASK;
        let flag = header & ENCODE_FLAG_64 != 0;
        let Some(ty) = VariantType::from_tag(tag) else {
            return Err(WireError::MalformedVariant {
                offset: header_offset,
                reason: format!("unknown type tag {tag}"),
            });
        };

        let value = match ty {
            VariantType::Nil => Variant::Nil,
            VariantType::Bool => Variant::Bool(self.read_u32()? != 0),
            VariantType::Int => {
                if flag {
                    Variant::Int(self.read_i64()?)
                } else {
                    Variant::Int(self.read_i32()?.into())
                }
            }
            VariantType::Float => Variant::Float(self.read_real(flag)?),
            VariantType::String => Variant::String(self.read_string()?),
            VariantType::Vector2 => Variant::Vector2(self.read_vector2(flag)?),
            VariantType::Vector2i => Variant::Vector2i(self.read_vector2i()?),
            VariantType::Rect2 => Variant::Rect2(Rect2 {
                position: self.read_vector2(flag)?,
                size: self.read_vector2(flag)?,
            }),
            VariantType::Rect2i => Variant::Rect2i(Rect2i {
                position: self.read_vector2i()?,
                size: self.read_vector2i()?,
            }),
            VariantType::Vector3 => Variant::Vector3(self.read_vector3(flag)?),
            VariantType::Vector3i => Variant::Vector3i(Vector3i {
                x: self.read_i32()?,
                y: self.read_i32()?,
                z: self.read_i32()?,
            }),
            VariantType::Transform2D => Variant::Transform2D(Transform2D {
                x: self.read_vector2(flag)?,
                y: self.read_vector2(flag)?,
                origin: self.read_vector2(flag)?,
            }),
            VariantType::Vector4 => Variant::Vector4(self.read_vector4(flag)?),
            VariantType::Vector4i => Variant::Vector4i(Vector4i {
                x: self.read_i32()?,
                y: self.read_i32()?,
                z: self.read_i32()?,
                w: self.read_i32()?,
            }),
            VariantType::Plane => Variant::Plane(Plane {
                normal: self.read_vector3(flag)?,
                d: self.read_real(flag)?,
            }),
            VariantType::Quaternion => Variant::Quaternion(Quaternion {
                x: self.read_real(flag)?,
                y: self.read_real(flag)?,
                z: self.read_real(flag)?,
                w: self.read_real(flag)?,
            }),
            VariantType::Aabb => Variant::Aabb(Aabb {
                position: self.read_vector3(flag)?,
                size: self.read_vector3(flag)?,
            }),
            VariantType::Basis => Variant::Basis(self.read_basis(flag)?),
            VariantType::Transform3D => Variant::Transform3D(Transform3D {
                basis: self.read_basis(flag)?,
                origin: self.read_vector3(flag)?,
            }),
            VariantType::Projection => Variant::Projection(Projection {
                x: self.read_vector4(flag)?,
                y: self.read_vector4(flag)?,
                z: self.read_vector4(flag)?,
                w: self.read_vector4(flag)?,
            }),
            VariantType::Color => Variant::Color(self.read_color()?),
            VariantType::StringName => Variant::StringName(self.read_string()?),
            VariantType::NodePath => Variant::NodePath(self.read_node_path()?),
            VariantType::Rid => Variant::Rid(self.read_u64()?),
            VariantType::Object => {
                if header & ENCODE_FLAG_OBJECT_AS_ID != 0 {
                    Variant::ObjectId(self.read_u64()?)
                } else {
                    let class_name = self.read_string()?;
                    let mut properties = Vec::new();
                    if !class_name.is_empty() {
                        let count = self.read_count(8)?;
                        properties.reserve(count);
                        for _ in 0..count {
                            let name = self.read_string()?;
                            let value = self.read_variant_at(depth + 1)?;
                            properties.push((name, value));
                        }
                    }
                    Variant::Object(ObjectDump {
                        class_name,
                        properties,
                    })
                }
            }
            VariantType::Callable => Variant::Callable,
            VariantType::Signal => Variant::Signal(Signal {
                name: self.read_string()?,
                object_id: self.read_u64()?,
            }),
            VariantType::Dictionary => {
                let count = self.read_count(8)?;
                let mut entries = Vec::with_capacity(count);
                for _ in 0..count {
                    let key = self.read_variant_at(depth + 1)?;
                    let value = self.read_variant_at(depth + 1)?;
                    entries.push((key, value));
                }
                Variant::Dictionary(entries)
            }
            VariantType::Array => {
                let element_type = if header & ENCODE_FLAG_TYPED != 0 {
                    let element_offset = self.pos;
                    let element_tag = self.read_u32()?;
                    let ty = VariantType::from_tag(element_tag).ok_or_else(|| {
                        WireError::MalformedVariant {
                            offset: element_offset,
                            reason: format!("unknown typed array element tag {element_tag}"),
                        }
                    })?;
                    Some(ty)
                } else {
                    None
                };
                let count = self.read_count(4)?;
                let mut items = Vec::with_capacity(count);
                for _ in 0..count {
                    items.push(self.read_variant_at(depth + 1)?);
                }
                match element_type {
                    Some(element_type) => Variant::TypedArray {
                        element_type,
                        items,
                    },
                    None => Variant::Array(items),
                }
            }
            VariantType::PackedByteArray => {
                let len = self.read_u32()? as usize;
                self.require(padded(len))?;
                let bytes = self.take(len)?.to_vec();
                self.take(padded(len) - len)?;
                Variant::PackedByteArray(bytes)
            }
            VariantType::PackedInt32Array => {
                let count = self.read_count(4)?;
                let mut items = Vec::with_capacity(count);
                for _ in 0..count {
                    items.push(self.read_i32()?);
                }
                Variant::PackedInt32Array(items)
            }
            VariantType::PackedInt64Array => {
                let count = self.read_count(8)?;
                let mut items = Vec::with_capacity(count);
                for _ in 0..count {
                    items.push(self.read_i64()?);
                }
                Variant::PackedInt64Array(items)
            }
            VariantType::PackedFloat32Array => {
                let count = self.read_count(4)?;
                let mut items = Vec::with_capacity(count);
                for _ in 0..count {
                    items.push(self.read_f32()?);
                }
                Variant::PackedFloat32Array(items)
            }
            VariantType::PackedFloat64Array => {
                let count = self.read_count(8)?;
                let mut items = Vec::with_capacity(count);
                for _ in 0..count {
                    items.push(self.read_f64()?);
                }
                Variant::PackedFloat64Array(items)
            }
            VariantType::PackedStringArray => {
                let count = self.read_count(4)?;
                let mut items = Vec::with_capacity(count);
                for _ in 0..count {
                    items.push(self.read_string()?);
                }
                Variant::PackedStringArray(items)
            }
            VariantType::PackedVector2Array => {
                let count = self.read_count(if flag { 16 } else { 8 })?;
                let mut items = Vec::with_capacity(count);
                for _ in 0..count {
                    items.push(self.read_vector2(flag)?);
                }
                Variant::PackedVector2Array(items)
            }
            VariantType::PackedVector3Array => {
                let count = self.read_count(if flag { 24 } else { 12 })?;
                let mut items = Vec::with_capacity(count);
                for _ in 0..count {
                    items.push(self.read_vector3(flag)?);
                }
                Variant::PackedVector3Array(items)
            }
            VariantType::PackedColorArray => {
                let count = self.read_count(16)?;
                let mut items = Vec::with_capacity(count);
                for _ in 0..count {
                    items.push(self.read_color()?);
                }
                Variant::PackedColorArray(items)
            }
            VariantType::PackedVector4Array => {
                let count = self.read_count(if flag { 32 } else { 16 })?;
                let mut items = Vec::with_capacity(count);
                for _ in 0..count {
                    items.push(self.read_vector4(flag)?);
                }
                Variant::PackedVector4Array(items)
            }
        };
        Ok(value)
    }
}
