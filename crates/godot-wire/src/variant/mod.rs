//! The engine's dynamically typed value, modelled as a closed sum type.
//!
//! Every wire tag maps to exactly one [`Variant`] arm. Math aggregates keep
//! their components as `f64` so values from double-precision engine builds
//! survive decoding; the encoder picks the 32-bit layout whenever every
//! component is exactly representable as `f32`.

mod codec;

pub use codec::{
    decode_variant, decode_variant_exact, encode_variant, encoded_size, VariantReader,
    VariantWriter, DEFAULT_MAX_DEPTH,
};

/// Mask selecting the type tag from a header word.
pub const TYPE_MASK: u32 = 0xff;
/// 64-bit integer/float payload, or double-precision math aggregate.
pub const ENCODE_FLAG_64: u32 = 1 << 16;
/// `OBJECT` encoded as a bare 64-bit instance id instead of a property dump.
pub const ENCODE_FLAG_OBJECT_AS_ID: u32 = 1 << 16;
/// `ARRAY` carrying a `u32` element type before its count.
pub const ENCODE_FLAG_TYPED: u32 = 1 << 16;

/// Wire type tags (the low byte of every header word).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum VariantType {
    Nil = 0,
    Bool = 1,
    Int = 2,
    Float = 3,
    String = 4,
    Vector2 = 5,
    Vector2i = 6,
    Rect2 = 7,
    Rect2i = 8,
    Vector3 = 9,
    Vector3i = 10,
    Transform2D = 11,
    Vector4 = 12,
    Vector4i = 13,
    Plane = 14,
    Quaternion = 15,
    Aabb = 16,
    Basis = 17,
    Transform3D = 18,
    Projection = 19,
    Color = 20,
    StringName = 21,
    NodePath = 22,
    Rid = 23,
    Object = 24,
    Callable = 25,
    Signal = 26,
    Dictionary = 27,
    Array = 28,
    PackedByteArray = 29,
    PackedInt32Array = 30,
    PackedInt64Array = 31,
    PackedFloat32Array = 32,
    PackedFloat64Array = 33,
    PackedStringArray = 34,
    PackedVector2Array = 35,
    PackedVector3Array = 36,
    PackedColorArray = 37,
    PackedVector4Array = 38,
}

impl VariantType {
    pub fn from_tag(tag: u32) -> Option<Self> {
        use VariantType::*;
        let ty = match tag {
            0 => Nil,
            1 => Bool,
            2 => Int,
            3 => Float,
            4 => String,
            5 => Vector2,
            6 => Vector2i,
            7 => Rect2,
            8 => Rect2i,
            9 => Vector3,
            10 => Vector3i,
            11 => Transform2D,
            12 => Vector4,
            13 => Vector4i,
            14 => Plane,
            15 => Quaternion,
            16 => Aabb,
            17 => Basis,
            18 => Transform3D,
            19 => Projection,
            20 => Color,
            21 => StringName,
            22 => NodePath,
            23 => Rid,
            24 => Object,
            25 => Callable,
            26 => Signal,
            27 => Dictionary,
            28 => Array,
            29 => PackedByteArray,
            30 => PackedInt32Array,
            31 => PackedInt64Array,
            32 => PackedFloat32Array,
            33 => PackedFloat64Array,
            34 => PackedStringArray,
            35 => PackedVector2Array,
            36 => PackedVector3Array,
            37 => PackedColorArray,
            38 => PackedVector4Array,
            _ => return None,
        };
        Some(ty)
    }

    pub fn tag(self) -> u32 {
        self as u8 as u32
    }

    /// The engine-facing type name, as shown in the editor inspector.
    pub fn name(self) -> &'static str {
        use VariantType::*;
        match self {
            Nil => "Nil",
            Bool => "bool",
            Int => "int",
            Float => "float",
            String => "String",
            Vector2 => "Vector2",
            Vector2i => "Vector2i",
            Rect2 => "Rect2",
            Rect2i => "Rect2i",
            Vector3 => "Vector3",
            Vector3i => "Vector3i",
            Transform2D => "Transform2D",
            Vector4 => "Vector4",
            Vector4i => "Vector4i",
            Plane => "Plane",
            Quaternion => "Quaternion",
            Aabb => "AABB",
            Basis => "Basis",
            Transform3D => "Transform3D",
            Projection => "Projection",
            Color => "Color",
            StringName => "StringName",
            NodePath => "NodePath",
            Rid => "RID",
            Object => "Object",
            Callable => "Callable",
            Signal => "Signal",
            Dictionary => "Dictionary",
            Array => "Array",
            PackedByteArray => "PackedByteArray",
            PackedInt32Array => "PackedInt32Array",
            PackedInt64Array => "PackedInt64Array",
            PackedFloat32Array => "PackedFloat32Array",
            PackedFloat64Array => "PackedFloat64Array",
            PackedStringArray => "PackedStringArray",
            PackedVector2Array => "PackedVector2Array",
            PackedVector3Array => "PackedVector3Array",
            PackedColorArray => "PackedColorArray",
            PackedVector4Array => "PackedVector4Array",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Vector2 {
    pub x: f64,
    pub y: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Vector2i {
    pub x: i32,
    pub y: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Rect2 {
    pub position: Vector2,
    pub size: Vector2,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Rect2i {
    pub position: Vector2i,
    pub size: Vector2i,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Vector3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Vector3i {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

/// Column layout: `x` and `y` axes followed by the origin.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Transform2D {
    pub x: Vector2,
    pub y: Vector2,
    pub origin: Vector2,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Vector4 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub w: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Vector4i {
    pub x: i32,
    pub y: i32,
    pub z: i32,
    pub w: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Plane {
    pub normal: Vector3,
    pub d: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Quaternion {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub w: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Aabb {
    pub position: Vector3,
    pub size: Vector3,
}

/// Three row vectors.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Basis {
    pub x: Vector3,
    pub y: Vector3,
    pub z: Vector3,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Transform3D {
    pub basis: Basis,
    pub origin: Vector3,
}

/// Four column vectors.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Projection {
    pub x: Vector4,
    pub y: Vector4,
    pub z: Vector4,
    pub w: Vector4,
}

/// Colors are always single precision on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Color {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct NodePath {
    pub names: Vec<String>,
    pub subnames: Vec<String>,
    pub absolute: bool,
}

impl NodePath {
    /// Renders the path the way the engine prints it (`/root/Main:position:x`).
    pub fn to_path_string(&self) -> String {
        let mut out = String::new();
        if self.absolute {
            out.push('/');
        }
        out.push_str(&self.names.join("/"));
        for sub in &self.subnames {
            out.push(':');
            out.push_str(sub);
        }
        out
    }
}

/// A full object dump: class name plus its properties in wire order.
///
/// An empty class name is the null object. The wire has no room for its
/// properties, so [`ObjectDump::new`] refuses to build one that has any.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ObjectDump {
    class_name: String,
    properties: Vec<(String, Variant)>,
}

impl ObjectDump {
    pub fn new(
        class_name: impl Into<String>,
        properties: Vec<(String, Variant)>,
    ) -> Result<Self, crate::WireError> {
        let class_name = class_name.into();
        if class_name.is_empty() && !properties.is_empty() {
            return Err(crate::WireError::NullObjectProperties);
        }
        Ok(Self {
            class_name,
            properties,
        })
    }

    pub fn null() -> Self {
        Self::default()
    }

    pub fn is_null(&self) -> bool {
        self.class_name.is_empty()
    }

    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    pub fn properties(&self) -> &[(String, Variant)] {
        &self.properties
    }

    pub fn get(&self, name: &str) -> Option<&Variant> {
        self.properties
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signal {
    pub name: String,
    pub object_id: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Variant {
    Nil,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Vector2(Vector2),
    Vector2i(Vector2i),
    Rect2(Rect2),
    Rect2i(Rect2i),
    Vector3(Vector3),
    Vector3i(Vector3i),
    Transform2D(Transform2D),
    Vector4(Vector4),
    Vector4i(Vector4i),
    Plane(Plane),
    Quaternion(Quaternion),
    Aabb(Aabb),
    Basis(Basis),
    Transform3D(Transform3D),
    Projection(Projection),
    Color(Color),
    StringName(String),
    NodePath(NodePath),
    Rid(u64),
    /// A full property dump of an object.
    Object(ObjectDump),
    /// A reference to a live engine object that must be inspected separately.
    ObjectId(u64),
    Callable,
    Signal(Signal),
    /// Ordered key/value pairs; keys are themselves variants.
    Dictionary(Vec<(Variant, Variant)>),
    Array(Vec<Variant>),
    TypedArray {
        element_type: VariantType,
        items: Vec<Variant>,
    },
    PackedByteArray(Vec<u8>),
    PackedInt32Array(Vec<i32>),
    PackedInt64Array(Vec<i64>),
    PackedFloat32Array(Vec<f32>),
    PackedFloat64Array(Vec<f64>),
    PackedStringArray(Vec<String>),
    PackedVector2Array(Vec<Vector2>),
    PackedVector3Array(Vec<Vector3>),
    PackedColorArray(Vec<Color>),
    PackedVector4Array(Vec<Vector4>),
}

impl Variant {
    pub fn variant_type(&self) -> VariantType {
        match self {
            Variant::Nil => VariantType::Nil,
            Variant::Bool(_) => VariantType::Bool,
            Variant::Int(_) => VariantType::Int,
            Variant::Float(_) => VariantType::Float,
            Variant::String(_) => VariantType::String,
            Variant::Vector2(_) => VariantType::Vector2,
            Variant::Vector2i(_) => VariantType::Vector2i,
            Variant::Rect2(_) => VariantType::Rect2,
            Variant::Rect2i(_) => VariantType::Rect2i,
            Variant::Vector3(_) => VariantType::Vector3,
            Variant::Vector3i(_) => VariantType::Vector3i,
            Variant::Transform2D(_) => VariantType::Transform2D,
            Variant::Vector4(_) => VariantType::Vector4,
            Variant::Vector4i(_) => VariantType::Vector4i,
            Variant::Plane(_) => VariantType::Plane,
            Variant::Quaternion(_) => VariantType::Quaternion,
            Variant::Aabb(_) => VariantType::Aabb,
            Variant::Basis(_) => VariantType::Basis,
            Variant::Transform3D(_) => VariantType::Transform3D,
            Variant::Projection(_) => VariantType::Projection,
            Variant::Color(_) => VariantType::Color,
            Variant::StringName(_) => VariantType::StringName,
            Variant::NodePath(_) => VariantType::NodePath,
            Variant::Rid(_) => VariantType::Rid,
            Variant::Object(_) | Variant::ObjectId(_) => VariantType::Object,
            Variant::Callable => VariantType::Callable,
            Variant::Signal(_) => VariantType::Signal,
            Variant::Dictionary(_) => VariantType::Dictionary,
            Variant::Array(_) | Variant::TypedArray { .. } => VariantType::Array,
            Variant::PackedByteArray(_) => VariantType::PackedByteArray,
            Variant::PackedInt32Array(_) => VariantType::PackedInt32Array,
            Variant::PackedInt64Array(_) => VariantType::PackedInt64Array,
            Variant::PackedFloat32Array(_) => VariantType::PackedFloat32Array,
            Variant::PackedFloat64Array(_) => VariantType::PackedFloat64Array,
            Variant::PackedStringArray(_) => VariantType::PackedStringArray,
            Variant::PackedVector2Array(_) => VariantType::PackedVector2Array,
            Variant::PackedVector3Array(_) => VariantType::PackedVector3Array,
            Variant::PackedColorArray(_) => VariantType::PackedColorArray,
            Variant::PackedVector4Array(_) => VariantType::PackedVector4Array,
        }
    }

    pub fn type_name(&self) -> &'static str {
        self.variant_type().name()
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, Variant::Nil)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Variant::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Variant::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Both `String` and `StringName` read as text.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Variant::String(s) | Variant::StringName(s) => Some(s),
            _ => None,
        }
    }

    /// Untyped and typed arrays both expose their elements.
    pub fn as_array(&self) -> Option<&[Variant]> {
        match self {
            Variant::Array(items) | Variant::TypedArray { items, .. } => Some(items),
            _ => None,
        }
    }

    pub fn into_array(self) -> Option<Vec<Variant>> {
        match self {
            Variant::Array(items) | Variant::TypedArray { items, .. } => Some(items),
            _ => None,
        }
    }

    pub fn as_dictionary(&self) -> Option<&[(Variant, Variant)]> {
        match self {
            Variant::Dictionary(entries) => Some(entries),
            _ => None,
        }
    }

    /// The referenced instance id for bare object references.
    pub fn object_id(&self) -> Option<u64> {
        match self {
            Variant::ObjectId(id) => Some(*id),
            _ => None,
        }
    }
}

impl From<bool> for Variant {
    fn from(value: bool) -> Self {
        Variant::Bool(value)
    }
}

impl From<i32> for Variant {
    fn from(value: i32) -> Self {
        Variant::Int(value.into())
    }
}

impl From<i64> for Variant {
    fn from(value: i64) -> Self {
        Variant::Int(value)
    }
}

impl From<u32> for Variant {
    fn from(value: u32) -> Self {
        Variant::Int(value.into())
    }
}

impl From<f64> for Variant {
    fn from(value: f64) -> Self {
        Variant::Float(value)
    }
}

impl From<&str> for Variant {
    fn from(value: &str) -> Self {
        Variant::String(value.to_owned())
    }
}

impl From<String> for Variant {
    fn from(value: String) -> Self {
        Variant::String(value)
    }
}

impl From<Vec<Variant>> for Variant {
    fn from(value: Vec<Variant>) -> Self {
        Variant::Array(value)
    }
}

impl From<Vector2> for Variant {
    fn from(value: Vector2) -> Self {
        Variant::Vector2(value)
    }
}

impl From<Vector3> for Variant {
    fn from(value: Vector3) -> Self {
        Variant::Vector3(value)
    }
}

impl From<Color> for Variant {
    fn from(value: Color) -> Self {
        Variant::Color(value)
    }
}
