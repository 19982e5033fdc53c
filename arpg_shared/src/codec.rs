//! State codec.
//!
//! Schema-driven mapping between typed state records and a byte stream.
//!
//! - Every primitive that can appear in a state implements [`Wire`].
//! - State records are declared with `state_record!`, which generates the
//!   struct plus encode/decode/populate in declared field order.
//! - Two layouts exist. `Fixed` writes values in order without names.
//!   `Tagged` writes `(name, value)` pairs for non-default fields and ends the
//!   record with the [`SENTINEL`] key.
//!
//! Populating from a loose source (`AttrSource`) never fails: each field takes
//! the source value, else a coerced value, else its declared default.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::math::{Vec3, Vec4};

/// Key terminating a tagged record.
pub const SENTINEL: &str = "end";

/// Decode failure. Fatal to the message being decoded, never to the peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MalformedStateError {
    Truncated { needed: usize, remaining: usize },
    InvalidUtf8,
    InvalidFlag(u8),
    UnknownField { state: &'static str, field: String },
    TrailingBytes(usize),
}

impl fmt::Display for MalformedStateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MalformedStateError::Truncated { needed, remaining } => {
                write!(f, "truncated input: need {needed} bytes, {remaining} left")
            }
            MalformedStateError::InvalidUtf8 => write!(f, "string is not valid UTF-8"),
            MalformedStateError::InvalidFlag(b) => write!(f, "invalid flag byte {b:#04x}"),
            MalformedStateError::UnknownField { state, field } => {
                write!(f, "unknown field '{field}' in {state}")
            }
            MalformedStateError::TrailingBytes(n) => write!(f, "{n} trailing bytes after record"),
        }
    }
}

impl std::error::Error for MalformedStateError {}

/// Semantic type of a declared attribute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldKind {
    Int,
    Float,
    Vec3,
    Vec4,
    Str,
    Bool,
    List(Box<FieldKind>),
    Optional(Box<FieldKind>),
    /// A nested state record, by registered type name.
    Record(&'static str),
}

/// Record layout discipline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layout {
    Fixed,
    Tagged,
}

/// Dynamically typed attribute value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int(i64),
    Float(f64),
    Vec3(Vec3),
    Vec4(Vec4),
    Str(String),
    Bool(bool),
    List(Vec<Value>),
    Absent,
}

impl Value {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            Value::Float(v) if v.is_finite() => Some(*v as i64),
            Value::Bool(v) => Some(i64::from(*v)),
            Value::Str(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(v) => Some(*v),
            Value::Int(v) => Some(*v as f64),
            Value::Str(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(v) => Some(*v),
            Value::Int(v) => Some(*v != 0),
            Value::Float(v) => Some(*v != 0.0),
            Value::Str(s) => match s.trim().to_ascii_lowercase().as_str() {
                "true" | "1" | "yes" => Some(true),
                "false" | "0" | "no" | "" => Some(false),
                _ => None,
            },
            _ => None,
        }
    }

    pub fn as_string(&self) -> Option<String> {
        match self {
            Value::Str(s) => Some(s.clone()),
            Value::Int(v) => Some(v.to_string()),
            Value::Float(v) => Some(v.to_string()),
            Value::Bool(v) => Some(v.to_string()),
            _ => None,
        }
    }

    fn floats<const N: usize>(&self) -> Option<[f32; N]> {
        let Value::List(items) = self else {
            return None;
        };
        if items.len() != N {
            return None;
        }
        let mut out = [0.0f32; N];
        for (slot, item) in out.iter_mut().zip(items) {
            *slot = item.as_float()? as f32;
        }
        Some(out)
    }

    pub fn as_vec3(&self) -> Option<Vec3> {
        match self {
            Value::Vec3(v) => Some(*v),
            other => other.floats::<3>().map(|[x, y, z]| Vec3::new(x, y, z)),
        }
    }

    pub fn as_vec4(&self) -> Option<Vec4> {
        match self {
            Value::Vec4(v) => Some(*v),
            other => other.floats::<4>().map(|[x, y, z, w]| Vec4::new(x, y, z, w)),
        }
    }

    /// Adds (or subtracts, when `remove`) a delta onto this value, keeping
    /// this value's kind. Non-numeric kinds cannot be combined.
    pub fn combine(&self, delta: &Value, remove: bool) -> Option<Value> {
        let sign = if remove { -1.0 } else { 1.0 };
        match (self, delta) {
            (Value::Int(a), Value::Int(b)) => Some(Value::Int(if remove { a - b } else { a + b })),
            (Value::Int(a), d) => d
                .as_float()
                .map(|b| Value::Int(a + (b * sign).round() as i64)),
            (Value::Float(a), d) => d.as_float().map(|b| Value::Float(a + b * sign)),
            (Value::Vec3(a), d) => d
                .as_vec3()
                .map(|b| Value::Vec3(if remove { *a - b } else { *a + b })),
            (Value::Vec4(a), d) => d
                .as_vec4()
                .map(|b| Value::Vec4(if remove { *a - b } else { *a + b })),
            _ => None,
        }
    }
}

/// Converts a JSON value into a codec value.
pub fn json_to_value(v: &serde_json::Value) -> Value {
    match v {
        serde_json::Value::Null => Value::Absent,
        serde_json::Value::Bool(b) => Value::Bool(*b),
        serde_json::Value::Number(n) => match n.as_i64() {
            Some(i) => Value::Int(i),
            None => Value::Float(n.as_f64().unwrap_or_default()),
        },
        serde_json::Value::String(s) => Value::Str(s.clone()),
        serde_json::Value::Array(items) => Value::List(items.iter().map(json_to_value).collect()),
        serde_json::Value::Object(_) => Value::Absent,
    }
}

/// Anything that exposes named attributes.
pub trait AttrSource {
    fn attr(&self, name: &str) -> Option<Value>;
}

/// Anything whose named attributes can be overwritten.
pub trait AttrTarget: AttrSource {
    /// Sets an attribute; returns false if the target has no such attribute
    /// or the value cannot be stored.
    fn set_attr(&mut self, name: &str, value: Value) -> bool;

    /// Recomputes values derived from other attributes.
    fn rederive(&mut self) {}
}

impl AttrSource for HashMap<String, Value> {
    fn attr(&self, name: &str) -> Option<Value> {
        self.get(name).cloned()
    }
}

impl AttrTarget for HashMap<String, Value> {
    fn set_attr(&mut self, name: &str, value: Value) -> bool {
        self.insert(name.to_string(), value);
        true
    }
}

impl AttrSource for serde_json::Map<String, serde_json::Value> {
    fn attr(&self, name: &str) -> Option<Value> {
        self.get(name).map(json_to_value)
    }
}

impl AttrSource for BTreeMap<String, i32> {
    fn attr(&self, name: &str) -> Option<Value> {
        self.get(name).map(|v| Value::Int(i64::from(*v)))
    }
}

impl AttrTarget for BTreeMap<String, i32> {
    fn set_attr(&mut self, name: &str, value: Value) -> bool {
        match value.as_int() {
            Some(v) => {
                self.insert(name.to_string(), clamp_i32(v));
                true
            }
            None => false,
        }
    }
}

pub(crate) fn clamp_i32(v: i64) -> i32 {
    v.clamp(i64::from(i32::MIN), i64::from(i32::MAX)) as i32
}

fn need(buf: &Bytes, n: usize) -> Result<(), MalformedStateError> {
    if buf.remaining() < n {
        Err(MalformedStateError::Truncated {
            needed: n,
            remaining: buf.remaining(),
        })
    } else {
        Ok(())
    }
}

/// Writes a u16-length-prefixed UTF-8 string. Longer strings are truncated at
/// a character boundary.
pub fn put_str(buf: &mut BytesMut, s: &str) {
    let mut end = s.len().min(u16::MAX as usize);
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    buf.put_u16(end as u16);
    buf.put_slice(&s.as_bytes()[..end]);
}

pub fn take_str(buf: &mut Bytes) -> Result<String, MalformedStateError> {
    need(buf, 2)?;
    let len = buf.get_u16() as usize;
    need(buf, len)?;
    let raw = buf.split_to(len);
    String::from_utf8(raw.to_vec()).map_err(|_| MalformedStateError::InvalidUtf8)
}

fn take_flag(buf: &mut Bytes) -> Result<bool, MalformedStateError> {
    need(buf, 1)?;
    match buf.get_u8() {
        0 => Ok(false),
        1 => Ok(true),
        other => Err(MalformedStateError::InvalidFlag(other)),
    }
}

/// A primitive that can be written to and read from the wire.
pub trait Wire: Sized {
    fn kind() -> FieldKind;
    fn put(&self, buf: &mut BytesMut);
    fn take(buf: &mut Bytes) -> Result<Self, MalformedStateError>;
    fn to_value(&self) -> Value;
    /// Exact or coerced conversion from a loose value.
    fn from_value(value: &Value) -> Option<Self>;

    /// Name under which a payload type must be registered before it is sent.
    /// Plain primitives need no registration.
    fn type_name() -> Option<&'static str> {
        None
    }
}

impl Wire for i32 {
    fn kind() -> FieldKind {
        FieldKind::Int
    }
    fn put(&self, buf: &mut BytesMut) {
        buf.put_i32(*self);
    }
    fn take(buf: &mut Bytes) -> Result<Self, MalformedStateError> {
        need(buf, 4)?;
        Ok(buf.get_i32())
    }
    fn to_value(&self) -> Value {
        Value::Int(i64::from(*self))
    }
    fn from_value(value: &Value) -> Option<Self> {
        value.as_int().map(clamp_i32)
    }
}

impl Wire for u32 {
    fn kind() -> FieldKind {
        FieldKind::Int
    }
    fn put(&self, buf: &mut BytesMut) {
        buf.put_u32(*self);
    }
    fn take(buf: &mut Bytes) -> Result<Self, MalformedStateError> {
        need(buf, 4)?;
        Ok(buf.get_u32())
    }
    fn to_value(&self) -> Value {
        Value::Int(i64::from(*self))
    }
    fn from_value(value: &Value) -> Option<Self> {
        value.as_int().and_then(|v| u32::try_from(v).ok())
    }
}

impl Wire for f32 {
    fn kind() -> FieldKind {
        FieldKind::Float
    }
    fn put(&self, buf: &mut BytesMut) {
        buf.put_f32(*self);
    }
    fn take(buf: &mut Bytes) -> Result<Self, MalformedStateError> {
        need(buf, 4)?;
        Ok(buf.get_f32())
    }
    fn to_value(&self) -> Value {
        Value::Float(f64::from(*self))
    }
    fn from_value(value: &Value) -> Option<Self> {
        value.as_float().map(|v| v as f32)
    }
}

impl Wire for bool {
    fn kind() -> FieldKind {
        FieldKind::Bool
    }
    fn put(&self, buf: &mut BytesMut) {
        buf.put_u8(u8::from(*self));
    }
    fn take(buf: &mut Bytes) -> Result<Self, MalformedStateError> {
        take_flag(buf)
    }
    fn to_value(&self) -> Value {
        Value::Bool(*self)
    }
    fn from_value(value: &Value) -> Option<Self> {
        value.as_bool()
    }
}

impl Wire for String {
    fn kind() -> FieldKind {
        FieldKind::Str
    }
    fn put(&self, buf: &mut BytesMut) {
        put_str(buf, self);
    }
    fn take(buf: &mut Bytes) -> Result<Self, MalformedStateError> {
        take_str(buf)
    }
    fn to_value(&self) -> Value {
        Value::Str(self.clone())
    }
    fn from_value(value: &Value) -> Option<Self> {
        value.as_string()
    }
}

impl Wire for Vec3 {
    fn kind() -> FieldKind {
        FieldKind::Vec3
    }
    fn put(&self, buf: &mut BytesMut) {
        buf.put_f32(self.x);
        buf.put_f32(self.y);
        buf.put_f32(self.z);
    }
    fn take(buf: &mut Bytes) -> Result<Self, MalformedStateError> {
        need(buf, 12)?;
        Ok(Vec3::new(buf.get_f32(), buf.get_f32(), buf.get_f32()))
    }
    fn to_value(&self) -> Value {
        Value::Vec3(*self)
    }
    fn from_value(value: &Value) -> Option<Self> {
        value.as_vec3()
    }
}

impl Wire for Vec4 {
    fn kind() -> FieldKind {
        FieldKind::Vec4
    }
    fn put(&self, buf: &mut BytesMut) {
        buf.put_f32(self.x);
        buf.put_f32(self.y);
        buf.put_f32(self.z);
        buf.put_f32(self.w);
    }
    fn take(buf: &mut Bytes) -> Result<Self, MalformedStateError> {
        need(buf, 16)?;
        Ok(Vec4::new(
            buf.get_f32(),
            buf.get_f32(),
            buf.get_f32(),
            buf.get_f32(),
        ))
    }
    fn to_value(&self) -> Value {
        Value::Vec4(*self)
    }
    fn from_value(value: &Value) -> Option<Self> {
        value.as_vec4()
    }
}

impl<T: Wire> Wire for Vec<T> {
    fn kind() -> FieldKind {
        FieldKind::List(Box::new(T::kind()))
    }
    fn put(&self, buf: &mut BytesMut) {
        let len = self.len().min(u16::MAX as usize);
        buf.put_u16(len as u16);
        for item in &self[..len] {
            item.put(buf);
        }
    }
    fn take(buf: &mut Bytes) -> Result<Self, MalformedStateError> {
        need(buf, 2)?;
        let len = buf.get_u16() as usize;
        let mut out = Vec::with_capacity(len.min(buf.remaining()));
        for _ in 0..len {
            out.push(T::take(buf)?);
        }
        Ok(out)
    }
    fn to_value(&self) -> Value {
        Value::List(self.iter().map(Wire::to_value).collect())
    }
    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::List(items) => items.iter().map(T::from_value).collect(),
            _ => None,
        }
    }
    fn type_name() -> Option<&'static str> {
        T::type_name()
    }
}

impl<T: Wire> Wire for Option<T> {
    fn kind() -> FieldKind {
        FieldKind::Optional(Box::new(T::kind()))
    }
    fn put(&self, buf: &mut BytesMut) {
        match self {
            Some(v) => {
                buf.put_u8(1);
                v.put(buf);
            }
            None => buf.put_u8(0),
        }
    }
    fn take(buf: &mut Bytes) -> Result<Self, MalformedStateError> {
        if take_flag(buf)? {
            Ok(Some(T::take(buf)?))
        } else {
            Ok(None)
        }
    }
    fn to_value(&self) -> Value {
        match self {
            Some(v) => v.to_value(),
            None => Value::Absent,
        }
    }
    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Absent => Some(None),
            other => T::from_value(other).map(Some),
        }
    }
    fn type_name() -> Option<&'static str> {
        T::type_name()
    }
}

/// A typed state record with a declared, ordered schema.
pub trait WireState: Sized + Default {
    const TYPE_NAME: &'static str;
    const LAYOUT: Layout;

    /// Declared `(attribute, kind)` pairs in wire order.
    fn schema() -> Vec<(&'static str, FieldKind)>;
    /// Current `(attribute, value)` pairs in wire order.
    fn values(&self) -> Vec<(&'static str, Value)>;
    fn encode_into(&self, buf: &mut BytesMut);
    fn decode_from(buf: &mut Bytes) -> Result<Self, MalformedStateError>;
    /// Builds a complete record from a partial source.
    fn populate(src: &dyn AttrSource) -> Self;

    fn encode(&self) -> Bytes {
        let mut buf = BytesMut::new();
        self.encode_into(&mut buf);
        buf.freeze()
    }

    fn decode(bytes: &[u8]) -> Result<Self, MalformedStateError> {
        let mut buf = Bytes::copy_from_slice(bytes);
        let state = Self::decode_from(&mut buf)?;
        if buf.has_remaining() {
            return Err(MalformedStateError::TrailingBytes(buf.remaining()));
        }
        Ok(state)
    }

    /// Overwrites each declared attribute on `target`.
    fn apply(&self, target: &mut dyn AttrTarget) {
        for (name, value) in self.values() {
            target.set_attr(name, value);
        }
        target.rederive();
    }

    /// Adds (or subtracts) each declared attribute onto `target`.
    fn apply_diff(&self, target: &mut dyn AttrTarget, remove: bool) {
        for (name, delta) in self.values() {
            let Some(current) = target.attr(name) else {
                continue;
            };
            if let Some(next) = current.combine(&delta, remove) {
                target.set_attr(name, next);
            }
        }
        target.rederive();
    }
}

macro_rules! field_name {
    ($field:ident) => {
        stringify!($field)
    };
    ($field:ident, $wire:literal) => {
        $wire
    };
}

macro_rules! field_default {
    ($ty:ty) => {
        <$ty as ::core::default::Default>::default()
    };
    ($ty:ty, $default:expr) => {
        $default
    };
}

/// Declares a state record and its codec.
///
/// ```ignore
/// state_record! {
///     pub struct PhysicalState("PhysicalState", Layout::Fixed) {
///         position: Vec3,
///         scale: Vec3 = Vec3::ONE,
///     }
/// }
/// ```
macro_rules! state_record {
    (
        $(#[$meta:meta])*
        $vis:vis struct $name:ident ($type_name:literal, $layout:expr) {
            $(
                $(#[$fmeta:meta])*
                $field:ident $(as $wire:literal)? : $ty:ty $(= $default:expr)?
            ),* $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, ::serde::Serialize, ::serde::Deserialize)]
        #[serde(default)]
        $vis struct $name {
            $(
                $(#[$fmeta])*
                $(#[serde(rename = $wire)])?
                pub $field: $ty,
            )*
        }

        impl ::core::default::Default for $name {
            fn default() -> Self {
                Self {
                    $( $field: field_default!($ty $(, $default)?), )*
                }
            }
        }

        impl $crate::codec::WireState for $name {
            const TYPE_NAME: &'static str = $type_name;
            const LAYOUT: $crate::codec::Layout = $layout;

            fn schema() -> Vec<(&'static str, $crate::codec::FieldKind)> {
                vec![ $( (field_name!($field $(, $wire)?), <$ty as $crate::codec::Wire>::kind()), )* ]
            }

            fn values(&self) -> Vec<(&'static str, $crate::codec::Value)> {
                vec![ $( (field_name!($field $(, $wire)?), $crate::codec::Wire::to_value(&self.$field)), )* ]
            }

            fn encode_into(&self, buf: &mut ::bytes::BytesMut) {
                match Self::LAYOUT {
                    $crate::codec::Layout::Fixed => {
                        $( $crate::codec::Wire::put(&self.$field, buf); )*
                    }
                    $crate::codec::Layout::Tagged => {
                        let defaults = Self::default();
                        $(
                            if self.$field != defaults.$field {
                                $crate::codec::put_str(buf, field_name!($field $(, $wire)?));
                                $crate::codec::Wire::put(&self.$field, buf);
                            }
                        )*
                        $crate::codec::put_str(buf, $crate::codec::SENTINEL);
                    }
                }
            }

            fn decode_from(
                buf: &mut ::bytes::Bytes,
            ) -> Result<Self, $crate::codec::MalformedStateError> {
                match Self::LAYOUT {
                    $crate::codec::Layout::Fixed => Ok(Self {
                        $( $field: <$ty as $crate::codec::Wire>::take(buf)?, )*
                    }),
                    $crate::codec::Layout::Tagged => {
                        let mut state = Self::default();
                        loop {
                            let key = $crate::codec::take_str(buf)?;
                            if key == $crate::codec::SENTINEL {
                                return Ok(state);
                            }
                            $(
                                if key == field_name!($field $(, $wire)?) {
                                    state.$field = <$ty as $crate::codec::Wire>::take(buf)?;
                                    continue;
                                }
                            )*
                            return Err($crate::codec::MalformedStateError::UnknownField {
                                state: $type_name,
                                field: key,
                            });
                        }
                    }
                }
            }

            fn populate(src: &dyn $crate::codec::AttrSource) -> Self {
                Self {
                    $(
                        $field: src
                            .attr(field_name!($field $(, $wire)?))
                            .and_then(|v| <$ty as $crate::codec::Wire>::from_value(&v))
                            .unwrap_or_else(|| field_default!($ty $(, $default)?)),
                    )*
                }
            }
        }

        impl $crate::codec::Wire for $name {
            fn kind() -> $crate::codec::FieldKind {
                $crate::codec::FieldKind::Record($type_name)
            }
            fn put(&self, buf: &mut ::bytes::BytesMut) {
                $crate::codec::WireState::encode_into(self, buf);
            }
            fn take(buf: &mut ::bytes::Bytes) -> Result<Self, $crate::codec::MalformedStateError> {
                <Self as $crate::codec::WireState>::decode_from(buf)
            }
            fn to_value(&self) -> $crate::codec::Value {
                $crate::codec::Value::Absent
            }
            fn from_value(_value: &$crate::codec::Value) -> Option<Self> {
                None
            }
            fn type_name() -> Option<&'static str> {
                Some($type_name)
            }
        }
    };
}
