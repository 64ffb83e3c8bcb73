//! Tagged value representation and object identity
//!
//! A [`VmValue`] is either an inline primitive or a reference to a heap
//! object, tagged with its [`ObjectKind`]. Object identity is structural:
//! the kind tag plus the raw slot word ([`ObjectKey`]) uniquely names one
//! live heap object for the lifetime of that object.

use std::fmt;
use std::rc::Rc;

/// Runtime kind tag for heap objects.
///
/// This enumeration is closed: every match over it is exhaustive, and new
/// kinds are added here and at every match site rather than through any
/// open-ended dispatch. `FuncProto` and `Outer` are interpreter-internal
/// and must never appear on the embedding stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    /// Hash table with optional delegate
    Table,
    /// Dense array
    Array,
    /// Opaque user data with release hook and type tag
    UserData,
    /// Script closure (compiled function)
    Closure,
    /// Native closure (host function plus bound free variables)
    NativeClosure,
    /// Suspended or exhausted generator
    Generator,
    /// Coroutine execution context sharing this VM's heap
    Thread,
    /// Class object
    Class,
    /// Class instance
    Instance,
    /// Weak reference to another heap object
    WeakRef,
    /// Internal: compiled function prototype
    FuncProto,
    /// Internal: captured outer variable
    Outer,
}

impl ObjectKind {
    /// Human-readable kind name used in diagnostics.
    pub fn name(self) -> &'static str {
        match self {
            ObjectKind::Table => "table",
            ObjectKind::Array => "array",
            ObjectKind::UserData => "userdata",
            ObjectKind::Closure => "closure",
            ObjectKind::NativeClosure => "nativeclosure",
            ObjectKind::Generator => "generator",
            ObjectKind::Thread => "thread",
            ObjectKind::Class => "class",
            ObjectKind::Instance => "instance",
            ObjectKind::WeakRef => "weakref",
            ObjectKind::FuncProto => "funcproto",
            ObjectKind::Outer => "outer",
        }
    }
}

/// Heap slot handle: index plus generation.
///
/// The generation is bumped whenever a slot is freed, so a stale
/// `ObjectId` can never alias an unrelated object that reused the slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjectId {
    pub(crate) index: u32,
    pub(crate) generation: u32,
}

impl ObjectId {
    /// The raw identity word: generation in the high half, index in the low.
    #[inline]
    pub fn raw(self) -> u64 {
        (u64::from(self.generation) << 32) | u64::from(self.index)
    }
}

/// Structural identity of one heap object: kind tag plus raw slot word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjectKey {
    /// Runtime kind tag
    pub kind: ObjectKind,
    /// Raw identity word
    pub raw: u64,
}

/// A VM value: inline primitive or tagged heap reference.
///
/// Equality is structural for primitives and identity-based for objects.
/// Cloning a `VmValue` does not affect reference counts; ownership is
/// tracked by the locations a value is stored into (stack slots,
/// container slots, external pins), all of which go through the machine's
/// refcount bookkeeping.
#[derive(Debug, Clone)]
pub enum VmValue {
    /// Null
    Null,
    /// 64-bit signed integer
    Int(i64),
    /// 64-bit float
    Float(f64),
    /// Boolean
    Bool(bool),
    /// Immutable shared string
    Str(Rc<str>),
    /// Heap object reference
    Object(ObjectKind, ObjectId),
}

impl VmValue {
    /// Build a string value.
    pub fn string(s: impl Into<Rc<str>>) -> Self {
        VmValue::Str(s.into())
    }

    /// True for `Null`.
    #[inline]
    pub fn is_null(&self) -> bool {
        matches!(self, VmValue::Null)
    }

    /// Borrow the string contents, if this is a string value.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            VmValue::Str(s) => Some(s),
            _ => None,
        }
    }

    /// The heap identity of this value, if it is an object reference.
    pub fn object_key(&self) -> Option<ObjectKey> {
        match self {
            VmValue::Object(kind, id) => Some(ObjectKey {
                kind: *kind,
                raw: id.raw(),
            }),
            _ => None,
        }
    }

    /// The object kind, if this value is an object reference.
    pub fn object_kind(&self) -> Option<ObjectKind> {
        match self {
            VmValue::Object(kind, _) => Some(*kind),
            _ => None,
        }
    }

    /// Kind name for diagnostics (`"integer"`, `"table"`, ...).
    pub fn type_name(&self) -> &'static str {
        match self {
            VmValue::Null => "null",
            VmValue::Int(_) => "integer",
            VmValue::Float(_) => "float",
            VmValue::Bool(_) => "bool",
            VmValue::Str(_) => "string",
            VmValue::Object(kind, _) => kind.name(),
        }
    }
}

impl PartialEq for VmValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (VmValue::Null, VmValue::Null) => true,
            (VmValue::Int(a), VmValue::Int(b)) => a == b,
            (VmValue::Float(a), VmValue::Float(b)) => a.to_bits() == b.to_bits(),
            (VmValue::Bool(a), VmValue::Bool(b)) => a == b,
            (VmValue::Str(a), VmValue::Str(b)) => a == b,
            (VmValue::Object(ka, ia), VmValue::Object(kb, ib)) => ka == kb && ia == ib,
            _ => false,
        }
    }
}

impl fmt::Display for VmValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VmValue::Null => write!(f, "null"),
            VmValue::Int(i) => write!(f, "{}", i),
            VmValue::Float(x) => write!(f, "{}", x),
            VmValue::Bool(b) => write!(f, "{}", b),
            VmValue::Str(s) => write!(f, "{}", s),
            VmValue::Object(kind, id) => write!(f, "<{}:{:#x}>", kind.name(), id.raw()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_key_packs_generation_and_index() {
        let id = ObjectId {
            index: 7,
            generation: 3,
        };
        assert_eq!(id.raw(), (3u64 << 32) | 7);
    }

    #[test]
    fn primitive_equality_is_structural() {
        assert_eq!(VmValue::Int(42), VmValue::Int(42));
        assert_eq!(VmValue::string("hi"), VmValue::string("hi"));
        assert_ne!(VmValue::Int(1), VmValue::Float(1.0));
    }

    #[test]
    fn object_equality_is_identity() {
        let a = ObjectId {
            index: 1,
            generation: 0,
        };
        let b = ObjectId {
            index: 1,
            generation: 1,
        };
        assert_ne!(
            VmValue::Object(ObjectKind::Table, a),
            VmValue::Object(ObjectKind::Table, b)
        );
    }
}
