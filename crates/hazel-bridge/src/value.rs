//! Host-side tagged values
//!
//! [`HostValue`] is the host application's value universe as seen by the
//! bridge: primitives, composites, packed numeric arrays, callables,
//! opaque host objects, VM object wrappers, and the closed set of
//! special-return markers. Equality is by value for data kinds and by
//! identity for callables, opaques, and VM objects.

use crate::object::VmRef;
use crate::vm::ScriptVm;
use std::any::Any;
use std::fmt;
use std::rc::Rc;

/// A host-defined callable, invokable from script through the native
/// callable bridge. Identity is the allocation, not the code.
pub type HostCallable = Rc<dyn Fn(&[HostValue]) -> HostValue>;

/// The execution context a native callable was invoked from.
#[derive(Clone)]
pub enum VmContext {
    /// The instance's main context.
    Instance(ScriptVm),
    /// A thread object's context.
    Thread(VmRef),
}

/// Host tagged value.
#[derive(Clone)]
pub enum HostValue {
    /// No value
    Nil,
    /// Boolean
    Bool(bool),
    /// 64-bit signed integer
    Int(i64),
    /// 64-bit float
    Float(f64),
    /// String
    Str(String),
    /// Ordered sequence
    List(Vec<HostValue>),
    /// Ordered key/value map
    Map(Vec<(HostValue, HostValue)>),
    /// Packed byte buffer
    Bytes(Vec<u8>),
    /// Packed integer array
    IntArray(Vec<i64>),
    /// Packed float array
    FloatArray(Vec<f64>),
    /// Packed string array
    StrArray(Vec<String>),
    /// Host callable
    Callable(HostCallable),
    /// Opaque host object with no VM-native equivalent
    Opaque(Rc<dyn Any>),
    /// Wrapper for a VM-resident object
    Object(VmRef),
    /// Invoking execution context, passed to varargs callables
    Context(VmContext),
    /// Special-return marker redirecting a native invocation's control
    /// flow
    Special(Box<SpecialReturn>),
}

/// Control-flow directives a native callable can return instead of an
/// ordinary value. The set is closed and exhaustively interpreted by
/// the invocation adapter.
#[derive(Clone)]
pub enum SpecialReturn {
    /// Raise the carried value as a script-level exception.
    Throw {
        /// Exception value
        exception: HostValue,
    },
    /// Invoke another callable in this call's place.
    TailCall {
        /// Target callable (must belong to the same instance)
        func: HostValue,
        /// Arguments, the callee's `this` first
        args: Vec<HostValue>,
    },
    /// Suspend the invoking context with a result value.
    Suspend {
        /// Value handed to whoever resumed the context
        result: HostValue,
    },
}

impl HostValue {
    /// Shorthand for a string value.
    pub fn str(s: impl Into<String>) -> Self {
        HostValue::Str(s.into())
    }

    /// Shorthand for a throw marker.
    pub fn throw(exception: HostValue) -> Self {
        HostValue::Special(Box::new(SpecialReturn::Throw { exception }))
    }

    /// Shorthand for a tail-call marker.
    pub fn tail_call(func: HostValue, args: Vec<HostValue>) -> Self {
        HostValue::Special(Box::new(SpecialReturn::TailCall { func, args }))
    }

    /// Shorthand for a suspend marker.
    pub fn suspend(result: HostValue) -> Self {
        HostValue::Special(Box::new(SpecialReturn::Suspend { result }))
    }

    /// True for `Nil`.
    pub fn is_nil(&self) -> bool {
        matches!(self, HostValue::Nil)
    }

    /// Borrow the string contents, if this is a string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            HostValue::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Borrow the wrapper, if this is a VM object.
    pub fn as_object(&self) -> Option<&VmRef> {
        match self {
            HostValue::Object(r) => Some(r),
            _ => None,
        }
    }

    /// Kind name for diagnostics.
    pub fn kind_name(&self) -> &'static str {
        match self {
            HostValue::Nil => "nil",
            HostValue::Bool(_) => "bool",
            HostValue::Int(_) => "int",
            HostValue::Float(_) => "float",
            HostValue::Str(_) => "string",
            HostValue::List(_) => "list",
            HostValue::Map(_) => "map",
            HostValue::Bytes(_) => "bytes",
            HostValue::IntArray(_) => "int array",
            HostValue::FloatArray(_) => "float array",
            HostValue::StrArray(_) => "string array",
            HostValue::Callable(_) => "callable",
            HostValue::Opaque(_) => "opaque",
            HostValue::Object(_) => "vm object",
            HostValue::Context(_) => "vm context",
            HostValue::Special(_) => "special return",
        }
    }
}

impl PartialEq for HostValue {
    fn eq(&self, other: &Self) -> bool {
        use HostValue::*;
        match (self, other) {
            (Nil, Nil) => true,
            (Bool(a), Bool(b)) => a == b,
            (Int(a), Int(b)) => a == b,
            (Float(a), Float(b)) => a.to_bits() == b.to_bits(),
            (Str(a), Str(b)) => a == b,
            (List(a), List(b)) => a == b,
            (Map(a), Map(b)) => a == b,
            (Bytes(a), Bytes(b)) => a == b,
            (IntArray(a), IntArray(b)) => a == b,
            (FloatArray(a), FloatArray(b)) => {
                a.len() == b.len()
                    && a.iter().zip(b).all(|(x, y)| x.to_bits() == y.to_bits())
            }
            (StrArray(a), StrArray(b)) => a == b,
            (Callable(a), Callable(b)) => callable_addr(a) == callable_addr(b),
            (Opaque(a), Opaque(b)) => Rc::ptr_eq(a, b),
            (Object(a), Object(b)) => a == b,
            (Context(a), Context(b)) => match (a, b) {
                (VmContext::Instance(x), VmContext::Instance(y)) => x.same_instance(y),
                (VmContext::Thread(x), VmContext::Thread(y)) => x == y,
                _ => false,
            },
            (Special(a), Special(b)) => special_eq(a, b),
            _ => false,
        }
    }
}

fn special_eq(a: &SpecialReturn, b: &SpecialReturn) -> bool {
    match (a, b) {
        (
            SpecialReturn::Throw { exception: x },
            SpecialReturn::Throw { exception: y },
        ) => x == y,
        (
            SpecialReturn::TailCall { func: fa, args: aa },
            SpecialReturn::TailCall { func: fb, args: ab },
        ) => fa == fb && aa == ab,
        (
            SpecialReturn::Suspend { result: x },
            SpecialReturn::Suspend { result: y },
        ) => x == y,
        _ => false,
    }
}

/// Thin address of a callable, usable as an identity key.
pub(crate) fn callable_addr(f: &HostCallable) -> usize {
    Rc::as_ptr(f) as *const () as usize
}

/// Thin address of an opaque payload.
pub(crate) fn opaque_addr(o: &Rc<dyn Any>) -> usize {
    Rc::as_ptr(o) as *const () as usize
}

impl fmt::Debug for HostValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HostValue::Nil => write!(f, "Nil"),
            HostValue::Bool(b) => write!(f, "Bool({b})"),
            HostValue::Int(n) => write!(f, "Int({n})"),
            HostValue::Float(x) => write!(f, "Float({x})"),
            HostValue::Str(s) => write!(f, "Str({s:?})"),
            HostValue::List(items) => f.debug_tuple("List").field(items).finish(),
            HostValue::Map(entries) => f.debug_tuple("Map").field(entries).finish(),
            HostValue::Bytes(b) => write!(f, "Bytes({} bytes)", b.len()),
            HostValue::IntArray(v) => f.debug_tuple("IntArray").field(v).finish(),
            HostValue::FloatArray(v) => f.debug_tuple("FloatArray").field(v).finish(),
            HostValue::StrArray(v) => f.debug_tuple("StrArray").field(v).finish(),
            HostValue::Callable(c) => write!(f, "Callable({:#x})", callable_addr(c)),
            HostValue::Opaque(o) => write!(f, "Opaque({:#x})", opaque_addr(o)),
            HostValue::Object(r) => write!(f, "Object({r:?})"),
            HostValue::Context(VmContext::Instance(_)) => write!(f, "Context(instance)"),
            HostValue::Context(VmContext::Thread(r)) => write!(f, "Context(thread {r:?})"),
            HostValue::Special(s) => match &**s {
                SpecialReturn::Throw { .. } => write!(f, "Special(Throw)"),
                SpecialReturn::TailCall { .. } => write!(f, "Special(TailCall)"),
                SpecialReturn::Suspend { .. } => write!(f, "Special(Suspend)"),
            },
        }
    }
}

/// Value-equality key for the weak intern table. Floats key by bit
/// pattern; callables and opaques key by allocation address.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) enum HostKey {
    Nil,
    Bool(bool),
    Int(i64),
    Float(u64),
    Str(String),
    List(Vec<HostKey>),
    Map(Vec<(HostKey, HostKey)>),
    Bytes(Vec<u8>),
    IntArray(Vec<i64>),
    FloatArray(Vec<u64>),
    StrArray(Vec<String>),
    Callable(usize),
    Opaque(usize),
}

impl HostKey {
    /// Build a key, or `None` for kinds that are never interned
    /// (wrappers, contexts, special markers).
    pub(crate) fn of(v: &HostValue) -> Option<HostKey> {
        Some(match v {
            HostValue::Nil => HostKey::Nil,
            HostValue::Bool(b) => HostKey::Bool(*b),
            HostValue::Int(n) => HostKey::Int(*n),
            HostValue::Float(x) => HostKey::Float(x.to_bits()),
            HostValue::Str(s) => HostKey::Str(s.clone()),
            HostValue::List(items) => {
                HostKey::List(items.iter().map(HostKey::of).collect::<Option<_>>()?)
            }
            HostValue::Map(entries) => HostKey::Map(
                entries
                    .iter()
                    .map(|(k, v)| Some((HostKey::of(k)?, HostKey::of(v)?)))
                    .collect::<Option<_>>()?,
            ),
            HostValue::Bytes(b) => HostKey::Bytes(b.clone()),
            HostValue::IntArray(v) => HostKey::IntArray(v.clone()),
            HostValue::FloatArray(v) => {
                HostKey::FloatArray(v.iter().map(|x| x.to_bits()).collect())
            }
            HostValue::StrArray(v) => HostKey::StrArray(v.clone()),
            HostValue::Callable(c) => HostKey::Callable(callable_addr(c)),
            HostValue::Opaque(o) => HostKey::Opaque(opaque_addr(o)),
            HostValue::Object(_) | HostValue::Context(_) | HostValue::Special(_) => return None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn callable_equality_is_by_allocation() {
        let f: HostCallable = Rc::new(|_: &[HostValue]| HostValue::Nil);
        let g: HostCallable = Rc::new(|_: &[HostValue]| HostValue::Nil);
        assert_eq!(HostValue::Callable(Rc::clone(&f)), HostValue::Callable(f));
        let f2: HostCallable = Rc::new(|_: &[HostValue]| HostValue::Nil);
        assert_ne!(HostValue::Callable(f2), HostValue::Callable(g));
    }

    #[test]
    fn host_key_floats_by_bits() {
        let a = HostKey::of(&HostValue::Float(0.5)).unwrap();
        let b = HostKey::of(&HostValue::Float(0.5)).unwrap();
        assert_eq!(a, b);
        let nan1 = HostKey::of(&HostValue::Float(f64::NAN)).unwrap();
        let nan2 = HostKey::of(&HostValue::Float(f64::NAN)).unwrap();
        assert_eq!(nan1, nan2);
    }

    #[test]
    fn markers_are_never_interned() {
        assert!(HostKey::of(&HostValue::throw(HostValue::Nil)).is_none());
        let nested = HostValue::List(vec![HostValue::suspend(HostValue::Nil)]);
        assert!(HostKey::of(&nested).is_none());
    }
}
