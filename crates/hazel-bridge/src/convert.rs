//! Value conversion between the host model and the VM
//!
//! The two directions are deliberately asymmetric. VM-to-host always
//! succeeds: every VM value has a host rendering, with VM objects
//! surfacing as wrappers. Host-to-VM is fallible: only primitives,
//! strings, and wrappers owned by the target instance convert directly;
//! composites and callables go through the explicit recursive path so
//! the caller chooses whether unhandled leaves become boxed opaques or
//! hard errors.

use crate::error::{BridgeError, BridgeResult};
use crate::value::HostValue;
use crate::vm::{VmInstance, HOST_VALUE_TAG};
use hazel_vm::{Vm, VmValue};
use std::rc::Rc;

/// Recursion limit for composite conversion. Deep enough for any sane
/// host payload, shallow enough to fail before the stack does.
const MAX_CONVERT_DEPTH: usize = 64;

/// Convert a host value into a VM value without recursing into
/// composites. Wrappers must belong to `inst`.
pub(crate) fn to_vm_value(inst: &Rc<VmInstance>, value: &HostValue) -> BridgeResult<VmValue> {
    match value {
        HostValue::Nil => Ok(VmValue::Null),
        HostValue::Bool(b) => Ok(VmValue::Bool(*b)),
        HostValue::Int(i) => Ok(VmValue::Int(*i)),
        HostValue::Float(f) => Ok(VmValue::Float(*f)),
        HostValue::Str(s) => Ok(VmValue::string(s.as_str())),
        HostValue::Object(r) => {
            if r.owned_by(inst) {
                Ok(r.handle().clone())
            } else {
                Err(BridgeError::ForeignObject)
            }
        }
        other => Err(BridgeError::Unsupported(format!(
            "cannot pass a {} to the vm directly",
            other.kind_name()
        ))),
    }
}

/// Convert and push in one step, so call sites keep their stack
/// accounting in one place.
pub(crate) fn push_value(inst: &Rc<VmInstance>, vm: &Vm, value: &HostValue) -> BridgeResult<()> {
    let v = to_vm_value(inst, value)?;
    vm.push(v);
    Ok(())
}

/// Render a VM value for the host. Boxed host values round-trip through
/// their user data unchanged; every other object becomes a wrapper.
pub(crate) fn from_vm_value(inst: &Rc<VmInstance>, value: &VmValue) -> HostValue {
    match value {
        VmValue::Null => HostValue::Nil,
        VmValue::Bool(b) => HostValue::Bool(*b),
        VmValue::Int(i) => HostValue::Int(*i),
        VmValue::Float(f) => HostValue::Float(*f),
        VmValue::Str(s) => HostValue::Str(s.to_string()),
        VmValue::Object(_, _) => match unbox_host_value(inst, value) {
            Some(boxed) => boxed,
            None => HostValue::Object(inst.wrap(value.clone())),
        },
    }
}

/// If `value` is user data boxed by this bridge, a clone of the host
/// value inside it.
pub(crate) fn unbox_host_value(inst: &Rc<VmInstance>, value: &VmValue) -> Option<HostValue> {
    if inst.vm.userdata_tag(value)? != *HOST_VALUE_TAG {
        return None;
    }
    inst.vm.with_userdata(value, |data| {
        data.downcast_ref::<HostValue>().cloned()
    })?
}

/// Read a stack slot as a host value.
pub(crate) fn read_stack(inst: &Rc<VmInstance>, vm: &Vm, idx: i64) -> HostValue {
    match vm.get(idx) {
        Some(v) => from_vm_value(inst, &v),
        None => HostValue::Nil,
    }
}

/// Convert a host value into a VM value, recursing into composites.
///
/// Maps become tables, lists and packed arrays become arrays. Leaves a
/// direct conversion cannot handle are boxed as opaque user data
/// (callables reuse a live interned box) when `wrap_unhandled` is set,
/// and fail the whole conversion otherwise. The stack is unchanged on
/// every exit.
pub(crate) fn convert_value(
    inst: &Rc<VmInstance>,
    value: &HostValue,
    wrap_unhandled: bool,
) -> BridgeResult<HostValue> {
    convert_at(inst, value, wrap_unhandled, 0)
}

fn convert_at(
    inst: &Rc<VmInstance>,
    value: &HostValue,
    wrap_unhandled: bool,
    depth: usize,
) -> BridgeResult<HostValue> {
    if depth > MAX_CONVERT_DEPTH {
        return Err(BridgeError::TooDeep);
    }
    match value {
        HostValue::Nil
        | HostValue::Bool(_)
        | HostValue::Int(_)
        | HostValue::Float(_)
        | HostValue::Str(_)
        | HostValue::Object(_) => Ok(value.clone()),
        HostValue::Map(entries) => {
            // the table sits on the stack while it fills; a failed entry
            // must not leave it there
            let base = inst.vm.top();
            let table = inst.vm.new_table();
            let filled = (|| -> BridgeResult<()> {
                for (k, v) in entries {
                    let k = convert_at(inst, k, wrap_unhandled, depth + 1)?;
                    let v = convert_at(inst, v, wrap_unhandled, depth + 1)?;
                    let k = to_vm_value(inst, &k)?;
                    let v = to_vm_value(inst, &v)?;
                    inst.vm.table_set(&table, k, v);
                }
                Ok(())
            })();
            if let Err(e) = filled {
                inst.vm.set_top(base);
                return Err(e);
            }
            let wrapped = inst.wrap(table);
            inst.vm.pop(1);
            Ok(HostValue::Object(wrapped))
        }
        HostValue::List(items) => {
            let base = inst.vm.top();
            let array = inst.vm.new_array(items.len());
            let filled = (|| -> BridgeResult<()> {
                for (i, item) in items.iter().enumerate() {
                    let item = convert_at(inst, item, wrap_unhandled, depth + 1)?;
                    let item = to_vm_value(inst, &item)?;
                    inst.vm.array_set(&array, i, item);
                }
                Ok(())
            })();
            if let Err(e) = filled {
                inst.vm.set_top(base);
                return Err(e);
            }
            let wrapped = inst.wrap(array);
            inst.vm.pop(1);
            Ok(HostValue::Object(wrapped))
        }
        HostValue::Bytes(bytes) => {
            let array = inst.vm.new_array(bytes.len());
            for (i, b) in bytes.iter().enumerate() {
                inst.vm.array_set(&array, i, VmValue::Int(*b as i64));
            }
            let wrapped = inst.wrap(array);
            inst.vm.pop(1);
            Ok(HostValue::Object(wrapped))
        }
        HostValue::IntArray(items) => {
            let array = inst.vm.new_array(items.len());
            for (i, n) in items.iter().enumerate() {
                inst.vm.array_set(&array, i, VmValue::Int(*n));
            }
            let wrapped = inst.wrap(array);
            inst.vm.pop(1);
            Ok(HostValue::Object(wrapped))
        }
        HostValue::FloatArray(items) => {
            let array = inst.vm.new_array(items.len());
            for (i, f) in items.iter().enumerate() {
                inst.vm.array_set(&array, i, VmValue::Float(*f));
            }
            let wrapped = inst.wrap(array);
            inst.vm.pop(1);
            Ok(HostValue::Object(wrapped))
        }
        HostValue::StrArray(items) => {
            let array = inst.vm.new_array(items.len());
            for (i, s) in items.iter().enumerate() {
                inst.vm.array_set(&array, i, VmValue::string(s.as_str()));
            }
            let wrapped = inst.wrap(array);
            inst.vm.pop(1);
            Ok(HostValue::Object(wrapped))
        }
        HostValue::Callable(_) => {
            if wrap_unhandled {
                Ok(HostValue::Object(inst.intern(value)?))
            } else {
                Err(BridgeError::Unsupported(
                    "unhandled callable in converted value".into(),
                ))
            }
        }
        HostValue::Opaque(_) => {
            if wrap_unhandled {
                Ok(HostValue::Object(inst.box_opaque(value)))
            } else {
                Err(BridgeError::Unsupported(
                    "unhandled opaque value in converted value".into(),
                ))
            }
        }
        HostValue::Context(_) | HostValue::Special(_) => Err(BridgeError::Unsupported(format!(
            "cannot convert a {}",
            value.kind_name()
        ))),
    }
}
