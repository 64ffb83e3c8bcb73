//! Host-side wrappers for VM objects
//!
//! A [`VmRef`] is the single live proxy for one VM-resident object,
//! enforced by the owning instance's identity registry. Creating a
//! wrapper acquires a VM-level reference (an external pin); dropping
//! the last clone releases it and erases the registry entry in the same
//! breath, so the registry never holds a wrapper whose pin is gone.
//!
//! The kind enumeration is closed: new kinds are added here and at
//! every match site. The two interpreter-internal kinds have no wrapper
//! and reaching one at this boundary is a bridge bug, not a recoverable
//! error.

use crate::convert;
use crate::error::{BridgeError, BridgeResult};
use crate::value::HostValue;
use crate::vm::VmInstance;
use hazel_vm::{GeneratorState, ObjectKind, VmValue};
use std::fmt;
use std::rc::{Rc, Weak};

/// Concrete kind of a wrapped VM object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefKind {
    /// Table
    Table,
    /// Array
    Array,
    /// User data
    UserData,
    /// Script closure
    Function,
    /// Native closure
    NativeFunction,
    /// Generator
    Generator,
    /// Thread
    Thread,
    /// Class
    Class,
    /// Class instance
    Instance,
    /// Weak reference
    WeakRef,
}

impl RefKind {
    /// Map a VM kind tag to a wrapper kind. Interpreter-internal kinds
    /// must never reach the host boundary.
    pub(crate) fn from_object_kind(kind: ObjectKind) -> RefKind {
        match kind {
            ObjectKind::Table => RefKind::Table,
            ObjectKind::Array => RefKind::Array,
            ObjectKind::UserData => RefKind::UserData,
            ObjectKind::Closure => RefKind::Function,
            ObjectKind::NativeClosure => RefKind::NativeFunction,
            ObjectKind::Generator => RefKind::Generator,
            ObjectKind::Thread => RefKind::Thread,
            ObjectKind::Class => RefKind::Class,
            ObjectKind::Instance => RefKind::Instance,
            ObjectKind::WeakRef => RefKind::WeakRef,
            ObjectKind::FuncProto | ObjectKind::Outer => {
                unreachable!("internal VM kind {} crossed the host boundary", kind.name())
            }
        }
    }

    /// Kind name for diagnostics.
    pub fn name(self) -> &'static str {
        match self {
            RefKind::Table => "table",
            RefKind::Array => "array",
            RefKind::UserData => "user data",
            RefKind::Function => "function",
            RefKind::NativeFunction => "native function",
            RefKind::Generator => "generator",
            RefKind::Thread => "thread",
            RefKind::Class => "class",
            RefKind::Instance => "instance",
            RefKind::WeakRef => "weak reference",
        }
    }
}

pub(crate) struct VmRefInner {
    pub(crate) instance: Weak<VmInstance>,
    pub(crate) handle: VmValue,
    pub(crate) kind: RefKind,
}

impl Drop for VmRefInner {
    fn drop(&mut self) {
        let Some(instance) = self.instance.upgrade() else {
            // the whole machine died first; nothing to release
            return;
        };
        if let Some(key) = self.handle.object_key() {
            instance.registry.borrow_mut().erase(key);
        }
        instance.vm.release(&self.handle);
    }
}

/// Shared host-side proxy for one VM object.
#[derive(Clone)]
pub struct VmRef(pub(crate) Rc<VmRefInner>);

impl PartialEq for VmRef {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for VmRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VmRef({} {})", self.0.kind.name(), self.0.handle)
    }
}

impl VmRef {
    /// The wrapped object's kind.
    pub fn kind(&self) -> RefKind {
        self.0.kind
    }

    /// The VM's total reference count for the wrapped object.
    pub fn ref_count(&self) -> u32 {
        match self.0.instance.upgrade() {
            Some(inst) => inst.vm.ref_count(&self.0.handle),
            None => 0,
        }
    }

    /// True while the owning instance and the object are both alive.
    pub fn is_valid(&self) -> bool {
        match self.0.instance.upgrade() {
            Some(inst) => inst.vm.is_alive(&self.0.handle),
            None => false,
        }
    }

    /// True if this wrapper belongs to `instance`.
    pub(crate) fn owned_by(&self, instance: &Rc<VmInstance>) -> bool {
        self.0
            .instance
            .upgrade()
            .map(|mine| Rc::ptr_eq(&mine, instance))
            .unwrap_or(false)
    }

    pub(crate) fn handle(&self) -> &VmValue {
        &self.0.handle
    }

    pub(crate) fn instance(&self) -> BridgeResult<Rc<VmInstance>> {
        self.0.instance.upgrade().ok_or(BridgeError::InstanceGone)
    }

    fn expect_kind(&self, kind: RefKind) -> BridgeResult<Rc<VmInstance>> {
        if self.0.kind != kind {
            return Err(BridgeError::InvalidRef(format!(
                "{} operation on a {}",
                kind.name(),
                self.0.kind.name()
            )));
        }
        self.instance()
    }

    // ========================================================================
    // Tables
    // ========================================================================

    /// Slot lookup following the delegate chain.
    pub fn get_slot(&self, key: &HostValue) -> BridgeResult<HostValue> {
        let inst = self.expect_kind(RefKind::Table)?;
        let key = convert::to_vm_value(&inst, key)?;
        match inst.vm.table_get(&self.0.handle, &key) {
            Some(v) => Ok(convert::from_vm_value(&inst, &v)),
            None => Ok(HostValue::Nil),
        }
    }

    /// Slot lookup on the table itself, ignoring delegates.
    pub fn raw_get_slot(&self, key: &HostValue) -> BridgeResult<HostValue> {
        let inst = self.expect_kind(RefKind::Table)?;
        let key = convert::to_vm_value(&inst, key)?;
        match inst.vm.table_raw_get(&self.0.handle, &key) {
            Some(v) => Ok(convert::from_vm_value(&inst, &v)),
            None => Ok(HostValue::Nil),
        }
    }

    /// Create or overwrite a slot.
    pub fn set_slot(&self, key: &HostValue, value: &HostValue) -> BridgeResult<()> {
        let inst = self.expect_kind(RefKind::Table)?;
        let key = convert::to_vm_value(&inst, key)?;
        let value = convert::to_vm_value(&inst, value)?;
        inst.vm.table_set(&self.0.handle, key, value);
        Ok(())
    }

    /// True if the slot exists (delegates included).
    pub fn has_slot(&self, key: &HostValue) -> BridgeResult<bool> {
        let inst = self.expect_kind(RefKind::Table)?;
        let key = convert::to_vm_value(&inst, key)?;
        Ok(inst.vm.table_get(&self.0.handle, &key).is_some())
    }

    /// Remove a slot, returning the removed value (nil if absent).
    pub fn delete_slot(&self, key: &HostValue) -> BridgeResult<HostValue> {
        let inst = self.expect_kind(RefKind::Table)?;
        let key = convert::to_vm_value(&inst, key)?;
        match inst.vm.table_delete(&self.0.handle, &key) {
            Some(removed) => {
                // the removed value was parked on the stack to stay alive
                let out = convert::from_vm_value(&inst, &removed);
                inst.vm.pop(1);
                Ok(out)
            }
            None => Ok(HostValue::Nil),
        }
    }

    /// Number of slots.
    pub fn len(&self) -> BridgeResult<usize> {
        let inst = self.instance()?;
        match self.0.kind {
            RefKind::Table => inst
                .vm
                .table_len(&self.0.handle)
                .ok_or(BridgeError::InstanceGone),
            RefKind::Array => inst
                .vm
                .array_len(&self.0.handle)
                .ok_or(BridgeError::InstanceGone),
            other => Err(BridgeError::InvalidRef(format!(
                "len on a {}",
                other.name()
            ))),
        }
    }

    /// True when the container holds no entries.
    pub fn is_empty(&self) -> BridgeResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Remove every slot or element.
    pub fn clear(&self) -> BridgeResult<()> {
        let inst = self.instance()?;
        let ok = match self.0.kind {
            RefKind::Table => inst.vm.table_clear(&self.0.handle),
            RefKind::Array => inst.vm.array_clear(&self.0.handle),
            other => {
                return Err(BridgeError::InvalidRef(format!(
                    "clear on a {}",
                    other.name()
                )))
            }
        };
        if ok {
            Ok(())
        } else {
            Err(BridgeError::InstanceGone)
        }
    }

    /// Expose host callables as slots on this table. With `varargs`
    /// set, each callable receives the open-arity calling shape.
    pub fn wrap_callables(&self, entries: &[(&str, HostValue)], varargs: bool) -> BridgeResult<()> {
        let inst = self.expect_kind(RefKind::Table)?;
        for (name, callable) in entries {
            if !matches!(callable, HostValue::Callable(_)) {
                return Err(BridgeError::Unsupported(format!(
                    "slot {name} is a {}, not a callable",
                    callable.kind_name()
                )));
            }
            let wrapped = crate::native::wrap_callable(&inst, &inst.vm, callable, varargs);
            inst.vm.table_set(
                &self.0.handle,
                VmValue::string(*name),
                wrapped.handle().clone(),
            );
        }
        Ok(())
    }

    /// Delegate of a table or user-data object, if installed.
    pub fn get_delegate(&self) -> BridgeResult<Option<VmRef>> {
        let inst = self.instance()?;
        match self.0.kind {
            RefKind::Table | RefKind::UserData => Ok(inst
                .vm
                .get_delegate(&self.0.handle)
                .map(|d| inst.wrap(d))),
            other => Err(BridgeError::InvalidRef(format!(
                "delegate of a {}",
                other.name()
            ))),
        }
    }

    /// Install or clear the delegate of a table or user-data object.
    pub fn set_delegate(&self, delegate: Option<&VmRef>) -> BridgeResult<()> {
        let inst = self.instance()?;
        if let Some(d) = delegate {
            if !d.owned_by(&inst) {
                return Err(BridgeError::ForeignObject);
            }
            if d.0.kind != RefKind::Table {
                return Err(BridgeError::InvalidRef(format!(
                    "delegate must be a table, not a {}",
                    d.0.kind.name()
                )));
            }
        }
        let ok = inst
            .vm
            .set_delegate(&self.0.handle, delegate.map(|d| d.0.handle.clone()));
        if ok {
            Ok(())
        } else {
            Err(BridgeError::InvalidRef(format!(
                "delegate on a {}",
                self.0.kind.name()
            )))
        }
    }

    /// Shallow copy of a table or array, wrapped.
    pub fn clone_container(&self) -> BridgeResult<VmRef> {
        let inst = self.instance()?;
        match self.0.kind {
            RefKind::Table => {
                let copy = inst.vm.new_table();
                let mut index = 0;
                while let Some((k, v)) = inst.vm.table_entry(&self.0.handle, index) {
                    inst.vm.table_set(&copy, k, v);
                    index += 1;
                }
                let out = inst.wrap(copy);
                inst.vm.pop(1);
                Ok(out)
            }
            RefKind::Array => {
                let len = inst
                    .vm
                    .array_len(&self.0.handle)
                    .ok_or(BridgeError::InstanceGone)?;
                let copy = inst.vm.new_array(len);
                for i in 0..len {
                    if let Some(v) = inst.vm.array_get(&self.0.handle, i) {
                        inst.vm.array_set(&copy, i, v);
                    }
                }
                let out = inst.wrap(copy);
                inst.vm.pop(1);
                Ok(out)
            }
            other => Err(BridgeError::InvalidRef(format!(
                "clone of a {}",
                other.name()
            ))),
        }
    }

    // ========================================================================
    // Arrays
    // ========================================================================

    /// Element by index.
    pub fn get_index(&self, index: usize) -> BridgeResult<HostValue> {
        let inst = self.expect_kind(RefKind::Array)?;
        match inst.vm.array_get(&self.0.handle, index) {
            Some(v) => Ok(convert::from_vm_value(&inst, &v)),
            None => Err(BridgeError::InvalidRef(format!(
                "array index {index} out of range"
            ))),
        }
    }

    /// Overwrite an element.
    pub fn set_index(&self, index: usize, value: &HostValue) -> BridgeResult<()> {
        let inst = self.expect_kind(RefKind::Array)?;
        let value = convert::to_vm_value(&inst, value)?;
        if inst.vm.array_set(&self.0.handle, index, value) {
            Ok(())
        } else {
            Err(BridgeError::InvalidRef(format!(
                "array index {index} out of range"
            )))
        }
    }

    /// Append an element.
    pub fn append(&self, value: &HostValue) -> BridgeResult<()> {
        let inst = self.expect_kind(RefKind::Array)?;
        let value = convert::to_vm_value(&inst, value)?;
        inst.vm.array_append(&self.0.handle, value);
        Ok(())
    }

    /// Insert at an index, shifting later elements up.
    pub fn insert(&self, index: usize, value: &HostValue) -> BridgeResult<()> {
        let inst = self.expect_kind(RefKind::Array)?;
        let value = convert::to_vm_value(&inst, value)?;
        if inst.vm.array_insert(&self.0.handle, index, value) {
            Ok(())
        } else {
            Err(BridgeError::InvalidRef(format!(
                "array insert at {index} out of range"
            )))
        }
    }

    /// Remove the element at an index.
    pub fn remove(&self, index: usize) -> BridgeResult<()> {
        let inst = self.expect_kind(RefKind::Array)?;
        if inst.vm.array_remove(&self.0.handle, index) {
            Ok(())
        } else {
            Err(BridgeError::InvalidRef(format!(
                "array index {index} out of range"
            )))
        }
    }

    /// Pop the last element (nil when empty).
    pub fn pop(&self) -> BridgeResult<HostValue> {
        let inst = self.expect_kind(RefKind::Array)?;
        match inst.vm.array_pop(&self.0.handle) {
            Some(popped) => {
                let out = convert::from_vm_value(&inst, &popped);
                inst.vm.pop(1);
                Ok(out)
            }
            None => Ok(HostValue::Nil),
        }
    }

    /// Grow with nils or shrink.
    pub fn resize(&self, new_len: usize) -> BridgeResult<()> {
        let inst = self.expect_kind(RefKind::Array)?;
        inst.vm.array_resize(&self.0.handle, new_len);
        Ok(())
    }

    /// Reverse the elements in place.
    pub fn reverse(&self) -> BridgeResult<()> {
        let inst = self.expect_kind(RefKind::Array)?;
        inst.vm.array_reverse(&self.0.handle);
        Ok(())
    }

    // ========================================================================
    // User data
    // ========================================================================

    /// The boxed host value, if this user data was boxed by the bridge.
    pub fn host_value(&self) -> BridgeResult<Option<HostValue>> {
        let inst = self.expect_kind(RefKind::UserData)?;
        Ok(convert::unbox_host_value(&inst, &self.0.handle))
    }

    /// The bytes of a blob, if this user data is a byte blob.
    pub fn blob_bytes(&self) -> BridgeResult<Vec<u8>> {
        let inst = self.expect_kind(RefKind::UserData)?;
        inst.vm
            .blob_bytes(&self.0.handle)
            .ok_or_else(|| BridgeError::InvalidRef("user data is not a blob".to_string()))
    }

    /// Overwrite a blob's bytes.
    pub fn blob_set_bytes(&self, bytes: &[u8]) -> BridgeResult<()> {
        let inst = self.expect_kind(RefKind::UserData)?;
        if inst.vm.blob_set_bytes(&self.0.handle, bytes) {
            Ok(())
        } else {
            Err(BridgeError::InvalidRef("user data is not a blob".to_string()))
        }
    }

    // ========================================================================
    // Threads
    // ========================================================================

    fn thread_vm(&self) -> BridgeResult<(Rc<VmInstance>, hazel_vm::Vm)> {
        let inst = self.expect_kind(RefKind::Thread)?;
        let vm = inst
            .vm
            .thread_handle(&self.0.handle)
            .ok_or(BridgeError::InstanceGone)?;
        Ok((inst, vm))
    }

    /// Run state of this thread's context.
    pub fn thread_state(&self) -> BridgeResult<hazel_vm::RunState> {
        let (_, vm) = self.thread_vm()?;
        Ok(vm.state())
    }

    /// Call a function on this thread's own stack, so a suspension
    /// parks the thread and leaves the main context untouched.
    pub fn thread_call(
        &self,
        callable: &HostValue,
        this: &HostValue,
        args: &[HostValue],
    ) -> BridgeResult<HostValue> {
        let (inst, vm) = self.thread_vm()?;
        crate::call::call_function(&inst, &vm, callable, this, args)
    }

    /// Wake this suspended thread with `value`.
    pub fn thread_wake_up(&self, value: &HostValue) -> BridgeResult<HostValue> {
        let (inst, vm) = self.thread_vm()?;
        crate::call::wake_up(&inst, &vm, value)
    }

    /// Wake this suspended thread by raising `error` at its suspension
    /// point.
    pub fn thread_wake_up_throw(&self, error: &HostValue) -> BridgeResult<()> {
        let (inst, vm) = self.thread_vm()?;
        crate::call::wake_up_throw(&inst, &vm, error)
    }

    /// Resume a suspended generator on this thread's stack.
    pub fn thread_resume_generator(&self, generator: &VmRef) -> BridgeResult<HostValue> {
        let (inst, vm) = self.thread_vm()?;
        crate::call::resume_generator(&inst, &vm, generator)
    }

    // ========================================================================
    // Functions and generators
    // ========================================================================

    /// Name and source of a closure.
    pub fn function_info(&self) -> BridgeResult<(String, String)> {
        let inst = self.instance()?;
        match self.0.kind {
            RefKind::Function | RefKind::NativeFunction => inst
                .vm
                .closure_info(&self.0.handle)
                .map(|(name, source)| (name.to_string(), source.to_string()))
                .ok_or(BridgeError::InstanceGone),
            other => Err(BridgeError::InvalidRef(format!(
                "function info of a {}",
                other.name()
            ))),
        }
    }

    /// Copy of the closure with `env` bound as its environment object.
    pub fn bind_env(&self, env: &VmRef) -> BridgeResult<VmRef> {
        let inst = self.instance()?;
        if !matches!(self.0.kind, RefKind::Function | RefKind::NativeFunction) {
            return Err(BridgeError::InvalidRef(format!(
                "bind_env on a {}",
                self.0.kind.name()
            )));
        }
        if !env.owned_by(&inst) {
            return Err(BridgeError::ForeignObject);
        }
        let bound = inst
            .vm
            .bind_env(&self.0.handle, env.0.handle.clone())
            .map_err(|e| BridgeError::InvalidRef(e.to_string()))?;
        let out = inst.wrap(bound);
        inst.vm.pop(1);
        Ok(out)
    }

    /// Lifecycle state of a generator.
    pub fn generator_state(&self) -> BridgeResult<GeneratorState> {
        let inst = self.expect_kind(RefKind::Generator)?;
        inst.vm
            .generator_state(&self.0.handle)
            .ok_or(BridgeError::InstanceGone)
    }

    // ========================================================================
    // Weak references, classes, instances
    // ========================================================================

    /// Weak reference object for this target. The weak reference keeps
    /// the target alive no longer than the host's other references do.
    pub fn weak_ref(&self) -> BridgeResult<VmRef> {
        let inst = self.instance()?;
        let weak = inst.vm.weakref_of(&self.0.handle);
        let out = inst.wrap(weak);
        inst.vm.pop(1);
        Ok(out)
    }

    /// The weak reference's target, nil once it died.
    pub fn weakref_target(&self) -> BridgeResult<HostValue> {
        let inst = self.expect_kind(RefKind::WeakRef)?;
        let target = inst.vm.weakref_target(&self.0.handle);
        Ok(convert::from_vm_value(&inst, &target))
    }

    /// The class an instance was constructed from.
    pub fn instance_class(&self) -> BridgeResult<VmRef> {
        let inst = self.expect_kind(RefKind::Instance)?;
        inst.vm
            .instance_class(&self.0.handle)
            .map(|c| inst.wrap(c))
            .ok_or(BridgeError::InstanceGone)
    }

    /// Shallow copy of an instance, wrapped.
    pub fn clone_instance(&self) -> BridgeResult<VmRef> {
        let inst = self.expect_kind(RefKind::Instance)?;
        let copy = inst
            .vm
            .clone_instance(&self.0.handle)
            .ok_or(BridgeError::InstanceGone)?;
        let out = inst.wrap(copy);
        inst.vm.pop(1);
        Ok(out)
    }

    // ========================================================================
    // Iteration
    // ========================================================================

    /// Cursor over a table's slots or an array's elements. Array
    /// entries are keyed by their integer index.
    pub fn iterate(&self) -> BridgeResult<ObjectIter> {
        match self.0.kind {
            RefKind::Table | RefKind::Array => Ok(ObjectIter {
                target: self.clone(),
                index: 0,
            }),
            other => Err(BridgeError::InvalidRef(format!(
                "iterate over a {}",
                other.name()
            ))),
        }
    }
}

/// Insertion-order cursor over a table or array.
pub struct ObjectIter {
    target: VmRef,
    index: usize,
}

impl Iterator for ObjectIter {
    type Item = (HostValue, HostValue);

    fn next(&mut self) -> Option<Self::Item> {
        let inst = self.target.0.instance.upgrade()?;
        let entry = match self.target.0.kind {
            RefKind::Table => inst
                .vm
                .table_entry(self.target.handle(), self.index)
                .map(|(k, v)| {
                    (
                        convert::from_vm_value(&inst, &k),
                        convert::from_vm_value(&inst, &v),
                    )
                }),
            RefKind::Array => inst
                .vm
                .array_get(self.target.handle(), self.index)
                .map(|v| {
                    (
                        HostValue::Int(self.index as i64),
                        convert::from_vm_value(&inst, &v),
                    )
                }),
            _ => None,
        };
        self.index += 1;
        entry
    }
}
