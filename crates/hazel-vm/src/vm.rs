//! Public VM handle and embedding API
//!
//! A [`Vm`] is a cheap handle onto shared machine state, bound to one
//! execution context (the main context or a thread object). Handles for
//! every context of the same machine share the heap, the built-in
//! tables, and the installed hooks.
//!
//! Stack protocol for calls: the caller pushes the callable, the `this`
//! value, then the remaining arguments, and invokes [`Vm::call`] with
//! the argument count (`this` included). The call pops the arguments and
//! pushes the result, leaving `[callable, result]`; the caller pops the
//! result and then the callable, keeping the callable pushed while the
//! context stays suspended.

use crate::bytecode::Const;
use crate::compile;
use crate::error::{VmError, VmResult};
use crate::exec::{CallRecord, GeneratorState, RunState, ScriptFrame, SuspendPoint};
use crate::heap::{
    ClassData, ClosureData, GenFrame, GeneratorData, InstanceData, NativeClosureData, Payload,
    ReleaseHook, TableData, UserDataBox,
};
use crate::machine::{CoreInner, Ctx};
use crate::serialize::{self, ReadFn, WriteFn};
use crate::value::{ObjectId, ObjectKind, VmValue};
use std::any::Any;
use std::cell::RefCell;
use std::rc::{Rc, Weak};

/// Hook receiving print or error output lines.
pub type OutputHook = Rc<dyn Fn(&str)>;

/// Host function invoked when a native closure is called. It reads its
/// arguments from the handle's stack window and reports its outcome as
/// a [`NativeFlow`].
pub type NativeFn = Rc<dyn Fn(&Vm) -> NativeFlow>;

/// Hook receiving debug events while script code executes.
pub type DebugHook = Rc<dyn Fn(&Vm, &DebugEvent)>;

/// Type tag carried by blob user-data objects.
pub const BLOB_TYPE_TAG: u64 = 0x485a_424c; // "HZBL"

/// Outcome of a native closure invocation.
pub enum NativeFlow {
    /// Return a value to the caller.
    Return(VmValue),
    /// Return without a value (the caller sees null).
    ReturnNone,
    /// Raise the value as a script-level error.
    Throw(VmValue),
    /// Suspend the execution context; the suspend value is handed to the
    /// caller and a later wake-up value becomes the call's result.
    Suspend(VmValue),
    /// Invoke another callable in this call's place; its result becomes
    /// this call's result.
    TailCall {
        /// Callable to invoke.
        func: VmValue,
        /// Arguments, `this` first.
        args: Vec<VmValue>,
    },
}

/// One debug event. `event` is `'c'` for a call, `'r'` for a return and
/// `'l'` for a line step.
pub struct DebugEvent {
    /// Event code.
    pub event: char,
    /// Source name of the executing function.
    pub source: Rc<str>,
    /// Current line, `0` when unknown.
    pub line: i64,
    /// Function name.
    pub func_name: Rc<str>,
}

/// One call stack entry, innermost at level zero.
#[derive(Clone)]
pub struct StackInfo {
    /// Function name.
    pub func_name: String,
    /// Source name.
    pub source: String,
    /// Current line.
    pub line: i64,
    /// The executing closure, when the frame is a script frame.
    pub func: Option<VmValue>,
}

/// Handle onto one execution context of a shared machine.
pub struct Vm {
    core: Rc<RefCell<CoreInner>>,
    ctx: Ctx,
}

impl Clone for Vm {
    fn clone(&self) -> Self {
        Vm {
            core: Rc::clone(&self.core),
            ctx: self.ctx,
        }
    }
}

impl Vm {
    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Create a machine and return a handle to its main context. The
    /// root table is seeded with the script-visible debug controls
    /// (`setdebughook`, `enabledebuginfo`); sandboxing embedders delete
    /// those slots after opening.
    pub fn open(initial_stack_size: usize) -> Vm {
        let vm = Vm {
            core: Rc::new(RefCell::new(CoreInner::new(initial_stack_size))),
            ctx: Ctx::Main,
        };
        vm.seed_root_table();
        vm
    }

    fn seed_root_table(&self) {
        let root = self.root_table();
        let clear_hook: NativeFn = Rc::new(|vm: &Vm| {
            vm.set_debug_hook(None);
            NativeFlow::ReturnNone
        });
        let v = self.new_native_closure("setdebughook", clear_hook, 0);
        self.table_set(&root, VmValue::Str(Rc::from("setdebughook")), v);
        self.pop(1);

        let toggle: NativeFn = Rc::new(|vm: &Vm| {
            let enabled = matches!(vm.get(2), Some(VmValue::Bool(true)));
            vm.enable_debug_info(enabled);
            NativeFlow::ReturnNone
        });
        let v = self.new_native_closure("enabledebuginfo", toggle, 0);
        self.table_set(&root, VmValue::Str(Rc::from("enabledebuginfo")), v);
        self.pop(1);
    }

    /// Enable or disable line debug events; call and return events are
    /// unaffected.
    pub fn enable_debug_info(&self, enabled: bool) {
        self.core.borrow_mut().debug_info = enabled;
    }

    /// True if this handle is bound to the main context.
    pub fn is_main(&self) -> bool {
        self.ctx == Ctx::Main
    }

    /// The thread object this handle is bound to, if any.
    pub fn thread_id(&self) -> Option<ObjectId> {
        match self.ctx {
            Ctx::Main => None,
            Ctx::Thread(id) => Some(id),
        }
    }

    /// Handle to the main context of the same machine.
    pub fn main_handle(&self) -> Vm {
        Vm {
            core: Rc::clone(&self.core),
            ctx: Ctx::Main,
        }
    }

    /// Handle to a thread object's context, if the value is a live
    /// thread of this machine.
    pub fn thread_handle(&self, v: &VmValue) -> Option<Vm> {
        let VmValue::Object(ObjectKind::Thread, id) = v else {
            return None;
        };
        if !self.core.borrow().heap.is_alive(*id) {
            return None;
        }
        Some(Vm {
            core: Rc::clone(&self.core),
            ctx: Ctx::Thread(*id),
        })
    }

    /// True if both handles share one machine.
    pub fn same_machine(&self, other: &Vm) -> bool {
        Rc::ptr_eq(&self.core, &other.core)
    }

    /// Execution state of this context.
    pub fn state(&self) -> RunState {
        self.core.borrow().exec_ref(self.ctx).state
    }

    /// Install or clear the print hook.
    pub fn set_print_hook(&self, hook: Option<OutputHook>) {
        // drop the previous hook after the borrow ends
        let _old = std::mem::replace(&mut self.core.borrow_mut().print_hook, hook);
    }

    /// Install or clear the error hook.
    pub fn set_error_hook(&self, hook: Option<OutputHook>) {
        let _old = std::mem::replace(&mut self.core.borrow_mut().error_hook, hook);
    }

    /// Install or clear the debug hook. The hook fires for script
    /// closures only, never for native closures.
    pub fn set_debug_hook(&self, hook: Option<DebugHook>) {
        let _old = std::mem::replace(&mut self.core.borrow_mut().debug_hook, hook);
    }

    /// Control whether raised errors are reported through the error
    /// hook. Errors are recorded in the last-error slot either way.
    pub fn set_report_errors(&self, enabled: bool) {
        self.core.borrow_mut().report_errors = enabled;
    }

    /// Emit a line through the print hook.
    pub fn print(&self, msg: &str) {
        self.core.borrow().emit_print(msg);
    }

    /// Attach an embedder pointer shared by all contexts.
    pub fn set_foreign(&self, foreign: Option<Weak<dyn Any>>) {
        self.core.borrow_mut().foreign = foreign;
    }

    /// The embedder pointer, upgraded.
    pub fn foreign(&self) -> Option<Rc<dyn Any>> {
        self.core.borrow().foreign.as_ref()?.upgrade()
    }

    // ========================================================================
    // Stack
    // ========================================================================

    /// Number of values in the current stack window.
    pub fn top(&self) -> i64 {
        self.core.borrow().exec_ref(self.ctx).top() as i64
    }

    /// Push a value, taking a reference to it.
    pub fn push(&self, v: VmValue) {
        let mut core = self.core.borrow_mut();
        core.retain(&v);
        core.exec(self.ctx).stack.push(v);
    }

    /// Push a string value.
    pub fn push_string(&self, s: &str) {
        self.push(VmValue::Str(Rc::from(s)));
    }

    /// Copy the value at a stack index. Objects stay referenced by the
    /// stack slot itself; pin the value if it must outlive it.
    pub fn get(&self, idx: i64) -> Option<VmValue> {
        self.core.borrow().exec_ref(self.ctx).get(idx).cloned()
    }

    /// Pop `n` values.
    pub fn pop(&self, n: usize) {
        {
            let mut core = self.core.borrow_mut();
            for _ in 0..n {
                let popped = {
                    let exec = core.exec(self.ctx);
                    if exec.stack.len() <= exec.base() {
                        None
                    } else {
                        exec.stack.pop()
                    }
                };
                match popped {
                    Some(v) => core.release(v),
                    None => break,
                }
            }
        }
        self.reap();
    }

    /// Remove the value at a stack index, shifting the values above it.
    pub fn remove(&self, idx: i64) -> bool {
        {
            let mut core = self.core.borrow_mut();
            let Some(abs) = core.exec_ref(self.ctx).resolve(idx) else {
                return false;
            };
            let v = core.exec(self.ctx).stack.remove(abs);
            core.release(v);
        }
        self.reap();
        true
    }

    /// Grow the window with nulls or shrink it, releasing popped values.
    pub fn set_top(&self, new_top: i64) {
        let current = self.top();
        if new_top < current {
            self.pop((current - new_top) as usize);
        } else {
            for _ in current..new_top {
                self.push(VmValue::Null);
            }
        }
    }

    // ========================================================================
    // External references
    // ========================================================================

    /// Dispose payloads freed during the preceding operation. Release
    /// hooks and drop glue run here, outside the core borrow, so host
    /// destructors are free to reenter the machine; anything they free
    /// in turn lands back in the graveyard and is drained too.
    fn reap(&self) {
        loop {
            let batch = {
                let mut core = self.core.borrow_mut();
                if core.graveyard.is_empty() {
                    break;
                }
                std::mem::take(&mut core.graveyard)
            };
            for mut payload in batch {
                if let Payload::UserData(u) = &mut payload {
                    if let Some(hook) = u.release_hook.take() {
                        hook(u.data.as_mut());
                    }
                }
            }
        }
    }

    /// Pin an object so it survives independently of the stack.
    pub fn add_ref(&self, v: &VmValue) {
        if let VmValue::Object(_, id) = v {
            self.core.borrow_mut().heap.pin(*id);
        }
    }

    /// Drop a pin. Returns true when the object was freed by this
    /// release.
    pub fn release(&self, v: &VmValue) -> bool {
        let VmValue::Object(_, id) = v else {
            return false;
        };
        let freed = {
            let mut core = self.core.borrow_mut();
            if core.heap.unpin(*id) {
                core.free_object(*id);
                true
            } else {
                false
            }
        };
        self.reap();
        freed
    }

    /// Total reference count of an object, zero for primitives and dead
    /// objects.
    pub fn ref_count(&self, v: &VmValue) -> u32 {
        match v {
            VmValue::Object(_, id) => self.core.borrow().heap.refs(*id),
            _ => 0,
        }
    }

    /// True if the value is not an object of this machine that has died.
    pub fn is_alive(&self, v: &VmValue) -> bool {
        match v {
            VmValue::Object(_, id) => self.core.borrow().heap.is_alive(*id),
            _ => true,
        }
    }

    // ========================================================================
    // Object creation (each pushes the new object)
    // ========================================================================

    fn alloc_push(&self, payload: Payload) -> VmValue {
        let mut core = self.core.borrow_mut();
        let kind = payload.kind();
        let id = core.heap.alloc(payload);
        let v = VmValue::Object(kind, id);
        core.retain(&v);
        core.exec(self.ctx).stack.push(v.clone());
        v
    }

    /// Create and push an empty table.
    pub fn new_table(&self) -> VmValue {
        self.alloc_push(Payload::Table(TableData::default()))
    }

    /// Create and push an array of `len` nulls.
    pub fn new_array(&self, len: usize) -> VmValue {
        self.alloc_push(Payload::Array(vec![VmValue::Null; len]))
    }

    /// Create and push a user-data object.
    pub fn new_userdata(
        &self,
        data: Box<dyn Any>,
        type_tag: u64,
        release_hook: Option<ReleaseHook>,
    ) -> VmValue {
        self.alloc_push(Payload::UserData(UserDataBox {
            data,
            type_tag,
            release_hook,
            delegate: None,
        }))
    }

    /// Create and push a native closure, popping `n_free` values off the
    /// stack as its free variables (bottom-most first).
    pub fn new_native_closure(&self, name: &str, func: NativeFn, n_free: usize) -> VmValue {
        let free_vars = {
            let mut core = self.core.borrow_mut();
            let exec = core.exec(self.ctx);
            let at = exec.stack.len().saturating_sub(n_free);
            // references transfer from the stack slots to the closure
            exec.stack.split_off(at)
        };
        self.alloc_push(Payload::NativeClosure(NativeClosureData {
            name: Rc::from(name),
            func,
            free_vars,
            env: None,
        }))
    }

    /// Create and push a thread object with its own stack, returning a
    /// handle bound to it.
    pub fn new_thread(&self, initial_stack_size: usize) -> Vm {
        let v = self.alloc_push(Payload::Thread);
        let VmValue::Object(_, id) = v else {
            unreachable!()
        };
        self.core
            .borrow_mut()
            .threads
            .insert(id.raw(), crate::exec::ExecState::new(initial_stack_size));
        Vm {
            core: Rc::clone(&self.core),
            ctx: Ctx::Thread(id),
        }
    }

    /// Create and push a class.
    pub fn new_class(&self, name: &str) -> VmValue {
        self.alloc_push(Payload::Class(ClassData {
            name: Rc::from(name),
            members: Vec::new(),
        }))
    }

    /// Create and push a zero-filled blob of `len` bytes.
    pub fn new_blob(&self, len: usize) -> VmValue {
        self.new_userdata(Box::new(vec![0u8; len]), BLOB_TYPE_TAG, None)
    }

    /// Create and push a blob holding a copy of `bytes`.
    pub fn blob_from_bytes(&self, bytes: &[u8]) -> VmValue {
        self.new_userdata(Box::new(bytes.to_vec()), BLOB_TYPE_TAG, None)
    }

    /// Copy a blob's bytes out.
    pub fn blob_bytes(&self, v: &VmValue) -> Option<Vec<u8>> {
        if self.userdata_tag(v)? != BLOB_TYPE_TAG {
            return None;
        }
        self.with_userdata(v, |data| data.downcast_ref::<Vec<u8>>().cloned())?
    }

    /// Overwrite a blob's bytes.
    pub fn blob_set_bytes(&self, v: &VmValue, bytes: &[u8]) -> bool {
        if self.userdata_tag(v) != Some(BLOB_TYPE_TAG) {
            return false;
        }
        self.with_userdata(v, |data| match data.downcast_mut::<Vec<u8>>() {
            Some(buf) => {
                buf.clear();
                buf.extend_from_slice(bytes);
                true
            }
            None => false,
        })
        .unwrap_or(false)
    }

    /// Weak reference to an object; primitives are returned unchanged.
    pub fn weakref_of(&self, v: &VmValue) -> VmValue {
        match v {
            VmValue::Object(_, _) => {
                // target deliberately not retained
                let mut core = self.core.borrow_mut();
                let id = core.heap.alloc(Payload::WeakRef(v.clone()));
                let out = VmValue::Object(ObjectKind::WeakRef, id);
                core.retain(&out);
                core.exec(self.ctx).stack.push(out.clone());
                out
            }
            other => {
                self.push(other.clone());
                other.clone()
            }
        }
    }

    /// A weak reference's target, null once the target died.
    pub fn weakref_target(&self, v: &VmValue) -> VmValue {
        let VmValue::Object(ObjectKind::WeakRef, id) = v else {
            return VmValue::Null;
        };
        let core = self.core.borrow();
        match core.heap.payload(*id) {
            Some(Payload::WeakRef(target)) => match target {
                VmValue::Object(_, tid) if core.heap.is_alive(*tid) => target.clone(),
                _ => VmValue::Null,
            },
            _ => VmValue::Null,
        }
    }

    // ========================================================================
    // Tables
    // ========================================================================

    fn as_table(v: &VmValue) -> Option<ObjectId> {
        match v {
            VmValue::Object(ObjectKind::Table, id) => Some(*id),
            _ => None,
        }
    }

    /// Slot lookup following the delegate chain.
    pub fn table_get(&self, table: &VmValue, key: &VmValue) -> Option<VmValue> {
        self.core.borrow().table_get(Self::as_table(table)?, key)
    }

    /// Slot lookup on the table itself.
    pub fn table_raw_get(&self, table: &VmValue, key: &VmValue) -> Option<VmValue> {
        self.core
            .borrow()
            .table_raw_get(Self::as_table(table)?, key)
    }

    /// Create or overwrite a slot.
    pub fn table_set(&self, table: &VmValue, key: VmValue, value: VmValue) -> bool {
        match Self::as_table(table) {
            Some(id) => {
                self.core.borrow_mut().table_set(id, key, value);
                self.reap();
                true
            }
            None => false,
        }
    }

    /// Remove a slot. The removed value is pushed so it stays alive
    /// until the caller pops it, and also returned.
    pub fn table_delete(&self, table: &VmValue, key: &VmValue) -> Option<VmValue> {
        let id = Self::as_table(table)?;
        let removed = {
            let mut core = self.core.borrow_mut();
            let removed = core.table_delete(id, key)?;
            // the slot's reference transfers to the stack
            core.exec(self.ctx).stack.push(removed.clone());
            removed
        };
        self.reap();
        Some(removed)
    }

    /// Number of slots.
    pub fn table_len(&self, table: &VmValue) -> Option<usize> {
        self.core.borrow().table_len(Self::as_table(table)?)
    }

    /// Entry by insertion order, for iteration.
    pub fn table_entry(&self, table: &VmValue, index: usize) -> Option<(VmValue, VmValue)> {
        self.core.borrow().table_entry(Self::as_table(table)?, index)
    }

    /// Remove every slot.
    pub fn table_clear(&self, table: &VmValue) -> bool {
        match Self::as_table(table) {
            Some(id) => {
                self.core.borrow_mut().table_clear(id);
                self.reap();
                true
            }
            None => false,
        }
    }

    /// Delegate of a table or user-data object.
    pub fn get_delegate(&self, v: &VmValue) -> Option<VmValue> {
        match v {
            VmValue::Object(_, id) => self.core.borrow().delegate_of(*id),
            _ => None,
        }
    }

    /// Install or clear the delegate of a table or user-data object.
    pub fn set_delegate(&self, v: &VmValue, delegate: Option<VmValue>) -> bool {
        match v {
            VmValue::Object(_, id) => {
                let changed = self.core.borrow_mut().set_delegate(*id, delegate);
                self.reap();
                changed
            }
            _ => false,
        }
    }

    /// The machine's root table.
    pub fn root_table(&self) -> VmValue {
        self.core.borrow().root.clone()
    }

    /// Replace the machine's root table. Closures created earlier keep
    /// the root they captured.
    pub fn set_root_table(&self, table: VmValue) -> bool {
        if Self::as_table(&table).is_none() {
            return false;
        }
        {
            let mut core = self.core.borrow_mut();
            core.retain(&table);
            let old = std::mem::replace(&mut core.root, table);
            core.release(old);
        }
        self.reap();
        true
    }

    /// The machine's const table.
    pub fn const_table(&self) -> VmValue {
        self.core.borrow().consts.clone()
    }

    /// The machine's registry table, reserved for the embedder.
    pub fn registry_table(&self) -> VmValue {
        self.core.borrow().registry.clone()
    }

    // ========================================================================
    // Arrays
    // ========================================================================

    fn as_array(v: &VmValue) -> Option<ObjectId> {
        match v {
            VmValue::Object(ObjectKind::Array, id) => Some(*id),
            _ => None,
        }
    }

    /// Array length.
    pub fn array_len(&self, array: &VmValue) -> Option<usize> {
        self.core.borrow().array_len(Self::as_array(array)?)
    }

    /// Element by index.
    pub fn array_get(&self, array: &VmValue, index: usize) -> Option<VmValue> {
        self.core.borrow().array_get(Self::as_array(array)?, index)
    }

    /// Overwrite an element.
    pub fn array_set(&self, array: &VmValue, index: usize, value: VmValue) -> bool {
        match Self::as_array(array) {
            Some(id) => {
                let ok = self.core.borrow_mut().array_set(id, index, value);
                self.reap();
                ok
            }
            None => false,
        }
    }

    /// Append an element.
    pub fn array_append(&self, array: &VmValue, value: VmValue) -> bool {
        match Self::as_array(array) {
            Some(id) => self.core.borrow_mut().array_append(id, value),
            None => false,
        }
    }

    /// Pop the last element. The removed value is pushed so it stays
    /// alive until the caller pops it, and also returned.
    pub fn array_pop(&self, array: &VmValue) -> Option<VmValue> {
        let id = Self::as_array(array)?;
        let mut core = self.core.borrow_mut();
        let popped = core.array_pop(id)?;
        // the element's reference transfers to the stack
        core.exec(self.ctx).stack.push(popped.clone());
        Some(popped)
    }

    /// Grow with nulls or shrink.
    pub fn array_resize(&self, array: &VmValue, new_len: usize) -> bool {
        match Self::as_array(array) {
            Some(id) => {
                let ok = self.core.borrow_mut().array_resize(id, new_len);
                self.reap();
                ok
            }
            None => false,
        }
    }

    /// Insert at an index, shifting later elements up.
    pub fn array_insert(&self, array: &VmValue, index: usize, value: VmValue) -> bool {
        match Self::as_array(array) {
            Some(id) => self.core.borrow_mut().array_insert(id, index, value),
            None => false,
        }
    }

    /// Remove the element at an index.
    pub fn array_remove(&self, array: &VmValue, index: usize) -> bool {
        match Self::as_array(array) {
            Some(id) => {
                let ok = self.core.borrow_mut().array_remove(id, index);
                self.reap();
                ok
            }
            None => false,
        }
    }

    /// Reverse the elements in place.
    pub fn array_reverse(&self, array: &VmValue) -> bool {
        match Self::as_array(array) {
            Some(id) => self.core.borrow_mut().array_reverse(id),
            None => false,
        }
    }

    /// Remove every element.
    pub fn array_clear(&self, array: &VmValue) -> bool {
        match Self::as_array(array) {
            Some(id) => {
                let ok = self.core.borrow_mut().array_clear(id);
                self.reap();
                ok
            }
            None => false,
        }
    }

    // ========================================================================
    // User data, closures, classes, generators
    // ========================================================================

    /// Type tag of a user-data object.
    pub fn userdata_tag(&self, v: &VmValue) -> Option<u64> {
        let VmValue::Object(ObjectKind::UserData, id) = v else {
            return None;
        };
        match self.core.borrow().heap.payload(*id) {
            Some(Payload::UserData(u)) => Some(u.type_tag),
            _ => None,
        }
    }

    /// Run `f` against a user-data object's payload.
    pub fn with_userdata<R>(&self, v: &VmValue, f: impl FnOnce(&mut dyn Any) -> R) -> Option<R> {
        let VmValue::Object(ObjectKind::UserData, id) = v else {
            return None;
        };
        let mut core = self.core.borrow_mut();
        match core.heap.payload_mut(*id) {
            Some(Payload::UserData(u)) => Some(f(u.data.as_mut())),
            _ => None,
        }
    }

    /// Name and source of a closure or native closure.
    pub fn closure_info(&self, v: &VmValue) -> Option<(Rc<str>, Rc<str>)> {
        let VmValue::Object(_, id) = v else {
            return None;
        };
        match self.core.borrow().heap.payload(*id) {
            Some(Payload::Closure(c)) => {
                Some((Rc::clone(&c.proto.name), Rc::clone(&c.proto.source_name)))
            }
            Some(Payload::NativeClosure(n)) => Some((Rc::clone(&n.name), Rc::from("native"))),
            _ => None,
        }
    }

    /// Copy a closure with a bound environment object, pushing the copy.
    pub fn bind_env(&self, closure: &VmValue, env: VmValue) -> VmResult<VmValue> {
        let VmValue::Object(kind, id) = closure else {
            return Err(VmError::InvalidOperation(
                "bindenv target is not a closure".to_string(),
            ));
        };
        enum Copied {
            Script(Rc<crate::bytecode::FuncProto>, Option<VmValue>),
            Native(Rc<str>, NativeFn, Vec<VmValue>),
        }
        let copied = {
            let core = self.core.borrow();
            match core.heap.payload(*id) {
                Some(Payload::Closure(c)) => Copied::Script(Rc::clone(&c.proto), c.root.clone()),
                Some(Payload::NativeClosure(n)) => {
                    Copied::Native(Rc::clone(&n.name), Rc::clone(&n.func), n.free_vars.clone())
                }
                _ => {
                    return Err(VmError::InvalidOperation(format!(
                        "bindenv target is a {}",
                        kind.name()
                    )));
                }
            }
        };
        let payload = {
            let mut core = self.core.borrow_mut();
            core.retain(&env);
            match copied {
                Copied::Script(proto, root) => {
                    if let Some(r) = &root {
                        core.retain(r);
                    }
                    Payload::Closure(ClosureData {
                        proto,
                        root,
                        env: Some(env),
                    })
                }
                Copied::Native(name, func, free_vars) => {
                    for fv in &free_vars {
                        core.retain(fv);
                    }
                    Payload::NativeClosure(NativeClosureData {
                        name,
                        func,
                        free_vars,
                        env: Some(env),
                    })
                }
            }
        };
        Ok(self.alloc_push(payload))
    }

    /// Add a member to a class.
    pub fn class_new_member(&self, class: &VmValue, key: VmValue, value: VmValue) -> bool {
        let VmValue::Object(ObjectKind::Class, id) = class else {
            return false;
        };
        let mut core = self.core.borrow_mut();
        core.retain(&key);
        core.retain(&value);
        match core.heap.payload_mut(*id) {
            Some(Payload::Class(c)) => {
                c.members.push((key, value));
                true
            }
            _ => {
                core.release(key);
                core.release(value);
                false
            }
        }
    }

    /// Member lookup on an instance (own slots first, then the class).
    pub fn instance_get(&self, instance: &VmValue, key: &VmValue) -> Option<VmValue> {
        let VmValue::Object(ObjectKind::Instance, id) = instance else {
            return None;
        };
        let core = self.core.borrow();
        let Some(Payload::Instance(inst)) = core.heap.payload(*id) else {
            return None;
        };
        if let Some((_, v)) = inst.slots.iter().find(|(k, _)| k == key) {
            return Some(v.clone());
        }
        let VmValue::Object(ObjectKind::Class, cid) = &inst.class else {
            return None;
        };
        match core.heap.payload(*cid) {
            Some(Payload::Class(c)) => c
                .members
                .iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.clone()),
            _ => None,
        }
    }

    /// The class an instance was constructed from.
    pub fn instance_class(&self, instance: &VmValue) -> Option<VmValue> {
        let VmValue::Object(ObjectKind::Instance, id) = instance else {
            return None;
        };
        match self.core.borrow().heap.payload(*id) {
            Some(Payload::Instance(inst)) => Some(inst.class.clone()),
            _ => None,
        }
    }

    /// Shallow copy of an instance, pushing the copy.
    pub fn clone_instance(&self, instance: &VmValue) -> Option<VmValue> {
        let payload = {
            let VmValue::Object(ObjectKind::Instance, id) = instance else {
                return None;
            };
            let mut core = self.core.borrow_mut();
            let Some(Payload::Instance(inst)) = core.heap.payload(*id) else {
                return None;
            };
            let class = inst.class.clone();
            let slots = inst.slots.clone();
            core.retain(&class);
            for (k, v) in &slots {
                let (k, v) = (k.clone(), v.clone());
                core.retain(&k);
                core.retain(&v);
            }
            Payload::Instance(InstanceData { class, slots })
        };
        Some(self.alloc_push(payload))
    }

    /// Lifecycle state of a generator.
    pub fn generator_state(&self, v: &VmValue) -> Option<GeneratorState> {
        let VmValue::Object(ObjectKind::Generator, id) = v else {
            return None;
        };
        match self.core.borrow().heap.payload(*id) {
            Some(Payload::Generator(g)) => Some(g.state),
            _ => None,
        }
    }

    // ========================================================================
    // Errors
    // ========================================================================

    /// The last error raised in this context.
    pub fn last_error(&self) -> VmValue {
        self.core.borrow().exec_ref(self.ctx).last_error.clone()
    }

    /// Clear the last error.
    pub fn reset_error(&self) {
        self.set_last_error(VmValue::Null);
    }

    fn set_last_error(&self, v: VmValue) {
        {
            let mut core = self.core.borrow_mut();
            core.retain(&v);
            let old = std::mem::replace(&mut core.exec(self.ctx).last_error, v);
            core.release(old);
        }
        self.reap();
    }

    fn raise(&self, error: VmValue, raise_error: bool) -> VmError {
        let desc = error.as_str().map(|s| s.to_string()).unwrap_or_else(|| {
            format!("error object of type {}", error.type_name())
        });
        self.set_last_error(error);
        if raise_error {
            self.core.borrow().emit_error(&desc);
        }
        VmError::Runtime(desc)
    }

    // ========================================================================
    // Compilation and serialization
    // ========================================================================

    /// Compile `source` and push the resulting closure. The closure's
    /// root table is the machine's root table.
    pub fn compile(&self, source: &str, source_name: &str) -> VmResult<VmValue> {
        let proto = match compile::compile(source, source_name) {
            Ok(proto) => proto,
            Err(err) => {
                if let VmError::Compile {
                    desc,
                    source_name,
                    line,
                    column,
                } = &err
                {
                    self.core.borrow().emit_error(&format!(
                        "{source_name} line {line} column {column}: {desc}"
                    ));
                }
                return Err(err);
            }
        };
        let root = self.root_table();
        self.core.borrow_mut().retain(&root);
        Ok(self.alloc_push(Payload::Closure(ClosureData {
            proto,
            root: Some(root),
            env: None,
        })))
    }

    /// Serialize the closure at a stack index through `write`.
    pub fn write_closure(&self, idx: i64, write: WriteFn<'_>) -> VmResult<()> {
        let proto = {
            let core = self.core.borrow();
            let Some(VmValue::Object(_, id)) = core.exec_ref(self.ctx).get(idx) else {
                return Err(VmError::StackIndex(idx));
            };
            match core.heap.payload(*id) {
                Some(Payload::Closure(c)) => Rc::clone(&c.proto),
                _ => {
                    return Err(VmError::InvalidOperation(
                        "only script closures are serializable".to_string(),
                    ))
                }
            }
        };
        serialize::write_proto(&proto, write)
    }

    /// Deserialize a closure through `read` and push it.
    pub fn read_closure(&self, read: ReadFn<'_>) -> VmResult<VmValue> {
        let proto = serialize::read_proto(read)?;
        let root = self.root_table();
        self.core.borrow_mut().retain(&root);
        Ok(self.alloc_push(Payload::Closure(ClosureData {
            proto,
            root: Some(root),
            env: None,
        })))
    }

    // ========================================================================
    // Garbage collection
    // ========================================================================

    /// Run a full cycle collection; returns the number of objects freed.
    pub fn collect_garbage(&self) -> usize {
        let freed = self.core.borrow_mut().collect_garbage();
        self.reap();
        freed
    }

    /// Gather unreachable objects into an array and push it, or push
    /// null when there were none.
    pub fn resurrect_unreachable(&self) -> VmValue {
        let v = self.core.borrow_mut().resurrect_unreachable();
        self.push(v.clone());
        v
    }

    /// Number of live heap objects.
    pub fn live_objects(&self) -> usize {
        self.core.borrow().heap.live_count()
    }

    // ========================================================================
    // Stack introspection
    // ========================================================================

    /// Call stack entry at `level`, zero being the innermost call.
    pub fn stack_info(&self, level: usize) -> Option<StackInfo> {
        let core = self.core.borrow();
        let calls = &core.exec_ref(self.ctx).calls;
        let record = calls.get(calls.len().checked_sub(level + 1)?)?;
        Some(StackInfo {
            func_name: record.func_name.to_string(),
            source: record.source.to_string(),
            line: record.line,
            func: record.closure.clone(),
        })
    }

    // ========================================================================
    // Calls
    // ========================================================================

    /// Invoke the callable below the arguments.
    ///
    /// Expects `[callable, this, args..]` on the stack with `nargs`
    /// counting `this`. Pops the arguments and pushes the result when
    /// `want_ret` is set, leaving `[callable, result]`. A failed call
    /// leaves `[callable]`. When the context suspends, the suspend value
    /// is pushed as the result and the callable must stay pushed until
    /// the context is woken.
    pub fn call(&self, nargs: usize, want_ret: bool, raise_error: bool) -> VmResult<()> {
        let out = self.dispatch_call(nargs, want_ret, raise_error);
        self.reap();
        out
    }

    fn dispatch_call(&self, nargs: usize, want_ret: bool, raise_error: bool) -> VmResult<()> {
        let callable = {
            let core = self.core.borrow();
            let exec = core.exec_ref(self.ctx);
            if exec.top() < nargs + 1 {
                return Err(VmError::InvalidOperation(format!(
                    "call expects {} stack values, found {}",
                    nargs + 1,
                    exec.top()
                )));
            }
            exec.get(-(nargs as i64 + 1)).cloned().ok_or(VmError::StackIndex(
                -(nargs as i64 + 1),
            ))?
        };
        match &callable {
            VmValue::Object(ObjectKind::Closure, _) => {
                self.call_script(callable.clone(), nargs, want_ret, raise_error)
            }
            VmValue::Object(ObjectKind::NativeClosure, _) => {
                self.call_native(callable.clone(), nargs, want_ret, raise_error)
            }
            VmValue::Object(ObjectKind::Class, _) => {
                self.construct(callable.clone(), nargs, want_ret)
            }
            other => {
                let err = VmValue::Str(Rc::from(format!(
                    "attempt to call a {}",
                    other.type_name()
                )));
                self.pop(nargs);
                Err(self.raise(err, raise_error))
            }
        }
    }

    fn call_script(
        &self,
        closure: VmValue,
        nargs: usize,
        want_ret: bool,
        raise_error: bool,
    ) -> VmResult<()> {
        let (proto, prev_state) = {
            let mut core = self.core.borrow_mut();
            let VmValue::Object(_, id) = &closure else {
                unreachable!()
            };
            let proto = match core.heap.payload(*id) {
                Some(Payload::Closure(c)) => Rc::clone(&c.proto),
                _ => return Err(VmError::InvalidOperation("dead closure".to_string())),
            };
            let prev = core.exec_ref(self.ctx).state;
            core.exec(self.ctx).state = RunState::Running;
            (proto, prev)
        };
        self.pop(nargs);

        if proto.is_generator {
            // calling a generator function creates the generator
            let mut core = self.core.borrow_mut();
            core.retain(&closure);
            let id = core.heap.alloc(Payload::Generator(GeneratorData {
                state: GeneratorState::Suspended,
                frame: Some(GenFrame { closure, pc: 0 }),
            }));
            let v = VmValue::Object(ObjectKind::Generator, id);
            core.retain(&v);
            core.exec(self.ctx).stack.push(v);
            core.exec(self.ctx).state = prev_state;
            return Ok(());
        }

        {
            let mut core = self.core.borrow_mut();
            core.exec(self.ctx).calls.push(CallRecord {
                func_name: Rc::clone(&proto.name),
                source: Rc::clone(&proto.source_name),
                line: proto.line_of(0).unwrap_or(0) as i64,
                closure: Some(closure.clone()),
            });
        }
        self.fire_debug('c', &proto.source_name, proto.line_of(0).unwrap_or(0) as i64, &proto.name);

        let outcome = self.run_proto(&closure, 0, false, raise_error);

        {
            let mut core = self.core.borrow_mut();
            core.exec(self.ctx).calls.pop();
        }

        match outcome {
            Ok(RunOutcome::Returned(v)) => {
                self.fire_debug('r', &proto.source_name, 0, &proto.name);
                {
                    let mut core = self.core.borrow_mut();
                    core.exec(self.ctx).state = prev_state;
                }
                if want_ret {
                    self.push(v);
                }
                Ok(())
            }
            Ok(RunOutcome::Suspended(v, pc)) => {
                let mut core = self.core.borrow_mut();
                core.retain(&closure);
                let exec = core.exec(self.ctx);
                exec.state = RunState::Suspended;
                exec.suspend = Some(SuspendPoint::Script(ScriptFrame { closure, pc }));
                drop(core);
                self.push(v);
                Ok(())
            }
            Ok(RunOutcome::Yielded(_, _)) => {
                let err = VmValue::Str(Rc::from("yield outside a generator"));
                {
                    let mut core = self.core.borrow_mut();
                    core.exec(self.ctx).state = prev_state;
                }
                Err(self.raise(err, raise_error))
            }
            Err(err) => {
                {
                    let mut core = self.core.borrow_mut();
                    core.exec(self.ctx).state = prev_state;
                }
                Err(err)
            }
        }
    }

    fn call_native(
        &self,
        closure: VmValue,
        nargs: usize,
        want_ret: bool,
        raise_error: bool,
    ) -> VmResult<()> {
        let (func, prev_state) = {
            let mut core = self.core.borrow_mut();
            let VmValue::Object(_, id) = &closure else {
                unreachable!()
            };
            let (func, free_vars) = match core.heap.payload(*id) {
                Some(Payload::NativeClosure(n)) => (Rc::clone(&n.func), n.free_vars.clone()),
                _ => {
                    return Err(VmError::InvalidOperation(
                        "dead native closure".to_string(),
                    ))
                }
            };
            for fv in &free_vars {
                core.retain(fv);
            }
            let prev = core.exec_ref(self.ctx).state;
            let exec = core.exec(self.ctx);
            exec.state = RunState::Running;
            // window base at `this`, free variables above the arguments
            let base = exec.stack.len() - nargs;
            exec.bases.push(base);
            exec.stack.extend(free_vars);
            (func, prev)
        };

        let flow = func(self);

        // unwind the window
        {
            let mut core = self.core.borrow_mut();
            let base = core.exec_ref(self.ctx).base();
            while core.exec_ref(self.ctx).stack.len() > base {
                let v = core.exec(self.ctx).stack.pop().unwrap();
                core.release(v);
            }
            core.exec(self.ctx).bases.pop();
            core.exec(self.ctx).state = prev_state;
        }

        match flow {
            NativeFlow::Return(v) => {
                if want_ret {
                    self.push(v);
                }
                Ok(())
            }
            NativeFlow::ReturnNone => {
                if want_ret {
                    self.push(VmValue::Null);
                }
                Ok(())
            }
            NativeFlow::Throw(err) => Err(self.raise(err, raise_error)),
            NativeFlow::Suspend(v) => {
                let mut core = self.core.borrow_mut();
                let exec = core.exec(self.ctx);
                exec.state = RunState::Suspended;
                exec.suspend = Some(SuspendPoint::Native);
                drop(core);
                self.push(v);
                Ok(())
            }
            NativeFlow::TailCall { func, args } => {
                let inner_nargs = args.len();
                self.push(func);
                for arg in args {
                    self.push(arg);
                }
                self.call(inner_nargs, want_ret, raise_error)
                    .map_err(|err| {
                        // drop the inner callable, leaving the outer one
                        self.pop(1);
                        err
                    })?;
                if self.state() == RunState::Suspended {
                    // collapse [outer, inner, v] to [outer, v]; a native
                    // wake-up only replaces the top value
                    self.remove(-2);
                } else {
                    if want_ret {
                        self.remove(-2);
                    } else {
                        self.pop(1);
                    }
                }
                Ok(())
            }
        }
    }

    fn construct(&self, class: VmValue, nargs: usize, want_ret: bool) -> VmResult<()> {
        self.pop(nargs);
        let payload = {
            let mut core = self.core.borrow_mut();
            let VmValue::Object(_, id) = &class else {
                unreachable!()
            };
            let slots = match core.heap.payload(*id) {
                Some(Payload::Class(c)) => c.members.clone(),
                _ => return Err(VmError::InvalidOperation("dead class".to_string())),
            };
            core.retain(&class);
            for (k, v) in &slots {
                let (k, v) = (k.clone(), v.clone());
                core.retain(&k);
                core.retain(&v);
            }
            Payload::Instance(InstanceData { class, slots })
        };
        let v = self.alloc_push(payload);
        if !want_ret {
            let _ = v;
            self.pop(1);
        }
        Ok(())
    }

    /// Resume the generator at the top of the stack, pushing the yielded
    /// or returned value: `[generator, result]`.
    pub fn resume(&self, raise_error: bool) -> VmResult<()> {
        let out = self.dispatch_resume(raise_error);
        self.reap();
        out
    }

    fn dispatch_resume(&self, raise_error: bool) -> VmResult<()> {
        let gen = self
            .get(-1)
            .ok_or_else(|| VmError::InvalidOperation("resume with empty stack".to_string()))?;
        let VmValue::Object(ObjectKind::Generator, gid) = gen else {
            let err = VmValue::Str(Rc::from(format!(
                "cannot resume a {}",
                gen.type_name()
            )));
            return Err(self.raise(err, raise_error));
        };

        let frame = {
            let mut core = self.core.borrow_mut();
            let state = match core.heap.payload(gid) {
                Some(Payload::Generator(g)) => g.state,
                _ => return Err(VmError::InvalidOperation("dead generator".to_string())),
            };
            if state != GeneratorState::Suspended {
                drop(core);
                let err = VmValue::Str(Rc::from(match state {
                    GeneratorState::Dead => "cannot resume a dead generator",
                    _ => "cannot resume a running generator",
                }));
                return Err(self.raise(err, raise_error));
            }
            match core.heap.payload_mut(gid) {
                Some(Payload::Generator(g)) => {
                    g.state = GeneratorState::Running;
                    g.frame.take().expect("suspended generator without frame")
                }
                _ => unreachable!(),
            }
        };

        let outcome = self.run_proto(&frame.closure, frame.pc, true, raise_error);
        match outcome {
            Ok(RunOutcome::Yielded(v, next_pc)) => {
                let mut core = self.core.borrow_mut();
                if let Some(Payload::Generator(g)) = core.heap.payload_mut(gid) {
                    g.state = GeneratorState::Suspended;
                    g.frame = Some(GenFrame {
                        closure: frame.closure,
                        pc: next_pc,
                    });
                }
                drop(core);
                self.push(v);
                Ok(())
            }
            Ok(RunOutcome::Returned(v)) => {
                let mut core = self.core.borrow_mut();
                if let Some(Payload::Generator(g)) = core.heap.payload_mut(gid) {
                    g.state = GeneratorState::Dead;
                }
                core.release(frame.closure);
                drop(core);
                self.push(v);
                Ok(())
            }
            Ok(RunOutcome::Suspended(_, _)) => {
                let mut core = self.core.borrow_mut();
                if let Some(Payload::Generator(g)) = core.heap.payload_mut(gid) {
                    g.state = GeneratorState::Dead;
                }
                core.release(frame.closure);
                drop(core);
                let err = VmValue::Str(Rc::from("cannot suspend a vm from a generator"));
                Err(self.raise(err, raise_error))
            }
            Err(err) => {
                let mut core = self.core.borrow_mut();
                if let Some(Payload::Generator(g)) = core.heap.payload_mut(gid) {
                    g.state = GeneratorState::Dead;
                }
                core.release(frame.closure);
                Err(err)
            }
        }
    }

    /// Wake a suspended context. `wake_value` becomes the result of the
    /// suspended call; the stack receives it above the still-pushed
    /// callable.
    pub fn wake_up(&self, wake_value: Option<VmValue>, raise_error: bool) -> VmResult<()> {
        let out = self.dispatch_wake_up(wake_value, raise_error);
        self.reap();
        out
    }

    fn dispatch_wake_up(&self, wake_value: Option<VmValue>, raise_error: bool) -> VmResult<()> {
        let suspend = {
            let mut core = self.core.borrow_mut();
            let exec = core.exec(self.ctx);
            if exec.state != RunState::Suspended {
                drop(core);
                let err = VmValue::Str(Rc::from("cannot resume a vm that is not suspended"));
                return Err(self.raise(err, raise_error));
            }
            exec.state = RunState::Running;
            exec.suspend.take().expect("suspended context without frame")
        };
        match suspend {
            SuspendPoint::Native => {
                {
                    let mut core = self.core.borrow_mut();
                    core.exec(self.ctx).state = RunState::Idle;
                }
                self.push(wake_value.unwrap_or(VmValue::Null));
                Ok(())
            }
            SuspendPoint::Script(frame) => {
                let outcome = self.run_proto(&frame.closure, frame.pc, false, raise_error);
                let finish = |state: RunState| {
                    let mut core = self.core.borrow_mut();
                    core.exec(self.ctx).state = state;
                };
                match outcome {
                    Ok(RunOutcome::Returned(v)) => {
                        finish(RunState::Idle);
                        self.core.borrow_mut().release(frame.closure);
                        self.push(v);
                        Ok(())
                    }
                    Ok(RunOutcome::Suspended(v, pc)) => {
                        let mut core = self.core.borrow_mut();
                        let exec = core.exec(self.ctx);
                        exec.state = RunState::Suspended;
                        exec.suspend = Some(SuspendPoint::Script(ScriptFrame {
                            closure: frame.closure,
                            pc,
                        }));
                        drop(core);
                        self.push(v);
                        Ok(())
                    }
                    Ok(RunOutcome::Yielded(_, _)) => {
                        finish(RunState::Idle);
                        self.core.borrow_mut().release(frame.closure);
                        let err = VmValue::Str(Rc::from("yield outside a generator"));
                        Err(self.raise(err, raise_error))
                    }
                    Err(err) => {
                        finish(RunState::Idle);
                        self.core.borrow_mut().release(frame.closure);
                        Err(err)
                    }
                }
            }
        }
    }

    /// Wake a suspended context by raising `error` inside it. The
    /// context leaves the suspended state and the call fails.
    pub fn wake_up_throw(&self, error: VmValue, raise_error: bool) -> VmResult<()> {
        let suspend = {
            let mut core = self.core.borrow_mut();
            let exec = core.exec(self.ctx);
            if exec.state != RunState::Suspended {
                drop(core);
                let err = VmValue::Str(Rc::from("cannot resume a vm that is not suspended"));
                return Err(self.raise(err, raise_error));
            }
            exec.state = RunState::Idle;
            exec.suspend.take()
        };
        if let Some(SuspendPoint::Script(frame)) = suspend {
            self.core.borrow_mut().release(frame.closure);
            self.reap();
        }
        Err(self.raise(error, raise_error))
    }

    // ========================================================================
    // Interpreter
    // ========================================================================

    fn run_proto(
        &self,
        closure: &VmValue,
        start_pc: usize,
        generator_frame: bool,
        raise_error: bool,
    ) -> VmResult<RunOutcome> {
        let proto = {
            let core = self.core.borrow();
            let VmValue::Object(_, id) = closure else {
                return Err(VmError::InvalidOperation("dead closure".to_string()));
            };
            match core.heap.payload(*id) {
                Some(Payload::Closure(c)) => Rc::clone(&c.proto),
                _ => return Err(VmError::InvalidOperation("dead closure".to_string())),
            }
        };

        let mut pc = start_pc;
        let mut scratch: Vec<VmValue> = Vec::new();
        let mut last_line: Option<u32> = None;
        loop {
            let Some(instr) = proto.instrs.get(pc).copied() else {
                return Ok(RunOutcome::Returned(VmValue::Null));
            };
            if let Some(line) = proto.line_of(pc) {
                if last_line != Some(line) && !generator_frame {
                    self.fire_debug('l', &proto.source_name, line as i64, &proto.name);
                    last_line = Some(line);
                }
            }
            match instr {
                crate::bytecode::Instr::LoadConst(idx) => {
                    let c = proto.consts.get(idx as usize).ok_or_else(|| {
                        VmError::InvalidBytecode(format!("constant index {idx} out of range"))
                    })?;
                    scratch.push(const_to_value(c));
                    pc += 1;
                }
                crate::bytecode::Instr::Return => {
                    return Ok(RunOutcome::Returned(
                        scratch.pop().unwrap_or(VmValue::Null),
                    ));
                }
                crate::bytecode::Instr::Yield => {
                    let v = scratch.pop().unwrap_or(VmValue::Null);
                    return Ok(RunOutcome::Yielded(v, pc + 1));
                }
                crate::bytecode::Instr::Suspend => {
                    let v = scratch.pop().unwrap_or(VmValue::Null);
                    if generator_frame {
                        let err =
                            VmValue::Str(Rc::from("cannot suspend a vm from a generator"));
                        return Err(self.raise(err, raise_error));
                    }
                    return Ok(RunOutcome::Suspended(v, pc + 1));
                }
            }
        }
    }

    fn fire_debug(&self, event: char, source: &Rc<str>, line: i64, func_name: &Rc<str>) {
        let hook = {
            let core = self.core.borrow();
            if event == 'l' && !core.debug_info {
                return;
            }
            core.debug_hook.clone()
        };
        if let Some(hook) = hook {
            hook(
                self,
                &DebugEvent {
                    event,
                    source: Rc::clone(source),
                    line,
                    func_name: Rc::clone(func_name),
                },
            );
        }
    }
}

enum RunOutcome {
    Returned(VmValue),
    Yielded(VmValue, usize),
    Suspended(VmValue, usize),
}

fn const_to_value(c: &Const) -> VmValue {
    match c {
        Const::Null => VmValue::Null,
        Const::Int(n) => VmValue::Int(*n),
        Const::Float(f) => VmValue::Float(*f),
        Const::Bool(b) => VmValue::Bool(*b),
        Const::Str(s) => VmValue::Str(Rc::from(s.as_str())),
    }
}
