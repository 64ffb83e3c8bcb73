//! VM instance lifecycle and the host-facing entry surface
//!
//! [`ScriptVm`] owns one scripting machine plus the identity registry
//! that keeps host wrappers in one-to-one correspondence with VM
//! objects. The instance is reachable backwards from inside the machine
//! through its foreign pointer, held weakly so the machine never keeps
//! its own owner alive.

use crate::call;
use crate::convert;
use crate::error::{BridgeError, BridgeResult};
use crate::native;
use crate::object::{RefKind, VmRef, VmRefInner};
use crate::registry::Registry;
use crate::script::Script;
use crate::value::{HostKey, HostValue, VmContext};
use hazel_vm::{ObjectKind, RunState, Vm, VmError, VmValue};
use once_cell::sync::Lazy;
use std::any::Any;
use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

/// Type tag for user data that boxes a host value. The address of a
/// private static, so no other embedder can collide with it.
pub(crate) static HOST_VALUE_TAG: Lazy<u64> = Lazy::new(|| {
    static ANCHOR: u8 = 0;
    &ANCHOR as *const u8 as u64
});

const INITIAL_STACK: usize = 1024;

/// Handler for script print output and script error text.
pub type OutputHandler = Rc<dyn Fn(&str)>;

/// Handler for interpreter debug events.
pub type DebugHandler = Rc<dyn Fn(&DebugEvent)>;

/// What an interpreter debug event reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebugEventKind {
    /// A call frame was entered.
    Call,
    /// A call frame returned.
    Return,
    /// Execution moved to a new source line.
    Line,
}

/// One interpreter debug event, tagged with the context it fired in.
pub struct DebugEvent {
    /// Which kind of event fired.
    pub kind: DebugEventKind,
    /// The context the event fired in.
    pub context: VmContext,
    /// Source name of the running function.
    pub source: String,
    /// Current line, -1 when unknown.
    pub line: i64,
    /// Name of the running function.
    pub func_name: String,
}

/// One frame of a call-stack snapshot. The micro interpreter keeps no
/// named locals, so `locals` is always empty.
pub struct StackFrame {
    /// Function name.
    pub func_name: String,
    /// Source name.
    pub source: String,
    /// Current line, -1 when unknown.
    pub line: i64,
    /// Wrapper for the running function, when it is an object.
    pub func: Option<VmRef>,
    /// Named locals visible in the frame.
    pub locals: Vec<(String, HostValue)>,
}

pub(crate) struct VmInstance {
    pub(crate) vm: Vm,
    pub(crate) registry: RefCell<Registry>,
    pub(crate) report_caught: Cell<bool>,
    debug_handler: RefCell<Option<DebugHandler>>,
}

impl VmInstance {
    /// Unique wrapper for a VM object. A second wrap of the same
    /// identity returns a clone of the live wrapper; a fresh wrap pins
    /// the object with a VM-level reference that the wrapper's drop
    /// releases.
    pub(crate) fn wrap(self: &Rc<Self>, value: VmValue) -> VmRef {
        let key = value
            .object_key()
            .unwrap_or_else(|| panic!("wrap of non-object value {value}"));
        if let Some(existing) = self.registry.borrow().lookup(key) {
            return VmRef(existing);
        }
        let kind = RefKind::from_object_kind(
            value.object_kind().expect("object value without a kind"),
        );
        self.vm.add_ref(&value);
        let inner = Rc::new(VmRefInner {
            instance: Rc::downgrade(self),
            handle: value,
            kind,
        });
        self.registry.borrow_mut().insert(key, &inner);
        VmRef(inner)
    }

    /// Box `value` as user data and wrap it. The box owns a clone of
    /// the host value; no release hook is needed since dropping the
    /// payload runs its destructor.
    pub(crate) fn box_opaque(self: &Rc<Self>, value: &HostValue) -> VmRef {
        let ud = self.push_boxed(value);
        let wrapped = self.wrap(ud);
        self.vm.pop(1);
        wrapped
    }

    /// Box `value` as user data, leaving it on the stack, and return
    /// its handle.
    pub(crate) fn push_boxed(self: &Rc<Self>, value: &HostValue) -> VmValue {
        self.vm
            .new_userdata(Box::new(value.clone()), *HOST_VALUE_TAG, None)
    }

    /// Box `value`, reusing a live box for an equal value. Values with
    /// no stable key (wrappers, contexts, markers) cannot be interned.
    pub(crate) fn intern(self: &Rc<Self>, value: &HostValue) -> BridgeResult<VmRef> {
        let Some(key) = HostKey::of(value) else {
            return Err(BridgeError::Unsupported(format!(
                "cannot intern a {}",
                value.kind_name()
            )));
        };
        if let Some(existing) = self.registry.borrow().lookup_interned(&key) {
            return Ok(VmRef(existing));
        }
        let wrapped = self.box_opaque(value);
        self.registry.borrow_mut().insert_interned(key, &wrapped.0);
        Ok(wrapped)
    }
}

/// One scripting machine with its registry and handlers. Clones share
/// the same instance.
#[derive(Clone)]
pub struct ScriptVm {
    inner: Rc<VmInstance>,
}

impl ScriptVm {
    /// Open a fresh machine.
    ///
    /// Print and error text default to standard output and standard
    /// error. The machine's built-in debug slots are removed from the
    /// root table: debug hooks are installed through
    /// [`ScriptVm::set_debug_handler`] only.
    pub fn open() -> ScriptVm {
        let vm = Vm::open(INITIAL_STACK);
        let inner = Rc::new(VmInstance {
            vm,
            registry: RefCell::new(Registry::default()),
            report_caught: Cell::new(true),
            debug_handler: RefCell::new(None),
        });
        inner
            .vm
            .set_foreign(Some(Rc::downgrade(&inner) as Weak<dyn Any>));
        inner
            .vm
            .set_print_hook(Some(Rc::new(|s| println!("{s}"))));
        inner
            .vm
            .set_error_hook(Some(Rc::new(|s| eprintln!("{s}"))));

        // scripts get no handle on the debug machinery
        let root = inner.vm.root_table();
        for slot in ["setdebughook", "enabledebuginfo"] {
            if inner.vm.table_delete(&root, &VmValue::string(slot)).is_some() {
                inner.vm.pop(1);
            }
        }
        ScriptVm { inner }
    }

    pub(crate) fn from_instance(inner: &Rc<VmInstance>) -> ScriptVm {
        ScriptVm {
            inner: Rc::clone(inner),
        }
    }

    pub(crate) fn instance(&self) -> Rc<VmInstance> {
        Rc::clone(&self.inner)
    }

    /// True if `other` is a handle to this same machine.
    pub fn same_instance(&self, other: &ScriptVm) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    /// Current run state of the main context.
    pub fn state(&self) -> RunState {
        self.inner.vm.state()
    }

    // ========================================================================
    // Scripts
    // ========================================================================

    /// Load a compiled script as a root closure without running it.
    /// Bytecode is preferred over recompiling the source.
    pub fn load_script(&self, script: &Script) -> BridgeResult<VmRef> {
        let vm = &self.inner.vm;
        let closure = if script.has_bytecode() {
            let bytes = script.bytecode();
            let mut offset = 0usize;
            let mut reader = |buf: &mut [u8]| -> usize {
                let n = buf.len().min(bytes.len() - offset);
                buf[..n].copy_from_slice(&bytes[offset..offset + n]);
                offset += n;
                n
            };
            vm.read_closure(&mut reader)
                .map_err(|e| BridgeError::InvalidBytecode(e.to_string()))?
        } else {
            vm.compile(script.source(), script.source_name())
                .map_err(compile_error)?
        };
        let wrapped = self.inner.wrap(closure);
        vm.pop(1);
        Ok(wrapped)
    }

    /// Load a script and run its root closure against the root table,
    /// producing the script's result value. An empty script produces
    /// nil.
    pub fn import(&self, script: &Script) -> BridgeResult<HostValue> {
        let closure = self.load_script(script)?;
        let root = HostValue::Object(self.root_table());
        call::call_function(
            &self.inner,
            &self.inner.vm,
            &HostValue::Object(closure),
            &root,
            &[],
        )
    }

    /// Compile and run source text in one step.
    pub fn import_source(&self, source: &str, source_name: &str) -> BridgeResult<HostValue> {
        let script = Script::compile(source, source_name)?;
        self.import(&script)
    }

    // ========================================================================
    // Calls
    // ========================================================================

    /// Call `callable` with an explicit `this` receiver.
    pub fn call_function(
        &self,
        callable: &HostValue,
        this: &HostValue,
        args: &[HostValue],
    ) -> BridgeResult<HostValue> {
        call::call_function(&self.inner, &self.inner.vm, callable, this, args)
    }

    /// Call `callable` with a nil receiver.
    pub fn apply_function(
        &self,
        callable: &HostValue,
        args: &[HostValue],
    ) -> BridgeResult<HostValue> {
        call::apply_function(&self.inner, &self.inner.vm, callable, args)
    }

    /// Call `callable`, converting a script-level error into a throw
    /// marker carrying the exception value.
    pub fn apply_function_catch(
        &self,
        callable: &HostValue,
        args: &[HostValue],
    ) -> BridgeResult<HostValue> {
        call::apply_function_catch(&self.inner, &self.inner.vm, callable, args)
    }

    /// Resume a suspended generator in the main context.
    pub fn resume_generator(&self, generator: &VmRef) -> BridgeResult<HostValue> {
        call::resume_generator(&self.inner, &self.inner.vm, generator)
    }

    /// Wake the suspended main context with `value` as the result of
    /// the suspending call.
    pub fn wake_up(&self, value: &HostValue) -> BridgeResult<HostValue> {
        call::wake_up(&self.inner, &self.inner.vm, value)
    }

    /// Wake the suspended main context by raising `error` at the
    /// suspension point.
    pub fn wake_up_throw(&self, error: &HostValue) -> BridgeResult<()> {
        call::wake_up_throw(&self.inner, &self.inner.vm, error)
    }

    // ========================================================================
    // Object creation and conversion
    // ========================================================================

    /// Fresh empty table.
    pub fn create_table(&self) -> VmRef {
        let t = self.inner.vm.new_table();
        let wrapped = self.inner.wrap(t);
        self.inner.vm.pop(1);
        wrapped
    }

    /// Fresh array of `len` nils.
    pub fn create_array(&self, len: usize) -> VmRef {
        let a = self.inner.vm.new_array(len);
        let wrapped = self.inner.wrap(a);
        self.inner.vm.pop(1);
        wrapped
    }

    /// Fresh byte blob holding `bytes`.
    pub fn create_blob(&self, bytes: &[u8]) -> VmRef {
        let b = self.inner.vm.blob_from_bytes(bytes);
        let wrapped = self.inner.wrap(b);
        self.inner.vm.pop(1);
        wrapped
    }

    /// Fresh execution thread, wrapped as a thread object.
    pub fn create_thread(&self) -> VmRef {
        let thread_vm = self.inner.vm.new_thread(INITIAL_STACK);
        let handle = VmValue::Object(
            ObjectKind::Thread,
            thread_vm.thread_id().expect("new thread without an id"),
        );
        let wrapped = self.inner.wrap(handle);
        self.inner.vm.pop(1);
        wrapped
    }

    /// Box a host value as opaque user data, one fresh box per call.
    pub fn box_value(&self, value: &HostValue) -> VmRef {
        self.inner.box_opaque(value)
    }

    /// Box a host value, reusing a live box for an equal value.
    pub fn intern_value(&self, value: &HostValue) -> BridgeResult<VmRef> {
        self.inner.intern(value)
    }

    /// Expose a host callable to scripts as a callable object.
    pub fn wrap_callable(&self, callable: &HostValue, varargs: bool) -> BridgeResult<VmRef> {
        if !matches!(callable, HostValue::Callable(_)) {
            return Err(BridgeError::Unsupported(format!(
                "cannot wrap a {} as a callable",
                callable.kind_name()
            )));
        }
        Ok(native::wrap_callable(
            &self.inner,
            &self.inner.vm,
            callable,
            varargs,
        ))
    }

    /// Convert a host composite into VM containers. With
    /// `wrap_unhandled` set, callables and opaques at the leaves are
    /// wrapped instead of failing the conversion.
    pub fn convert(&self, value: &HostValue, wrap_unhandled: bool) -> BridgeResult<HostValue> {
        convert::convert_value(&self.inner, value, wrap_unhandled)
    }

    // ========================================================================
    // Well-known tables
    // ========================================================================

    /// Wrapper for the root table.
    pub fn root_table(&self) -> VmRef {
        self.inner.wrap(self.inner.vm.root_table())
    }

    /// Install `table` as the machine's root table. Scripts imported
    /// afterwards run with it as their `this`.
    pub fn set_root_table(&self, table: &VmRef) -> BridgeResult<()> {
        if !table.owned_by(&self.inner) {
            return Err(BridgeError::ForeignObject);
        }
        if self.inner.vm.set_root_table(table.handle().clone()) {
            Ok(())
        } else {
            Err(BridgeError::InvalidRef(format!(
                "root table must be a table, not a {}",
                table.kind().name()
            )))
        }
    }

    /// Wrapper for the const table.
    pub fn const_table(&self) -> VmRef {
        self.inner.wrap(self.inner.vm.const_table())
    }

    /// Wrapper for the registry table.
    pub fn registry_table(&self) -> VmRef {
        self.inner.wrap(self.inner.vm.registry_table())
    }

    // ========================================================================
    // Garbage collection
    // ========================================================================

    /// Run a full cycle collection; the number of objects freed.
    pub fn collect_garbage(&self) -> usize {
        self.inner.vm.collect_garbage()
    }

    /// Gather unreachable objects, wrapped, instead of freeing them.
    pub fn resurrect_unreachable(&self) -> Vec<VmRef> {
        let vm = &self.inner.vm;
        let array = vm.resurrect_unreachable();
        let mut out = Vec::new();
        if let Some(len) = vm.array_len(&array) {
            for i in 0..len {
                if let Some(v) = vm.array_get(&array, i) {
                    if v.object_key().is_some() {
                        out.push(self.inner.wrap(v));
                    }
                }
            }
        }
        vm.pop(1);
        out
    }

    /// Number of live heap objects, for diagnostics.
    pub fn live_objects(&self) -> usize {
        self.inner.vm.live_objects()
    }

    /// Number of live wrappers in the identity registry.
    pub fn wrapper_count(&self) -> usize {
        self.inner.registry.borrow().wrapper_count()
    }

    /// Current depth of the main context's value stack. Every bridge
    /// operation leaves this unchanged except a call that suspended,
    /// which parks one slot until the wake.
    pub fn stack_depth(&self) -> usize {
        self.inner.vm.top() as usize
    }

    /// Read a raw stack slot. Negative indices count down from the top;
    /// an out-of-range index reads as nil.
    pub fn get_stack(&self, idx: i64) -> HostValue {
        convert::read_stack(&self.inner, &self.inner.vm, idx)
    }

    /// Push a value onto the raw stack. Composites must be converted
    /// first; wrappers must belong to this instance.
    pub fn push_stack(&self, value: &HostValue) -> BridgeResult<()> {
        convert::push_value(&self.inner, &self.inner.vm, value)
    }

    /// Pop `n` raw stack slots.
    pub fn pop_stack(&self, n: usize) {
        self.inner.vm.pop(n);
    }

    /// Remove one raw stack slot, shifting the slots above it down.
    /// False when the index is out of range.
    pub fn remove_stack(&self, idx: i64) -> bool {
        self.inner.vm.remove(idx)
    }

    // ========================================================================
    // Errors and diagnostics
    // ========================================================================

    /// Redirect script print output.
    pub fn set_print_handler(&self, handler: Option<OutputHandler>) {
        self.inner.vm.set_print_hook(handler);
    }

    /// Redirect script error text.
    pub fn set_error_handler(&self, handler: Option<OutputHandler>) {
        self.inner.vm.set_error_hook(handler);
    }

    /// Restore the default error sink, standard error.
    pub fn set_error_handler_default(&self) {
        self.inner.vm.set_error_hook(Some(Rc::new(|s| eprintln!("{s}"))));
    }

    /// Whether errors absorbed by the catching call path still reach
    /// the error handler. On by default.
    pub fn set_handle_caught_errors(&self, enabled: bool) {
        self.inner.report_caught.set(enabled);
    }

    /// The last script error raised in the main context.
    pub fn get_last_error(&self) -> HostValue {
        convert::from_vm_value(&self.inner, &self.inner.vm.last_error())
    }

    /// Clear the last script error.
    pub fn reset_last_error(&self) {
        self.inner.vm.reset_error();
    }

    /// Install or remove the debug event handler. Line events require
    /// [`ScriptVm::enable_debug_info`].
    pub fn set_debug_handler(&self, handler: Option<DebugHandler>) {
        *self.inner.debug_handler.borrow_mut() = handler.clone();
        match handler {
            None => self.inner.vm.set_debug_hook(None),
            Some(_) => {
                let weak = Rc::downgrade(&self.inner);
                self.inner.vm.set_debug_hook(Some(Rc::new(move |vm, ev| {
                    let Some(inst) = weak.upgrade() else { return };
                    dispatch_debug_event(&inst, vm, ev);
                })));
            }
        }
    }

    /// Toggle per-line debug events.
    pub fn enable_debug_info(&self, enabled: bool) {
        self.inner.vm.enable_debug_info(enabled);
    }

    /// Snapshot of one call-stack frame of the main context. Level 0 is
    /// the innermost frame.
    pub fn stack_frame(&self, level: usize) -> Option<StackFrame> {
        let info = self.inner.vm.stack_info(level)?;
        Some(StackFrame {
            func_name: info.func_name,
            source: info.source,
            line: info.line,
            func: info.func.map(|f| self.inner.wrap(f)),
            locals: Vec::new(),
        })
    }

    /// Snapshot of the whole call stack, innermost first.
    pub fn call_stack(&self) -> Vec<StackFrame> {
        let mut frames = Vec::new();
        while let Some(frame) = self.stack_frame(frames.len()) {
            frames.push(frame);
        }
        frames
    }
}

fn dispatch_debug_event(inst: &Rc<VmInstance>, vm: &Vm, ev: &hazel_vm::DebugEvent) {
    let handler = inst.debug_handler.borrow().clone();
    let Some(handler) = handler else { return };
    let kind = match ev.event {
        'c' => DebugEventKind::Call,
        'r' => DebugEventKind::Return,
        'l' => DebugEventKind::Line,
        other => {
            vm.print(&format!("unknown debug event '{other}'"));
            return;
        }
    };
    let context = if vm.is_main() {
        VmContext::Instance(ScriptVm::from_instance(inst))
    } else {
        match vm.thread_id() {
            Some(id) => VmContext::Thread(inst.wrap(VmValue::Object(ObjectKind::Thread, id))),
            None => return,
        }
    };
    handler(&DebugEvent {
        kind,
        context,
        source: ev.source.to_string(),
        line: ev.line,
        func_name: ev.func_name.to_string(),
    });
}

fn compile_error(err: VmError) -> BridgeError {
    match err {
        VmError::Compile {
            desc,
            source_name,
            line,
            column,
        } => BridgeError::Compile {
            desc,
            source_name,
            line,
            column,
        },
        other => BridgeError::Script(other.to_string()),
    }
}
