//! Shared machine state
//!
//! [`CoreInner`] owns the heap, the main execution context, one context
//! per live thread object, the three built-in tables (root, const,
//! registry) and the installed hooks. Public handles in `vm.rs` share it
//! through `Rc<RefCell<_>>`; everything here runs under a single borrow.
//!
//! Reference discipline: every owning location (stack slot, container
//! slot, built-in table, saved frame) holds exactly one reference.
//! Dropping the last reference frees the object immediately; reference
//! cycles are reclaimed by the mark-and-sweep pass in
//! [`CoreInner::collect_garbage`].

use crate::exec::{ExecState, SuspendPoint};
use crate::heap::{Heap, Payload, TableData};
use crate::value::{ObjectId, ObjectKind, VmValue};
use crate::vm::{DebugHook, OutputHook};
use rustc_hash::FxHashMap;
use std::any::Any;
use std::rc::Weak;

/// Delegate chains longer than this fail the lookup instead of looping.
const MAX_DELEGATE_DEPTH: usize = 16;

/// Identifies which execution context a handle operates on.
#[derive(Clone, Copy, PartialEq, Eq)]
pub(crate) enum Ctx {
    /// The main VM context.
    Main,
    /// A thread object's context.
    Thread(ObjectId),
}

pub(crate) struct CoreInner {
    pub(crate) heap: Heap,
    pub(crate) main: ExecState,
    pub(crate) threads: FxHashMap<u64, ExecState>,
    pub(crate) root: VmValue,
    pub(crate) consts: VmValue,
    pub(crate) registry: VmValue,
    pub(crate) print_hook: Option<OutputHook>,
    pub(crate) error_hook: Option<OutputHook>,
    pub(crate) debug_hook: Option<DebugHook>,
    /// Errors raised while no handler is installed are still recorded in
    /// `last_error`; this flag controls whether the error hook fires.
    pub(crate) report_errors: bool,
    /// Gates line debug events; call and return events always fire.
    pub(crate) debug_info: bool,
    pub(crate) foreign: Option<Weak<dyn Any>>,
    /// Payloads detached from the heap but not yet disposed. User-data
    /// boxes and native-closure captures can run arbitrary host code on
    /// drop, so they must never be dropped while the core is borrowed;
    /// the handle layer drains this after each operation.
    pub(crate) graveyard: Vec<Payload>,
}

impl CoreInner {
    pub(crate) fn new(initial_stack: usize) -> Self {
        let mut heap = Heap::default();
        let mut table = |heap: &mut Heap| {
            let id = heap.alloc(Payload::Table(TableData::default()));
            heap.incref(id);
            VmValue::Object(ObjectKind::Table, id)
        };
        let root = table(&mut heap);
        let consts = table(&mut heap);
        let registry = table(&mut heap);
        CoreInner {
            heap,
            main: ExecState::new(initial_stack),
            threads: FxHashMap::default(),
            root,
            consts,
            registry,
            print_hook: None,
            error_hook: None,
            debug_hook: None,
            report_errors: true,
            debug_info: true,
            foreign: None,
            graveyard: Vec::new(),
        }
    }

    pub(crate) fn exec(&mut self, ctx: Ctx) -> &mut ExecState {
        match ctx {
            Ctx::Main => &mut self.main,
            Ctx::Thread(id) => self
                .threads
                .get_mut(&id.raw())
                .expect("thread context without exec state"),
        }
    }

    pub(crate) fn exec_ref(&self, ctx: Ctx) -> &ExecState {
        match ctx {
            Ctx::Main => &self.main,
            Ctx::Thread(id) => self
                .threads
                .get(&id.raw())
                .expect("thread context without exec state"),
        }
    }

    // ========================================================================
    // Reference counting
    // ========================================================================

    /// Take one reference on the value's object, if it is one.
    pub(crate) fn retain(&mut self, v: &VmValue) {
        if let VmValue::Object(_, id) = v {
            self.heap.incref(*id);
        }
    }

    /// Drop one reference, freeing the object when the count hits zero.
    pub(crate) fn release(&mut self, v: VmValue) {
        if let VmValue::Object(_, id) = v {
            if self.heap.decref(id) {
                self.free_object(id);
            }
        }
    }

    /// Tear down an object whose reference count reached zero, cascading
    /// into children that die with it. Iterative worklist so deep
    /// container chains cannot overflow the host stack.
    pub(crate) fn free_object(&mut self, id: ObjectId) {
        let mut worklist = vec![id];
        while let Some(id) = worklist.pop() {
            let Some(payload) = self.heap.take_payload(id) else {
                continue;
            };
            if matches!(payload, Payload::Thread) {
                if let Some(exec) = self.threads.remove(&id.raw()) {
                    Self::drain_exec(exec, &mut self.heap, &mut worklist);
                }
            }
            let mut children = Vec::new();
            payload.children(&mut children);
            for child in children {
                if let VmValue::Object(_, cid) = child {
                    if self.heap.decref(cid) {
                        worklist.push(cid);
                    }
                }
            }
            // disposal (release hooks, drop glue) happens in the handle
            // layer once the core borrow is gone
            self.graveyard.push(payload);
        }
    }

    fn drain_exec(exec: ExecState, heap: &mut Heap, worklist: &mut Vec<ObjectId>) {
        let mut drop_value = |v: VmValue| {
            if let VmValue::Object(_, id) = v {
                if heap.decref(id) {
                    worklist.push(id);
                }
            }
        };
        for v in exec.stack {
            drop_value(v);
        }
        drop_value(exec.last_error);
        if let Some(SuspendPoint::Script(frame)) = exec.suspend {
            drop_value(frame.closure);
        }
    }

    // ========================================================================
    // Cycle collection
    // ========================================================================

    fn gc_roots(&self) -> Vec<VmValue> {
        let mut roots = self.heap.pinned();
        roots.push(self.root.clone());
        roots.push(self.consts.clone());
        roots.push(self.registry.clone());
        let mut add_exec = |exec: &ExecState| {
            roots_from_exec(exec, &mut roots);
        };
        add_exec(&self.main);
        for exec in self.threads.values() {
            add_exec(exec);
        }
        roots
    }

    fn mark_from(&mut self, roots: Vec<VmValue>) {
        let mut work: Vec<VmValue> = roots;
        while let Some(v) = work.pop() {
            let VmValue::Object(kind, id) = v else { continue };
            if !self.heap.mark(id) {
                continue;
            }
            if let Some(payload) = self.heap.payload(id) {
                payload.children(&mut work);
            }
            // threads keep their stacks reachable
            if kind == ObjectKind::Thread {
                if let Some(exec) = self.threads.get(&id.raw()) {
                    roots_from_exec(exec, &mut work);
                }
            }
        }
    }

    /// Reclaim every object unreachable from the roots (pinned objects,
    /// built-in tables, all context stacks). Returns the number of
    /// objects freed.
    pub(crate) fn collect_garbage(&mut self) -> usize {
        self.heap.clear_marks();
        self.mark_from(self.gc_roots());
        let dead = self.heap.unmarked();
        let freed = dead.len();
        for v in dead {
            if let VmValue::Object(_, id) = v {
                self.free_object(id);
            }
        }
        freed
    }

    /// Gather every unreachable object into a fresh array instead of
    /// freeing it. Returns `Null` when nothing was unreachable.
    pub(crate) fn resurrect_unreachable(&mut self) -> VmValue {
        self.heap.clear_marks();
        self.mark_from(self.gc_roots());
        let dead = self.heap.unmarked();
        if dead.is_empty() {
            return VmValue::Null;
        }
        for v in &dead {
            self.retain(v);
        }
        let id = self.heap.alloc(Payload::Array(dead));
        VmValue::Object(ObjectKind::Array, id)
    }

    // ========================================================================
    // Tables
    // ========================================================================

    fn table_data(&self, id: ObjectId) -> Option<&TableData> {
        match self.heap.payload(id) {
            Some(Payload::Table(t)) => Some(t),
            _ => None,
        }
    }

    fn table_data_mut(&mut self, id: ObjectId) -> Option<&mut TableData> {
        match self.heap.payload_mut(id) {
            Some(Payload::Table(t)) => Some(t),
            _ => None,
        }
    }

    /// Slot lookup on the table itself, no delegate chain.
    pub(crate) fn table_raw_get(&self, id: ObjectId, key: &VmValue) -> Option<VmValue> {
        self.table_data(id)?
            .entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.clone())
    }

    /// Slot lookup following the delegate chain.
    pub(crate) fn table_get(&self, id: ObjectId, key: &VmValue) -> Option<VmValue> {
        let mut current = id;
        for _ in 0..MAX_DELEGATE_DEPTH {
            if let Some(v) = self.table_raw_get(current, key) {
                return Some(v);
            }
            match self.table_data(current)?.delegate {
                Some(VmValue::Object(ObjectKind::Table, next)) => current = next,
                _ => return None,
            }
        }
        None
    }

    /// Create or overwrite a slot. Retains the key and value on behalf
    /// of the slot; callers keep their own references.
    pub(crate) fn table_set(&mut self, id: ObjectId, key: VmValue, value: VmValue) {
        self.retain(&key);
        self.retain(&value);
        let Some(table) = self.table_data_mut(id) else {
            self.release(key);
            self.release(value);
            return;
        };
        let old = match table.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => Some(std::mem::replace(&mut entry.1, value)),
            None => {
                table.entries.push((key.clone(), value));
                None
            }
        };
        if let Some(old) = old {
            self.release(old);
            self.release(key);
        }
    }

    /// Remove a slot. Returns the removed value with its reference
    /// transferred to the caller.
    pub(crate) fn table_delete(&mut self, id: ObjectId, key: &VmValue) -> Option<VmValue> {
        let table = self.table_data_mut(id)?;
        let pos = table.entries.iter().position(|(k, _)| k == key)?;
        let (k, v) = table.entries.remove(pos);
        self.release(k);
        Some(v)
    }

    pub(crate) fn table_len(&self, id: ObjectId) -> Option<usize> {
        self.table_data(id).map(|t| t.entries.len())
    }

    /// Entry by insertion order, for iteration. Returned values are
    /// borrowed clones; the caller retains them if it keeps them.
    pub(crate) fn table_entry(&self, id: ObjectId, index: usize) -> Option<(VmValue, VmValue)> {
        self.table_data(id)?.entries.get(index).cloned()
    }

    pub(crate) fn table_clear(&mut self, id: ObjectId) {
        if let Some(table) = self.table_data_mut(id) {
            let entries = std::mem::take(&mut table.entries);
            for (k, v) in entries {
                self.release(k);
                self.release(v);
            }
        }
    }

    pub(crate) fn delegate_of(&self, id: ObjectId) -> Option<VmValue> {
        match self.heap.payload(id)? {
            Payload::Table(t) => t.delegate.clone(),
            Payload::UserData(u) => u.delegate.clone(),
            _ => None,
        }
    }

    /// Install or clear a delegate. Takes ownership of one reference to
    /// the new delegate.
    pub(crate) fn set_delegate(&mut self, id: ObjectId, delegate: Option<VmValue>) -> bool {
        if let Some(d) = &delegate {
            self.retain(d);
        }
        let slot = match self.heap.payload_mut(id) {
            Some(Payload::Table(t)) => &mut t.delegate,
            Some(Payload::UserData(u)) => &mut u.delegate,
            _ => {
                if let Some(d) = delegate {
                    self.release(d);
                }
                return false;
            }
        };
        let old = std::mem::replace(slot, delegate);
        if let Some(old) = old {
            self.release(old);
        }
        true
    }

    // ========================================================================
    // Arrays
    // ========================================================================

    pub(crate) fn array_items(&self, id: ObjectId) -> Option<&Vec<VmValue>> {
        match self.heap.payload(id) {
            Some(Payload::Array(items)) => Some(items),
            _ => None,
        }
    }

    fn array_items_mut(&mut self, id: ObjectId) -> Option<&mut Vec<VmValue>> {
        match self.heap.payload_mut(id) {
            Some(Payload::Array(items)) => Some(items),
            _ => None,
        }
    }

    pub(crate) fn array_len(&self, id: ObjectId) -> Option<usize> {
        self.array_items(id).map(|v| v.len())
    }

    pub(crate) fn array_get(&self, id: ObjectId, index: usize) -> Option<VmValue> {
        self.array_items(id)?.get(index).cloned()
    }

    /// Overwrite an element. Retains `value` on behalf of the slot.
    pub(crate) fn array_set(&mut self, id: ObjectId, index: usize, value: VmValue) -> bool {
        self.retain(&value);
        match self.array_items_mut(id) {
            Some(items) if index < items.len() => {
                let old = std::mem::replace(&mut items[index], value);
                self.release(old);
                true
            }
            _ => {
                self.release(value);
                false
            }
        }
    }

    pub(crate) fn array_append(&mut self, id: ObjectId, value: VmValue) -> bool {
        self.retain(&value);
        match self.array_items_mut(id) {
            Some(items) => {
                items.push(value);
                true
            }
            None => {
                self.release(value);
                false
            }
        }
    }

    /// Pop the last element, transferring its reference to the caller.
    pub(crate) fn array_pop(&mut self, id: ObjectId) -> Option<VmValue> {
        self.array_items_mut(id)?.pop()
    }

    /// Insert at an index, shifting later elements up.
    pub(crate) fn array_insert(&mut self, id: ObjectId, index: usize, value: VmValue) -> bool {
        self.retain(&value);
        match self.array_items_mut(id) {
            Some(items) if index <= items.len() => {
                items.insert(index, value);
                true
            }
            _ => {
                self.release(value);
                false
            }
        }
    }

    /// Remove the element at an index, releasing it.
    pub(crate) fn array_remove(&mut self, id: ObjectId, index: usize) -> bool {
        let removed = match self.array_items_mut(id) {
            Some(items) if index < items.len() => items.remove(index),
            _ => return false,
        };
        self.release(removed);
        true
    }

    pub(crate) fn array_reverse(&mut self, id: ObjectId) -> bool {
        match self.array_items_mut(id) {
            Some(items) => {
                items.reverse();
                true
            }
            None => false,
        }
    }

    pub(crate) fn array_clear(&mut self, id: ObjectId) -> bool {
        let Some(items) = self.array_items_mut(id) else {
            return false;
        };
        let removed = std::mem::take(items);
        for v in removed {
            self.release(v);
        }
        true
    }

    /// Grow with nulls or shrink, releasing truncated elements.
    pub(crate) fn array_resize(&mut self, id: ObjectId, new_len: usize) -> bool {
        let Some(items) = self.array_items_mut(id) else {
            return false;
        };
        if new_len >= items.len() {
            items.resize(new_len, VmValue::Null);
            true
        } else {
            let removed: Vec<VmValue> = items.drain(new_len..).collect();
            for v in removed {
                self.release(v);
            }
            true
        }
    }

    // ========================================================================
    // Output
    // ========================================================================

    pub(crate) fn emit_print(&self, msg: &str) {
        if let Some(hook) = &self.print_hook {
            hook(msg);
        }
    }

    pub(crate) fn emit_error(&self, msg: &str) {
        if self.report_errors {
            if let Some(hook) = &self.error_hook {
                hook(msg);
            }
        }
    }
}

impl Drop for CoreInner {
    fn drop(&mut self) {
        // run user-data release hooks for everything still alive and
        // for anything freed but not yet reaped
        let live = self.heap.live_values();
        for v in live {
            if let VmValue::Object(ObjectKind::UserData, id) = v {
                if let Some(Payload::UserData(u)) = self.heap.payload_mut(id) {
                    if let Some(hook) = u.release_hook.take() {
                        hook(u.data.as_mut());
                    }
                }
            }
        }
        for payload in &mut self.graveyard {
            if let Payload::UserData(u) = payload {
                if let Some(hook) = u.release_hook.take() {
                    hook(u.data.as_mut());
                }
            }
        }
    }
}

fn roots_from_exec(exec: &ExecState, out: &mut Vec<VmValue>) {
    out.extend(exec.stack.iter().cloned());
    out.push(exec.last_error.clone());
    if let Some(SuspendPoint::Script(frame)) = &exec.suspend {
        out.push(frame.closure.clone());
    }
}
