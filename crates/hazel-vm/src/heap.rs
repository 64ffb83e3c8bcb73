//! Reference-counted object heap
//!
//! Slots hold one payload each and are recycled through a free list. A
//! slot's generation is bumped on free, which both invalidates stale
//! [`ObjectId`]s and lets weak references detect that their target died.
//!
//! Two counts are kept per slot: `refs` is the total reference count
//! (stack slots, container slots, external pins), `ext_refs` counts only
//! external pins taken through `Vm::add_ref`. External pins double as GC
//! roots for the mark-and-sweep cycle collector in `machine.rs`.

use crate::bytecode::FuncProto;
use crate::exec::GeneratorState;
use crate::value::{ObjectId, ObjectKind, VmValue};
use crate::vm::NativeFn;
use std::any::Any;
use std::rc::Rc;

/// Release hook invoked when a user-data object is freed, before its
/// payload is dropped.
pub type ReleaseHook = Rc<dyn Fn(&mut dyn Any)>;

/// Table payload: insertion-ordered entries plus optional delegate.
#[derive(Default)]
pub struct TableData {
    pub(crate) entries: Vec<(VmValue, VmValue)>,
    pub(crate) delegate: Option<VmValue>,
}

/// User-data payload: opaque host data, a type tag distinguishing the
/// embedder that created it, and an optional release hook.
pub struct UserDataBox {
    pub(crate) data: Box<dyn Any>,
    pub(crate) type_tag: u64,
    pub(crate) release_hook: Option<ReleaseHook>,
    pub(crate) delegate: Option<VmValue>,
}

/// Script closure payload.
pub struct ClosureData {
    pub(crate) proto: Rc<FuncProto>,
    pub(crate) root: Option<VmValue>,
    pub(crate) env: Option<VmValue>,
}

/// Native closure payload: host function plus bound free variables.
pub struct NativeClosureData {
    pub(crate) name: Rc<str>,
    pub(crate) func: NativeFn,
    pub(crate) free_vars: Vec<VmValue>,
    pub(crate) env: Option<VmValue>,
}

/// Saved generator frame between resumes.
pub struct GenFrame {
    pub(crate) closure: VmValue,
    pub(crate) pc: usize,
}

/// Generator payload.
pub struct GeneratorData {
    pub(crate) state: GeneratorState,
    pub(crate) frame: Option<GenFrame>,
}

/// Class payload.
pub struct ClassData {
    pub(crate) name: Rc<str>,
    pub(crate) members: Vec<(VmValue, VmValue)>,
}

/// Instance payload: the class it was constructed from plus its own
/// member slots.
pub struct InstanceData {
    pub(crate) class: VmValue,
    pub(crate) slots: Vec<(VmValue, VmValue)>,
}

/// Heap object payload, one variant per [`ObjectKind`].
pub enum Payload {
    Table(TableData),
    Array(Vec<VmValue>),
    UserData(UserDataBox),
    Closure(ClosureData),
    NativeClosure(NativeClosureData),
    Generator(GeneratorData),
    Thread,
    Class(ClassData),
    Instance(InstanceData),
    /// Target object value; not counted in the target's refs
    WeakRef(VmValue),
}

impl Payload {
    /// Kind tag matching this payload variant.
    pub fn kind(&self) -> ObjectKind {
        match self {
            Payload::Table(_) => ObjectKind::Table,
            Payload::Array(_) => ObjectKind::Array,
            Payload::UserData(_) => ObjectKind::UserData,
            Payload::Closure(_) => ObjectKind::Closure,
            Payload::NativeClosure(_) => ObjectKind::NativeClosure,
            Payload::Generator(_) => ObjectKind::Generator,
            Payload::Thread => ObjectKind::Thread,
            Payload::Class(_) => ObjectKind::Class,
            Payload::Instance(_) => ObjectKind::Instance,
            Payload::WeakRef(_) => ObjectKind::WeakRef,
        }
    }

    /// Strongly-referenced child values (weak-ref targets excluded).
    pub fn children(&self, out: &mut Vec<VmValue>) {
        match self {
            Payload::Table(t) => {
                for (k, v) in &t.entries {
                    out.push(k.clone());
                    out.push(v.clone());
                }
                if let Some(d) = &t.delegate {
                    out.push(d.clone());
                }
            }
            Payload::Array(items) => out.extend(items.iter().cloned()),
            Payload::UserData(u) => {
                if let Some(d) = &u.delegate {
                    out.push(d.clone());
                }
            }
            Payload::Closure(c) => {
                if let Some(r) = &c.root {
                    out.push(r.clone());
                }
                if let Some(e) = &c.env {
                    out.push(e.clone());
                }
            }
            Payload::NativeClosure(n) => {
                out.extend(n.free_vars.iter().cloned());
                if let Some(e) = &n.env {
                    out.push(e.clone());
                }
            }
            Payload::Generator(g) => {
                if let Some(f) = &g.frame {
                    out.push(f.closure.clone());
                }
            }
            Payload::Thread => {}
            Payload::Class(c) => {
                for (k, v) in &c.members {
                    out.push(k.clone());
                    out.push(v.clone());
                }
            }
            Payload::Instance(i) => {
                out.push(i.class.clone());
                for (k, v) in &i.slots {
                    out.push(k.clone());
                    out.push(v.clone());
                }
            }
            Payload::WeakRef(_) => {}
        }
    }
}

struct Slot {
    generation: u32,
    kind: ObjectKind,
    refs: u32,
    ext_refs: u32,
    mark: bool,
    payload: Option<Payload>,
}

/// Slot heap with free-list recycling.
#[derive(Default)]
pub struct Heap {
    slots: Vec<Slot>,
    free: Vec<u32>,
    live: usize,
}

impl Heap {
    /// Allocate a slot for `payload` with an initial reference count of
    /// zero. The caller stores the returned id somewhere refcounted
    /// (usually by pushing it on a stack) before anything can free it.
    pub fn alloc(&mut self, payload: Payload) -> ObjectId {
        let kind = payload.kind();
        self.live += 1;
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            debug_assert!(slot.payload.is_none());
            slot.kind = kind;
            slot.refs = 0;
            slot.ext_refs = 0;
            slot.mark = false;
            slot.payload = Some(payload);
            ObjectId {
                index,
                generation: slot.generation,
            }
        } else {
            let index = self.slots.len() as u32;
            self.slots.push(Slot {
                generation: 0,
                kind,
                refs: 0,
                ext_refs: 0,
                mark: false,
                payload: Some(payload),
            });
            ObjectId {
                index,
                generation: 0,
            }
        }
    }

    fn slot(&self, id: ObjectId) -> Option<&Slot> {
        let slot = self.slots.get(id.index as usize)?;
        if slot.generation == id.generation && slot.payload.is_some() {
            Some(slot)
        } else {
            None
        }
    }

    fn slot_mut(&mut self, id: ObjectId) -> Option<&mut Slot> {
        let slot = self.slots.get_mut(id.index as usize)?;
        if slot.generation == id.generation && slot.payload.is_some() {
            Some(slot)
        } else {
            None
        }
    }

    /// True if `id` still names a live object.
    pub fn is_alive(&self, id: ObjectId) -> bool {
        self.slot(id).is_some()
    }

    /// Borrow a live payload.
    pub fn payload(&self, id: ObjectId) -> Option<&Payload> {
        self.slot(id).and_then(|s| s.payload.as_ref())
    }

    /// Mutably borrow a live payload.
    pub fn payload_mut(&mut self, id: ObjectId) -> Option<&mut Payload> {
        self.slot_mut(id).and_then(|s| s.payload.as_mut())
    }

    /// Total reference count of a live object.
    pub fn refs(&self, id: ObjectId) -> u32 {
        self.slot(id).map(|s| s.refs).unwrap_or(0)
    }

    /// Bump the total reference count.
    pub fn incref(&mut self, id: ObjectId) {
        if let Some(slot) = self.slot_mut(id) {
            slot.refs += 1;
        }
    }

    /// Drop one total reference; returns true when the count reached zero
    /// (the caller is then responsible for freeing the object).
    #[must_use]
    pub fn decref(&mut self, id: ObjectId) -> bool {
        match self.slot_mut(id) {
            Some(slot) => {
                debug_assert!(slot.refs > 0);
                slot.refs = slot.refs.saturating_sub(1);
                slot.refs == 0
            }
            None => false,
        }
    }

    /// Add an external pin (also counts as one total reference).
    pub fn pin(&mut self, id: ObjectId) {
        if let Some(slot) = self.slot_mut(id) {
            slot.refs += 1;
            slot.ext_refs += 1;
        }
    }

    /// Remove an external pin; returns true when the total count reached
    /// zero.
    #[must_use]
    pub fn unpin(&mut self, id: ObjectId) -> bool {
        match self.slot_mut(id) {
            Some(slot) => {
                debug_assert!(slot.refs > 0 && slot.ext_refs > 0);
                slot.refs = slot.refs.saturating_sub(1);
                slot.ext_refs = slot.ext_refs.saturating_sub(1);
                slot.refs == 0
            }
            None => false,
        }
    }

    /// Detach the payload and retire the slot. The caller releases child
    /// references and runs hooks; the slot's generation is bumped so
    /// stale ids and weak references observe the death.
    pub fn take_payload(&mut self, id: ObjectId) -> Option<Payload> {
        let slot = self.slots.get_mut(id.index as usize)?;
        if slot.generation != id.generation || slot.payload.is_none() {
            return None;
        }
        let payload = slot.payload.take();
        slot.generation = slot.generation.wrapping_add(1);
        slot.refs = 0;
        slot.ext_refs = 0;
        self.free.push(id.index);
        self.live -= 1;
        payload
    }

    /// Number of live objects.
    pub fn live_count(&self) -> usize {
        self.live
    }

    /// Clear all marks before a collection.
    pub fn clear_marks(&mut self) {
        for slot in &mut self.slots {
            slot.mark = false;
        }
    }

    /// Mark one object; returns false if it was already marked or dead.
    pub fn mark(&mut self, id: ObjectId) -> bool {
        match self.slot_mut(id) {
            Some(slot) if !slot.mark => {
                slot.mark = true;
                true
            }
            _ => false,
        }
    }

    /// All live objects holding at least one external pin (GC roots).
    pub fn pinned(&self) -> Vec<VmValue> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, s)| s.payload.is_some() && s.ext_refs > 0)
            .map(|(i, s)| {
                VmValue::Object(
                    s.kind,
                    ObjectId {
                        index: i as u32,
                        generation: s.generation,
                    },
                )
            })
            .collect()
    }

    /// Every live object, regardless of marks or pins.
    pub fn live_values(&self) -> Vec<VmValue> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, s)| s.payload.is_some())
            .map(|(i, s)| {
                VmValue::Object(
                    s.kind,
                    ObjectId {
                        index: i as u32,
                        generation: s.generation,
                    },
                )
            })
            .collect()
    }

    /// All live objects left unmarked after a mark phase.
    pub fn unmarked(&self) -> Vec<VmValue> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, s)| s.payload.is_some() && !s.mark)
            .map(|(i, s)| {
                VmValue::Object(
                    s.kind,
                    ObjectId {
                        index: i as u32,
                        generation: s.generation,
                    },
                )
            })
            .collect()
    }
}
