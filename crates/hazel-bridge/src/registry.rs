//! Object identity registry and weak intern table
//!
//! One registry per VM instance. `wrappers` guarantees at most one live
//! wrapper per underlying VM object; `interned` memoizes opaque boxing
//! by host-value equality. Both hold weak references: the wrappers
//! themselves own the VM-level references, and dropping the last clone
//! of a wrapper erases its entry synchronously.

use crate::object::VmRefInner;
use crate::value::HostKey;
use hazel_vm::ObjectKey;
use rustc_hash::FxHashMap;
use std::rc::{Rc, Weak};

#[derive(Default)]
pub(crate) struct Registry {
    wrappers: FxHashMap<ObjectKey, Weak<VmRefInner>>,
    interned: FxHashMap<HostKey, Weak<VmRefInner>>,
}

impl Registry {
    /// Live wrapper for a VM object identity, if one exists.
    pub(crate) fn lookup(&self, key: ObjectKey) -> Option<Rc<VmRefInner>> {
        self.wrappers.get(&key)?.upgrade()
    }

    /// Record the unique wrapper for a VM object identity.
    pub(crate) fn insert(&mut self, key: ObjectKey, wrapper: &Rc<VmRefInner>) {
        self.wrappers.insert(key, Rc::downgrade(wrapper));
    }

    /// Erase a wrapper's entry; called from the wrapper's drop.
    pub(crate) fn erase(&mut self, key: ObjectKey) {
        self.wrappers.remove(&key);
    }

    /// Live interned wrapper for a host value key, if one exists.
    pub(crate) fn lookup_interned(&self, key: &HostKey) -> Option<Rc<VmRefInner>> {
        self.interned.get(key)?.upgrade()
    }

    /// Record a freshly boxed wrapper under its host value key. All
    /// entries whose wrapper has died are dropped first, so the table
    /// only ever holds dead weak references between a wrapper's death
    /// and the next insert.
    pub(crate) fn insert_interned(&mut self, key: HostKey, wrapper: &Rc<VmRefInner>) {
        self.interned.retain(|_, w| w.upgrade().is_some());
        self.interned.insert(key, Rc::downgrade(wrapper));
    }

    /// Number of live identity entries, for tests and diagnostics.
    pub(crate) fn wrapper_count(&self) -> usize {
        self.wrappers
            .values()
            .filter(|w| w.upgrade().is_some())
            .count()
    }

    /// Number of entries in the intern table, dead or alive.
    pub(crate) fn interned_count(&self) -> usize {
        self.interned.len()
    }
}
