//! Per-context execution state
//!
//! Each context (the main VM and every thread object) owns one
//! [`ExecState`]: a value stack with frame windows, a run state, and the
//! last error raised in the context. Suspension leaves the state intact
//! so a later wake-up can continue where the context stopped.

use crate::value::VmValue;

/// Execution state of a context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    /// No call in progress.
    Idle,
    /// A call is currently executing.
    Running,
    /// A call was suspended and can be woken up.
    Suspended,
}

/// Lifecycle state of a generator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeneratorState {
    /// The generator has finished (or was never started and then died).
    Dead,
    /// The generator is currently executing.
    Running,
    /// The generator yielded and can be resumed.
    Suspended,
}

/// Where a suspended context stopped.
pub(crate) enum SuspendPoint {
    /// A native callable returned a suspend marker. The wake-up value
    /// becomes the result of the suspended call.
    Native,
    /// A script closure hit a suspend instruction; `frame` resumes it.
    Script(ScriptFrame),
}

/// Saved script frame for resuming a suspended closure.
pub(crate) struct ScriptFrame {
    pub(crate) closure: VmValue,
    pub(crate) pc: usize,
}

/// One entry in the call record stack, reported by stack introspection.
#[derive(Clone)]
pub(crate) struct CallRecord {
    pub(crate) func_name: std::rc::Rc<str>,
    pub(crate) source: std::rc::Rc<str>,
    pub(crate) line: i64,
    /// The executing closure; alive for the duration of the call
    /// because the caller keeps it on the stack.
    pub(crate) closure: Option<VmValue>,
}

/// Stack and run state of one context.
pub(crate) struct ExecState {
    pub(crate) stack: Vec<VmValue>,
    /// Frame window bases; positive stack indices resolve against the
    /// innermost base so a native callable sees its own window.
    pub(crate) bases: Vec<usize>,
    pub(crate) calls: Vec<CallRecord>,
    pub(crate) state: RunState,
    pub(crate) suspend: Option<SuspendPoint>,
    pub(crate) last_error: VmValue,
}

impl ExecState {
    pub(crate) fn new(initial_capacity: usize) -> Self {
        ExecState {
            stack: Vec::with_capacity(initial_capacity),
            bases: Vec::new(),
            calls: Vec::new(),
            state: RunState::Idle,
            suspend: None,
            last_error: VmValue::Null,
        }
    }

    pub(crate) fn base(&self) -> usize {
        self.bases.last().copied().unwrap_or(0)
    }

    /// Number of values in the current window.
    pub(crate) fn top(&self) -> usize {
        self.stack.len() - self.base()
    }

    /// Resolve a stack index: positive indices are 1-based from the
    /// current window base, negative from the top. Returns the absolute
    /// zero-based offset.
    pub(crate) fn resolve(&self, idx: i64) -> Option<usize> {
        let base = self.base() as i64;
        let len = self.stack.len() as i64;
        let abs = if idx > 0 { base + idx - 1 } else { len + idx };
        if abs >= base && abs < len {
            Some(abs as usize)
        } else {
            None
        }
    }

    pub(crate) fn get(&self, idx: i64) -> Option<&VmValue> {
        self.resolve(idx).map(|i| &self.stack[i])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stack_index_resolution() {
        let mut exec = ExecState::new(8);
        exec.stack.push(VmValue::Int(10));
        exec.stack.push(VmValue::Int(20));
        exec.stack.push(VmValue::Int(30));

        assert_eq!(exec.get(1), Some(&VmValue::Int(10)));
        assert_eq!(exec.get(3), Some(&VmValue::Int(30)));
        assert_eq!(exec.get(-1), Some(&VmValue::Int(30)));
        assert_eq!(exec.get(-3), Some(&VmValue::Int(10)));
        assert_eq!(exec.get(0), None);
        assert_eq!(exec.get(4), None);
        assert_eq!(exec.get(-4), None);
    }
}
