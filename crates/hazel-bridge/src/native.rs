//! Host callables exposed to scripts
//!
//! A host callable becomes a native closure with two free variables:
//! the boxed callable itself and a varargs flag. The adapter recovers
//! the owning bridge instance through the machine's foreign pointer,
//! converts the window into host arguments, invokes the callable, and
//! translates the result back. Control-flow markers in the returned
//! value map onto the VM's native flow: a throw marker raises, a
//! tail-call marker hands the VM another callable to run in place of
//! this one, and a suspend marker parks the whole context.
//!
//! Nothing in this path may panic across the VM boundary. Any
//! conversion failure turns into a script-level throw instead.

use crate::convert;
use crate::object::{RefKind, VmRef};
use crate::value::{HostValue, SpecialReturn, VmContext};
use crate::vm::{ScriptVm, VmInstance};
use hazel_vm::{NativeFlow, Vm, VmValue};
use std::rc::Rc;

fn throw_str(message: &str) -> NativeFlow {
    NativeFlow::Throw(VmValue::string(message))
}

/// Wrap `callable` as a VM-callable closure and return its wrapper.
///
/// With `varargs` set, the script-side arity is open and the callable
/// receives `[context, this, [args..]]`; otherwise it receives
/// `[this, args..]` positionally.
pub(crate) fn wrap_callable(
    inst: &Rc<VmInstance>,
    vm: &Vm,
    callable: &HostValue,
    varargs: bool,
) -> VmRef {
    // free vars, bottom to top: boxed callable, then the varargs flag;
    // the boxing pushes the user data itself
    inst.push_boxed(callable);
    vm.push(VmValue::Bool(varargs));
    let closure = vm.new_native_closure("host", Rc::new(host_adapter), 2);
    let wrapped = inst.wrap(closure);
    vm.pop(1);
    wrapped
}

fn host_adapter(vm: &Vm) -> NativeFlow {
    let Some(foreign) = vm.foreign() else {
        return throw_str("host callable invoked on a detached machine");
    };
    let Ok(inst) = foreign.downcast::<VmInstance>() else {
        return throw_str("host callable invoked on a foreign machine");
    };

    // free vars sit above the arguments, flag on top
    let top = vm.top();
    if top < 2 {
        return throw_str("host callable window is malformed");
    }
    let varargs = matches!(vm.get(-1), Some(VmValue::Bool(true)));
    let callable = match vm.get(-2).and_then(|v| convert::unbox_host_value(&inst, &v)) {
        Some(HostValue::Callable(f)) => f,
        _ => return throw_str("host callable binding has expired"),
    };

    let nargs = (top - 2) as usize;
    let this = convert::read_stack(&inst, vm, 1);
    let mut rest = Vec::with_capacity(nargs.saturating_sub(1));
    for idx in 2..=nargs as i64 {
        rest.push(convert::read_stack(&inst, vm, idx));
    }

    let args = if varargs {
        let context = if vm.is_main() {
            VmContext::Instance(ScriptVm::from_instance(&inst))
        } else {
            match vm.thread_id() {
                Some(id) => VmContext::Thread(
                    inst.wrap(VmValue::Object(hazel_vm::ObjectKind::Thread, id)),
                ),
                None => return throw_str("host callable lost its thread context"),
            }
        };
        vec![
            HostValue::Context(context),
            this,
            HostValue::List(rest),
        ]
    } else {
        let mut positional = Vec::with_capacity(nargs);
        positional.push(this);
        positional.extend(rest);
        positional
    };

    // no VM borrow is held here; the callable may reenter freely
    let result = (callable)(&args);

    match result {
        HostValue::Special(special) => match *special {
            SpecialReturn::Throw { exception } => match convert::to_vm_value(&inst, &exception) {
                Ok(v) => NativeFlow::Throw(v),
                Err(_) => throw_str("host callable threw an unconvertible value"),
            },
            SpecialReturn::TailCall { func, args } => tail_call(&inst, &func, &args),
            SpecialReturn::Suspend { result } => match convert::to_vm_value(&inst, &result) {
                Ok(v) => NativeFlow::Suspend(v),
                Err(_) => throw_str("host callable suspended with an unconvertible value"),
            },
        },
        HostValue::Nil => NativeFlow::ReturnNone,
        other => match convert::to_vm_value(&inst, &other) {
            Ok(v) => NativeFlow::Return(v),
            Err(_) => throw_str("host callable returned an unconvertible value"),
        },
    }
}

/// Build a tail-call flow. The first element of `args` becomes the new
/// callable's `this`.
fn tail_call(inst: &Rc<VmInstance>, func: &HostValue, args: &[HostValue]) -> NativeFlow {
    let Some(target) = func.as_object() else {
        return throw_str("tail call target is not a function");
    };
    if !target.owned_by(inst)
        || !matches!(
            target.kind(),
            RefKind::Function | RefKind::NativeFunction
        )
    {
        return throw_str("tail call target is not a function");
    }
    if args.is_empty() {
        return throw_str("tail call needs at least a receiver argument");
    }
    let mut vm_args = Vec::with_capacity(args.len());
    for arg in args {
        match convert::to_vm_value(inst, arg) {
            Ok(v) => vm_args.push(v),
            Err(_) => return throw_str("tail call argument is unconvertible"),
        }
    }
    NativeFlow::TailCall {
        func: target.handle().clone(),
        args: vm_args,
    }
}
