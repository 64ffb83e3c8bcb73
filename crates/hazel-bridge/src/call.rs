//! Call and resume protocol over the VM stack
//!
//! Every entry point here restores the stack it found. The VM's own
//! contract is uneven on purpose: a successful call pops its result and
//! then the callable, but when the call suspends the callable stays put
//! so the wake-up path can find it. A failed call also leaves the
//! callable behind. The helpers below absorb that asymmetry so bridge
//! callers never see a dirty stack.

use crate::convert;
use crate::error::{BridgeError, BridgeResult};
use crate::object::{RefKind, VmRef};
use crate::value::HostValue;
use crate::vm::VmInstance;
use hazel_vm::{RunState, Vm};
use std::rc::Rc;

fn script_error(vm: &Vm) -> BridgeError {
    BridgeError::Script(vm.last_error().to_string())
}

/// Push the callable slot. A bare host callable is wrapped on the fly
/// as a non-varargs closure; the stack slot keeps it alive.
fn push_callable(inst: &Rc<VmInstance>, vm: &Vm, callable: &HostValue) -> BridgeResult<()> {
    match callable {
        HostValue::Callable(_) => {
            let wrapped = crate::native::wrap_callable(inst, vm, callable, false);
            vm.push(wrapped.handle().clone());
            Ok(())
        }
        other => convert::push_value(inst, vm, other),
    }
}

/// Push callable, `this`, and arguments, run the call, and pop
/// everything back off. On suspension the VM keeps the callable; we
/// drop one fewer slot to match.
pub(crate) fn call_function(
    inst: &Rc<VmInstance>,
    vm: &Vm,
    callable: &HostValue,
    this: &HostValue,
    args: &[HostValue],
) -> BridgeResult<HostValue> {
    let depth = vm.top();
    let pushed = (|| -> BridgeResult<()> {
        push_callable(inst, vm, callable)?;
        convert::push_value(inst, vm, this)?;
        for arg in args {
            convert::push_value(inst, vm, arg)?;
        }
        Ok(())
    })();
    if let Err(e) = pushed {
        vm.set_top(depth);
        return Err(e);
    }

    match vm.call(args.len() + 1, true, true) {
        Ok(()) => {
            let result = convert::read_stack(inst, vm, -1);
            vm.pop(1);
            if vm.state() != RunState::Suspended {
                vm.pop(1);
            }
            Ok(result)
        }
        Err(_) => {
            // args were consumed; the callable is still on the stack
            vm.set_top(depth);
            Err(script_error(vm))
        }
    }
}

/// Call with a nil `this`.
pub(crate) fn apply_function(
    inst: &Rc<VmInstance>,
    vm: &Vm,
    callable: &HostValue,
    args: &[HostValue],
) -> BridgeResult<HostValue> {
    call_function(inst, vm, callable, &HostValue::Nil, args)
}

/// Like [`apply_function`], but a script-level error comes back as a
/// throw marker instead of an `Err`, so the caller can forward the
/// exception value itself.
pub(crate) fn apply_function_catch(
    inst: &Rc<VmInstance>,
    vm: &Vm,
    callable: &HostValue,
    args: &[HostValue],
) -> BridgeResult<HostValue> {
    let depth = vm.top();
    push_callable(inst, vm, callable).map_err(|e| {
        vm.set_top(depth);
        e
    })?;
    vm.push(hazel_vm::VmValue::Null);
    for arg in args {
        if let Err(e) = convert::push_value(inst, vm, arg) {
            vm.set_top(depth);
            return Err(e);
        }
    }

    match vm.call(args.len() + 1, true, inst.report_caught.get()) {
        Ok(()) => {
            let result = convert::read_stack(inst, vm, -1);
            vm.pop(1);
            if vm.state() != RunState::Suspended {
                vm.pop(1);
            }
            Ok(result)
        }
        Err(_) => {
            let exception = convert::from_vm_value(inst, &vm.last_error());
            vm.set_top(depth);
            vm.reset_error();
            Ok(HostValue::throw(exception))
        }
    }
}

/// Resume a suspended generator, producing its next yielded value.
pub(crate) fn resume_generator(
    inst: &Rc<VmInstance>,
    vm: &Vm,
    generator: &VmRef,
) -> BridgeResult<HostValue> {
    if generator.kind() != RefKind::Generator {
        return Err(BridgeError::InvalidRef(format!(
            "resume on a {}",
            generator.kind().name()
        )));
    }
    if !generator.owned_by(inst) {
        return Err(BridgeError::ForeignObject);
    }
    vm.push(generator.handle().clone());
    match vm.resume(true) {
        Ok(()) => {
            let result = convert::read_stack(inst, vm, -1);
            vm.pop(2);
            Ok(result)
        }
        Err(_) => {
            vm.pop(1);
            Err(script_error(vm))
        }
    }
}

/// Resume a suspended VM with `value` as the result of the suspending
/// call. With no pending suspension the VM raises and we report it.
pub(crate) fn wake_up(
    inst: &Rc<VmInstance>,
    vm: &Vm,
    value: &HostValue,
) -> BridgeResult<HostValue> {
    let v = convert::to_vm_value(inst, value)?;
    let was_suspended = vm.state() == RunState::Suspended;
    match vm.wake_up(Some(v), true) {
        Ok(()) => {
            let result = convert::read_stack(inst, vm, -1);
            vm.pop(1);
            if vm.state() != RunState::Suspended {
                vm.pop(1);
            }
            Ok(result)
        }
        Err(_) => {
            // without a suspension the VM touched nothing, so there is
            // no parked callable to discard
            if was_suspended {
                vm.pop(1);
            }
            Err(script_error(vm))
        }
    }
}

/// Resume a suspended VM by raising `error` at the suspension point.
/// The suspension is consumed either way.
pub(crate) fn wake_up_throw(
    inst: &Rc<VmInstance>,
    vm: &Vm,
    error: &HostValue,
) -> BridgeResult<()> {
    let v = convert::to_vm_value(inst, error)?;
    let was_suspended = vm.state() == RunState::Suspended;
    // always comes back as an error; the parked callable is left for us
    let _ = vm.wake_up_throw(v, true);
    if was_suspended {
        vm.pop(1);
    }
    Err(script_error(vm))
}
