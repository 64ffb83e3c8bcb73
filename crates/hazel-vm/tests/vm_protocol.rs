//! Embedding API tests: call protocol, native flows, suspension,
//! generators, threads, and object lifetime.

use hazel_vm::{
    GeneratorState, NativeFlow, NativeFn, ReleaseHook, RunState, Vm, VmError, VmValue,
};
use std::cell::{Cell, RefCell};
use std::rc::Rc;

fn str_value(s: &str) -> VmValue {
    VmValue::Str(Rc::from(s))
}

#[test]
fn call_leaves_closure_and_result() {
    let vm = Vm::open(64);
    vm.compile("return 42", "t").unwrap();
    vm.push(VmValue::Null);
    vm.call(1, true, true).unwrap();

    assert_eq!(vm.top(), 2);
    assert_eq!(vm.get(-1), Some(VmValue::Int(42)));
    vm.pop(2);
    assert_eq!(vm.top(), 0);
}

#[test]
fn calling_a_primitive_fails_and_pops_args() {
    let vm = Vm::open(64);
    vm.push(VmValue::Int(7));
    vm.push(VmValue::Null);
    let err = vm.call(1, true, false).unwrap_err();
    assert!(matches!(err, VmError::Runtime(_)));
    // args popped, callable left for the caller
    assert_eq!(vm.top(), 1);
    assert_eq!(
        vm.last_error().as_str(),
        Some("attempt to call a integer")
    );
}

#[test]
fn native_closure_sees_this_and_args() {
    let vm = Vm::open(64);
    let func: NativeFn = Rc::new(|vm: &Vm| {
        assert_eq!(vm.top(), 3);
        assert_eq!(vm.get(1), Some(VmValue::Null)); // this
        let a = match vm.get(2) {
            Some(VmValue::Int(n)) => n,
            other => panic!("unexpected arg: {other:?}"),
        };
        let b = match vm.get(3) {
            Some(VmValue::Int(n)) => n,
            other => panic!("unexpected arg: {other:?}"),
        };
        NativeFlow::Return(VmValue::Int(a + b))
    });
    vm.new_native_closure("add", func, 0);
    vm.push(VmValue::Null);
    vm.push(VmValue::Int(2));
    vm.push(VmValue::Int(40));
    vm.call(3, true, true).unwrap();

    assert_eq!(vm.get(-1), Some(VmValue::Int(42)));
    vm.pop(2);
}

#[test]
fn free_variables_sit_above_the_arguments() {
    let vm = Vm::open(64);
    let func: NativeFn = Rc::new(|vm: &Vm| {
        // one arg (this) plus two free variables
        assert_eq!(vm.top(), 3);
        assert_eq!(vm.get(-1), Some(VmValue::Int(20)));
        assert_eq!(vm.get(-2), Some(VmValue::Int(10)));
        NativeFlow::ReturnNone
    });
    vm.push(VmValue::Int(10));
    vm.push(VmValue::Int(20));
    vm.new_native_closure("bound", func, 2);
    assert_eq!(vm.top(), 1); // free vars were consumed

    vm.push(VmValue::Null);
    vm.call(1, true, true).unwrap();
    assert_eq!(vm.get(-1), Some(VmValue::Null));
    vm.pop(2);
}

#[test]
fn native_throw_sets_last_error() {
    let vm = Vm::open(64);
    let func: NativeFn = Rc::new(|_: &Vm| NativeFlow::Throw(str_value("boom")));
    vm.new_native_closure("thrower", func, 0);
    vm.push(VmValue::Null);

    let err = vm.call(1, true, false).unwrap_err();
    assert!(matches!(err, VmError::Runtime(msg) if msg == "boom"));
    assert_eq!(vm.last_error(), str_value("boom"));
    assert_eq!(vm.top(), 1); // failed call leaves the callable
    vm.pop(1);

    vm.reset_error();
    assert_eq!(vm.last_error(), VmValue::Null);
}

#[test]
fn native_suspend_and_wake_up() {
    let vm = Vm::open(64);
    let func: NativeFn = Rc::new(|_: &Vm| NativeFlow::Suspend(VmValue::Int(1)));
    vm.new_native_closure("sleeper", func, 0);
    vm.push(VmValue::Null);

    vm.call(1, true, true).unwrap();
    assert_eq!(vm.state(), RunState::Suspended);
    assert_eq!(vm.get(-1), Some(VmValue::Int(1)));
    vm.pop(1); // suspend value; the callable stays pushed

    vm.wake_up(Some(VmValue::Int(2)), true).unwrap();
    assert_eq!(vm.state(), RunState::Idle);
    assert_eq!(vm.get(-1), Some(VmValue::Int(2)));
    vm.pop(2);
}

#[test]
fn wake_up_throw_fails_the_suspended_call() {
    let vm = Vm::open(64);
    let func: NativeFn = Rc::new(|_: &Vm| NativeFlow::Suspend(VmValue::Null));
    vm.new_native_closure("sleeper", func, 0);
    vm.push(VmValue::Null);
    vm.call(1, true, true).unwrap();
    vm.pop(1);

    let err = vm.wake_up_throw(str_value("cancelled"), false).unwrap_err();
    assert!(matches!(err, VmError::Runtime(msg) if msg == "cancelled"));
    assert_eq!(vm.state(), RunState::Idle);
    assert_eq!(vm.last_error(), str_value("cancelled"));
    vm.pop(1);
}

#[test]
fn wake_up_without_suspension_fails() {
    let vm = Vm::open(64);
    let err = vm.wake_up(None, false).unwrap_err();
    assert!(matches!(err, VmError::Runtime(_)));
}

#[test]
fn tail_call_result_replaces_the_native_result() {
    let vm = Vm::open(64);
    vm.compile("return 7", "target").unwrap();
    let target = vm.get(-1).unwrap();
    vm.add_ref(&target);
    vm.pop(1);

    let captured = target.clone();
    let func: NativeFn = Rc::new(move |_: &Vm| NativeFlow::TailCall {
        func: captured.clone(),
        args: vec![VmValue::Null],
    });
    vm.new_native_closure("forwarder", func, 0);
    vm.push(VmValue::Null);
    vm.call(1, true, true).unwrap();

    assert_eq!(vm.top(), 2);
    assert_eq!(vm.get(-1), Some(VmValue::Int(7)));
    vm.pop(2);
    vm.release(&target);
}

#[test]
fn generator_yields_then_dies() {
    let vm = Vm::open(64);
    vm.compile("yield 1\nyield 2\nreturn 3", "gen").unwrap();
    vm.push(VmValue::Null);
    vm.call(1, true, true).unwrap();

    let gen = vm.get(-1).unwrap();
    assert_eq!(vm.generator_state(&gen), Some(GeneratorState::Suspended));

    vm.resume(true).unwrap();
    assert_eq!(vm.get(-1), Some(VmValue::Int(1)));
    vm.pop(1);

    vm.resume(true).unwrap();
    assert_eq!(vm.get(-1), Some(VmValue::Int(2)));
    assert_eq!(vm.generator_state(&gen), Some(GeneratorState::Suspended));
    vm.pop(1);

    vm.resume(true).unwrap();
    assert_eq!(vm.get(-1), Some(VmValue::Int(3)));
    assert_eq!(vm.generator_state(&gen), Some(GeneratorState::Dead));
    vm.pop(1);

    let err = vm.resume(false).unwrap_err();
    assert!(matches!(err, VmError::Runtime(msg) if msg.contains("dead generator")));
    vm.pop(2);
}

#[test]
fn script_suspend_resumes_where_it_stopped() {
    let vm = Vm::open(64);
    vm.compile("suspend 1\nreturn 2", "s").unwrap();
    vm.push(VmValue::Null);
    vm.call(1, true, true).unwrap();

    assert_eq!(vm.state(), RunState::Suspended);
    assert_eq!(vm.get(-1), Some(VmValue::Int(1)));
    vm.pop(1);

    vm.wake_up(None, true).unwrap();
    assert_eq!(vm.state(), RunState::Idle);
    assert_eq!(vm.get(-1), Some(VmValue::Int(2)));
    vm.pop(2);
}

#[test]
fn threads_have_independent_stacks_and_states() {
    let vm = Vm::open(64);
    let thread = vm.new_thread(32);
    assert!(!thread.is_main());
    assert!(vm.same_machine(&thread));
    assert_eq!(vm.top(), 1); // the thread object

    thread.compile("return 5", "t").unwrap();
    thread.push(VmValue::Null);
    thread.call(1, true, true).unwrap();
    assert_eq!(thread.get(-1), Some(VmValue::Int(5)));
    assert_eq!(vm.top(), 1);

    thread.pop(2);
    let func: NativeFn = Rc::new(|_: &Vm| NativeFlow::Suspend(VmValue::Null));
    thread.new_native_closure("sleeper", func, 0);
    thread.push(VmValue::Null);
    thread.call(1, true, true).unwrap();
    assert_eq!(thread.state(), RunState::Suspended);
    assert_eq!(vm.state(), RunState::Idle);
}

#[test]
fn release_frees_and_invalidates_weak_references() {
    let vm = Vm::open(64);
    let table = vm.new_table();
    vm.add_ref(&table);
    vm.pop(1);
    assert!(vm.is_alive(&table));
    assert_eq!(vm.ref_count(&table), 1);

    let weak = vm.weakref_of(&table);
    assert_eq!(vm.weakref_target(&weak), table);

    assert!(vm.release(&table));
    assert!(!vm.is_alive(&table));
    assert_eq!(vm.weakref_target(&weak), VmValue::Null);
    vm.pop(1);
}

#[test]
fn release_hook_fires_when_userdata_dies() {
    let vm = Vm::open(64);
    let fired = Rc::new(Cell::new(false));
    let hook: ReleaseHook = {
        let fired = Rc::clone(&fired);
        Rc::new(move |data| {
            assert!(data.downcast_ref::<u32>().is_some());
            fired.set(true);
        })
    };
    vm.new_userdata(Box::new(7u32), 1, Some(hook));
    assert!(!fired.get());
    vm.pop(1);
    assert!(fired.get());
}

#[test]
fn release_hook_may_reenter_the_machine() {
    let vm = Vm::open(64);
    let table = vm.new_table();
    vm.add_ref(&table);
    vm.pop(1);

    // the hook drops the pinned table from inside the disposal path
    let hook: ReleaseHook = {
        let vm = vm.clone();
        let table = table.clone();
        Rc::new(move |_| {
            assert!(vm.release(&table));
        })
    };
    vm.new_userdata(Box::new(()), 1, Some(hook));
    vm.pop(1);
    assert!(!vm.is_alive(&table));
}

#[test]
fn collect_garbage_reclaims_cycles() {
    let vm = Vm::open(64);
    let baseline = vm.live_objects();

    let a = vm.new_table();
    let b = vm.new_table();
    vm.table_set(&a, str_value("b"), b.clone());
    vm.table_set(&b, str_value("a"), a.clone());
    vm.pop(2);

    // the cycle keeps both tables alive without any root
    assert!(vm.is_alive(&a));
    assert!(vm.is_alive(&b));
    assert_eq!(vm.live_objects(), baseline + 2);

    let freed = vm.collect_garbage();
    assert_eq!(freed, 2);
    assert!(!vm.is_alive(&a));
    assert_eq!(vm.live_objects(), baseline);
}

#[test]
fn pinned_objects_survive_collection() {
    let vm = Vm::open(64);
    let table = vm.new_table();
    vm.add_ref(&table);
    vm.pop(1);

    vm.collect_garbage();
    assert!(vm.is_alive(&table));
    vm.release(&table);
}

#[test]
fn blob_round_trip() {
    let vm = Vm::open(64);
    let blob = vm.blob_from_bytes(&[1, 2, 3]);
    assert_eq!(vm.blob_bytes(&blob), Some(vec![1, 2, 3]));
    assert!(vm.blob_set_bytes(&blob, &[9, 8]));
    assert_eq!(vm.blob_bytes(&blob), Some(vec![9, 8]));
    vm.pop(1);
}

#[test]
fn closure_serialization_survives_a_new_machine() {
    let vm = Vm::open(64);
    vm.compile("return \"persisted\"", "src").unwrap();
    let mut blob = Vec::new();
    vm.write_closure(-1, &mut |bytes| {
        blob.extend_from_slice(bytes);
        bytes.len()
    })
    .unwrap();
    vm.pop(1);

    let other = Vm::open(64);
    let mut pos = 0;
    other
        .read_closure(&mut |buf: &mut [u8]| {
            let n = (blob.len() - pos).min(buf.len());
            buf[..n].copy_from_slice(&blob[pos..pos + n]);
            pos += n;
            n
        })
        .unwrap();
    other.push(VmValue::Null);
    other.call(1, true, true).unwrap();
    assert_eq!(other.get(-1), Some(str_value("persisted")));
}

#[test]
fn debug_hook_sees_call_line_return() {
    let vm = Vm::open(64);
    let events: Rc<RefCell<Vec<char>>> = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&events);
    vm.set_debug_hook(Some(Rc::new(move |_vm: &Vm, ev: &hazel_vm::DebugEvent| {
        sink.borrow_mut().push(ev.event);
    })));

    vm.compile("return 1", "hooked").unwrap();
    vm.push(VmValue::Null);
    vm.call(1, true, true).unwrap();
    vm.pop(2);

    assert_eq!(*events.borrow(), vec!['c', 'l', 'r']);
}

#[test]
fn stack_info_reports_the_running_function() {
    let vm = Vm::open(64);
    let seen: Rc<RefCell<Option<hazel_vm::StackInfo>>> = Rc::new(RefCell::new(None));
    let sink = Rc::clone(&seen);
    vm.set_debug_hook(Some(Rc::new(move |vm: &Vm, ev: &hazel_vm::DebugEvent| {
        if ev.event == 'l' {
            *sink.borrow_mut() = vm.stack_info(0);
        }
    })));

    vm.compile("return 1", "traced.hzl").unwrap();
    vm.push(VmValue::Null);
    vm.call(1, true, true).unwrap();
    vm.pop(2);

    let info = seen.borrow().clone().expect("no stack info captured");
    assert_eq!(info.func_name, "main");
    assert_eq!(info.source, "traced.hzl");
    assert_eq!(info.line, 1);
}

#[test]
fn error_hook_respects_report_toggle() {
    let vm = Vm::open(64);
    let messages: Rc<RefCell<Vec<String>>> = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&messages);
    vm.set_error_hook(Some(Rc::new(move |msg: &str| {
        sink.borrow_mut().push(msg.to_string());
    })));

    let func: NativeFn = Rc::new(|_: &Vm| NativeFlow::Throw(str_value("first")));
    vm.new_native_closure("thrower", func, 0);
    let thrower = vm.get(-1).unwrap();
    vm.add_ref(&thrower);

    vm.push(VmValue::Null);
    let _ = vm.call(1, true, true);
    vm.pop(1);
    assert_eq!(*messages.borrow(), vec!["first".to_string()]);

    vm.set_report_errors(false);
    vm.push(thrower.clone());
    vm.push(VmValue::Null);
    let _ = vm.call(1, true, true);
    vm.pop(1);
    assert_eq!(messages.borrow().len(), 1);
    assert_eq!(vm.last_error(), str_value("first"));
    vm.release(&thrower);
}

#[test]
fn compile_errors_reach_the_error_hook() {
    let vm = Vm::open(64);
    let messages: Rc<RefCell<Vec<String>>> = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&messages);
    vm.set_error_hook(Some(Rc::new(move |msg: &str| {
        sink.borrow_mut().push(msg.to_string());
    })));

    let err = vm.compile("nonsense here", "bad.hzl").unwrap_err();
    assert!(matches!(err, VmError::Compile { line: 1, .. }));
    let logged = messages.borrow();
    assert_eq!(logged.len(), 1);
    assert!(logged[0].contains("bad.hzl"));
    assert!(logged[0].contains("nonsense"));
}

#[test]
fn class_call_constructs_an_instance() {
    let vm = Vm::open(64);
    let class = vm.new_class("Widget");
    vm.class_new_member(&class, str_value("kind"), str_value("widget"));

    vm.push(VmValue::Null);
    vm.call(1, true, true).unwrap();
    let instance = vm.get(-1).unwrap();
    assert_eq!(vm.instance_class(&instance), Some(class.clone()));
    assert_eq!(
        vm.instance_get(&instance, &str_value("kind")),
        Some(str_value("widget"))
    );

    let copy = vm.clone_instance(&instance).unwrap();
    assert_ne!(copy, instance);
    assert_eq!(vm.instance_class(&copy), Some(class));
}

#[test]
fn bind_env_copies_the_closure() {
    let vm = Vm::open(64);
    vm.compile("return 1", "b").unwrap();
    let closure = vm.get(-1).unwrap();
    let env = vm.new_table();

    let bound = vm.bind_env(&closure, env).unwrap();
    assert_ne!(bound, closure);

    vm.push(VmValue::Null);
    vm.call(1, true, true).unwrap();
    assert_eq!(vm.get(-1), Some(VmValue::Int(1)));
}

#[test]
fn root_and_registry_tables_are_distinct() {
    let vm = Vm::open(64);
    let root = vm.root_table();
    let consts = vm.const_table();
    let registry = vm.registry_table();
    assert_ne!(root, consts);
    assert_ne!(root, registry);

    vm.table_set(&registry, str_value("hidden"), VmValue::Int(1));
    assert_eq!(vm.table_get(&root, &str_value("hidden")), None);
}
