//! End-to-end coverage of the bridge: identity, conversion, the call
//! and wake protocol, native callables and their control-flow markers,
//! script artifacts, threads, and garbage collection.

use hazel_bridge::{
    BridgeError, GeneratorState, HostCallable, HostValue, RefKind, RunState, Script, ScriptVm,
    SpecialReturn, VmContext,
};
use std::cell::RefCell;
use std::rc::Rc;

fn callable(f: impl Fn(&[HostValue]) -> HostValue + 'static) -> HostValue {
    HostValue::Callable(Rc::new(f) as HostCallable)
}

// ============================================================================
// Identity and wrappers
// ============================================================================

#[test]
fn wrappers_are_unique_per_object() {
    let vm = ScriptVm::open();
    let table = vm.create_table();
    vm.root_table()
        .set_slot(&HostValue::str("t"), &HostValue::Object(table.clone()))
        .unwrap();

    // fetching the same table back yields the same wrapper allocation
    let fetched = vm.root_table().get_slot(&HostValue::str("t")).unwrap();
    let fetched = fetched.as_object().unwrap();
    assert_eq!(*fetched, table);
}

#[test]
fn wrapper_holds_exactly_one_vm_reference() {
    let vm = ScriptVm::open();
    let table = vm.create_table();
    let before = table.ref_count();
    let clone_a = table.clone();
    let clone_b = table.clone();
    // host-side clones share the wrapper; the VM sees one reference
    assert_eq!(table.ref_count(), before);
    drop(clone_a);
    drop(clone_b);
    assert_eq!(table.ref_count(), before);
}

#[test]
fn dropping_the_last_wrapper_releases_the_object() {
    let vm = ScriptVm::open();
    let live_before = vm.live_objects();
    let table = vm.create_table();
    assert_eq!(vm.live_objects(), live_before + 1);
    drop(table);
    assert_eq!(vm.live_objects(), live_before);
}

#[test]
fn foreign_wrappers_are_rejected() {
    let a = ScriptVm::open();
    let b = ScriptVm::open();
    let table = a.create_table();
    let err = b
        .root_table()
        .set_slot(&HostValue::str("x"), &HostValue::Object(table))
        .unwrap_err();
    assert!(matches!(err, BridgeError::ForeignObject));
}

// ============================================================================
// Conversion
// ============================================================================

#[test]
fn primitives_round_trip_through_an_echo_callable() {
    let vm = ScriptVm::open();
    let echo = callable(|args| args.get(1).cloned().unwrap_or(HostValue::Nil));
    for v in [
        HostValue::Nil,
        HostValue::Bool(false),
        HostValue::Int(i64::MIN),
        HostValue::Float(-0.0),
        HostValue::str("héllo"),
    ] {
        let out = vm.apply_function(&echo, &[v.clone()]).unwrap();
        assert_eq!(out, v);
    }
}

#[test]
fn boxed_values_round_trip_unchanged() {
    let vm = ScriptVm::open();
    let boxed = vm.box_value(&HostValue::Float(6.25));
    assert_eq!(boxed.kind(), RefKind::UserData);
    assert_eq!(
        boxed.host_value().unwrap(),
        Some(HostValue::Float(6.25))
    );
}

#[test]
fn interning_is_stable_until_the_box_dies() {
    let vm = ScriptVm::open();
    let a = vm.intern_value(&HostValue::Int(7)).unwrap();
    let b = vm.intern_value(&HostValue::Int(7)).unwrap();
    assert_eq!(a, b);
    drop(b);
    drop(a);
    // the old box is gone, so an equal value gets a fresh box
    let c = vm.intern_value(&HostValue::Int(7)).unwrap();
    assert!(c.is_valid());
}

#[test]
fn convert_builds_nested_containers() {
    let vm = ScriptVm::open();
    let value = HostValue::Map(vec![
        (HostValue::str("name"), HostValue::str("probe")),
        (
            HostValue::str("samples"),
            HostValue::FloatArray(vec![0.5, 1.5]),
        ),
    ]);
    let converted = vm.convert(&value, false).unwrap();
    let table = converted.as_object().unwrap();
    let samples = table.get_slot(&HostValue::str("samples")).unwrap();
    let samples = samples.as_object().unwrap();
    assert_eq!(samples.kind(), RefKind::Array);
    assert_eq!(samples.get_index(0).unwrap(), HostValue::Float(0.5));
}

#[test]
fn convert_without_wrapping_fails_fast_on_opaques() {
    let vm = ScriptVm::open();
    let resource: Rc<dyn std::any::Any> = Rc::new("native resource");
    let value = HostValue::Map(vec![(
        HostValue::str("handle"),
        HostValue::Opaque(Rc::clone(&resource)),
    )]);
    assert!(matches!(
        vm.convert(&value, false),
        Err(BridgeError::Unsupported(_))
    ));
    // with wrapping the opaque is boxed into the table; reading the slot
    // unboxes it back to the same host allocation
    let converted = vm.convert(&value, true).unwrap();
    let table = converted.as_object().unwrap();
    match table.get_slot(&HostValue::str("handle")).unwrap() {
        HostValue::Opaque(back) => assert!(Rc::ptr_eq(&back, &resource)),
        other => panic!("unexpected slot value: {other:?}"),
    }
}

#[test]
fn failed_conversion_leaves_the_stack_balanced() {
    let vm = ScriptVm::open();
    let depth = vm.stack_depth();
    let list = HostValue::List(vec![HostValue::Opaque(Rc::new(7u32))]);
    assert!(vm.convert(&list, false).is_err());
    assert_eq!(vm.stack_depth(), depth);
    let map = HostValue::Map(vec![(
        HostValue::str("k"),
        HostValue::Opaque(Rc::new(7u32)),
    )]);
    assert!(vm.convert(&map, false).is_err());
    assert_eq!(vm.stack_depth(), depth);
}

// ============================================================================
// Scripts
// ============================================================================

#[test]
fn empty_source_imports_as_nil() {
    let vm = ScriptVm::open();
    assert!(vm.import_source("", "empty.hzl").unwrap().is_nil());
}

#[test]
fn import_returns_the_script_result() {
    let vm = ScriptVm::open();
    let out = vm.import_source("return 3.5", "num.hzl").unwrap();
    assert_eq!(out, HostValue::Float(3.5));
}

#[test]
fn one_script_loads_into_many_machines() {
    let script = Script::compile("return \"shared\"", "shared.hzl").unwrap();
    let a = ScriptVm::open();
    let b = ScriptVm::open();
    assert_eq!(a.import(&script).unwrap(), HostValue::str("shared"));
    assert_eq!(b.import(&script).unwrap(), HostValue::str("shared"));
}

#[test]
fn corrupted_bytecode_is_rejected() {
    let script = Script::compile("return 1", "c.hzl").unwrap();
    let mut bytes = script.bytecode().to_vec();
    let last = bytes.len() - 1;
    bytes[last] ^= 0xff;
    let tampered = Script::from_bytecode("c.hzl", bytes);
    let vm = ScriptVm::open();
    assert!(matches!(
        vm.load_script(&tampered),
        Err(BridgeError::InvalidBytecode(_))
    ));
}

#[test]
fn compile_errors_report_their_position() {
    let err = Script::compile("\nreturn $", "broken.hzl").unwrap_err();
    match err {
        BridgeError::Compile { line, source_name, .. } => {
            assert_eq!(line, 2);
            assert_eq!(source_name, "broken.hzl");
        }
        other => panic!("unexpected error: {other}"),
    }
}

// ============================================================================
// Calls and stack balance
// ============================================================================

#[test]
fn successful_calls_leave_the_stack_balanced() {
    let vm = ScriptVm::open();
    let add = callable(|args| match (args.get(1), args.get(2)) {
        (Some(HostValue::Int(a)), Some(HostValue::Int(b))) => HostValue::Int(a + b),
        _ => HostValue::Nil,
    });
    let depth = vm.stack_depth();
    for _ in 0..10 {
        let out = vm
            .apply_function(&add, &[HostValue::Int(20), HostValue::Int(22)])
            .unwrap();
        assert_eq!(out, HostValue::Int(42));
    }
    assert_eq!(vm.stack_depth(), depth);
}

#[test]
fn failed_calls_leave_the_stack_balanced() {
    let vm = ScriptVm::open();
    vm.set_error_handler(Some(Rc::new(|_| {})));
    let depth = vm.stack_depth();
    // calling a non-callable raises
    let err = vm.apply_function(&HostValue::Int(5), &[]).unwrap_err();
    assert!(matches!(err, BridgeError::Script(_)));
    assert_eq!(vm.stack_depth(), depth);
}

#[test]
fn call_function_passes_the_receiver() {
    let vm = ScriptVm::open();
    let receiver = vm.create_table();
    receiver
        .set_slot(&HostValue::str("marker"), &HostValue::Int(9))
        .unwrap();
    let read_marker = callable(|args| {
        let this = args[0].as_object().expect("receiver should be a table");
        this.get_slot(&HostValue::str("marker")).unwrap()
    });
    let out = vm
        .call_function(&read_marker, &HostValue::Object(receiver), &[])
        .unwrap();
    assert_eq!(out, HostValue::Int(9));
}

#[test]
fn throw_marker_becomes_a_script_error() {
    let vm = ScriptVm::open();
    vm.set_error_handler(Some(Rc::new(|_| {})));
    let thrower = callable(|_| HostValue::throw(HostValue::str("boom")));
    let err = vm.apply_function(&thrower, &[]).unwrap_err();
    match err {
        BridgeError::Script(msg) => assert_eq!(msg, "boom"),
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(vm.get_last_error(), HostValue::str("boom"));
    vm.reset_last_error();
    assert!(vm.get_last_error().is_nil());
}

#[test]
fn catching_calls_surface_the_exception_value() {
    let vm = ScriptVm::open();
    vm.set_handle_caught_errors(false);
    let thrower = callable(|_| HostValue::throw(HostValue::Int(404)));
    let depth = vm.stack_depth();
    let out = vm.apply_function_catch(&thrower, &[]).unwrap();
    match out {
        HostValue::Special(s) => match *s {
            SpecialReturn::Throw { exception } => assert_eq!(exception, HostValue::Int(404)),
            other_marker => panic!("unexpected marker: {:?}", HostValue::Special(Box::new(other_marker))),
        },
        other => panic!("expected a throw marker, got {other:?}"),
    }
    assert_eq!(vm.stack_depth(), depth);
}

#[test]
fn tail_call_yields_the_second_callables_result() {
    let vm = ScriptVm::open();
    let double = vm
        .wrap_callable(
            &callable(|args| match args.get(1) {
                Some(HostValue::Int(n)) => HostValue::Int(n * 2),
                _ => HostValue::Nil,
            }),
            false,
        )
        .unwrap();
    let forward = callable(move |args| {
        let this = args[0].clone();
        let n = args[1].clone();
        HostValue::tail_call(HostValue::Object(double.clone()), vec![this, n])
    });
    let depth = vm.stack_depth();
    let out = vm.apply_function(&forward, &[HostValue::Int(21)]).unwrap();
    assert_eq!(out, HostValue::Int(42));
    assert_eq!(vm.stack_depth(), depth);
}

#[test]
fn varargs_callables_receive_context_this_and_packed_args() {
    let vm = ScriptVm::open();
    let seen: Rc<RefCell<Option<(bool, HostValue)>>> = Rc::new(RefCell::new(None));
    let seen_in = Rc::clone(&seen);
    let wrapped = vm
        .wrap_callable(
            &callable(move |args| {
                assert_eq!(args.len(), 3);
                let from_main = matches!(args[0], HostValue::Context(VmContext::Instance(_)));
                *seen_in.borrow_mut() = Some((from_main, args[2].clone()));
                HostValue::Nil
            }),
            true,
        )
        .unwrap();
    vm.apply_function(
        &HostValue::Object(wrapped),
        &[HostValue::Int(1), HostValue::Int(2), HostValue::Int(3)],
    )
    .unwrap();
    let (from_main, packed) = seen.borrow().clone().unwrap();
    assert!(from_main);
    assert_eq!(
        packed,
        HostValue::List(vec![
            HostValue::Int(1),
            HostValue::Int(2),
            HostValue::Int(3)
        ])
    );
}

// ============================================================================
// Suspension and wake-up
// ============================================================================

#[test]
fn suspending_call_parks_then_wake_completes() {
    let vm = ScriptVm::open();
    let sleeper = callable(|_| HostValue::suspend(HostValue::str("parked")));
    let depth = vm.stack_depth();

    let out = vm.apply_function(&sleeper, &[]).unwrap();
    assert_eq!(out, HostValue::str("parked"));
    assert_eq!(vm.state(), RunState::Suspended);
    // the suspended call keeps its callable parked on the stack
    assert_eq!(vm.stack_depth(), depth + 1);

    let woken = vm.wake_up(&HostValue::Int(5)).unwrap();
    assert_eq!(woken, HostValue::Int(5));
    assert_eq!(vm.state(), RunState::Idle);
    assert_eq!(vm.stack_depth(), depth);
}

#[test]
fn wake_up_throw_raises_at_the_suspension_point() {
    let vm = ScriptVm::open();
    vm.set_error_handler(Some(Rc::new(|_| {})));
    let sleeper = callable(|_| HostValue::suspend(HostValue::Nil));
    let depth = vm.stack_depth();
    vm.apply_function(&sleeper, &[]).unwrap();
    assert_eq!(vm.state(), RunState::Suspended);

    let err = vm.wake_up_throw(&HostValue::str("cancelled")).unwrap_err();
    match err {
        BridgeError::Script(msg) => assert_eq!(msg, "cancelled"),
        other => panic!("unexpected error: {other}"),
    }
    assert_ne!(vm.state(), RunState::Suspended);
    assert_eq!(vm.stack_depth(), depth);
}

#[test]
fn waking_an_idle_machine_fails_cleanly() {
    let vm = ScriptVm::open();
    vm.set_error_handler(Some(Rc::new(|_| {})));
    let depth = vm.stack_depth();
    assert!(vm.wake_up(&HostValue::Nil).is_err());
    assert_eq!(vm.stack_depth(), depth);
}

#[test]
fn script_suspend_statement_parks_the_machine() {
    let vm = ScriptVm::open();
    let out = vm.import_source("suspend \"early\"\nreturn \"late\"", "s.hzl").unwrap();
    assert_eq!(out, HostValue::str("early"));
    assert_eq!(vm.state(), RunState::Suspended);
    let rest = vm.wake_up(&HostValue::Nil).unwrap();
    assert_eq!(rest, HostValue::str("late"));
    assert_eq!(vm.state(), RunState::Idle);
}

// ============================================================================
// Generators
// ============================================================================

#[test]
fn generator_scripts_yield_then_die() {
    let vm = ScriptVm::open();
    let out = vm
        .import_source("yield 1\nyield 2\nreturn 3", "gen.hzl")
        .unwrap();
    let gen = out.as_object().expect("generator object").clone();
    assert_eq!(gen.kind(), RefKind::Generator);
    assert_eq!(gen.generator_state().unwrap(), GeneratorState::Suspended);

    assert_eq!(vm.resume_generator(&gen).unwrap(), HostValue::Int(1));
    assert_eq!(vm.resume_generator(&gen).unwrap(), HostValue::Int(2));
    assert_eq!(vm.resume_generator(&gen).unwrap(), HostValue::Int(3));
    assert_eq!(gen.generator_state().unwrap(), GeneratorState::Dead);
}

#[test]
fn resuming_a_dead_generator_is_a_script_error() {
    let vm = ScriptVm::open();
    vm.set_error_handler(Some(Rc::new(|_| {})));
    let out = vm.import_source("yield 1", "g.hzl").unwrap();
    let gen = out.as_object().unwrap().clone();
    vm.resume_generator(&gen).unwrap();
    vm.resume_generator(&gen).unwrap();
    assert!(matches!(
        vm.resume_generator(&gen),
        Err(BridgeError::Script(_))
    ));
}

// ============================================================================
// Threads
// ============================================================================

#[test]
fn thread_suspension_leaves_the_main_context_idle() {
    let vm = ScriptVm::open();
    let thread = vm.create_thread();
    assert_eq!(thread.kind(), RefKind::Thread);

    let sleeper = callable(|args| {
        assert!(matches!(args[0], HostValue::Context(VmContext::Thread(_))));
        HostValue::suspend(HostValue::str("thread parked"))
    });
    let wrapped = vm.wrap_callable(&sleeper, true).unwrap();

    let out = thread
        .thread_call(&HostValue::Object(wrapped), &HostValue::Nil, &[])
        .unwrap();
    assert_eq!(out, HostValue::str("thread parked"));
    assert_eq!(thread.thread_state().unwrap(), RunState::Suspended);
    assert_eq!(vm.state(), RunState::Idle);

    let woken = thread.thread_wake_up(&HostValue::Int(12)).unwrap();
    assert_eq!(woken, HostValue::Int(12));
    assert_eq!(thread.thread_state().unwrap(), RunState::Idle);
}

// ============================================================================
// Tables, arrays, blobs
// ============================================================================

#[test]
fn table_slots_and_iteration() {
    let vm = ScriptVm::open();
    let table = vm.create_table();
    table.set_slot(&HostValue::str("a"), &HostValue::Int(1)).unwrap();
    table.set_slot(&HostValue::str("b"), &HostValue::Int(2)).unwrap();
    assert_eq!(table.len().unwrap(), 2);
    assert!(table.has_slot(&HostValue::str("a")).unwrap());

    let entries: Vec<_> = table.iterate().unwrap().collect();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].0, HostValue::str("a"));

    let removed = table.delete_slot(&HostValue::str("a")).unwrap();
    assert_eq!(removed, HostValue::Int(1));
    assert_eq!(table.len().unwrap(), 1);
}

#[test]
fn delegate_chain_serves_missing_slots() {
    let vm = ScriptVm::open();
    let base = vm.create_table();
    base.set_slot(&HostValue::str("inherited"), &HostValue::Int(7)).unwrap();
    let derived = vm.create_table();
    derived.set_delegate(Some(&base)).unwrap();

    assert_eq!(
        derived.get_slot(&HostValue::str("inherited")).unwrap(),
        HostValue::Int(7)
    );
    assert!(derived
        .raw_get_slot(&HostValue::str("inherited"))
        .unwrap()
        .is_nil());
    assert_eq!(derived.get_delegate().unwrap().unwrap(), base);
}

#[test]
fn array_operations_and_iteration() {
    let vm = ScriptVm::open();
    let array = vm.create_array(0);
    for n in [10, 20, 30] {
        array.append(&HostValue::Int(n)).unwrap();
    }
    array.insert(1, &HostValue::Int(15)).unwrap();
    assert_eq!(array.get_index(1).unwrap(), HostValue::Int(15));
    array.remove(1).unwrap();
    array.reverse().unwrap();
    assert_eq!(array.get_index(0).unwrap(), HostValue::Int(30));
    assert_eq!(array.pop().unwrap(), HostValue::Int(10));
    assert_eq!(array.len().unwrap(), 2);

    let items: Vec<_> = array.iterate().unwrap().collect();
    assert_eq!(items[0], (HostValue::Int(0), HostValue::Int(30)));
}

#[test]
fn blobs_hold_mutable_bytes() {
    let vm = ScriptVm::open();
    let blob = vm.create_blob(b"abc");
    assert_eq!(blob.blob_bytes().unwrap(), b"abc");
    blob.blob_set_bytes(b"longer payload").unwrap();
    assert_eq!(blob.blob_bytes().unwrap(), b"longer payload");
    // an ordinary box is not a blob
    let boxed = vm.box_value(&HostValue::Int(1));
    assert!(boxed.blob_bytes().is_err());
}

#[test]
fn bulk_wrapped_callables_honor_the_varargs_shape() {
    let vm = ScriptVm::open();
    let table = vm.create_table();
    let seen = Rc::new(RefCell::new(0usize));
    let seen_in = Rc::clone(&seen);
    table
        .wrap_callables(
            &[(
                "spread",
                callable(move |args| {
                    assert!(matches!(args[0], HostValue::Context(_)));
                    match &args[2] {
                        HostValue::List(items) => *seen_in.borrow_mut() = items.len(),
                        other => panic!("unexpected args shape: {other:?}"),
                    }
                    HostValue::Nil
                }),
            )],
            true,
        )
        .unwrap();

    let spread = table.get_slot(&HostValue::str("spread")).unwrap();
    vm.apply_function(&spread, &[HostValue::Int(1), HostValue::Int(2)])
        .unwrap();
    assert_eq!(*seen.borrow(), 2);
}

#[test]
fn root_table_can_be_replaced() {
    let vm = ScriptVm::open();
    let fresh = vm.create_table();
    vm.set_root_table(&fresh).unwrap();
    assert_eq!(vm.root_table(), fresh);
    // only tables may become the root
    let array = vm.create_array(0);
    assert!(vm.set_root_table(&array).is_err());
    assert_eq!(vm.root_table(), fresh);
}

#[test]
fn raw_stack_ops_push_read_and_remove() {
    let vm = ScriptVm::open();
    let depth = vm.stack_depth();
    vm.push_stack(&HostValue::Int(1)).unwrap();
    vm.push_stack(&HostValue::str("two")).unwrap();
    vm.push_stack(&HostValue::Int(3)).unwrap();
    assert_eq!(vm.stack_depth(), depth + 3);
    assert_eq!(vm.get_stack(-1), HostValue::Int(3));
    assert_eq!(vm.get_stack(-3), HostValue::Int(1));

    assert!(vm.remove_stack(-2));
    assert_eq!(vm.get_stack(-2), HostValue::Int(1));
    vm.pop_stack(2);
    assert_eq!(vm.stack_depth(), depth);
    // out-of-range slots read as nil
    assert!(vm.get_stack(99).is_nil());
    // composites are refused at the raw boundary
    assert!(vm.push_stack(&HostValue::List(vec![])).is_err());
}

// ============================================================================
// Garbage collection
// ============================================================================

#[test]
fn cycles_are_collected_once_unpinned() {
    let vm = ScriptVm::open();
    let a = vm.create_table();
    let b = vm.create_table();
    a.set_slot(&HostValue::str("other"), &HostValue::Object(b.clone())).unwrap();
    b.set_slot(&HostValue::str("other"), &HostValue::Object(a.clone())).unwrap();
    assert_eq!(vm.collect_garbage(), 0);

    drop(a);
    drop(b);
    // the cycle keeps both alive by refcount alone
    assert_eq!(vm.collect_garbage(), 2);
}

#[test]
fn resurrection_pins_unreachable_objects() {
    let vm = ScriptVm::open();
    let a = vm.create_table();
    let b = vm.create_table();
    a.set_slot(&HostValue::str("other"), &HostValue::Object(b.clone())).unwrap();
    b.set_slot(&HostValue::str("other"), &HostValue::Object(a.clone())).unwrap();
    drop(a);
    drop(b);

    let saved = vm.resurrect_unreachable();
    assert_eq!(saved.len(), 2);
    // wrapped again, the tables are live roots and survive collection
    assert_eq!(vm.collect_garbage(), 0);
    drop(saved);
    assert_eq!(vm.collect_garbage(), 2);
}

#[test]
fn weak_references_die_with_their_target() {
    let vm = ScriptVm::open();
    let table = vm.create_table();
    let weak = table.weak_ref().unwrap();
    assert_eq!(weak.kind(), RefKind::WeakRef);
    assert_eq!(
        weak.weakref_target().unwrap(),
        HostValue::Object(table.clone())
    );

    drop(table);
    assert!(weak.weakref_target().unwrap().is_nil());
}

// ============================================================================
// Debugging
// ============================================================================

#[test]
fn debug_events_fire_in_call_line_return_order() {
    let vm = ScriptVm::open();
    let events: Rc<RefCell<Vec<(char, i64)>>> = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&events);
    vm.enable_debug_info(true);
    vm.set_debug_handler(Some(Rc::new(move |ev| {
        assert!(matches!(ev.context, VmContext::Instance(_)));
        let tag = match ev.kind {
            hazel_bridge::DebugEventKind::Call => 'c',
            hazel_bridge::DebugEventKind::Line => 'l',
            hazel_bridge::DebugEventKind::Return => 'r',
        };
        sink.borrow_mut().push((tag, ev.line));
    })));

    vm.import_source("return 1", "dbg.hzl").unwrap();
    let seen = events.borrow().clone();
    assert_eq!(seen.first().map(|e| e.0), Some('c'));
    assert_eq!(seen.last().map(|e| e.0), Some('r'));
    assert!(seen.iter().any(|e| e.0 == 'l' && e.1 == 1));
}

#[test]
fn stack_frames_surface_during_script_calls() {
    let vm = ScriptVm::open();
    let frames: Rc<RefCell<Vec<(String, String, Option<RefKind>)>>> =
        Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&frames);
    vm.set_debug_handler(Some(Rc::new(move |ev| {
        let VmContext::Instance(probe) = &ev.context else {
            panic!("event outside the main context");
        };
        for frame in probe.call_stack() {
            sink.borrow_mut()
                .push((frame.func_name, frame.source, frame.func.map(|f| f.kind())));
        }
    })));
    vm.import_source("return 1", "traced.hzl").unwrap();
    // outside any call the stack snapshot is empty again
    assert!(vm.call_stack().is_empty());

    let seen = frames.borrow();
    assert!(!seen.is_empty());
    let (name, source, kind) = &seen[0];
    assert_eq!(name, "main");
    assert_eq!(source, "traced.hzl");
    assert_eq!(*kind, Some(RefKind::Function));
}
