use criterion::{black_box, criterion_group, criterion_main, Criterion};
use hazel_bridge::{HostCallable, HostValue, Script, ScriptVm};
use std::rc::Rc;

fn bench_calls(c: &mut Criterion) {
    let vm = ScriptVm::open();
    let add: HostCallable = Rc::new(|args: &[HostValue]| match (args.get(1), args.get(2)) {
        (Some(HostValue::Int(a)), Some(HostValue::Int(b))) => HostValue::Int(a + b),
        _ => HostValue::Nil,
    });
    let wrapped = vm
        .wrap_callable(&HostValue::Callable(add), false)
        .unwrap();
    let callable = HostValue::Object(wrapped);

    c.bench_function("native_call", |b| {
        b.iter(|| {
            vm.apply_function(
                black_box(&callable),
                &[HostValue::Int(20), HostValue::Int(22)],
            )
            .unwrap()
        })
    });
}

fn bench_wrapping(c: &mut Criterion) {
    let vm = ScriptVm::open();
    let table = vm.create_table();
    vm.root_table()
        .set_slot(&HostValue::str("t"), &HostValue::Object(table))
        .unwrap();

    c.bench_function("wrap_existing_object", |b| {
        b.iter(|| {
            vm.root_table()
                .get_slot(black_box(&HostValue::str("t")))
                .unwrap()
        })
    });

    c.bench_function("create_and_drop_table", |b| {
        b.iter(|| black_box(vm.create_table()))
    });
}

fn bench_conversion(c: &mut Criterion) {
    let vm = ScriptVm::open();
    let payload = HostValue::Map(vec![
        (HostValue::str("name"), HostValue::str("payload")),
        (
            HostValue::str("values"),
            HostValue::IntArray((0..64).collect()),
        ),
    ]);

    c.bench_function("convert_composite", |b| {
        b.iter(|| vm.convert(black_box(&payload), false).unwrap())
    });
}

fn bench_scripts(c: &mut Criterion) {
    let script = Script::compile("return 42", "bench.hzl").unwrap();

    c.bench_function("compile_script", |b| {
        b.iter(|| Script::compile(black_box("return 42"), "bench.hzl").unwrap())
    });

    c.bench_function("import_bytecode", |b| {
        let vm = ScriptVm::open();
        b.iter(|| vm.import(black_box(&script)).unwrap())
    });
}

criterion_group!(
    benches,
    bench_calls,
    bench_wrapping,
    bench_conversion,
    bench_scripts
);
criterion_main!(benches);
