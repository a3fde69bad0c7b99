use criterion::{black_box, criterion_group, criterion_main, Criterion};
use mi_core::breakpoint::attributes::{format_location, CONDITION, FILE_NAME, FUNCTION, IGNORE_COUNT, LINE_NUMBER};
use mi_core::breakpoint::BreakpointSpec;
use mi_core::{Attributes, ContextFactory, GdbState, MiCommand, SessionId};

fn attributes() -> Attributes {
    Attributes::breakpoint()
        .with(FILE_NAME, "src/motor control.c")
        .with(LINE_NUMBER, 218_u32)
        .with(FUNCTION, "step_motor(int, int)")
        .with(CONDITION, "speed > 1200")
        .with(IGNORE_COUNT, 3_u32)
}

fn bench_attribute_validation(c: &mut Criterion) {
    let attributes = attributes();
    c.bench_function("attribute_validation", |b| {
        b.iter(|| {
            let _ = black_box(BreakpointSpec::from_attributes(black_box(&attributes), true));
        })
    });
    c.bench_function("location_formatting", |b| {
        b.iter(|| {
            let _ = black_box(format_location(black_box(&attributes)));
        })
    });
}

fn bench_command_rendering(c: &mut Criterion) {
    let target = ContextFactory::new(SessionId::new("bench")).root_container("0");
    let command = MiCommand::BreakInsert {
        target,
        temporary: true,
        hardware: false,
        condition: "speed > 1200".to_string(),
        ignore_count: 3,
        location: "\"src/motor control.c\":218".to_string(),
        thread_id: 2,
    };
    c.bench_function("command_rendering", |b| {
        b.iter(|| {
            let _ = black_box(command.to_string());
        })
    });
}

fn bench_simulated_insert(c: &mut Criterion) {
    let target = ContextFactory::new(SessionId::new("bench")).root_container("0");
    let insert = MiCommand::BreakInsert {
        target: target.clone(),
        temporary: false,
        hardware: false,
        condition: String::new(),
        ignore_count: 0,
        location: "main.c:42".to_string(),
        thread_id: 0,
    };
    c.bench_function("simulated_insert_and_list", |b| {
        b.iter(|| {
            let mut gdb = GdbState::new();
            for _ in 0..32 {
                let _ = black_box(gdb.execute(&insert));
            }
            let _ = black_box(gdb.execute(&MiCommand::BreakList { target: target.clone() }));
        })
    });
}

criterion_group!(benches, bench_attribute_validation, bench_command_rendering, bench_simulated_insert);
criterion_main!(benches);
