//! Pulse-plan throughput: how fast the ramp recurrence can be driven.

use std::sync::Arc;

use criterion::{Criterion, criterion_group, criterion_main};
use std::hint::black_box;

use terra_common::config::Speed;
use terra_hal::backend::Backend;
use terra_hal::sim::SimBackend;
use terra_hal::stepper::StepperMotor;
use terra_motion::{PulseEngine, SpeedMode};

fn engine() -> PulseEngine {
    let backend = SimBackend::new();
    let motor = Arc::new(StepperMotor::new(
        backend.digital_output("step"),
        backend.digital_output("dir"),
        backend.digital_output("enable"),
        None,
    ));
    let mut engine = PulseEngine::new(motor, 200, 16);
    engine.set_profile(Speed {
        rpm: 200.0,
        acceleration: 1000.0,
        deceleration: 1000.0,
    });
    engine
}

fn bench_linear_plan(c: &mut Criterion) {
    let mut engine = engine();
    c.bench_function("linear_16000_step_plan", |b| {
        b.iter(|| {
            engine.start_move(black_box(16_000), 0);
            let mut total = 0u64;
            loop {
                let interval = engine.tick();
                if interval == 0 {
                    break;
                }
                total += interval;
            }
            black_box(total)
        })
    });
}

fn bench_constant_plan(c: &mut Criterion) {
    let mut engine = engine();
    engine.set_mode(SpeedMode::Constant);
    c.bench_function("constant_16000_step_plan", |b| {
        b.iter(|| {
            engine.start_move(black_box(16_000), 0);
            let mut total = 0u64;
            loop {
                let interval = engine.tick();
                if interval == 0 {
                    break;
                }
                total += interval;
            }
            black_box(total)
        })
    });
}

criterion_group!(benches, bench_linear_plan, bench_constant_plan);
criterion_main!(benches);
