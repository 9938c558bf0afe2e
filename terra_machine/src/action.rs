//! Transition actions and task bodies.
//!
//! Every long-running body is a sequence of checkpoints: between each
//! mechanical step it re-reads the fault flag and returns early when
//! it is up, leaving partial progress for the fault path to clean up.
//! Cancellation never unwinds; the posted fault event moves the state
//! machine on.

use tracing::{debug, info, warn};

use terra_common::consts::{comm, output};
use terra_common::time::{epoch_secs, sleep_for_ms};
use terra_common::types::{AxisId, Coordinate, Liquid, Phase, SpeedBand, TaskKind};
use terra_hal::gpio::Level;
use terra_motion::MotionError;

use crate::context::Context;
use crate::event::Event;

/// Dwell before and after valve changes and between task stages, ms.
const TASK_DWELL_MS: u64 = 3_000;

/// Short settle dwell between tending stages, ms.
const STAGE_DWELL_MS: u64 = 1_000;

/// Granularity of interruptible dwells, ms.
const DWELL_SLICE_MS: u64 = 100;

/// True when the running body must abandon its sequence.
pub fn interrupted(ctx: &Context) -> bool {
    ctx.state.fault() || !ctx.state.running()
}

/// Raise the fault flag and queue the trigger event.
pub fn raise_fault(ctx: &Context) {
    ctx.state.set_fault(true);
    ctx.sink.post(Event::FaultTrigger);
}

/// Sleep `ms`, waking early on fault. Returns false when interrupted.
fn dwell(ctx: &Context, ms: u64) -> bool {
    let mut left = ms;
    while left > 0 {
        if interrupted(ctx) {
            return false;
        }
        let slice = left.min(DWELL_SLICE_MS);
        sleep_for_ms(slice);
        left -= slice;
    }
    !interrupted(ctx)
}

/// Drive a direct output; a failed write becomes a fault signal.
fn write_output(ctx: &Context, id: &str, level: Level) -> bool {
    match ctx.devices.output(id).and_then(|device| device.write(level)) {
        Ok(()) => true,
        Err(error) => {
            debug!(id, %error, "output write failed");
            raise_fault(ctx);
            false
        }
    }
}

/// Drive a shift-register status output; a failed write becomes a
/// fault signal.
fn write_comm(ctx: &Context, id: &str, level: Level) -> bool {
    match ctx.devices.shift_register().write(id, level) {
        Ok(()) => true,
        Err(error) => {
            debug!(id, %error, "status write failed");
            raise_fault(ctx);
            false
        }
    }
}

/// Fold a motion result into the checkpoint protocol.
fn motion_ok(ctx: &Context, result: Result<(), MotionError>) -> bool {
    match result {
        Ok(()) => true,
        Err(MotionError::Cancelled) => false,
        Err(error) => {
            warn!(%error, "motion command failed");
            raise_fault(ctx);
            false
        }
    }
}

/// Stop the finger, drop the motors and every status output, and
/// clear the task flags.
pub fn reset_task_state(ctx: &Context) {
    let _ = ctx.movement.stop_finger();
    ctx.movement.disable_motors();
    if let Err(error) = ctx.devices.shift_register().write_all(Level::Low) {
        debug!(%error, "status write_all failed");
    }
    ctx.state.reset_ui();
}

/// Raise every task-ready flag and its status output.
pub fn reset_task_ready(ctx: &Context) {
    write_comm(ctx, comm::SPRAYING_READY, Level::High);
    write_comm(ctx, comm::TENDING_READY, Level::High);
    ctx.state.set_task_ready(TaskKind::Spraying, true);
    ctx.state.set_task_ready(TaskKind::Tending, true);
    ctx.state.set_task_ready(TaskKind::Cleaning, true);
}

/// Teardown on the way to the terminated state.
pub fn stop(ctx: &Context) {
    info!("stopping machine");
    ctx.movement.stop();
    let _ = ctx.movement.stop_finger();
    ctx.movement.disable_motors();
    if let Err(error) = ctx.devices.shift_register().write_all(Level::Low) {
        debug!(%error, "status write_all failed");
    }
    ctx.state.set_running(false);
}

/// Entry into fault: freeze the gantry and drop the status outputs.
pub fn fault(ctx: &Context) {
    info!("entering fault mode");
    ctx.movement.stop();
    let _ = ctx.movement.stop_finger();
    ctx.movement.disable_motors();
    if let Err(error) = ctx.devices.shift_register().write_all(Level::Low) {
        debug!(%error, "status write_all failed");
    }
    ctx.state.set_manual_mode(false);
}

/// Leave fault after the operator reset; `no_task` re-homes on entry.
pub fn restart(ctx: &Context) {
    info!("restarting after fault");
    ctx.state.set_homing(false);
    ctx.state.set_fault(false);
}

/// Entry into manual jog mode inside fault.
pub fn fault_manual_enter(ctx: &Context) {
    info!("entering fault manual mode");
    ctx.state.set_manual_mode(true);
}

/// Exit from manual jog mode.
pub fn fault_manual_exit(ctx: &Context) {
    info!("exiting fault manual mode");
    ctx.state.set_manual_mode(false);
}

/// Manual jog by the configured distance, only available in manual
/// mode. `forward` selects the direction.
pub fn fault_manual_jog(ctx: &Context, axis: AxisId, forward: bool) {
    if !ctx.state.manual_mode() {
        return;
    }
    let jog = &ctx.config.mechanisms.fault.manual;
    let distance = match axis {
        AxisId::X => jog.x,
        AxisId::Y => jog.y,
        AxisId::Z => jog.z,
    };
    let distance = if forward { distance } else { -distance };
    if ctx.movement.enable_motors().is_err() {
        return;
    }
    ctx.movement.set_profile(Phase::FaultManual, SpeedBand::Normal);
    let (dx, dy, dz) = match axis {
        AxisId::X => (distance, 0.0, 0.0),
        AxisId::Y => (0.0, distance, 0.0),
        AxisId::Z => (0.0, 0.0, distance),
    };
    if let Err(error) = ctx
        .movement
        .jog(dx, dy, dz, terra_common::types::LengthUnit::Mm)
    {
        warn!(%error, "manual jog failed");
    }
}

/// Entry work for `no_task`: clean flags, re-home, raise the ready
/// outputs. Initialises the liquid exchange schedule on first entry.
pub fn no_task_entry(ctx: &Context) {
    ctx.state.set_fault(false);
    ctx.state.set_manual_mode(false);

    write_comm(ctx, comm::SPRAYING_READY, Level::Low);
    write_comm(ctx, comm::TENDING_READY, Level::Low);
    ctx.state.set_task_ready(TaskKind::Spraying, false);
    ctx.state.set_task_ready(TaskKind::Tending, false);
    ctx.state.set_task_ready(TaskKind::Cleaning, false);
    ctx.state.set_task_complete(TaskKind::Spraying, false);
    ctx.state.set_task_complete(TaskKind::Tending, false);
    ctx.state.set_task_complete(TaskKind::Cleaning, false);

    if ctx.movement.enable_motors().is_err() {
        raise_fault(ctx);
        return;
    }
    info!("homing before accepting tasks");
    if !motion_ok(ctx, ctx.movement.homing()) {
        return;
    }

    reset_task_ready(ctx);

    for liquid in [Liquid::Water, Liquid::Disinfectant] {
        if ctx.state.refill(liquid).next_executed == 0 {
            let period = match liquid {
                Liquid::Water => ctx.config.refilling.water.period,
                Liquid::Disinfectant => ctx.config.refilling.disinfectant.period,
            };
            ctx.state.mark_refill_executed(liquid, epoch_secs(), period);
        }
    }
}

/// Preparation work common to the three tasks: scrub the flags, make
/// sure the gantry is homed, then hand over to the job.
pub fn preparation(ctx: &Context, kind: TaskKind) {
    info!("{kind} preparation");

    match kind {
        TaskKind::Spraying => {
            write_comm(ctx, comm::SPRAYING_RUNNING, Level::Low);
            write_comm(ctx, comm::SPRAYING_COMPLETE, Level::Low);
            ctx.state.set_task_ready(TaskKind::Tending, false);
            ctx.state.set_task_ready(TaskKind::Cleaning, false);
        }
        TaskKind::Tending => {
            write_comm(ctx, comm::TENDING_RUNNING, Level::Low);
            write_comm(ctx, comm::TENDING_COMPLETE, Level::Low);
            ctx.state.set_task_ready(TaskKind::Spraying, false);
            ctx.state.set_task_ready(TaskKind::Cleaning, false);
        }
        TaskKind::Cleaning => {
            ctx.state.set_task_ready(TaskKind::Spraying, false);
            ctx.state.set_task_ready(TaskKind::Tending, false);
        }
    }
    ctx.state.set_task_running(kind, false);
    ctx.state.set_task_complete(kind, false);

    if interrupted(ctx) {
        return;
    }
    info!("homing before {kind}");
    if !motion_ok(ctx, ctx.movement.homing()) {
        return;
    }

    ctx.sink.post(Event::TaskRun(kind));
}

/// The spraying job: position, open the valve, sweep the tray, home.
pub fn spraying_job(ctx: &Context) {
    if interrupted(ctx) {
        return;
    }

    info!("spraying");
    if !write_comm(ctx, comm::SPRAYING_RUNNING, Level::High) {
        return;
    }
    if !ctx.state.set_task_running(TaskKind::Spraying, true) {
        return;
    }

    if interrupted(ctx) {
        return;
    }
    ctx.movement.set_profile(Phase::Spraying, SpeedBand::Normal);
    info!("moving to spraying position");
    if !motion_ok(ctx, ctx.movement.move_to_spraying_position()) {
        return;
    }

    if !dwell(ctx, TASK_DWELL_MS) {
        return;
    }

    info!("turning on the spray");
    if !write_output(ctx, output::SPRAY, Level::High) {
        return;
    }

    if !dwell(ctx, TASK_DWELL_MS) {
        return;
    }

    info!("following spraying paths");
    if !motion_ok(ctx, ctx.movement.follow_spraying_paths()) {
        return;
    }

    if interrupted(ctx) {
        return;
    }
    info!("turning off the spray");
    if !write_output(ctx, output::SPRAY, Level::Low) {
        return;
    }

    if interrupted(ctx) {
        return;
    }
    info!("homing");
    if !motion_ok(ctx, ctx.movement.homing()) {
        return;
    }

    if interrupted(ctx) {
        return;
    }
    write_comm(ctx, comm::SPRAYING_RUNNING, Level::Low);
    ctx.state.set_task_running(TaskKind::Spraying, false);
    write_comm(ctx, comm::SPRAYING_COMPLETE, Level::High);
    ctx.state.set_task_complete(TaskKind::Spraying, true);
}

/// Completion handshake after spraying.
pub fn spraying_complete(ctx: &Context) {
    info!("spraying is completed");

    dwell(ctx, TASK_DWELL_MS);
    write_comm(ctx, comm::SPRAYING_COMPLETE, Level::Low);
    ctx.state.set_task_complete(TaskKind::Spraying, false);

    reset_task_ready(ctx);

    dwell(ctx, STAGE_DWELL_MS);
    ctx.sink.post(Event::TaskComplete);
}

/// The tending job: position, lower the finger, sweep the edge, spin
/// through the zigzag, home.
pub fn tending_job(ctx: &Context) {
    if interrupted(ctx) {
        return;
    }

    info!("tending");
    if !write_comm(ctx, comm::TENDING_RUNNING, Level::High) {
        return;
    }
    if !ctx.state.set_task_running(TaskKind::Tending, true) {
        return;
    }

    if interrupted(ctx) {
        return;
    }
    ctx.movement.set_profile(Phase::Tending, SpeedBand::Normal);
    info!("moving to tending position");
    if !motion_ok(ctx, ctx.movement.move_to_tending_position()) {
        return;
    }

    if !dwell(ctx, TASK_DWELL_MS) {
        return;
    }

    let finger = ctx.config.mechanisms.tending.finger;

    info!("moving finger down");
    if !motion_ok(ctx, ctx.movement.move_finger_down(finger.travel)) {
        return;
    }

    if !dwell(ctx, STAGE_DWELL_MS) {
        return;
    }

    info!("following edge paths");
    if !motion_ok(ctx, ctx.movement.follow_tending_paths_edge()) {
        return;
    }

    if !dwell(ctx, STAGE_DWELL_MS) {
        return;
    }

    info!("starting finger rotation");
    if !write_comm(ctx, comm::FINGER_BRAKE, Level::Low) {
        return;
    }
    if !motion_ok(ctx, ctx.movement.rotate_finger(finger.duty_cycle)) {
        return;
    }

    if !dwell(ctx, STAGE_DWELL_MS) {
        return;
    }

    info!("following zigzag paths");
    if !motion_ok(ctx, ctx.movement.follow_tending_paths_zigzag()) {
        return;
    }

    if !dwell(ctx, STAGE_DWELL_MS) {
        return;
    }

    info!("stopping finger");
    if !motion_ok(ctx, ctx.movement.stop_finger()) {
        return;
    }
    if !write_comm(ctx, comm::FINGER_BRAKE, Level::High) {
        return;
    }

    if interrupted(ctx) {
        return;
    }
    info!("homing");
    if !motion_ok(ctx, ctx.movement.homing()) {
        return;
    }

    if interrupted(ctx) {
        return;
    }
    write_comm(ctx, comm::TENDING_RUNNING, Level::Low);
    ctx.state.set_task_running(TaskKind::Tending, false);
    write_comm(ctx, comm::TENDING_COMPLETE, Level::High);
    ctx.state.set_task_complete(TaskKind::Tending, true);
}

/// Completion handshake after tending.
pub fn tending_complete(ctx: &Context) {
    info!("tending is completed");

    dwell(ctx, TASK_DWELL_MS);
    write_comm(ctx, comm::TENDING_COMPLETE, Level::Low);
    ctx.state.set_task_complete(TaskKind::Tending, false);

    reset_task_ready(ctx);

    dwell(ctx, STAGE_DWELL_MS);
    ctx.sink.post(Event::TaskComplete);
}

/// The cleaning job: visit every station, lowering the finger and
/// running the sonicator bath where configured.
pub fn cleaning_job(ctx: &Context) {
    if interrupted(ctx) {
        return;
    }

    info!("cleaning");
    if !ctx.state.set_task_running(TaskKind::Cleaning, true) {
        return;
    }

    ctx.movement.set_profile(Phase::Cleaning, SpeedBand::Normal);
    info!("homing finger");
    if !motion_ok(ctx, ctx.movement.homing_finger()) {
        return;
    }

    let finger = ctx.config.mechanisms.cleaning.finger;
    let stations = ctx.config.mechanisms.cleaning.stations.clone();

    for station in stations {
        if interrupted(ctx) {
            return;
        }

        info!(x = station.x, y = station.y, "moving to cleaning station");
        if !motion_ok(
            ctx,
            ctx.movement
                .move_to(Coordinate::new(station.x, station.y, 0.0)),
        ) {
            return;
        }

        if interrupted(ctx) {
            return;
        }
        info!("moving finger down");
        if !motion_ok(ctx, ctx.movement.move_finger_down(finger.travel)) {
            return;
        }

        if interrupted(ctx) {
            return;
        }
        if station.sonicator {
            info!("turning on the sonicator relay");
            if !write_output(ctx, output::SONICATOR_RELAY, Level::High) {
                return;
            }
        }

        info!(seconds = station.time, "dwelling at station");
        if !dwell(ctx, station.time * 1_000) {
            return;
        }

        if station.sonicator {
            info!("turning off the sonicator relay");
            if !write_output(ctx, output::SONICATOR_RELAY, Level::Low) {
                return;
            }
        }

        if interrupted(ctx) {
            return;
        }
        info!("moving finger up");
        if !motion_ok(ctx, ctx.movement.move_finger_up(finger.travel)) {
            return;
        }
    }

    if interrupted(ctx) {
        return;
    }
    ctx.state.set_task_running(TaskKind::Cleaning, false);
    ctx.state.set_task_complete(TaskKind::Cleaning, true);
}

/// Completion handshake after cleaning.
pub fn cleaning_complete(ctx: &Context) {
    info!("cleaning is completed");

    dwell(ctx, TASK_DWELL_MS);
    // Tending completion is also cleared so the pair only runs once
    // per tray presentation.
    ctx.state.set_task_complete(TaskKind::Tending, false);
    ctx.state.set_task_complete(TaskKind::Cleaning, false);

    reset_task_ready(ctx);

    dwell(ctx, STAGE_DWELL_MS);
    ctx.sink.post(Event::TaskComplete);
}
