//! Movement coordinator behaviour against the simulation backend.

use std::sync::Arc;
use std::time::Duration;

use terra_common::config::{
    AxisSpeeds, CleaningMechanism, Config, FaultMechanism, FingerConfig, General,
    HomingMechanism, JogDistances, Mechanisms, Refilling, RefillingConfig, Speed, SpeedProfile,
    SprayingMechanism, Steppers, StepperConfig, TendingMechanism, TendingPaths,
};
use terra_common::state::SharedState;
use terra_common::types::{AxisId, CleaningStation, Coordinate, LengthUnit};
use terra_hal::backend::Backend;
use terra_hal::sim::SimBackend;
use terra_hal::stepper::StepperMotor;
use terra_motion::{Movement, MotionError};

fn speed() -> Speed {
    Speed {
        rpm: 6_000.0,
        acceleration: 100_000.0,
        deceleration: 100_000.0,
    }
}

fn profile() -> SpeedProfile {
    let speeds = AxisSpeeds {
        x: speed(),
        y: speed(),
        z: speed(),
    };
    SpeedProfile {
        slow: speeds,
        normal: speeds,
        fast: speeds,
    }
}

fn finger() -> FingerConfig {
    FingerConfig {
        duty_cycle: 50,
        threshold: 10.0,
        travel: 40.0,
    }
}

fn stepper(key: &str) -> StepperConfig {
    StepperConfig {
        steps_per_mm: 10,
        key: key.into(),
        motor_steps: 200,
        microsteps: 1,
    }
}

fn refilling() -> RefillingConfig {
    RefillingConfig {
        period: 86_400,
        drain_time: 1,
        fill_time: 1,
    }
}

pub fn test_config() -> Config {
    Config {
        general: General {
            name: "terra-test".into(),
            debug: true,
            timeout: 5,
        },
        mechanisms: Mechanisms {
            fault: FaultMechanism {
                manual: JogDistances {
                    x: 10.0,
                    y: 10.0,
                    z: 5.0,
                },
                speed: profile(),
            },
            homing: HomingMechanism { speed: profile() },
            spraying: SprayingMechanism {
                speed: profile(),
                position: Coordinate::new(10.0, 0.0, 0.0),
                path: vec![
                    Coordinate::new(100.0, 0.0, 0.0),
                    Coordinate::new(0.0, 50.0, 0.0),
                ],
            },
            tending: TendingMechanism {
                speed: profile(),
                position: Coordinate::new(20.0, 0.0, 0.0),
                path: TendingPaths {
                    edge: vec![Coordinate::new(60.0, 0.0, 0.0)],
                    zigzag: vec![
                        Coordinate::new(30.0, 20.0, 0.0),
                        Coordinate::new(30.0, -20.0, 0.0),
                    ],
                },
                finger: finger(),
            },
            cleaning: CleaningMechanism {
                speed: profile(),
                stations: vec![CleaningStation {
                    x: 100.0,
                    y: 0.0,
                    time: 0,
                    sonicator: true,
                }],
                finger: finger(),
            },
        },
        stepper: Steppers {
            x: stepper("stepper-x"),
            y: stepper("stepper-y"),
            z: stepper("stepper-z"),
        },
        ultrasonic: Default::default(),
        refilling: Refilling {
            water: refilling(),
            disinfectant: refilling(),
        },
    }
}

fn build_movement(backend: &SimBackend) -> (Arc<SharedState>, Movement) {
    let config = Arc::new(test_config());
    let state = Arc::new(SharedState::new());

    let motor = |axis: &str| {
        Arc::new(StepperMotor::new(
            backend.digital_output(&format!("{axis}-step")),
            backend.digital_output(&format!("{axis}-dir")),
            backend.digital_output(&format!("{axis}-enable")),
            None,
        ))
    };

    let movement = Movement::builder(config, Arc::clone(&state))
        .axis(AxisId::X, motor("x"), backend.digital_input("limit-switch-x", false))
        .axis(AxisId::Y, motor("y"), backend.digital_input("limit-switch-y", false))
        .axis(AxisId::Z, motor("z"), backend.digital_input("limit-switch-z", false))
        .finger(backend.pwm("finger"))
        .build()
        .expect("movement builds");

    (state, movement)
}

#[test]
fn builder_requires_every_axis() {
    let backend = SimBackend::new();
    let config = Arc::new(test_config());
    let state = Arc::new(SharedState::new());

    let result = Movement::builder(config, state)
        .finger(backend.pwm("finger"))
        .build();
    assert!(result.is_err());
}

#[test]
fn relative_move_updates_the_coordinate() {
    let backend = SimBackend::new();
    let (state, movement) = build_movement(&backend);

    movement
        .move_by(10.0, 5.0, 2.0, LengthUnit::Mm)
        .expect("move completes");
    assert_eq!(state.coordinate(), Coordinate::new(10.0, 5.0, 2.0));
    assert_eq!(backend.rising_edges("x-step"), 100);
    assert_eq!(backend.rising_edges("y-step"), 50);
    assert_eq!(backend.rising_edges("z-step"), 20);
    assert!(movement.progress() >= 1.0 - f64::EPSILON);
}

#[test]
fn centimetre_moves_scale_by_ten() {
    let backend = SimBackend::new();
    let (state, movement) = build_movement(&backend);

    movement
        .move_by(1.0, 0.0, 0.0, LengthUnit::Cm)
        .expect("move completes");
    assert_eq!(state.coordinate(), Coordinate::new(10.0, 0.0, 0.0));
}

#[test]
fn there_and_back_returns_to_the_origin() {
    let backend = SimBackend::new();
    let (state, movement) = build_movement(&backend);

    movement
        .move_by(33.3, -12.7, 4.9, LengthUnit::Mm)
        .expect("outbound");
    movement
        .move_by(-33.3, 12.7, -4.9, LengthUnit::Mm)
        .expect("return");

    let here = state.coordinate();
    // Within one step of the origin on every axis.
    assert!(here.x.abs() <= 0.1 && here.y.abs() <= 0.1 && here.z.abs() <= 0.1);
}

#[test]
fn absolute_move_reaches_the_target() {
    let backend = SimBackend::new();
    let (state, movement) = build_movement(&backend);

    movement
        .move_to(Coordinate::new(25.0, 10.0, 0.0))
        .expect("first leg");
    movement
        .move_to(Coordinate::new(5.0, 10.0, 0.0))
        .expect("second leg");
    assert_eq!(state.coordinate(), Coordinate::new(5.0, 10.0, 0.0));
}

#[test]
fn paths_accumulate_waypoint_deltas() {
    let backend = SimBackend::new();
    let (state, movement) = build_movement(&backend);

    movement.follow_spraying_paths().expect("spraying path");
    assert_eq!(state.coordinate(), Coordinate::new(100.0, 50.0, 0.0));

    movement
        .follow_tending_paths_zigzag()
        .expect("zigzag path");
    assert_eq!(state.coordinate(), Coordinate::new(160.0, 50.0, 0.0));
}

#[test]
fn fault_cancels_path_following() {
    let backend = SimBackend::new();
    let (state, movement) = build_movement(&backend);

    state.set_fault(true);
    let result = movement.follow_spraying_paths();
    assert!(matches!(result, Err(MotionError::Cancelled)));
    assert_eq!(state.coordinate(), Coordinate::ORIGIN);
}

#[test]
fn reentrant_commands_fail_fast() {
    let backend = SimBackend::new();
    let (_state, movement) = build_movement(&backend);
    let movement = Arc::new(movement);

    let slow = Arc::clone(&movement);
    let mover = std::thread::spawn(move || slow.move_by(500.0, 0.0, 0.0, LengthUnit::Mm));

    std::thread::sleep(Duration::from_millis(20));
    let result = movement.move_by(1.0, 0.0, 0.0, LengthUnit::Mm);
    assert!(matches!(result, Err(MotionError::Busy)));

    mover.join().expect("mover").expect("long move completes");
}

#[test]
fn homing_resets_the_coordinate_and_flag() {
    let backend = SimBackend::new();
    let (state, movement) = build_movement(&backend);

    // Every switch already closed: each axis backs off and re-seeks.
    backend.set_input("limit-switch-x", true);
    backend.set_input("limit-switch-y", true);
    backend.set_input("limit-switch-z", true);

    movement
        .move_by(10.0, 10.0, 5.0, LengthUnit::Mm)
        .expect("drift away");
    movement.homing().expect("homing completes");

    assert_eq!(state.coordinate(), Coordinate::ORIGIN);
    assert!(!state.homing());
}

#[test]
fn finger_rotation_controls_the_pwm() {
    let backend = SimBackend::new();
    let (_state, movement) = build_movement(&backend);

    movement.rotate_finger(50).expect("rotate");
    assert_eq!(backend.duty("finger"), Some(50));

    movement.stop_finger().expect("stop");
    assert_eq!(backend.duty("finger"), Some(0));
}

#[test]
fn finger_down_and_up_travel_the_z_axis() {
    let backend = SimBackend::new();
    let (state, movement) = build_movement(&backend);

    movement.move_finger_down(40.0).expect("down");
    assert_eq!(state.coordinate().z, 40.0);
    movement.move_finger_up(40.0).expect("up");
    assert_eq!(state.coordinate().z, 0.0);
}

#[test]
fn disable_motors_drops_every_enable_pin() {
    let backend = SimBackend::new();
    let (_state, movement) = build_movement(&backend);

    movement.enable_motors().expect("enable");
    movement.disable_motors();
    for axis in ["x", "y", "z"] {
        assert_eq!(
            backend.output_level(&format!("{axis}-enable")),
            Some(terra_hal::Level::Low)
        );
    }
}
