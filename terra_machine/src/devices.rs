//! Device wiring.
//!
//! Builds every named device the machine uses from a [`Backend`] and
//! the configuration, and registers it under its instance id. The
//! registries are filled once at startup; a duplicate id or a missing
//! lookup is a wiring error.

use std::collections::HashMap;
use std::sync::Arc;

use terra_common::config::Config;
use terra_common::consts::{comm, input, output, pwm, ultrasonic};
use terra_common::types::AxisId;
use terra_hal::backend::Backend;
use terra_hal::error::DeviceError;
use terra_hal::gpio::{DigitalInput, DigitalOutput, Pwm};
use terra_hal::registry::DeviceRegistry;
use terra_hal::shift_register::ShiftRegister;
use terra_hal::stepper::StepperMotor;
use terra_hal::ultrasonic::Ultrasonic;

/// Every device handle the machine owns.
pub struct DeviceSet {
    inputs: DeviceRegistry<dyn DigitalInput>,
    outputs: DeviceRegistry<dyn DigitalOutput>,
    pwms: DeviceRegistry<dyn Pwm>,
    shift_register: ShiftRegister,
    steppers: HashMap<AxisId, Arc<StepperMotor>>,
    ultrasonics: HashMap<String, Ultrasonic>,
}

impl DeviceSet {
    /// Wire every device from the backend.
    pub fn build(backend: &dyn Backend, config: &Config) -> Result<Self, DeviceError> {
        let mut inputs: DeviceRegistry<dyn DigitalInput> = DeviceRegistry::new();
        for id in [
            input::LIMIT_SWITCH_X,
            input::LIMIT_SWITCH_Y,
            input::LIMIT_SWITCH_Z,
            input::FINGER_PROTECTION,
            input::E_STOP,
            input::RESET,
            input::SPRAYING_TENDING_HEIGHT,
            input::CLEANING_HEIGHT,
        ] {
            inputs.insert(id, backend.digital_input(id, false))?;
        }

        let mut outputs: DeviceRegistry<dyn DigitalOutput> = DeviceRegistry::new();
        for id in [output::SPRAY, output::SONICATOR_RELAY] {
            outputs.insert(id, backend.digital_output(id))?;
        }

        let mut pwms: DeviceRegistry<dyn Pwm> = DeviceRegistry::new();
        pwms.insert(pwm::FINGER, backend.pwm(pwm::FINGER))?;

        let mut shift_register = ShiftRegister::new(
            backend.digital_output("shift-register-data"),
            backend.digital_output("shift-register-clock"),
            backend.digital_output("shift-register-latch"),
        );
        for (bit, id) in [
            comm::SPRAYING_READY,
            comm::SPRAYING_RUNNING,
            comm::SPRAYING_COMPLETE,
            comm::TENDING_READY,
            comm::TENDING_RUNNING,
            comm::TENDING_COMPLETE,
            comm::WATER_IN,
            comm::WATER_OUT,
            comm::DISINFECTANT_IN,
            comm::DISINFECTANT_OUT,
            comm::FINGER_BRAKE,
        ]
        .iter()
        .enumerate()
        {
            shift_register.assign(*id, bit as u8)?;
        }

        let mut steppers = HashMap::new();
        for axis in AxisId::ALL {
            let stepper_config = config.stepper.axis(axis);
            let key = &stepper_config.key;
            let motor = Arc::new(StepperMotor::new(
                backend.digital_output(&format!("{key}-step")),
                backend.digital_output(&format!("{key}-dir")),
                backend.digital_output(&format!("{key}-enable")),
                None,
            ));
            motor.set_microsteps(stepper_config.microsteps)?;
            steppers.insert(axis, motor);
        }

        let mut ultrasonics = HashMap::new();
        for (name, sensor) in &config.ultrasonic {
            let key = &sensor.key;
            ultrasonics.insert(
                name.clone(),
                Ultrasonic::new(
                    backend.digital_output(&format!("{key}-trigger")),
                    backend.digital_input(&format!("{key}-echo"), false),
                ),
            );
        }

        Ok(Self {
            inputs,
            outputs,
            pwms,
            shift_register,
            steppers,
            ultrasonics,
        })
    }

    /// Whether every registered input currently answers.
    pub fn active(&self) -> bool {
        [
            input::LIMIT_SWITCH_X,
            input::LIMIT_SWITCH_Y,
            input::LIMIT_SWITCH_Z,
            input::E_STOP,
            input::RESET,
        ]
        .iter()
        .all(|id| {
            self.inputs
                .get(id)
                .is_some_and(|device| device.read_bool().is_some())
        })
    }

    pub fn input(&self, id: &str) -> Result<Arc<dyn DigitalInput>, DeviceError> {
        self.inputs.require(id)
    }

    pub fn output(&self, id: &str) -> Result<Arc<dyn DigitalOutput>, DeviceError> {
        self.outputs.require(id)
    }

    pub fn pwm(&self, id: &str) -> Result<Arc<dyn Pwm>, DeviceError> {
        self.pwms.require(id)
    }

    pub fn shift_register(&self) -> &ShiftRegister {
        &self.shift_register
    }

    pub fn stepper(&self, axis: AxisId) -> Arc<StepperMotor> {
        Arc::clone(&self.steppers[&axis])
    }

    /// Named ultrasonic level sensor, if configured.
    pub fn ultrasonic(&self, name: &str) -> Option<&Ultrasonic> {
        self.ultrasonics.get(name)
    }

    /// Ids of the level sensors the liquid mechanism expects.
    pub fn has_level_sensors(&self) -> bool {
        self.ultrasonics.contains_key(ultrasonic::WATER_LEVEL)
            && self.ultrasonics.contains_key(ultrasonic::DISINFECTANT_LEVEL)
    }
}
