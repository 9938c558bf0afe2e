//! Liquid tanks: level sensing and the exchange sequence.
//!
//! Tank levels come from the ultrasonic sensors looking down at the
//! surface, so a short distance means a full tank. The exchange drains
//! through the out-valve for the configured time, then refills through
//! the in-valve until the sensor reads full or the fill bound elapses.
//! Both stages poll the fault flag once a second and abandon the
//! sequence when it trips, leaving the valves closed.

use std::sync::Arc;

use tracing::{debug, info, warn};

use terra_common::config::{Config, RefillingConfig};
use terra_common::consts::{comm, ultrasonic};
use terra_common::state::SharedState;
use terra_common::time::sleep_for_ms;
use terra_common::types::Liquid;
use terra_hal::gpio::Level;

use crate::devices::DeviceSet;
use crate::error::MachineError;

/// Surface distance at or under which a tank reads full, cm.
const FULL_BELOW_CM: f64 = 3.0;

/// Surface distance at or over which the water tank reads empty, cm.
const WATER_EMPTY_ABOVE_CM: f64 = 8.0;

/// Surface distance at or over which the disinfectant tank reads
/// empty, cm.
const DISINFECTANT_EMPTY_ABOVE_CM: f64 = 6.0;

/// Reported tank level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LiquidLevel {
    Full,
    Normal,
    Empty,
    /// The sensor gave no echo; treat conservatively.
    Unknown,
}

/// Level sensing and exchange for both tanks.
pub struct LiquidRefilling {
    config: Arc<Config>,
    state: Arc<SharedState>,
    devices: Arc<DeviceSet>,
}

impl LiquidRefilling {
    pub fn new(config: Arc<Config>, state: Arc<SharedState>, devices: Arc<DeviceSet>) -> Self {
        Self {
            config,
            state,
            devices,
        }
    }

    /// Whether both level sensors are wired.
    pub fn active(&self) -> bool {
        self.devices.has_level_sensors()
    }

    fn level(&self, sensor_name: &str, empty_above_cm: f64) -> LiquidLevel {
        let Some(sensor) = self.devices.ultrasonic(sensor_name) else {
            return LiquidLevel::Unknown;
        };
        let max_range = self
            .config
            .ultrasonic_max_range(sensor_name)
            .unwrap_or(WATER_EMPTY_ABOVE_CM * 2.0);

        match sensor.distance(max_range) {
            Some(height) if height <= FULL_BELOW_CM => LiquidLevel::Full,
            Some(height) if height >= empty_above_cm => LiquidLevel::Empty,
            Some(_) => LiquidLevel::Normal,
            None => LiquidLevel::Unknown,
        }
    }

    /// Current water tank level.
    pub fn water_level(&self) -> LiquidLevel {
        self.level(ultrasonic::WATER_LEVEL, WATER_EMPTY_ABOVE_CM)
    }

    /// Current disinfectant tank level.
    pub fn disinfectant_level(&self) -> LiquidLevel {
        self.level(ultrasonic::DISINFECTANT_LEVEL, DISINFECTANT_EMPTY_ABOVE_CM)
    }

    fn timing(&self, liquid: Liquid) -> RefillingConfig {
        match liquid {
            Liquid::Water => self.config.refilling.water,
            Liquid::Disinfectant => self.config.refilling.disinfectant,
        }
    }

    fn valve_ids(liquid: Liquid) -> (&'static str, &'static str) {
        match liquid {
            Liquid::Water => (comm::WATER_IN, comm::WATER_OUT),
            Liquid::Disinfectant => (comm::DISINFECTANT_IN, comm::DISINFECTANT_OUT),
        }
    }

    fn tank_level(&self, liquid: Liquid) -> LiquidLevel {
        match liquid {
            Liquid::Water => self.water_level(),
            Liquid::Disinfectant => self.disinfectant_level(),
        }
    }

    /// Wait whole seconds, aborting on fault or shutdown.
    fn wait_secs(&self, secs: u64) -> bool {
        for _ in 0..secs {
            if self.state.fault() || !self.state.running() {
                return false;
            }
            sleep_for_ms(1_000);
        }
        true
    }

    /// Run one full exchange for the given tank.
    pub fn exchange(&self, liquid: Liquid) -> Result<(), MachineError> {
        let timing = self.timing(liquid);
        let (valve_in, valve_out) = Self::valve_ids(liquid);
        let shift_register = self.devices.shift_register();

        info!(%liquid, "draining tank");
        shift_register.write(valve_out, Level::High)?;
        let drained = self.wait_secs(timing.drain_time);
        shift_register.write(valve_out, Level::Low)?;
        if !drained {
            warn!(%liquid, "exchange abandoned while draining");
            return Err(MachineError::ExchangeCancelled);
        }

        info!(%liquid, "refilling tank");
        shift_register.write(valve_in, Level::High)?;
        let mut filled = false;
        for _ in 0..timing.fill_time {
            if self.state.fault() || !self.state.running() {
                break;
            }
            if self.tank_level(liquid) == LiquidLevel::Full {
                filled = true;
                break;
            }
            sleep_for_ms(1_000);
        }
        shift_register.write(valve_in, Level::Low)?;

        if self.state.fault() || !self.state.running() {
            warn!(%liquid, "exchange abandoned while filling");
            return Err(MachineError::ExchangeCancelled);
        }
        if !filled {
            debug!(%liquid, "fill bound reached before the sensor read full");
        }
        info!(%liquid, "exchange finished");
        Ok(())
    }
}
