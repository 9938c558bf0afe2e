//! TOML configuration model.
//!
//! One file describes the whole machine: general settings, per-phase
//! speed profiles, positions and paths, cleaning stations, stepper
//! scaling, ultrasonic ranges, and liquid-exchange timing. The file is
//! parsed once at startup and read-only afterwards.
//!
//! # Example
//!
//! ```toml
//! [general]
//! name = "terra"
//! debug = false
//! timeout = 120
//!
//! [mechanisms.homing.speed.normal.x]
//! rpm = 120.0
//! acceleration = 1000.0
//! deceleration = 1000.0
//! ```

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{AxisId, CleaningStation, Coordinate, Phase, SpeedBand};

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Configuration file could not be read.
    #[error("failed to read configuration file: {0}")]
    Io(#[from] std::io::Error),

    /// TOML parsing failed.
    #[error("failed to parse configuration: {0}")]
    Parse(String),

    /// Semantic validation failed.
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

/// Speed setting for one axis in one band: target rpm plus the
/// acceleration and deceleration rates in steps/s².
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Speed {
    pub rpm: f64,
    pub acceleration: f64,
    pub deceleration: f64,
}

impl Speed {
    fn validate(&self, context: &str) -> Result<(), ConfigError> {
        if self.rpm <= 0.0 || self.acceleration <= 0.0 || self.deceleration <= 0.0 {
            return Err(ConfigError::Validation(format!(
                "{context}: rpm, acceleration and deceleration must all be positive"
            )));
        }
        Ok(())
    }
}

/// Per-axis speeds for one band.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AxisSpeeds {
    pub x: Speed,
    pub y: Speed,
    pub z: Speed,
}

impl AxisSpeeds {
    /// Speed setting for the given axis.
    #[inline]
    pub fn axis(&self, axis: AxisId) -> Speed {
        match axis {
            AxisId::X => self.x,
            AxisId::Y => self.y,
            AxisId::Z => self.z,
        }
    }

    fn validate(&self, context: &str) -> Result<(), ConfigError> {
        self.x.validate(&format!("{context}.x"))?;
        self.y.validate(&format!("{context}.y"))?;
        self.z.validate(&format!("{context}.z"))
    }
}

/// Three-band speed profile for one phase.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SpeedProfile {
    pub slow: AxisSpeeds,
    pub normal: AxisSpeeds,
    pub fast: AxisSpeeds,
}

impl SpeedProfile {
    /// Speeds for the given band.
    #[inline]
    pub fn band(&self, band: SpeedBand) -> &AxisSpeeds {
        match band {
            SpeedBand::Slow => &self.slow,
            SpeedBand::Normal => &self.normal,
            SpeedBand::Fast => &self.fast,
        }
    }

    fn validate(&self, context: &str) -> Result<(), ConfigError> {
        self.slow.validate(&format!("{context}.slow"))?;
        self.normal.validate(&format!("{context}.normal"))?;
        self.fast.validate(&format!("{context}.fast"))
    }
}

/// Rotary finger settings for a phase that uses it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct FingerConfig {
    /// PWM duty cycle percentage while rotating.
    pub duty_cycle: u32,
    /// Load threshold above which rotation is considered stalled.
    pub threshold: f64,
    /// Vertical stroke in millimetres when lowering the finger.
    #[serde(default = "default_finger_travel")]
    pub travel: f64,
}

fn default_finger_travel() -> f64 {
    40.0
}

impl FingerConfig {
    fn validate(&self, context: &str) -> Result<(), ConfigError> {
        if self.duty_cycle > 100 {
            return Err(ConfigError::Validation(format!(
                "{context}: duty-cycle must be within 0..=100"
            )));
        }
        if self.travel <= 0.0 {
            return Err(ConfigError::Validation(format!(
                "{context}: travel must be positive"
            )));
        }
        Ok(())
    }
}

/// Manual jog distances available inside fault mode, in millimetres.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct JogDistances {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

/// `[mechanisms.fault]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FaultMechanism {
    pub manual: JogDistances,
    pub speed: SpeedProfile,
}

/// `[mechanisms.homing]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HomingMechanism {
    pub speed: SpeedProfile,
}

/// `[mechanisms.spraying]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SprayingMechanism {
    pub speed: SpeedProfile,
    /// Absolute position where spraying starts.
    pub position: Coordinate,
    /// Waypoint deltas followed while the spray valve is open.
    pub path: Vec<Coordinate>,
}

/// Tending waypoint sets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TendingPaths {
    pub edge: Vec<Coordinate>,
    pub zigzag: Vec<Coordinate>,
}

/// `[mechanisms.tending]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TendingMechanism {
    pub speed: SpeedProfile,
    pub position: Coordinate,
    pub path: TendingPaths,
    pub finger: FingerConfig,
}

/// `[mechanisms.cleaning]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CleaningMechanism {
    pub speed: SpeedProfile,
    pub stations: Vec<CleaningStation>,
    pub finger: FingerConfig,
}

/// `[mechanisms]` container.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Mechanisms {
    pub fault: FaultMechanism,
    pub homing: HomingMechanism,
    pub spraying: SprayingMechanism,
    pub tending: TendingMechanism,
    pub cleaning: CleaningMechanism,
}

/// `[general]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct General {
    pub name: String,
    #[serde(default)]
    pub debug: bool,
    /// Homing watchdog bound in seconds.
    pub timeout: u64,
}

/// One stepper axis: scaling plus the registry key of its driver.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct StepperConfig {
    pub steps_per_mm: u32,
    pub key: String,
    /// Full steps per motor revolution.
    #[serde(default = "default_motor_steps")]
    pub motor_steps: u32,
    /// Microstep divisor, a power of two up to 16.
    #[serde(default = "default_microsteps")]
    pub microsteps: u32,
}

fn default_motor_steps() -> u32 {
    200
}

fn default_microsteps() -> u32 {
    1
}

/// `[stepper]` container.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Steppers {
    pub x: StepperConfig,
    pub y: StepperConfig,
    pub z: StepperConfig,
}

impl Steppers {
    /// Stepper configuration for the given axis.
    #[inline]
    pub fn axis(&self, axis: AxisId) -> &StepperConfig {
        match axis {
            AxisId::X => &self.x,
            AxisId::Y => &self.y,
            AxisId::Z => &self.z,
        }
    }
}

/// One ultrasonic level sensor.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct UltrasonicConfig {
    /// Largest distance the sensor is trusted for, in centimetres.
    pub max_range: f64,
    pub key: String,
}

/// Liquid exchange timing for one tank.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RefillingConfig {
    /// Seconds between scheduled exchanges.
    pub period: u64,
    /// Seconds the out-valve stays open while draining.
    pub drain_time: u64,
    /// Upper bound in seconds for the in-valve while filling.
    pub fill_time: u64,
}

/// `[refilling]` container.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Refilling {
    pub water: RefillingConfig,
    pub disinfectant: RefillingConfig,
}

/// Root of the machine configuration file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub general: General,
    pub mechanisms: Mechanisms,
    pub stepper: Steppers,
    #[serde(default)]
    pub ultrasonic: BTreeMap<String, UltrasonicConfig>,
    pub refilling: Refilling,
}

impl Config {
    /// Load and validate a configuration file.
    pub fn load(path: &Path) -> Result<Config, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml(&raw)
    }

    /// Parse and validate configuration from a TOML string.
    pub fn from_toml(raw: &str) -> Result<Config, ConfigError> {
        let config: Config =
            toml::from_str(raw).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Speed profile for the given phase.
    pub fn speed_profile(&self, phase: Phase) -> &SpeedProfile {
        match phase {
            Phase::FaultManual => &self.mechanisms.fault.speed,
            Phase::Homing => &self.mechanisms.homing.speed,
            Phase::Spraying => &self.mechanisms.spraying.speed,
            Phase::Tending => &self.mechanisms.tending.speed,
            Phase::Cleaning => &self.mechanisms.cleaning.speed,
        }
    }

    /// Max range of a named ultrasonic sensor, if configured.
    pub fn ultrasonic_max_range(&self, name: &str) -> Option<f64> {
        self.ultrasonic.get(name).map(|u| u.max_range)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.general.name.is_empty() {
            return Err(ConfigError::Validation(
                "general.name cannot be empty".into(),
            ));
        }
        if self.general.timeout == 0 {
            return Err(ConfigError::Validation(
                "general.timeout must be positive".into(),
            ));
        }

        self.mechanisms
            .fault
            .speed
            .validate("mechanisms.fault.speed")?;
        self.mechanisms
            .homing
            .speed
            .validate("mechanisms.homing.speed")?;
        self.mechanisms
            .spraying
            .speed
            .validate("mechanisms.spraying.speed")?;
        self.mechanisms
            .tending
            .speed
            .validate("mechanisms.tending.speed")?;
        self.mechanisms
            .cleaning
            .speed
            .validate("mechanisms.cleaning.speed")?;

        self.mechanisms
            .tending
            .finger
            .validate("mechanisms.tending.finger")?;
        self.mechanisms
            .cleaning
            .finger
            .validate("mechanisms.cleaning.finger")?;

        if self.mechanisms.spraying.path.is_empty() {
            return Err(ConfigError::Validation(
                "mechanisms.spraying.path cannot be empty".into(),
            ));
        }
        if self.mechanisms.tending.path.edge.is_empty()
            || self.mechanisms.tending.path.zigzag.is_empty()
        {
            return Err(ConfigError::Validation(
                "mechanisms.tending.path.edge and .zigzag cannot be empty".into(),
            ));
        }

        for axis in AxisId::ALL {
            let stepper = self.stepper.axis(axis);
            if stepper.steps_per_mm == 0 {
                return Err(ConfigError::Validation(format!(
                    "stepper.{axis}.steps-per-mm must be positive"
                )));
            }
            if stepper.motor_steps == 0 {
                return Err(ConfigError::Validation(format!(
                    "stepper.{axis}.motor-steps must be positive"
                )));
            }
            if !matches!(stepper.microsteps, 1 | 2 | 4 | 8 | 16) {
                return Err(ConfigError::Validation(format!(
                    "stepper.{axis}.microsteps must be 1, 2, 4, 8 or 16"
                )));
            }
            if stepper.key.is_empty() {
                return Err(ConfigError::Validation(format!(
                    "stepper.{axis}.key cannot be empty"
                )));
            }
        }

        for (name, sensor) in &self.ultrasonic {
            if sensor.max_range <= 0.0 {
                return Err(ConfigError::Validation(format!(
                    "ultrasonic.{name}.max-range must be positive"
                )));
            }
        }

        for (name, refilling) in [
            ("water", &self.refilling.water),
            ("disinfectant", &self.refilling.disinfectant),
        ] {
            if refilling.period == 0 {
                return Err(ConfigError::Validation(format!(
                    "refilling.{name}.period must be positive"
                )));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn sample_toml() -> String {
        let speed = |rpm: f64| {
            format!(
                "rpm = {rpm}\nacceleration = 1000.0\ndeceleration = 1000.0\n"
            )
        };
        let mut profile = String::new();
        for band in ["slow", "normal", "fast"] {
            for axis in ["x", "y", "z"] {
                for phase in ["fault", "homing", "spraying", "tending", "cleaning"] {
                    profile.push_str(&format!(
                        "[mechanisms.{phase}.speed.{band}.{axis}]\n{}\n",
                        speed(120.0)
                    ));
                }
            }
        }

        format!(
            r#"
[general]
name = "terra"
debug = true
timeout = 60

[mechanisms.fault.manual]
x = 10.0
y = 10.0
z = 5.0

[mechanisms.spraying]
position = {{ x = 10.0, y = 0.0 }}
path = [{{ x = 100.0, y = 0.0 }}, {{ x = 0.0, y = 50.0 }}]

[mechanisms.tending]
position = {{ x = 20.0, y = 0.0 }}

[mechanisms.tending.path]
edge = [{{ x = 100.0, y = 0.0 }}]
zigzag = [{{ x = 50.0, y = 25.0 }}]

[mechanisms.tending.finger]
duty-cycle = 50
threshold = 10.0

[mechanisms.cleaning]
stations = [{{ x = 100.0, y = 0.0, time = 5, sonicator = true }}]

[mechanisms.cleaning.finger]
duty-cycle = 30
threshold = 10.0

[stepper.x]
steps-per-mm = 40
key = "stepper-x"

[stepper.y]
steps-per-mm = 40
key = "stepper-y"

[stepper.z]
steps-per-mm = 80
key = "stepper-z"
microsteps = 16

[ultrasonic.water-level]
max-range = 15.0
key = "water-level"

[refilling.water]
period = 86400
drain-time = 60
fill-time = 120

[refilling.disinfectant]
period = 172800
drain-time = 60
fill-time = 120

{profile}
"#
        )
    }

    #[test]
    fn parses_complete_file() {
        let config = Config::from_toml(&sample_toml()).expect("config parses");
        assert_eq!(config.general.name, "terra");
        assert_eq!(config.general.timeout, 60);
        assert_eq!(config.stepper.z.microsteps, 16);
        assert_eq!(config.stepper.x.motor_steps, 200);
        assert_eq!(config.mechanisms.cleaning.stations.len(), 1);
        assert!(config.mechanisms.cleaning.stations[0].sonicator);
        assert_eq!(config.ultrasonic_max_range("water-level"), Some(15.0));
        assert_eq!(config.ultrasonic_max_range("missing"), None);
    }

    #[test]
    fn loads_from_file() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        file.write_all(sample_toml().as_bytes()).expect("write");
        let config = Config::load(file.path()).expect("config loads");
        assert_eq!(config.mechanisms.spraying.path.len(), 2);
    }

    #[test]
    fn rejects_zero_rpm() {
        let raw = sample_toml().replace("rpm = 120", "rpm = 0");
        let err = Config::from_toml(&raw).unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));
    }

    #[test]
    fn rejects_invalid_microsteps() {
        let raw = sample_toml().replace("microsteps = 16", "microsteps = 3");
        let err = Config::from_toml(&raw).unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));
    }

    #[test]
    fn rejects_empty_spraying_path() {
        let raw = sample_toml().replace(
            "path = [{ x = 100.0, y = 0.0 }, { x = 0.0, y = 50.0 }]",
            "path = []",
        );
        let err = Config::from_toml(&raw).unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));
    }

    #[test]
    fn speed_profile_lookup_by_phase_and_band() {
        let config = Config::from_toml(&sample_toml()).expect("config parses");
        let speed = config
            .speed_profile(Phase::Homing)
            .band(SpeedBand::Normal)
            .axis(AxisId::Y);
        assert_eq!(speed.rpm, 120.0);
        assert_eq!(speed.acceleration, 1000.0);
    }
}
