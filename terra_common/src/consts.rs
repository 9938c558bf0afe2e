//! Well-known device identifiers.
//!
//! Instance keys used to look devices up in the registries. Stepper and
//! ultrasonic keys come from the configuration file; everything else is
//! fixed wiring and lives here.

/// Digital inputs.
pub mod input {
    pub const LIMIT_SWITCH_X: &str = "limit-switch-x";
    pub const LIMIT_SWITCH_Y: &str = "limit-switch-y";
    pub const LIMIT_SWITCH_Z: &str = "limit-switch-z";
    pub const FINGER_PROTECTION: &str = "finger-protection";
    pub const E_STOP: &str = "e-stop";
    pub const RESET: &str = "reset";
    pub const SPRAYING_TENDING_HEIGHT: &str = "spraying-tending-height";
    pub const CLEANING_HEIGHT: &str = "cleaning-height";
}

/// Direct digital outputs.
pub mod output {
    pub const SPRAY: &str = "spray";
    pub const SONICATOR_RELAY: &str = "sonicator-relay";
}

/// Shift-register virtual outputs.
pub mod comm {
    pub const SPRAYING_READY: &str = "spraying-ready";
    pub const SPRAYING_RUNNING: &str = "spraying-running";
    pub const SPRAYING_COMPLETE: &str = "spraying-complete";
    pub const TENDING_READY: &str = "tending-ready";
    pub const TENDING_RUNNING: &str = "tending-running";
    pub const TENDING_COMPLETE: &str = "tending-complete";
    pub const WATER_IN: &str = "water-in";
    pub const WATER_OUT: &str = "water-out";
    pub const DISINFECTANT_IN: &str = "disinfectant-in";
    pub const DISINFECTANT_OUT: &str = "disinfectant-out";
    pub const FINGER_BRAKE: &str = "finger-brake";
}

/// PWM devices.
pub mod pwm {
    pub const FINGER: &str = "finger";
}

/// Ultrasonic level sensors.
pub mod ultrasonic {
    pub const WATER_LEVEL: &str = "water-level";
    pub const DISINFECTANT_LEVEL: &str = "disinfectant-level";
}
