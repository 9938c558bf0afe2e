//! HC-SR04-style ultrasonic distance sensor.
//!
//! Fires a 10 µs trigger pulse and times the echo. Distances come back
//! in centimetres; a missing or overlong echo yields `None` so the
//! caller can treat the level as unknown.

use std::sync::Arc;

use tracing::trace;

use terra_common::time::{micros, sleep_for_us};

use crate::gpio::{DigitalInput, DigitalOutput, Level};

/// Speed of sound over two-way travel, cm per microsecond.
const SOUND_SPEED_CM_PER_US: f64 = 1.0 / 29.1;

/// Longest distance the sensor can resolve, cm.
const MAX_DISTANCE_CM: f64 = 400.0;

/// Ultrasonic sensor composed from a trigger output and echo input.
pub struct Ultrasonic {
    trigger: Arc<dyn DigitalOutput>,
    echo: Arc<dyn DigitalInput>,
}

impl Ultrasonic {
    pub fn new(trigger: Arc<dyn DigitalOutput>, echo: Arc<dyn DigitalInput>) -> Self {
        Self { trigger, echo }
    }

    /// Longest time to wait for an echo at the given range, µs.
    fn max_echo_time_us(max_range_cm: f64) -> u64 {
        let bounded = max_range_cm.min(MAX_DISTANCE_CM);
        // Small fixed margin for trigger latency.
        (bounded / (SOUND_SPEED_CM_PER_US * 2.0) + 10.0) as u64
    }

    /// Measure distance in centimetres, bounded by `max_range_cm`.
    ///
    /// Returns `None` when the echo never starts or never ends within
    /// the time the bounded range allows.
    pub fn distance(&self, max_range_cm: f64) -> Option<f64> {
        let max_time = Self::max_echo_time_us(max_range_cm);

        // Settle low, then a clean 10 µs trigger pulse.
        self.trigger.write(Level::Low).ok()?;
        sleep_for_us(5);
        self.trigger.write(Level::High).ok()?;
        sleep_for_us(10);
        self.trigger.write(Level::Low).ok()?;

        let mut deadline_base = micros();
        let mut start = deadline_base;
        while !self.echo.is_active() {
            start = micros();
            if start - deadline_base > max_time {
                trace!("echo never started within {max_time} us");
                return None;
            }
        }

        deadline_base = micros();
        let mut stop = deadline_base;
        while self.echo.is_active() {
            stop = micros();
            if stop - deadline_base > max_time {
                trace!("echo never ended within {max_time} us");
                return None;
            }
        }

        let elapsed = stop.saturating_sub(start);
        Some(elapsed as f64 / 2.0 * SOUND_SPEED_CM_PER_US)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::Backend;
    use crate::sim::SimBackend;

    #[test]
    fn silent_echo_times_out() {
        let backend = SimBackend::new();
        let sensor = Ultrasonic::new(
            backend.digital_output("trigger"),
            backend.digital_input("echo", false),
        );

        assert_eq!(sensor.distance(10.0), None);
    }

    #[test]
    fn stuck_echo_times_out() {
        let backend = SimBackend::new();
        backend.set_input("echo", true);
        let sensor = Ultrasonic::new(
            backend.digital_output("trigger"),
            backend.digital_input("echo", false),
        );

        assert_eq!(sensor.distance(10.0), None);
    }

    #[test]
    fn trigger_pulse_is_emitted() {
        let backend = SimBackend::new();
        let sensor = Ultrasonic::new(
            backend.digital_output("trigger"),
            backend.digital_input("echo", false),
        );

        let _ = sensor.distance(5.0);
        use crate::sim::SimAction;
        let writes = backend.journal_for("trigger");
        assert_eq!(
            writes,
            [
                SimAction::Write(Level::Low),
                SimAction::Write(Level::High),
                SimAction::Write(Level::Low),
            ]
        );
    }

    #[test]
    fn echo_time_bound_respects_sensor_limit() {
        let near = Ultrasonic::max_echo_time_us(10.0);
        let far = Ultrasonic::max_echo_time_us(10_000.0);
        assert!(near < far);
        // Clamped to the sensor's physical range.
        assert_eq!(far, Ultrasonic::max_echo_time_us(MAX_DISTANCE_CM));
    }
}
