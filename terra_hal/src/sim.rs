//! In-memory simulation backend.
//!
//! Every pin lives in a shared store the test can reach: inputs are
//! forced with [`SimBackend::set_input`], outputs are observed through
//! [`SimBackend::output_level`] and the ordered write journal.
//! Individual pins can be made to fail to exercise the transient-error
//! paths.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::backend::Backend;
use crate::error::DeviceError;
use crate::gpio::{DigitalInput, DigitalOutput, Level, Pwm};

/// One recorded output action.
#[derive(Debug, Clone, PartialEq)]
pub struct SimEvent {
    pub id: String,
    pub action: SimAction,
}

/// What was done to the pin.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SimAction {
    Write(Level),
    Duty(u32),
    Frequency(f64),
    Hardware(f64, f64),
}

#[derive(Default)]
struct SimInner {
    inputs: Mutex<HashMap<String, bool>>,
    outputs: Mutex<HashMap<String, Level>>,
    duties: Mutex<HashMap<String, u32>>,
    failing: Mutex<HashSet<String>>,
    journal: Mutex<Vec<SimEvent>>,
    rising: Mutex<HashMap<String, usize>>,
}

impl SimInner {
    fn record(&self, id: &str, action: SimAction) {
        if action == SimAction::Write(Level::High) {
            *self.rising.lock().entry(id.to_string()).or_insert(0) += 1;
        }
        self.journal.lock().push(SimEvent {
            id: id.to_string(),
            action,
        });
    }

    fn check(&self, id: &str) -> Result<(), DeviceError> {
        if self.failing.lock().contains(id) {
            return Err(DeviceError::Gpio {
                id: id.to_string(),
                reason: "injected failure".into(),
            });
        }
        Ok(())
    }
}

/// Simulation backend handing out in-memory pins.
#[derive(Clone, Default)]
pub struct SimBackend {
    inner: Arc<SimInner>,
}

impl SimBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Force the raw level of an input pin.
    pub fn set_input(&self, id: &str, active: bool) {
        self.inner.inputs.lock().insert(id.to_string(), active);
    }

    /// Last written level of an output pin.
    pub fn output_level(&self, id: &str) -> Option<Level> {
        self.inner.outputs.lock().get(id).copied()
    }

    /// Last commanded duty cycle of a PWM pin.
    pub fn duty(&self, id: &str) -> Option<u32> {
        self.inner.duties.lock().get(id).copied()
    }

    /// Make reads and writes on the pin fail until cleared.
    pub fn fail_pin(&self, id: &str) {
        self.inner.failing.lock().insert(id.to_string());
    }

    pub fn clear_failure(&self, id: &str) {
        self.inner.failing.lock().remove(id);
    }

    /// Ordered copy of every output action so far.
    pub fn journal(&self) -> Vec<SimEvent> {
        self.inner.journal.lock().clone()
    }

    /// Output actions recorded for one pin.
    pub fn journal_for(&self, id: &str) -> Vec<SimAction> {
        self.inner
            .journal
            .lock()
            .iter()
            .filter(|e| e.id == id)
            .map(|e| e.action)
            .collect()
    }

    /// Number of rising edges ever written to one pin. Counted as
    /// writes happen, so it stays cheap for pins that pulse fast and
    /// is unaffected by [`SimBackend::clear_journal`].
    pub fn rising_edges(&self, id: &str) -> usize {
        self.inner.rising.lock().get(id).copied().unwrap_or(0)
    }

    pub fn clear_journal(&self) {
        self.inner.journal.lock().clear();
    }
}

impl Backend for SimBackend {
    fn digital_input(&self, id: &str, active_low: bool) -> Arc<dyn DigitalInput> {
        Arc::new(SimDigitalInput {
            id: id.to_string(),
            active_low,
            inner: Arc::clone(&self.inner),
        })
    }

    fn digital_output(&self, id: &str) -> Arc<dyn DigitalOutput> {
        Arc::new(SimDigitalOutput {
            id: id.to_string(),
            inner: Arc::clone(&self.inner),
        })
    }

    fn pwm(&self, id: &str) -> Arc<dyn Pwm> {
        Arc::new(SimPwm {
            id: id.to_string(),
            inner: Arc::clone(&self.inner),
        })
    }
}

struct SimDigitalInput {
    id: String,
    active_low: bool,
    inner: Arc<SimInner>,
}

impl DigitalInput for SimDigitalInput {
    fn read_bool(&self) -> Option<bool> {
        if self.inner.check(&self.id).is_err() {
            return None;
        }
        let raw = self
            .inner
            .inputs
            .lock()
            .get(&self.id)
            .copied()
            .unwrap_or(false);
        Some(raw != self.active_low)
    }
}

struct SimDigitalOutput {
    id: String,
    inner: Arc<SimInner>,
}

impl DigitalOutput for SimDigitalOutput {
    fn write(&self, level: Level) -> Result<(), DeviceError> {
        self.inner.check(&self.id)?;
        self.inner.outputs.lock().insert(self.id.clone(), level);
        self.inner.record(&self.id, SimAction::Write(level));
        Ok(())
    }
}

struct SimPwm {
    id: String,
    inner: Arc<SimInner>,
}

impl Pwm for SimPwm {
    fn duty_cycle(&self, percent: u32) -> Result<(), DeviceError> {
        if percent > 100 {
            return Err(DeviceError::Pwm(format!(
                "duty cycle {percent} exceeds 100%"
            )));
        }
        self.inner.check(&self.id)?;
        self.inner.duties.lock().insert(self.id.clone(), percent);
        self.inner.record(&self.id, SimAction::Duty(percent));
        Ok(())
    }

    fn frequency(&self, hz: f64) -> Result<(), DeviceError> {
        if hz <= 0.0 {
            return Err(DeviceError::Pwm(format!("frequency {hz} not positive")));
        }
        self.inner.check(&self.id)?;
        self.inner.record(&self.id, SimAction::Frequency(hz));
        Ok(())
    }

    fn hardware(&self, hz: f64, duty: f64) -> Result<(), DeviceError> {
        if hz <= 0.0 || !(0.0..=1.0).contains(&duty) {
            return Err(DeviceError::Pwm(format!(
                "hardware pwm {hz} Hz at {duty} rejected"
            )));
        }
        self.inner.check(&self.id)?;
        self.inner.record(&self.id, SimAction::Hardware(hz, duty));
        Ok(())
    }

    fn write(&self, level: Level) -> Result<(), DeviceError> {
        self.inner.check(&self.id)?;
        if level == Level::Low {
            self.inner.duties.lock().insert(self.id.clone(), 0);
        }
        self.inner.outputs.lock().insert(self.id.clone(), level);
        self.inner.record(&self.id, SimAction::Write(level));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inputs_default_inactive() {
        let backend = SimBackend::new();
        let input = backend.digital_input("e-stop", false);
        assert_eq!(input.read_bool(), Some(false));

        backend.set_input("e-stop", true);
        assert_eq!(input.read_bool(), Some(true));
    }

    #[test]
    fn active_low_inverts_raw_level() {
        let backend = SimBackend::new();
        let input = backend.digital_input("reset", true);
        assert_eq!(input.read_bool(), Some(true));

        backend.set_input("reset", true);
        assert_eq!(input.read_bool(), Some(false));
    }

    #[test]
    fn failed_pin_reads_unknown_and_writes_err() {
        let backend = SimBackend::new();
        let input = backend.digital_input("height", false);
        let output = backend.digital_output("spray");

        backend.fail_pin("height");
        backend.fail_pin("spray");
        assert_eq!(input.read_bool(), None);
        assert!(!input.is_active());
        assert!(output.write(Level::High).is_err());

        backend.clear_failure("spray");
        assert!(output.write(Level::High).is_ok());
    }

    #[test]
    fn journal_preserves_write_order() {
        let backend = SimBackend::new();
        let spray = backend.digital_output("spray");
        let relay = backend.digital_output("sonicator-relay");

        spray.write(Level::High).unwrap();
        relay.write(Level::High).unwrap();
        spray.write(Level::Low).unwrap();

        let ids: Vec<_> = backend.journal().into_iter().map(|e| e.id).collect();
        assert_eq!(ids, ["spray", "sonicator-relay", "spray"]);
        assert_eq!(backend.rising_edges("spray"), 1);
    }

    #[test]
    fn pwm_validates_parameters() {
        let backend = SimBackend::new();
        let finger = backend.pwm("finger");

        finger.duty_cycle(50).unwrap();
        assert_eq!(backend.duty("finger"), Some(50));
        assert!(finger.duty_cycle(101).is_err());
        assert!(finger.frequency(0.0).is_err());
        assert!(finger.hardware(1000.0, 0.5).is_ok());
        assert!(finger.hardware(1000.0, 1.5).is_err());

        finger.write(Level::Low).unwrap();
        assert_eq!(backend.duty("finger"), Some(0));
    }
}
