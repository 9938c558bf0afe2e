//! Daisy-chained shift register driving the status outputs.
//!
//! The PLC-facing ready/running/complete lines, valves and brake are
//! addressed as virtual outputs by name. The register keeps the last
//! written image and bit-bangs the whole cascade on every change, so
//! one virtual write never disturbs its neighbours.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::DeviceError;
use crate::gpio::{DigitalOutput, Level};

/// Number of chained 8-bit chips.
pub const CASCADE_LEN: usize = 2;

/// Bit-banged shift register with named virtual outputs.
pub struct ShiftRegister {
    data: Arc<dyn DigitalOutput>,
    clock: Arc<dyn DigitalOutput>,
    latch: Arc<dyn DigitalOutput>,
    pins: HashMap<String, u8>,
    image: Mutex<[u8; CASCADE_LEN]>,
}

impl ShiftRegister {
    pub fn new(
        data: Arc<dyn DigitalOutput>,
        clock: Arc<dyn DigitalOutput>,
        latch: Arc<dyn DigitalOutput>,
    ) -> Self {
        Self {
            data,
            clock,
            latch,
            pins: HashMap::new(),
            image: Mutex::new([0; CASCADE_LEN]),
        }
    }

    /// Assign a virtual output name to a cascade bit (0..16).
    pub fn assign(&mut self, id: impl Into<String>, bit: u8) -> Result<(), DeviceError> {
        let id = id.into();
        if bit as usize >= CASCADE_LEN * 8 {
            return Err(DeviceError::Gpio {
                id,
                reason: format!("bit {bit} outside cascade"),
            });
        }
        if self.pins.contains_key(&id) {
            return Err(DeviceError::Duplicate(id));
        }
        self.pins.insert(id, bit);
        Ok(())
    }

    /// Whether a virtual output name is assigned.
    pub fn contains(&self, id: &str) -> bool {
        self.pins.contains_key(id)
    }

    /// Drive one virtual output.
    pub fn write(&self, id: &str, level: Level) -> Result<(), DeviceError> {
        let bit = *self
            .pins
            .get(id)
            .ok_or_else(|| DeviceError::NotFound(id.into()))?;

        let mut image = self.image.lock();
        let chip = (bit / 8) as usize;
        let mask = 1u8 << (bit % 8);
        if level.is_high() {
            image[chip] |= mask;
        } else {
            image[chip] &= !mask;
        }
        self.flush(&image)
    }

    /// Drive every virtual output to the same level at once.
    pub fn write_all(&self, level: Level) -> Result<(), DeviceError> {
        let mut image = self.image.lock();
        let fill = if level.is_high() { 0xFF } else { 0x00 };
        *image = [fill; CASCADE_LEN];
        self.flush(&image)
    }

    /// Current logical level of one virtual output.
    pub fn level(&self, id: &str) -> Option<Level> {
        let bit = *self.pins.get(id)?;
        let image = self.image.lock();
        let set = image[(bit / 8) as usize] & (1 << (bit % 8)) != 0;
        Some(Level::from_bool(set))
    }

    /// Shift the image out, furthest chip first, MSB first.
    fn flush(&self, image: &[u8; CASCADE_LEN]) -> Result<(), DeviceError> {
        self.latch.write(Level::Low)?;
        for chip in image.iter().rev() {
            for i in (0..8).rev() {
                self.data.write(Level::from_bool(chip & (1 << i) != 0))?;
                self.clock.write(Level::High)?;
                self.clock.write(Level::Low)?;
            }
        }
        self.latch.write(Level::High)
    }
}
