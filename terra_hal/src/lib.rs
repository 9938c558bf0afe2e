//! Hardware abstraction for the Terra controller.
//!
//! The motion and machine layers consume devices purely through the
//! traits in [`gpio`]; a backend decides what is behind them. The
//! in-memory [`sim`] backend drives every test, while a real GPIO
//! backend plugs in the same way on the target hardware.

pub mod backend;
pub mod error;
pub mod gpio;
pub mod registry;
pub mod shift_register;
pub mod sim;
pub mod stepper;
pub mod ultrasonic;

pub use backend::Backend;
pub use error::DeviceError;
pub use gpio::{DigitalInput, DigitalOutput, Level, Pwm};
pub use registry::DeviceRegistry;
pub use shift_register::ShiftRegister;
pub use stepper::StepperMotor;
pub use ultrasonic::Ultrasonic;
