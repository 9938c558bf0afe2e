//! Common imports for Terra crates.

pub use crate::config::{Config, ConfigError, Speed, SpeedProfile};
pub use crate::state::{SharedState, StateSnapshot};
pub use crate::types::{
    AxisId, CleaningStation, Coordinate, LengthUnit, Liquid, Phase, SpeedBand, TaskKind,
};
