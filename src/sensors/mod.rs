//! Sensor data model and per-device windowing

mod types;
mod window_store;

pub use types::*;
pub use window_store::*;
