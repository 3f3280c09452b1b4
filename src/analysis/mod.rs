//! Analysis module - time-series scaling and distance measures

mod dtw;
mod scaling;

pub use dtw::*;
pub use scaling::*;
