//! Streaming module - MQTT ingress and InfluxDB egress

mod influx;
mod mqtt;

pub use influx::*;
pub use mqtt::*;
