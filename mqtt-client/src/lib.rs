//! Thin MQTT publishing layer used by the farm station.

pub mod sender;

pub use sender::{MqttSender, SendError};
