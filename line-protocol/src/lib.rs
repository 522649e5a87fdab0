//! Text line protocol spoken between the farm node and the gateway.
//!
//! The node pushes newline-terminated telemetry (JSON objects) and answers
//! commands (`on`, `off`, `light<ID>:<0..100>`) with a single `ACK:`/`ERR:`
//! line, all on the same serial wire. This crate only knows how to cut the
//! byte stream into lines, tell those lines apart and decide whether a
//! reading is worth emitting; it never touches the link itself.

pub mod classify;
pub mod command;
pub mod error;
pub mod framer;
pub mod suppression;
pub mod telemetry;
mod wire;

pub use classify::{AckLine, Classified, Unrecognized, UnrecognizedReason, classify};
pub use command::{Acknowledgement, Command, LightChannels, PumpState};
pub use error::ProtocolError;
pub use framer::{DEFAULT_MAX_LINE_LEN, Line, LineFramer, LinkInterrupted};
pub use suppression::{ChangeSuppressor, Thresholds};
pub use telemetry::{Channel, ChannelId, Reading, TelemetryRecord};
