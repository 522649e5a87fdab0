use chrono::{DateTime, Utc};
use gateway::{GatewayStats, LinkState};
use line_protocol::{Acknowledgement, Command, ProtocolError, TelemetryRecord};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use utoipa::ToSchema;

/// # Command Request
///
/// Either switches the pump or sets one light channel's brightness:
///
/// ```json
/// { "pump": true }
/// { "light": 13, "brightness": 42 }
/// ```
#[derive(Debug, Clone, Deserialize, ToSchema)]
#[serde(untagged)]
pub enum CommandRequest {
    Pump {
        /// `true` switches the pump on.
        #[schema(example = true)]
        pump: bool,
    },
    Light {
        /// Light channel, by pin number. Must be configured on the station.
        #[schema(example = 13)]
        light: u8,
        /// Brightness in percent, `0..=100`.
        #[schema(example = 42)]
        brightness: u8,
    },
}

impl TryFrom<CommandRequest> for Command {
    type Error = ProtocolError;

    fn try_from(request: CommandRequest) -> Result<Self, Self::Error> {
        match request {
            CommandRequest::Pump { pump } => Ok(Command::pump(pump)),
            CommandRequest::Light { light, brightness } => Command::set_brightness(light, brightness),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct CommandResponse {
    /// The line written to the node.
    #[schema(example = "light13:42")]
    pub command: String,
    /// The node's answer, as received.
    #[schema(example = "ACK: light13=42")]
    pub ack: String,
    pub success: bool,
}

impl From<Acknowledgement> for CommandResponse {
    fn from(ack: Acknowledgement) -> Self {
        Self {
            command: ack.command.to_line(),
            ack: ack.text,
            success: ack.success,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    pub status: String,
    pub message: String,
}

impl ErrorResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            status: "error".to_string(),
            message: message.into(),
        }
    }
}

/// # Telemetry Response
///
/// The newest reading received on one sensor.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct TelemetryResponse {
    /// `air`, `soil` or `combined`.
    #[schema(example = "air")]
    pub channel: String,
    #[schema(example = 1)]
    pub source_id: u8,
    /// Sensor values, keyed by the names the node uses.
    pub fields: BTreeMap<String, f64>,
    pub pump_status: Option<bool>,
    /// When the station received the reading.
    #[schema(value_type = String, format = "date-time", example = "2025-03-01T10:00:00Z")]
    pub observed_at: DateTime<Utc>,
}

impl From<&TelemetryRecord> for TelemetryResponse {
    fn from(record: &TelemetryRecord) -> Self {
        Self {
            channel: record.channel().to_string(),
            source_id: record.source_id(),
            fields: record.fields().clone(),
            pump_status: record.pump_status(),
            observed_at: record.observed_at(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct StatsResponse {
    /// `disconnected`, `idle`, `sending` or `awaiting_ack`.
    pub link_state: String,
    pub lines: u64,
    pub telemetry: u64,
    pub suppressed: u64,
    pub acks: u64,
    pub stray_acks: u64,
    pub parse_errors: u64,
    pub noise: u64,
    pub overlong: u64,
    pub commands_sent: u64,
    pub command_timeouts: u64,
    pub reconnects: u64,
}

impl StatsResponse {
    pub fn new(state: LinkState, stats: GatewayStats) -> Self {
        let link_state = serde_json::to_value(state)
            .ok()
            .and_then(|value| value.as_str().map(str::to_string))
            .unwrap_or_default();

        Self {
            link_state,
            lines: stats.lines,
            telemetry: stats.telemetry,
            suppressed: stats.suppressed,
            acks: stats.acks,
            stray_acks: stats.stray_acks,
            parse_errors: stats.parse_errors,
            noise: stats.noise,
            overlong: stats.overlong,
            commands_sent: stats.commands_sent,
            command_timeouts: stats.command_timeouts,
            reconnects: stats.reconnects,
        }
    }
}
