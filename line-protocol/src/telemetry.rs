use crate::error::ProtocolError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fmt, str::FromStr};

/// Logical sensor stream a reading belongs to.
///
/// Split deployments report `air` and `soil` separately (each possibly from
/// several sensors), older ones send a single `combined` record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Air,
    Soil,
    Combined,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Air => "air",
            Channel::Soil => "soil",
            Channel::Combined => "combined",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Channel {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "air" => Ok(Channel::Air),
            "soil" => Ok(Channel::Soil),
            "combined" => Ok(Channel::Combined),
            other => Err(ProtocolError::UnknownChannel(other.to_string())),
        }
    }
}

/// A channel plus the id of the sensor on it (`air_id`, `soil_id`).
/// The combined schema has no id and always uses `0`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChannelId {
    pub channel: Channel,
    pub source_id: u8,
}

impl ChannelId {
    pub fn new(channel: Channel, source_id: u8) -> Self {
        Self { channel, source_id }
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.channel, self.source_id)
    }
}

/// A decoded telemetry line, before the gateway stamps it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    channel: Channel,
    source_id: u8,
    fields: BTreeMap<String, f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pump_status: Option<bool>,
}

impl Reading {
    pub fn new(channel: Channel, source_id: u8) -> Self {
        Self {
            channel,
            source_id,
            fields: BTreeMap::new(),
            pump_status: None,
        }
    }

    pub fn with_field(mut self, name: &str, value: f64) -> Self {
        self.fields.insert(name.to_string(), value);
        self
    }

    pub fn with_pump_status(mut self, on: bool) -> Self {
        self.pump_status = Some(on);
        self
    }

    pub fn channel(&self) -> Channel {
        self.channel
    }

    pub fn source_id(&self) -> u8 {
        self.source_id
    }

    pub fn channel_id(&self) -> ChannelId {
        ChannelId::new(self.channel, self.source_id)
    }

    pub fn field(&self, name: &str) -> Option<f64> {
        self.fields.get(name).copied()
    }

    pub fn fields(&self) -> &BTreeMap<String, f64> {
        &self.fields
    }

    pub fn pump_status(&self) -> Option<bool> {
        self.pump_status
    }

    /// Renders the reading as the node prints it on the wire (no newline).
    pub fn to_line(&self) -> Result<String, ProtocolError> {
        crate::wire::encode(self)
    }

    /// Stamps the reading with its receive time. The node has no clock, so
    /// this is the only timestamp a record ever carries.
    pub fn observe(self, observed_at: DateTime<Utc>) -> TelemetryRecord {
        TelemetryRecord {
            reading: self,
            observed_at,
        }
    }
}

/// A reading as received by the gateway. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryRecord {
    #[serde(flatten)]
    reading: Reading,
    observed_at: DateTime<Utc>,
}

impl TelemetryRecord {
    pub fn reading(&self) -> &Reading {
        &self.reading
    }

    pub fn channel(&self) -> Channel {
        self.reading.channel
    }

    pub fn source_id(&self) -> u8 {
        self.reading.source_id
    }

    pub fn channel_id(&self) -> ChannelId {
        self.reading.channel_id()
    }

    pub fn field(&self, name: &str) -> Option<f64> {
        self.reading.field(name)
    }

    pub fn fields(&self) -> &BTreeMap<String, f64> {
        &self.reading.fields
    }

    pub fn pump_status(&self) -> Option<bool> {
        self.reading.pump_status
    }

    pub fn observed_at(&self) -> DateTime<Utc> {
        self.observed_at
    }
}
