//! JSON shapes of the telemetry lines as the node writes them.

use crate::{
    error::ProtocolError,
    telemetry::{Channel, Reading},
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize)]
struct CombinedWire {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    humidity: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    soil_moisture: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pump_status: Option<bool>,
}

#[derive(Debug, Serialize, Deserialize)]
struct AirWire {
    #[serde(default)]
    air_id: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    temp: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    air_humidity: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pump_status: Option<bool>,
}

#[derive(Debug, Serialize, Deserialize)]
struct SoilWire {
    #[serde(default)]
    soil_id: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    soil_humidity: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pump_status: Option<bool>,
}

/// Split schema, selected by the `"type"` discriminator.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum SplitWire {
    Air(AirWire),
    Soil(SoilWire),
}

fn collect(reading: Reading, fields: &[(&str, Option<f64>)]) -> Result<Reading, ProtocolError> {
    let mut reading = reading;
    let mut any = false;
    for (name, value) in fields {
        if let Some(value) = value {
            reading = reading.with_field(name, *value);
            any = true;
        }
    }

    if any {
        Ok(reading)
    } else {
        Err(ProtocolError::NoSensorFields)
    }
}

fn with_pump(reading: Reading, pump_status: Option<bool>) -> Reading {
    match pump_status {
        Some(on) => reading.with_pump_status(on),
        None => reading,
    }
}

/// Decodes one telemetry line. The presence of `"type"` picks the split
/// schema; without it the line must match the combined schema.
pub(crate) fn decode(line: &str) -> Result<Reading, ProtocolError> {
    let value: serde_json::Value = serde_json::from_str(line)?;
    let object = value.as_object().ok_or(ProtocolError::NotAnObject)?;

    if object.contains_key("type") {
        match serde_json::from_value::<SplitWire>(value)? {
            SplitWire::Air(air) => {
                let reading = Reading::new(Channel::Air, air.air_id);
                let reading = collect(
                    reading,
                    &[("temp", air.temp), ("air_humidity", air.air_humidity)],
                )?;
                Ok(with_pump(reading, air.pump_status))
            }
            SplitWire::Soil(soil) => {
                let reading = Reading::new(Channel::Soil, soil.soil_id);
                let reading = collect(reading, &[("soil_humidity", soil.soil_humidity)])?;
                Ok(with_pump(reading, soil.pump_status))
            }
        }
    } else {
        let combined: CombinedWire = serde_json::from_value(value)?;
        let reading = collect(
            Reading::new(Channel::Combined, 0),
            &[
                ("temperature", combined.temperature),
                ("humidity", combined.humidity),
                ("soil_moisture", combined.soil_moisture),
            ],
        )?;
        Ok(with_pump(reading, combined.pump_status))
    }
}

/// Encodes a reading the way the node firmware prints it.
pub(crate) fn encode(reading: &Reading) -> Result<String, ProtocolError> {
    let line = match reading.channel() {
        Channel::Air => serde_json::to_string(&SplitWire::Air(AirWire {
            air_id: reading.source_id(),
            temp: reading.field("temp"),
            air_humidity: reading.field("air_humidity"),
            pump_status: reading.pump_status(),
        }))?,
        Channel::Soil => serde_json::to_string(&SplitWire::Soil(SoilWire {
            soil_id: reading.source_id(),
            soil_humidity: reading.field("soil_humidity"),
            pump_status: reading.pump_status(),
        }))?,
        Channel::Combined => serde_json::to_string(&CombinedWire {
            temperature: reading.field("temperature"),
            humidity: reading.field("humidity"),
            soil_moisture: reading.field("soil_moisture"),
            pump_status: reading.pump_status(),
        })?,
    };

    Ok(line)
}
