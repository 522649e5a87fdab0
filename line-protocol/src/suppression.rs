//! Change suppression: only emit a reading when it moved far enough from the
//! last one that was emitted for the same channel and sensor.
//!
//! The node applies this before printing telemetry and the gateway mirrors it
//! before fanning records out, so downstream consumers see a reading only on
//! meaningful change (plus the first one after start-up).

use crate::telemetry::{Channel, ChannelId, Reading};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Per channel, per field absolute thresholds. Fields without a threshold
/// are not tracked.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Thresholds(BTreeMap<Channel, BTreeMap<String, f64>>);

impl Thresholds {
    /// No tracked fields at all; only the first reading and pump changes emit.
    pub fn empty() -> Self {
        Self(BTreeMap::new())
    }

    pub fn with(mut self, channel: Channel, field: &str, threshold: f64) -> Self {
        self.set(channel, field, threshold);
        self
    }

    pub fn set(&mut self, channel: Channel, field: &str, threshold: f64) {
        self.0
            .entry(channel)
            .or_default()
            .insert(field.to_string(), threshold);
    }

    pub fn get(&self, channel: Channel, field: &str) -> Option<f64> {
        self.0.get(&channel).and_then(|fields| fields.get(field)).copied()
    }

    fn tracked(&self, channel: Channel) -> impl Iterator<Item = (&str, f64)> {
        self.0
            .get(&channel)
            .into_iter()
            .flat_map(|fields| fields.iter().map(|(name, t)| (name.as_str(), *t)))
    }
}

impl Default for Thresholds {
    fn default() -> Self {
        Self::empty()
            .with(Channel::Air, "temp", 0.2)
            .with(Channel::Air, "air_humidity", 0.5)
            .with(Channel::Soil, "soil_humidity", 1.0)
            .with(Channel::Combined, "temperature", 0.2)
            .with(Channel::Combined, "humidity", 0.5)
            .with(Channel::Combined, "soil_moisture", 1.0)
    }
}

#[derive(Debug, Clone)]
struct Snapshot {
    fields: BTreeMap<String, f64>,
    pump_status: Option<bool>,
}

/// Remembers the last emitted reading per [`ChannelId`].
#[derive(Debug, Clone, Default)]
pub struct ChangeSuppressor {
    thresholds: Thresholds,
    last_emitted: HashMap<ChannelId, Snapshot>,
}

impl ChangeSuppressor {
    pub fn new(thresholds: Thresholds) -> Self {
        Self {
            thresholds,
            last_emitted: HashMap::new(),
        }
    }

    /// Decides whether `reading` should be emitted, and if so records it as
    /// the new reference for its channel. Other channels are untouched.
    pub fn should_emit(&mut self, reading: &Reading) -> bool {
        let id = reading.channel_id();
        let emit = match self.last_emitted.get(&id) {
            None => true,
            Some(last) => self.changed(last, reading),
        };

        if emit {
            self.last_emitted.insert(
                id,
                Snapshot {
                    fields: reading.fields().clone(),
                    pump_status: reading.pump_status(),
                },
            );
        }

        emit
    }

    /// Forgets every snapshot, so the next reading on each channel emits.
    pub fn reset(&mut self) {
        self.last_emitted.clear();
    }

    /// Last emitted value of `field` on `id`.
    pub fn last_emitted(&self, id: ChannelId, field: &str) -> Option<f64> {
        self.last_emitted
            .get(&id)
            .and_then(|snapshot| snapshot.fields.get(field))
            .copied()
    }

    fn changed(&self, last: &Snapshot, reading: &Reading) -> bool {
        if last.pump_status != reading.pump_status() {
            return true;
        }

        self.thresholds
            .tracked(reading.channel())
            .any(|(field, threshold)| {
                match (last.fields.get(field).copied(), reading.field(field)) {
                    (Some(before), Some(now)) => {
                        (now - before).abs() > threshold || before.is_nan() != now.is_nan()
                    }
                    (None, None) => false,
                    // appeared or disappeared
                    _ => true,
                }
            })
    }
}
