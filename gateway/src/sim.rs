//! A software stand-in for the farm node.
//!
//! It speaks the same line protocol as the firmware: it periodically samples
//! (synthetic) air and soil sensors, prints a telemetry line only when the
//! change-suppression policy says so, and answers `on`/`off`/`light<ID>:<P>`
//! with one `ACK:` or `ERR:` line.

use crate::link::{Connector, Link};
use async_trait::async_trait;
use line_protocol::{
    ChangeSuppressor, Channel, Command, LightChannels, LineFramer, PumpState, Reading, Thresholds,
};
use log::{debug, warn};
use std::{collections::BTreeMap, io, time::Duration};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, split};

#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub lights: LightChannels,
    pub thresholds: Thresholds,
    pub sample_interval: Duration,
    pub air_sensors: u8,
    pub soil_sensors: u8,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            lights: LightChannels::default(),
            thresholds: Thresholds::default(),
            sample_interval: Duration::from_secs(1),
            air_sensors: 2,
            soil_sensors: 1,
        }
    }
}

pub struct SimulatedNode {
    config: NodeConfig,
    suppressor: ChangeSuppressor,
    pump_on: bool,
    brightness: BTreeMap<u8, u8>,
    tick: u64,
}

impl SimulatedNode {
    pub fn new(config: NodeConfig) -> Self {
        let suppressor = ChangeSuppressor::new(config.thresholds.clone());
        Self {
            config,
            suppressor,
            pump_on: false,
            brightness: BTreeMap::new(),
            tick: 0,
        }
    }

    /// Answers a single command line, updating the actuator state.
    pub fn handle_command(&mut self, line: &str) -> String {
        let command = match line.parse::<Command>() {
            Ok(command) => command,
            Err(_) => return "ERR: unknown command".to_string(),
        };

        match command {
            Command::Pump(state) => {
                self.pump_on = state == PumpState::On;
                format!("ACK: pump {}", if self.pump_on { "on" } else { "off" })
            }
            Command::SetBrightness { channel, percent } => {
                if !self.config.lights.contains(channel) {
                    return format!("ERR: invalid light channel {}", channel);
                }
                self.brightness.insert(channel, percent);
                format!("ACK: light{}={}", channel, percent)
            }
        }
    }

    pub fn brightness(&self, channel: u8) -> Option<u8> {
        self.brightness.get(&channel).copied()
    }

    pub fn pump_on(&self) -> bool {
        self.pump_on
    }

    /// Samples every sensor once and returns the lines worth printing.
    pub fn sample(&mut self) -> Vec<String> {
        self.tick += 1;
        let t = self.tick as f64;
        let mut readings = Vec::new();

        for id in 1..=self.config.air_sensors {
            let phase = t / 30.0 + id as f64;
            readings.push(
                Reading::new(Channel::Air, id)
                    .with_field("temp", round1(24.0 + 1.5 * phase.sin()))
                    .with_field("air_humidity", round1(60.0 + 5.0 * phase.cos()))
                    .with_pump_status(self.pump_on),
            );
        }

        for id in 1..=self.config.soil_sensors {
            let drift = if self.pump_on { 0.8 } else { -0.2 };
            let base = 40.0 + drift * (t % 50.0);
            readings.push(
                Reading::new(Channel::Soil, id)
                    .with_field("soil_humidity", round1(base.clamp(0.0, 100.0)))
                    .with_pump_status(self.pump_on),
            );
        }

        readings
            .into_iter()
            .filter(|reading| self.suppressor.should_emit(reading))
            .filter_map(|reading| reading.to_line().ok())
            .collect()
    }

    /// Serves one connection until the gateway side goes away.
    pub async fn run<S>(mut self, stream: S) -> io::Result<()>
    where
        S: AsyncRead + AsyncWrite,
    {
        let (reader, mut writer) = split(stream);
        let mut framer = LineFramer::new(reader);
        let mut ticker = tokio::time::interval(self.config.sample_interval);

        loop {
            tokio::select! {
                line = framer.next_line() => {
                    let line = match line {
                        Ok(line) => line,
                        Err(e) => {
                            debug!("simulated node disconnected: {}", e);
                            return Ok(());
                        }
                    };
                    let answer = self.handle_command(line.text());
                    writer.write_all(format!("{}\n", answer).as_bytes()).await?;
                    writer.flush().await?;
                }
                _ = ticker.tick() => {
                    for line in self.sample() {
                        writer.write_all(format!("{}\n", line).as_bytes()).await?;
                    }
                    writer.flush().await?;
                }
            }
        }
    }
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

/// Hands out in-memory links, each backed by a fresh [`SimulatedNode`].
pub struct SimConnector {
    config: NodeConfig,
}

impl SimConnector {
    pub fn new(config: NodeConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Connector for SimConnector {
    async fn connect(&self) -> io::Result<Link> {
        let (gateway_end, node_end) = tokio::io::duplex(4096);
        let node = SimulatedNode::new(self.config.clone());

        tokio::spawn(async move {
            if let Err(e) = node.run(node_end).await {
                warn!("simulated node stopped: {}", e);
            }
        });

        Ok(Link::from_stream(gateway_end))
    }

    fn describe(&self) -> String {
        "simulated node".to_string()
    }
}
