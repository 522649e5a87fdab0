//! Farm station: serial gateway to the farm node plus its consumers
//! (PostgreSQL writer, MQTT publisher and the HTTP API).

pub mod api;
pub mod config;
pub mod database;
pub mod error;
pub mod models;
pub mod publisher;

use crate::{config::SerialConfig, error::StationError};
use gateway::{
    Connector, Gateway, GatewayConfig, SerialConnector,
    sim::{NodeConfig, SimConnector},
};
use line_protocol::LightChannels;
use log::{info, warn};

/// Opens the serial gateway described by `serial`.
///
/// With `fail_fast` an unavailable port is a startup error; otherwise the
/// gateway keeps retrying in the background.
pub async fn open_gateway(
    serial: &SerialConfig,
    config: GatewayConfig,
) -> Result<Gateway, StationError> {
    if serial.simulate {
        info!("using a simulated node instead of {}", serial.port);
        let node = NodeConfig {
            lights: LightChannels::new(config.lights.iter()),
            ..NodeConfig::default()
        };
        return start(SimConnector::new(node), config, serial.fail_fast).await;
    }

    let connector = SerialConnector::new(&serial.port, serial.baud_rate);
    start(connector, config, serial.fail_fast).await
}

async fn start<C: Connector>(
    connector: C,
    config: GatewayConfig,
    fail_fast: bool,
) -> Result<Gateway, StationError> {
    if fail_fast {
        return Ok(Gateway::start(connector, config).await?);
    }

    warn!("fail_fast disabled, connecting to {} in the background", connector.describe());
    Ok(Gateway::spawn(connector, config))
}
