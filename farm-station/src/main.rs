use anyhow::Context;
use clap::Parser;
use farm_station::{
    api::{self, AppState},
    config::Config,
    database::{self, SensorRepository},
    open_gateway,
    publisher::run_publisher,
};
use log::info;
use mqtt_client::MqttSender;
use tokio::net::TcpListener;

#[derive(Parser, Debug)]
#[command(about = "Serial gateway and API for the smart farm node")]
struct Args {
    /// Configuration file, extension optional
    #[arg(long, default_value = "farm-station/config")]
    config: String,

    /// Use a simulated node instead of the serial port
    #[arg(long)]
    simulate: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let mut config = Config::load(&args.config)
        .with_context(|| format!("failed to load configuration from {}", args.config))?;
    if args.simulate {
        config.serial.simulate = true;
    }

    info!("Loaded configuration:");
    info!("  Serial: {} @ {} baud", config.serial.port, config.serial.baud_rate);
    info!("  Lights: {:?}", config.lights.channels);
    info!("  MQTT: {}:{} ({})", config.mqtt.host, config.mqtt.port, config.mqtt.topic);
    info!("  API: {}", config.api.address());

    let gateway = open_gateway(&config.serial, config.gateway_config())
        .await
        .with_context(|| format!("cannot open serial link {}", config.serial.port))?;

    if config.database.enabled {
        let pool = database::create_pool(&config.database)
            .await
            .context("cannot connect to the database")?;
        tokio::spawn(database::run_writer(
            gateway.subscribe(),
            SensorRepository::new(pool),
        ));
    }

    if config.mqtt.enabled {
        let (sender, _eventloop) = MqttSender::spawn(
            &config.mqtt.host,
            config.mqtt.port,
            config.mqtt.keep_alive(),
            &config.mqtt.topic,
        );
        tokio::spawn(run_publisher(gateway.subscribe(), sender));
    }

    let api_addr = config.api.address();
    let listener = TcpListener::bind(&api_addr)
        .await
        .with_context(|| format!("cannot bind {}", api_addr))?;
    let router = api::router(AppState {
        gateway: gateway.clone(),
    });

    info!("Swagger UI available at http://{}/docs", api_addr);
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    gateway.shutdown().await;
    info!("farm station stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        log::error!("cannot listen for ctrl-c: {}", e);
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}
