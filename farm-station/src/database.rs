use crate::{config::DatabaseConfig, error::StationError};
use chrono::{DateTime, Utc};
use gateway::Subscription;
use line_protocol::{Channel, TelemetryRecord};
use log::{error, info};
use sqlx::{Pool, Postgres, postgres::PgPoolOptions};

pub async fn create_pool(config: &DatabaseConfig) -> Result<Pool<Postgres>, StationError> {
    let pool = PgPoolOptions::new()
        .max_connections(config.pool_size)
        .connect(&config.url)
        .await?;

    sqlx::migrate!("./migrations").run(&pool).await?;

    Ok(pool)
}

/// One row of the `sensor` table. Each schema's fields land in the column
/// holding the same quantity.
#[derive(Debug, Clone, PartialEq)]
pub struct SensorRow {
    pub observed_at: DateTime<Utc>,
    pub channel: &'static str,
    pub source_id: i16,
    pub temp: Option<f64>,
    pub air_humidity: Option<f64>,
    pub soil_humidity: Option<f64>,
    pub pump_status: Option<bool>,
}

impl From<&TelemetryRecord> for SensorRow {
    fn from(record: &TelemetryRecord) -> Self {
        let (temp, air_humidity, soil_humidity) = match record.channel() {
            Channel::Combined => (
                record.field("temperature"),
                record.field("humidity"),
                record.field("soil_moisture"),
            ),
            Channel::Air => (record.field("temp"), record.field("air_humidity"), None),
            Channel::Soil => (None, None, record.field("soil_humidity")),
        };

        Self {
            observed_at: record.observed_at(),
            channel: record.channel().as_str(),
            source_id: i16::from(record.source_id()),
            temp,
            air_humidity,
            soil_humidity,
            pump_status: record.pump_status(),
        }
    }
}

pub struct SensorRepository {
    pool: Pool<Postgres>,
}

impl SensorRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    pub async fn save(&self, row: &SensorRow) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO sensor (observed_at, channel, source_id, temp, air_humidity, soil_humidity, pump_status)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(row.observed_at)
        .bind(row.channel)
        .bind(row.source_id)
        .bind(row.temp)
        .bind(row.air_humidity)
        .bind(row.soil_humidity)
        .bind(row.pump_status)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

/// Stores every record the gateway emits until it shuts down. A failed
/// insert loses that record only.
pub async fn run_writer(mut telemetry: Subscription, repository: SensorRepository) {
    info!("database writer started");

    while let Some(record) = telemetry.recv().await {
        let row = SensorRow::from(&record);
        if let Err(e) = repository.save(&row).await {
            error!("failed to store {} reading: {}", record.channel_id(), e);
        }
    }

    info!(
        "database writer stopped ({} records missed)",
        telemetry.missed()
    );
}
