use chrono::Utc;
use line_protocol::{Channel, Reading};
use mqtt_client::MqttSender;
use std::time::Duration;

#[tokio::main]
async fn main() {
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("debug"));

    let (sender, eventloop) =
        MqttSender::spawn("127.0.0.1", 1883, Duration::from_secs(30), "smartfarm/sensors");

    for i in 0..7 {
        tokio::time::sleep(Duration::from_millis(500)).await;
        let record = Reading::new(Channel::Air, 1)
            .with_field("temp", 22.0 + i as f64 * 0.5)
            .with_field("air_humidity", 60.0)
            .with_pump_status(false)
            .observe(Utc::now());

        sender
            .publish_json(&record)
            .await
            .expect("Error sending message. Is the broker on?");
    }

    tokio::time::sleep(Duration::from_secs(1)).await;
    eventloop.abort();
}
