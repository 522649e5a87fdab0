use gateway::Subscription;
use log::{info, warn};
use mqtt_client::MqttSender;

/// Forwards every emitted record to the broker as JSON. Publishing only
/// queues into the MQTT client, so a dead broker never backs up the gateway.
pub async fn run_publisher(mut telemetry: Subscription, sender: MqttSender) {
    info!("publishing telemetry to {}", sender.topic());

    while let Some(record) = telemetry.recv().await {
        if let Err(e) = sender.publish_json(&record).await {
            warn!("dropping {} reading for mqtt: {}", record.channel_id(), e);
        }
    }

    info!("mqtt publisher stopped ({} records missed)", telemetry.missed());
}
