use log::{debug, warn};
use rumqttc::{AsyncClient, ClientError, Event, EventLoop, MqttOptions, Outgoing, QoS};
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Pause before polling the event loop again after a connection error.
const RETRY_DELAY: Duration = Duration::from_secs(2);

#[derive(Debug, Error)]
pub enum SendError {
    #[error("cannot encode payload: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("mqtt client: {0}")]
    Client(#[from] ClientError),
}

/// Publishes JSON payloads to a single topic.
#[derive(Clone)]
pub struct MqttSender {
    client: AsyncClient,
    topic: String,
}

impl MqttSender {
    /// Builds a sender and hands back the event loop, which must be polled
    /// for anything to reach the broker.
    pub fn new(host: &str, port: u16, keep_alive: Duration, topic: &str) -> (Self, EventLoop) {
        let mut options = MqttOptions::new(client_id(), host, port);
        options.set_keep_alive(keep_alive);

        let (client, eventloop) = AsyncClient::new(options, 10);

        (
            Self {
                client,
                topic: topic.to_string(),
            },
            eventloop,
        )
    }

    /// Same as [`MqttSender::new`], with the event loop driven by a
    /// background task that keeps reconnecting after broker errors.
    pub fn spawn(host: &str, port: u16, keep_alive: Duration, topic: &str) -> (Self, JoinHandle<()>) {
        let (sender, eventloop) = Self::new(host, port, keep_alive, topic);
        let handle = tokio::spawn(drive(eventloop));
        (sender, handle)
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub async fn publish(&self, payload: &str) -> Result<(), ClientError> {
        self.client
            .publish(&self.topic, QoS::AtLeastOnce, false, payload.as_bytes())
            .await?;

        debug!("queued {} bytes for {}", payload.len(), self.topic);
        Ok(())
    }

    pub async fn publish_json<T: Serialize>(&self, value: &T) -> Result<(), SendError> {
        let payload = serde_json::to_string(value)?;
        self.publish(&payload).await?;
        Ok(())
    }
}

fn client_id() -> String {
    format!("farm-station-{}", Uuid::new_v4())
}

async fn drive(mut eventloop: EventLoop) {
    loop {
        match eventloop.poll().await {
            Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                debug!("mqtt client disconnected");
                return;
            }
            Ok(event) => debug!("mqtt event: {:?}", event),
            Err(e) => {
                warn!("mqtt connection error: {}, retrying in {:?}", e, RETRY_DELAY);
                tokio::time::sleep(RETRY_DELAY).await;
            }
        }
    }
}
