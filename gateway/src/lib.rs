//! Serial gateway between the farm node and everything that wants its data.
//!
//! One [`Gateway`] owns the link. It classifies every line the node sends,
//! fans telemetry out to subscribers and a latest-value cache, and runs
//! commands one at a time, pairing each with the next acknowledgement line.

mod correlator;
pub mod error;
mod fanout;
pub mod link;
pub mod mock;
pub mod sim;
mod stats;

pub use correlator::LinkState;
pub use error::GatewayError;
pub use fanout::Subscription;
pub use link::{Backoff, Connector, Link, SerialConnector};
pub use stats::GatewayStats;

use correlator::{Correlator, LinkSettings, Request};
use fanout::TelemetryHub;
use line_protocol::{
    Acknowledgement, ChangeSuppressor, ChannelId, Command, DEFAULT_MAX_LINE_LEN, LightChannels,
    TelemetryRecord, Thresholds,
};
use log::error;
use stats::Counters;
use std::{sync::Arc, time::Duration};
use tokio::sync::{mpsc, oneshot, watch};

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// How long a command may wait for its `ACK:`/`ERR:` line.
    pub command_timeout: Duration,
    pub max_line_len: usize,
    /// Silence after which the link is considered dead. `None` waits forever.
    pub idle_timeout: Option<Duration>,
    pub backoff_initial: Duration,
    pub backoff_max: Duration,
    pub lights: LightChannels,
    /// Gateway-side mirror of the node's suppression policy. `None` fans out
    /// every reading.
    pub suppression: Option<Thresholds>,
    pub subscriber_capacity: usize,
    /// Commands that may queue behind the one in flight.
    pub request_queue: usize,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            command_timeout: Duration::from_secs(2),
            max_line_len: DEFAULT_MAX_LINE_LEN,
            idle_timeout: None,
            backoff_initial: Duration::from_millis(500),
            backoff_max: Duration::from_secs(30),
            lights: LightChannels::default(),
            suppression: Some(Thresholds::default()),
            subscriber_capacity: 256,
            request_queue: 16,
        }
    }
}

/// Handle to the gateway. Cheap to clone; the link task stops once the last
/// handle is dropped.
#[derive(Clone)]
pub struct Gateway {
    requests: mpsc::Sender<Request>,
    hub: Arc<TelemetryHub>,
    counters: Arc<Counters>,
    state: watch::Receiver<LinkState>,
    stop: Arc<watch::Sender<bool>>,
    lights: Arc<LightChannels>,
}

impl Gateway {
    /// Opens the link once up front and fails if that is not possible.
    /// Later interruptions are retried in the background.
    pub async fn start<C: Connector>(connector: C, config: GatewayConfig) -> Result<Self, GatewayError> {
        let link = connector.connect().await.map_err(|e| {
            error!("cannot open {}: {}", connector.describe(), e);
            GatewayError::LinkUnavailable
        })?;

        Ok(Self::launch(connector, config, Some(link)))
    }

    /// Starts without waiting for the link; connecting happens in the
    /// background with the configured backoff.
    pub fn spawn<C: Connector>(connector: C, config: GatewayConfig) -> Self {
        Self::launch(connector, config, None)
    }

    fn launch<C: Connector>(connector: C, config: GatewayConfig, link: Option<Link>) -> Self {
        let (requests, requests_rx) = mpsc::channel(config.request_queue.max(1));
        let (state_tx, state) = watch::channel(LinkState::Disconnected);
        let (stop, stop_rx) = watch::channel(false);
        let hub = Arc::new(TelemetryHub::new(config.subscriber_capacity));
        let counters = Arc::new(Counters::default());

        let correlator = Correlator {
            connector,
            settings: LinkSettings {
                command_timeout: config.command_timeout,
                max_line_len: config.max_line_len,
                idle_timeout: config.idle_timeout,
                backoff: Backoff::new(config.backoff_initial, config.backoff_max),
            },
            requests: requests_rx,
            hub: hub.clone(),
            counters: counters.clone(),
            state: state_tx,
            stop: stop_rx,
            suppressor: config.suppression.map(ChangeSuppressor::new),
        };
        tokio::spawn(correlator.run(link));

        Self {
            requests,
            hub,
            counters,
            state,
            stop: Arc::new(stop),
            lights: Arc::new(config.lights),
        }
    }

    /// Runs one command on the node and returns its acknowledgement.
    ///
    /// Concurrent callers queue; only one command is ever on the wire. An
    /// `ERR:` answer is returned as an acknowledgement with `success == false`.
    pub async fn send_command(&self, command: Command) -> Result<Acknowledgement, GatewayError> {
        self.lights.validate(&command)?;

        let (reply, response) = oneshot::channel();
        self.requests
            .send(Request { command, reply })
            .await
            .map_err(|_| GatewayError::LinkUnavailable)?;

        response.await.map_err(|_| GatewayError::LinkUnavailable)?
    }

    pub fn subscribe(&self) -> Subscription {
        self.hub.subscribe()
    }

    /// Newest record received on `id`, whether or not it was fanned out.
    pub fn latest_by_channel(&self, id: ChannelId) -> Option<TelemetryRecord> {
        self.hub.latest(id)
    }

    pub fn latest_all(&self) -> Vec<TelemetryRecord> {
        self.hub.latest_all()
    }

    pub fn stats(&self) -> GatewayStats {
        self.counters.snapshot()
    }

    pub fn link_state(&self) -> LinkState {
        *self.state.borrow()
    }

    /// Waits until the link task reports `state`.
    pub async fn wait_for_state(&self, state: LinkState) {
        let mut rx = self.state.clone();
        let _ = rx.wait_for(|current| *current == state).await;
    }

    /// Stops the link task and waits for it to release the link. A command
    /// in flight is answered with `LinkUnavailable`, as is every later one.
    pub async fn shutdown(&self) {
        self.stop.send_replace(true);

        let mut rx = self.state.clone();
        // the task drops its end of the state channel when it exits
        while rx.changed().await.is_ok() {}
    }
}
