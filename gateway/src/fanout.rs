use line_protocol::{ChannelId, TelemetryRecord};
use log::warn;
use std::{
    collections::HashMap,
    sync::{PoisonError, RwLock},
};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio_stream::{Stream, StreamExt, wrappers::BroadcastStream};

/// Latest-value cache plus broadcast to every subscriber.
pub(crate) struct TelemetryHub {
    latest: RwLock<HashMap<ChannelId, TelemetryRecord>>,
    tx: broadcast::Sender<TelemetryRecord>,
}

impl TelemetryHub {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            latest: RwLock::new(HashMap::new()),
            tx,
        }
    }

    /// Records `record` as the newest received value for its channel and,
    /// when `emit` is set, hands it to subscribers. Never waits on them.
    pub fn publish(&self, record: TelemetryRecord, emit: bool) {
        {
            let mut latest = self.latest.write().unwrap_or_else(PoisonError::into_inner);
            latest.insert(record.channel_id(), record.clone());
        }

        if emit {
            // no subscribers is fine
            let _ = self.tx.send(record);
        }
    }

    pub fn latest(&self, id: ChannelId) -> Option<TelemetryRecord> {
        self.latest
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .cloned()
    }

    pub fn latest_all(&self) -> Vec<TelemetryRecord> {
        let mut records: Vec<TelemetryRecord> = self
            .latest
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        records.sort_by_key(|record| record.channel_id());
        records
    }

    pub fn subscribe(&self) -> Subscription {
        Subscription {
            rx: self.tx.subscribe(),
            missed: 0,
        }
    }
}

/// A subscriber's view of the telemetry stream, in receive order.
///
/// A subscriber that falls more than the channel capacity behind loses the
/// oldest records; that only affects this subscriber.
pub struct Subscription {
    rx: broadcast::Receiver<TelemetryRecord>,
    missed: u64,
}

impl Subscription {
    /// Next record, or `None` once the gateway is gone.
    pub async fn recv(&mut self) -> Option<TelemetryRecord> {
        loop {
            match self.rx.recv().await {
                Ok(record) => return Some(record),
                Err(RecvError::Lagged(n)) => {
                    self.missed += n;
                    warn!("subscriber lagged, {} telemetry records dropped", n);
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Records this subscriber lost by lagging.
    pub fn missed(&self) -> u64 {
        self.missed
    }

    pub fn into_stream(self) -> impl Stream<Item = TelemetryRecord> {
        BroadcastStream::new(self.rx).filter_map(|item| match item {
            Ok(record) => Some(record),
            Err(e) => {
                warn!("subscriber stream: {}", e);
                None
            }
        })
    }
}
