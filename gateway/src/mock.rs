use crate::link::{Connector, Link};
use async_trait::async_trait;
use std::{
    collections::VecDeque,
    io,
    sync::{Mutex, PoisonError},
};
use tokio::io::DuplexStream;

/// A connector over in-memory pipes. Each `connect` takes the next prepared
/// link; once they run out, connecting fails as if the port had vanished.
pub struct MockConnector {
    links: Mutex<VecDeque<DuplexStream>>,
}

impl MockConnector {
    /// Prepares `count` links and returns the node ends, in connect order.
    pub fn with_links(count: usize) -> (Self, Vec<DuplexStream>) {
        let mut gateway_ends = VecDeque::with_capacity(count);
        let mut node_ends = Vec::with_capacity(count);

        for _ in 0..count {
            let (gateway_end, node_end) = tokio::io::duplex(4096);
            gateway_ends.push_back(gateway_end);
            node_ends.push(node_end);
        }

        let connector = Self {
            links: Mutex::new(gateway_ends),
        };
        (connector, node_ends)
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self) -> io::Result<Link> {
        let next = self
            .links
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front();

        match next {
            Some(stream) => Ok(Link::from_stream(stream)),
            None => Err(io::Error::new(io::ErrorKind::NotConnected, "no mock link left")),
        }
    }

    fn describe(&self) -> String {
        "mock link".to_string()
    }
}
