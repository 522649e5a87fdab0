use async_trait::async_trait;
use futures::future::join_all;
use gateway::{
    Connector, Gateway, GatewayConfig, GatewayError, Link, LinkState,
    mock::MockConnector,
    sim::{NodeConfig, SimConnector},
};
use line_protocol::{Channel, ChannelId, Command, LightChannels, LineFramer, Thresholds};
use std::{
    collections::VecDeque,
    io,
    pin::Pin,
    sync::Mutex,
    task::{Context, Poll},
    time::Duration,
};
use tokio::{
    io::{AsyncWrite, AsyncWriteExt, DuplexStream, ReadHalf, WriteHalf, split},
    time::{sleep, timeout},
};

/// The node end of a mock link.
struct Node {
    framer: LineFramer<ReadHalf<DuplexStream>>,
    writer: WriteHalf<DuplexStream>,
}

impl Node {
    fn new(stream: DuplexStream) -> Self {
        let (reader, writer) = split(stream);
        Self {
            framer: LineFramer::new(reader),
            writer,
        }
    }

    async fn expect_line(&mut self) -> String {
        self.framer.next_line().await.unwrap().text().to_string()
    }

    async fn send(&mut self, line: &str) {
        self.writer
            .write_all(format!("{}\n", line).as_bytes())
            .await
            .unwrap();
        self.writer.flush().await.unwrap();
    }
}

fn config() -> GatewayConfig {
    GatewayConfig {
        command_timeout: Duration::from_millis(500),
        backoff_initial: Duration::from_millis(10),
        backoff_max: Duration::from_millis(50),
        lights: LightChannels::new([12, 13, 14]),
        suppression: None,
        ..GatewayConfig::default()
    }
}

async fn start(config: GatewayConfig) -> (Gateway, Node) {
    let (connector, mut nodes) = MockConnector::with_links(1);
    let gateway = Gateway::start(connector, config).await.unwrap();
    (gateway, Node::new(nodes.remove(0)))
}

fn air(id: u8, temp: f64) -> String {
    format!(r#"{{"type":"air","air_id":{},"temp":{},"air_humidity":55.0}}"#, id, temp)
}

#[tokio::test]
async fn test_ack_resolves_command_and_interleaved_telemetry_is_delivered() {
    let (gateway, mut node) = start(config()).await;
    let mut sub = gateway.subscribe();

    let node_task = tokio::spawn(async move {
        assert_eq!(node.expect_line().await, "light13:42");
        node.send(&air(1, 20.0)).await;
        node.send(&air(2, 21.0)).await;
        node.send(&air(3, 22.0)).await;
        node.send("ACK: light13=42").await;
        node
    });

    let ack = gateway
        .send_command(Command::set_brightness(13, 42).unwrap())
        .await
        .unwrap();

    assert!(ack.success);
    assert_eq!(ack.text, "ACK: light13=42");
    assert_eq!(
        ack.command,
        Command::SetBrightness {
            channel: 13,
            percent: 42
        }
    );

    let ids: Vec<u8> = vec![
        sub.recv().await.unwrap().source_id(),
        sub.recv().await.unwrap().source_id(),
        sub.recv().await.unwrap().source_id(),
    ];
    assert_eq!(ids, vec![1, 2, 3]);
    assert_eq!(gateway.link_state(), LinkState::Idle);

    node_task.await.unwrap();
}

#[tokio::test]
async fn test_err_reply_is_unsuccessful_ack() {
    let (gateway, mut node) = start(config()).await;

    tokio::spawn(async move {
        assert_eq!(node.expect_line().await, "on");
        node.send("ERR: pump fault").await;
        node
    });

    let ack = gateway.send_command(Command::pump(true)).await.unwrap();
    assert!(!ack.success);
    assert_eq!(ack.text, "ERR: pump fault");
}

#[tokio::test]
async fn test_timeout_returns_to_idle_and_next_command_proceeds() {
    let (gateway, mut node) = start(GatewayConfig {
        command_timeout: Duration::from_millis(100),
        ..config()
    })
    .await;

    let node_task = tokio::spawn(async move {
        // swallow the first command without answering
        assert_eq!(node.expect_line().await, "on");
        assert_eq!(node.expect_line().await, "off");
        node.send("ACK: pump off").await;
        node
    });

    let err = gateway.send_command(Command::pump(true)).await.unwrap_err();
    assert!(matches!(err, GatewayError::CommandTimeout(_)));
    assert!(err.is_retryable());
    assert_eq!(gateway.link_state(), LinkState::Idle);

    let ack = gateway.send_command(Command::pump(false)).await.unwrap();
    assert_eq!(ack.text, "ACK: pump off");

    assert_eq!(gateway.stats().command_timeouts, 1);
    node_task.await.unwrap();
}

#[tokio::test]
async fn test_malformed_and_debug_lines_do_not_resolve_command() {
    let (gateway, mut node) = start(config()).await;
    let mut sub = gateway.subscribe();

    tokio::spawn(async move {
        assert_eq!(node.expect_line().await, "on");
        node.send(r#"{"temp":"#).await;
        node.send("pump relay engaged").await;
        node.send("ACK: pump on").await;
        node
    });

    let ack = gateway.send_command(Command::pump(true)).await.unwrap();
    assert_eq!(ack.text, "ACK: pump on");

    let stats = gateway.stats();
    assert_eq!(stats.parse_errors, 1);
    assert_eq!(stats.noise, 1);
    assert_eq!(stats.telemetry, 0);
    assert!(timeout(Duration::from_millis(50), sub.recv()).await.is_err());
}

#[tokio::test]
async fn test_concurrent_callers_never_overlap_on_the_wire() {
    let (gateway, mut node) = start(GatewayConfig {
        command_timeout: Duration::from_secs(2),
        ..config()
    })
    .await;
    const CALLERS: u8 = 20;

    let node_task = tokio::spawn(async move {
        let mut overlaps = 0;
        for _ in 0..CALLERS {
            let line = node.expect_line().await;
            node.send(r#"{"type":"soil","soil_id":1,"soil_humidity":40.0}"#).await;

            // nothing else may arrive while this command is unanswered
            if timeout(Duration::from_millis(10), node.framer.next_line())
                .await
                .is_ok()
            {
                overlaps += 1;
            }

            let answer = line.replacen(':', "=", 1);
            node.send(&format!("ACK: {}", answer)).await;
        }
        overlaps
    });

    let calls = (0..CALLERS).map(|i| {
        let gateway = gateway.clone();
        async move {
            gateway
                .send_command(Command::set_brightness(12, i).unwrap())
                .await
        }
    });
    let results = join_all(calls).await;

    for result in &results {
        let ack = result.as_ref().unwrap();
        let Command::SetBrightness { percent, .. } = ack.command else {
            panic!("Expected SetBrightness");
        };
        // each caller gets the answer to its own command
        assert_eq!(ack.text, format!("ACK: light12={}", percent));
    }
    assert_eq!(node_task.await.unwrap(), 0);
    assert_eq!(gateway.stats().commands_sent, CALLERS as u64);
}

#[tokio::test]
async fn test_stray_ack_is_dropped() {
    let (gateway, mut node) = start(config()).await;

    node.send("ACK: light13=42").await;
    node.send(&air(1, 20.0)).await;

    let mut sub = gateway.subscribe();
    node.send(&air(2, 20.0)).await;
    sub.recv().await.unwrap();

    assert_eq!(gateway.stats().stray_acks, 1);
    assert_eq!(gateway.link_state(), LinkState::Idle);
}

#[tokio::test]
async fn test_latest_reflects_suppressed_readings() {
    let (gateway, mut node) = start(GatewayConfig {
        suppression: Some(Thresholds::default()),
        ..config()
    })
    .await;
    let mut sub = gateway.subscribe();

    node.send(&air(1, 20.0)).await;
    node.send(&air(1, 20.1)).await;
    node.send(&air(1, 20.3)).await;

    assert_eq!(sub.recv().await.unwrap().field("temp"), Some(20.0));
    assert_eq!(sub.recv().await.unwrap().field("temp"), Some(20.3));

    let latest = gateway
        .latest_by_channel(ChannelId::new(Channel::Air, 1))
        .unwrap();
    assert_eq!(latest.field("temp"), Some(20.3));
    assert_eq!(gateway.stats().suppressed, 1);
    assert!(gateway
        .latest_by_channel(ChannelId::new(Channel::Soil, 1))
        .is_none());
}

#[tokio::test]
async fn test_reconnects_after_link_loss() {
    let (connector, nodes) = MockConnector::with_links(2);
    let gateway = Gateway::start(connector, config()).await.unwrap();
    let mut sub = gateway.subscribe();
    let mut nodes = nodes.into_iter().map(Node::new);

    let mut first = nodes.next().unwrap();
    first.send(&air(1, 20.0)).await;
    assert_eq!(sub.recv().await.unwrap().source_id(), 1);
    drop(first);

    let mut second = nodes.next().unwrap();
    second.send(&air(2, 20.0)).await;
    assert_eq!(sub.recv().await.unwrap().source_id(), 2);
    assert_eq!(gateway.stats().reconnects, 1);

    tokio::spawn(async move {
        assert_eq!(second.expect_line().await, "off");
        second.send("ACK: pump off").await;
        second
    });
    let ack = gateway.send_command(Command::pump(false)).await.unwrap();
    assert!(ack.success);
}

#[tokio::test]
async fn test_commands_fail_fast_while_link_is_down() {
    let (connector, _) = MockConnector::with_links(0);
    assert!(matches!(
        Gateway::start(connector, config()).await,
        Err(GatewayError::LinkUnavailable)
    ));

    let (connector, _) = MockConnector::with_links(0);
    let gateway = Gateway::spawn(connector, config());
    let err = gateway.send_command(Command::pump(true)).await.unwrap_err();
    assert!(matches!(err, GatewayError::LinkUnavailable));
    assert_eq!(gateway.link_state(), LinkState::Disconnected);
}

#[tokio::test]
async fn test_unconfigured_light_is_rejected_before_the_wire() {
    let (gateway, _node) = start(config()).await;

    let err = gateway
        .send_command(Command::SetBrightness {
            channel: 99,
            percent: 10,
        })
        .await
        .unwrap_err();

    assert!(matches!(err, GatewayError::InvalidCommand(_)));
    assert!(!err.is_retryable());
    assert_eq!(gateway.stats().commands_sent, 0);
}

#[tokio::test]
async fn test_simulated_node_end_to_end() {
    let connector = SimConnector::new(NodeConfig {
        lights: LightChannels::new([12, 13, 14]),
        sample_interval: Duration::from_millis(10),
        ..NodeConfig::default()
    });
    let gateway = Gateway::start(connector, config()).await.unwrap();
    let mut sub = gateway.subscribe();

    let ack = gateway
        .send_command(Command::set_brightness(13, 42).unwrap())
        .await
        .unwrap();
    assert!(ack.success);
    assert_eq!(ack.text, "ACK: light13=42");

    let ack = gateway.send_command(Command::pump(true)).await.unwrap();
    assert_eq!(ack.text, "ACK: pump on");

    let record = timeout(Duration::from_secs(1), sub.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(record.channel(), Channel::Air | Channel::Soil));
}

#[tokio::test]
async fn test_shutdown_releases_link_and_rejects_commands() {
    let (gateway, mut node) = start(config()).await;
    gateway.wait_for_state(LinkState::Idle).await;

    timeout(Duration::from_secs(1), gateway.shutdown())
        .await
        .unwrap();

    // the gateway side of the pipe is gone
    assert!(node.framer.next_line().await.is_err());
    assert_eq!(gateway.link_state(), LinkState::Disconnected);
    assert!(matches!(
        gateway.send_command(Command::pump(true)).await,
        Err(GatewayError::LinkUnavailable)
    ));
}

#[tokio::test]
async fn test_overlong_ack_does_not_resolve_command() {
    let (gateway, mut node) = start(GatewayConfig {
        max_line_len: 16,
        ..config()
    })
    .await;

    tokio::spawn(async move {
        assert_eq!(node.expect_line().await, "on");
        node.send(&format!("ACK: {}", "a".repeat(40))).await;
        node.send("ACK: pump on").await;
        node
    });

    let ack = gateway.send_command(Command::pump(true)).await.unwrap();
    assert_eq!(ack.text, "ACK: pump on");
    assert_eq!(gateway.stats().overlong, 1);
    assert_eq!(gateway.stats().acks, 1);
}

#[tokio::test]
async fn test_link_loss_fails_pending_command() {
    let (gateway, mut node) = start(config()).await;

    tokio::spawn(async move {
        assert_eq!(node.expect_line().await, "on");
        drop(node);
    });

    let err = gateway.send_command(Command::pump(true)).await.unwrap_err();
    assert!(matches!(err, GatewayError::LinkUnavailable));
    assert!(err.is_retryable());
}

/// Accepts nothing; every write fails.
struct BrokenWriter;

impl AsyncWrite for BrokenWriter {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        _buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Poll::Ready(Err(io::Error::new(io::ErrorKind::BrokenPipe, "cable pulled")))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

/// Hands out prepared links in order.
struct PreparedConnector {
    links: Mutex<VecDeque<Link>>,
}

#[async_trait]
impl Connector for PreparedConnector {
    async fn connect(&self) -> io::Result<Link> {
        self.links
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "no link left"))
    }

    fn describe(&self) -> String {
        "prepared links".to_string()
    }
}

#[tokio::test]
async fn test_write_failure_reports_and_reconnects() {
    let (broken_gateway_end, _broken_node_end) = tokio::io::duplex(4096);
    let (broken_reader, _) = split(broken_gateway_end);
    let (good_gateway_end, good_node_end) = tokio::io::duplex(4096);

    let connector = PreparedConnector {
        links: Mutex::new(VecDeque::from([
            Link::new(Box::new(broken_reader), Box::new(BrokenWriter)),
            Link::from_stream(good_gateway_end),
        ])),
    };
    let gateway = Gateway::start(connector, config()).await.unwrap();

    let err = gateway.send_command(Command::pump(true)).await.unwrap_err();
    assert!(matches!(err, GatewayError::LinkWriteFailed(_)));

    timeout(Duration::from_secs(1), async {
        while gateway.stats().reconnects < 1 || gateway.link_state() != LinkState::Idle {
            sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();

    let mut node = Node::new(good_node_end);
    tokio::spawn(async move {
        assert_eq!(node.expect_line().await, "on");
        node.send("ACK: pump on").await;
        node
    });

    let ack = gateway.send_command(Command::pump(true)).await.unwrap();
    assert!(ack.success);
    assert_eq!(gateway.stats().commands_sent, 1);
}
