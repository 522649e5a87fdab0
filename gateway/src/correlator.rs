//! The task that owns the serial link.
//!
//! It is the only reader and the only writer of the link. Telemetry is read
//! continuously; commands arrive over a channel and are accepted one at a
//! time, so a command's answer is always the first `ACK:`/`ERR:` line read
//! after that command was written.

use crate::{
    error::GatewayError,
    fanout::TelemetryHub,
    link::{Backoff, Connector, Link, LinkWriter},
    stats::{Counters, bump},
};
use chrono::Utc;
use line_protocol::{
    Acknowledgement, ChangeSuppressor, Classified, Command, Line, LineFramer, Reading,
    UnrecognizedReason,
};
use log::{debug, info, warn};
use serde::Serialize;
use std::{io, sync::Arc, time::Duration};
use tokio::{
    io::AsyncWriteExt,
    sync::{mpsc, oneshot, watch},
    time::{Instant, sleep, sleep_until, timeout},
};

/// Where the command state machine currently is.
///
/// `Resolved` and `TimedOut` are instantaneous: the link returns to `Idle`
/// as soon as the caller has been answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkState {
    Disconnected,
    Idle,
    Sending,
    AwaitingAck,
}

pub(crate) type Reply = oneshot::Sender<Result<Acknowledgement, GatewayError>>;

pub(crate) struct Request {
    pub command: Command,
    pub reply: Reply,
}

struct Pending {
    command: Command,
    deadline: Instant,
    reply: Reply,
}

pub(crate) struct LinkSettings {
    pub command_timeout: Duration,
    pub max_line_len: usize,
    pub idle_timeout: Option<Duration>,
    pub backoff: Backoff,
}

enum Served {
    Shutdown,
    Interrupted(String),
}

/// Resolves once shutdown is requested or every gateway handle is gone.
async fn stopped(stop: &mut watch::Receiver<bool>) {
    let _ = stop.wait_for(|stop| *stop).await;
}

pub(crate) struct Correlator<C> {
    pub connector: C,
    pub settings: LinkSettings,
    pub requests: mpsc::Receiver<Request>,
    pub hub: Arc<TelemetryHub>,
    pub counters: Arc<Counters>,
    pub state: watch::Sender<LinkState>,
    pub stop: watch::Receiver<bool>,
    pub suppressor: Option<ChangeSuppressor>,
}

impl<C: Connector> Correlator<C> {
    /// Runs until every gateway handle has been dropped or shutdown was
    /// requested. `link` is an already open connection, if the caller opened
    /// one up front.
    pub async fn run(mut self, mut link: Option<Link>) {
        loop {
            let current = match link.take() {
                Some(current) => Some(current),
                None => {
                    let connected = tokio::select! {
                        connected = self.connector.connect() => connected,
                        _ = stopped(&mut self.stop) => break,
                    };
                    match connected {
                        Ok(current) => Some(current),
                        Err(e) => {
                            warn!("cannot open {}: {}", self.connector.describe(), e);
                            None
                        }
                    }
                }
            };

            if let Some(current) = current {
                info!("link up on {}", self.connector.describe());
                self.settings.backoff.reset();

                match self.serve(current).await {
                    Served::Shutdown => break,
                    Served::Interrupted(reason) => {
                        bump(&self.counters.reconnects);
                        warn!("link interrupted: {}", reason);
                    }
                }
            }

            self.set_state(LinkState::Disconnected);
            let delay = self.settings.backoff.next_delay();
            debug!("reconnecting in {:?}", delay);
            if !self.wait_disconnected(delay).await {
                break;
            }
        }

        self.set_state(LinkState::Disconnected);
        info!("gateway stopped");
    }

    async fn serve(&mut self, link: Link) -> Served {
        let mut framer = LineFramer::new(link.reader)
            .with_max_len(self.settings.max_line_len)
            .with_idle_timeout(self.settings.idle_timeout);
        let mut writer = link.writer;
        let mut pending: Option<Pending> = None;
        self.set_state(LinkState::Idle);

        loop {
            let deadline = pending.as_ref().map(|p| p.deadline);

            tokio::select! {
                line = framer.next_line() => match line {
                    Ok(line) => self.on_line(line, &mut pending),
                    Err(e) => {
                        if let Some(p) = pending.take() {
                            let _ = p.reply.send(Err(GatewayError::LinkUnavailable));
                        }
                        return Served::Interrupted(e.to_string());
                    }
                },
                _ = stopped(&mut self.stop) => {
                    if let Some(p) = pending.take() {
                        let _ = p.reply.send(Err(GatewayError::LinkUnavailable));
                    }
                    return Served::Shutdown;
                },
                request = self.requests.recv(), if pending.is_none() => match request {
                    None => return Served::Shutdown,
                    Some(request) => match self.write_command(&mut writer, request).await {
                        Some(p) => pending = Some(p),
                        None => return Served::Interrupted("command write failed".to_string()),
                    },
                },
                _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    if let Some(p) = pending.take() {
                        bump(&self.counters.command_timeouts);
                        warn!("`{}` timed out after {:?}", p.command, self.settings.command_timeout);
                        let _ = p
                            .reply
                            .send(Err(GatewayError::CommandTimeout(self.settings.command_timeout)));
                        self.set_state(LinkState::Idle);
                    }
                }
            }
        }
    }

    /// Writes one command. On failure the caller has already been answered
    /// and `None` tells the loop to drop the link.
    async fn write_command(&mut self, writer: &mut LinkWriter, request: Request) -> Option<Pending> {
        let Request { command, reply } = request;
        self.set_state(LinkState::Sending);

        let line = format!("{}\n", command.to_line());
        let write = async {
            writer.write_all(line.as_bytes()).await?;
            writer.flush().await
        };

        let result = match timeout(self.settings.command_timeout, write).await {
            Ok(result) => result,
            Err(_) => Err(io::Error::new(io::ErrorKind::TimedOut, "write timed out")),
        };

        match result {
            Ok(()) => {
                bump(&self.counters.commands_sent);
                info!("sent `{}`", command);
                self.set_state(LinkState::AwaitingAck);
                Some(Pending {
                    command,
                    deadline: Instant::now() + self.settings.command_timeout,
                    reply,
                })
            }
            Err(e) => {
                warn!("writing `{}` failed: {}", command, e);
                let _ = reply.send(Err(GatewayError::LinkWriteFailed(e)));
                None
            }
        }
    }

    fn on_line(&mut self, line: Line, pending: &mut Option<Pending>) {
        bump(&self.counters.lines);

        match line.classify() {
            Classified::Telemetry(reading) => self.on_telemetry(reading),
            Classified::Ack(ack) => match pending.take() {
                Some(p) => {
                    bump(&self.counters.acks);
                    info!("`{}` answered: {}", p.command, ack.text());
                    let _ = p.reply.send(Ok(ack.resolve(p.command)));
                    self.set_state(LinkState::Idle);
                }
                None => {
                    bump(&self.counters.stray_acks);
                    warn!("no command outstanding, dropping `{}`", ack.text());
                }
            },
            Classified::Unrecognized(unrecognized) => match unrecognized.reason {
                UnrecognizedReason::ParseError(e) => {
                    bump(&self.counters.parse_errors);
                    debug!("dropping malformed telemetry `{}`: {}", unrecognized.raw, e);
                }
                UnrecognizedReason::Noise => {
                    bump(&self.counters.noise);
                    debug!("node: {}", unrecognized.raw);
                }
                UnrecognizedReason::Overlong => {
                    bump(&self.counters.overlong);
                    debug!("dropping overlong line ({} bytes kept)", unrecognized.raw.len());
                }
            },
        }
    }

    fn on_telemetry(&mut self, reading: Reading) {
        bump(&self.counters.telemetry);

        let emit = match self.suppressor.as_mut() {
            Some(suppressor) => suppressor.should_emit(&reading),
            None => true,
        };
        if !emit {
            bump(&self.counters.suppressed);
        }

        self.hub.publish(reading.observe(Utc::now()), emit);
    }

    /// Sleeps out the backoff while answering commands with
    /// `LinkUnavailable`. Returns `false` once every handle is gone.
    async fn wait_disconnected(&mut self, delay: Duration) -> bool {
        let wake = sleep(delay);
        tokio::pin!(wake);

        loop {
            tokio::select! {
                _ = &mut wake => return true,
                _ = stopped(&mut self.stop) => return false,
                request = self.requests.recv() => match request {
                    None => return false,
                    Some(request) => {
                        let _ = request.reply.send(Err(GatewayError::LinkUnavailable));
                    }
                },
            }
        }
    }

    fn set_state(&self, state: LinkState) {
        self.state.send_replace(state);
    }
}
