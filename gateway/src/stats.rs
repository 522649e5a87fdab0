use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub(crate) struct Counters {
    pub lines: AtomicU64,
    pub telemetry: AtomicU64,
    pub suppressed: AtomicU64,
    pub acks: AtomicU64,
    pub stray_acks: AtomicU64,
    pub parse_errors: AtomicU64,
    pub noise: AtomicU64,
    pub overlong: AtomicU64,
    pub commands_sent: AtomicU64,
    pub command_timeouts: AtomicU64,
    pub reconnects: AtomicU64,
}

pub(crate) fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

impl Counters {
    pub fn snapshot(&self) -> GatewayStats {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        GatewayStats {
            lines: load(&self.lines),
            telemetry: load(&self.telemetry),
            suppressed: load(&self.suppressed),
            acks: load(&self.acks),
            stray_acks: load(&self.stray_acks),
            parse_errors: load(&self.parse_errors),
            noise: load(&self.noise),
            overlong: load(&self.overlong),
            commands_sent: load(&self.commands_sent),
            command_timeouts: load(&self.command_timeouts),
            reconnects: load(&self.reconnects),
        }
    }
}

/// Point-in-time view of what the gateway has seen on the link.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct GatewayStats {
    /// Every non-empty line read.
    pub lines: u64,
    /// Telemetry lines decoded (emitted or suppressed).
    pub telemetry: u64,
    /// Telemetry held back by the gateway-side suppression mirror.
    pub suppressed: u64,
    pub acks: u64,
    /// Acknowledgements that arrived with no command outstanding.
    pub stray_acks: u64,
    pub parse_errors: u64,
    pub noise: u64,
    pub overlong: u64,
    pub commands_sent: u64,
    pub command_timeouts: u64,
    pub reconnects: u64,
}
