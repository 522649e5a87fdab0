use line_protocol::ProtocolError;
use std::{io, time::Duration};
use thiserror::Error;

/// Why a command did not produce an acknowledgement.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// No `ACK:`/`ERR:` within the bound. Whether the node applied the
    /// command is unknown.
    #[error("no acknowledgement within {0:?}")]
    CommandTimeout(Duration),

    #[error("failed to write command to the link: {0}")]
    LinkWriteFailed(#[source] io::Error),

    /// The link is down (not yet opened, reconnecting) or the gateway is gone.
    #[error("serial link unavailable")]
    LinkUnavailable,

    #[error("invalid command: {0}")]
    InvalidCommand(#[from] ProtocolError),
}

impl GatewayError {
    /// Timeouts and link trouble are worth retrying; an invalid command is not.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, GatewayError::InvalidCommand(_))
    }
}
