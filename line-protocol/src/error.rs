use thiserror::Error;

/// Errors raised while decoding or validating protocol elements.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed telemetry: {0}")]
    Json(#[from] serde_json::Error),

    #[error("telemetry line is not a JSON object")]
    NotAnObject,

    #[error("telemetry carries no sensor fields")]
    NoSensorFields,

    #[error("unknown channel `{0}`")]
    UnknownChannel(String),

    #[error("light channel {0} is not configured")]
    UnknownLight(u8),

    #[error("brightness {0}% is out of range 0..=100")]
    BrightnessOutOfRange(u8),

    #[error("unrecognized command `{0}`")]
    UnknownCommand(String),
}
