use crate::error::ProtocolError;
use serde::{Deserialize, Serialize};
use std::{collections::BTreeSet, fmt, str::FromStr};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PumpState {
    On,
    Off,
}

/// A request for the node. Nothing changes on the farm until the node
/// acknowledges it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Command {
    Pump(PumpState),
    SetBrightness { channel: u8, percent: u8 },
}

impl Command {
    /// Builds a brightness command, rejecting percentages above 100.
    pub fn set_brightness(channel: u8, percent: u8) -> Result<Self, ProtocolError> {
        if percent > 100 {
            return Err(ProtocolError::BrightnessOutOfRange(percent));
        }

        Ok(Command::SetBrightness { channel, percent })
    }

    pub fn pump(on: bool) -> Self {
        if on {
            Command::Pump(PumpState::On)
        } else {
            Command::Pump(PumpState::Off)
        }
    }

    /// The command line as written to the link, without the terminator.
    pub fn to_line(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Pump(PumpState::On) => f.write_str("on"),
            Command::Pump(PumpState::Off) => f.write_str("off"),
            Command::SetBrightness { channel, percent } => write!(f, "light{}:{}", channel, percent),
        }
    }
}

impl FromStr for Command {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        match s {
            "on" => return Ok(Command::Pump(PumpState::On)),
            "off" => return Ok(Command::Pump(PumpState::Off)),
            _ => {}
        }

        let unknown = || ProtocolError::UnknownCommand(s.to_string());
        let rest = s.strip_prefix("light").ok_or_else(unknown)?;
        let (channel, percent) = rest.split_once(':').ok_or_else(unknown)?;
        let channel = channel.parse::<u8>().map_err(|_| unknown())?;
        let percent = percent.parse::<u8>().map_err(|_| unknown())?;

        Command::set_brightness(channel, percent)
    }
}

/// The light outputs a deployment actually has, identified by pin number.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LightChannels(BTreeSet<u8>);

impl LightChannels {
    pub fn new(channels: impl IntoIterator<Item = u8>) -> Self {
        Self(channels.into_iter().collect())
    }

    pub fn contains(&self, channel: u8) -> bool {
        self.0.contains(&channel)
    }

    pub fn iter(&self) -> impl Iterator<Item = u8> + '_ {
        self.0.iter().copied()
    }

    /// Checks a command against this deployment before it goes on the wire.
    pub fn validate(&self, command: &Command) -> Result<(), ProtocolError> {
        match *command {
            Command::Pump(_) => Ok(()),
            Command::SetBrightness { channel, percent } => {
                if percent > 100 {
                    Err(ProtocolError::BrightnessOutOfRange(percent))
                } else if !self.contains(channel) {
                    Err(ProtocolError::UnknownLight(channel))
                } else {
                    Ok(())
                }
            }
        }
    }
}

impl Default for LightChannels {
    fn default() -> Self {
        Self::new([13])
    }
}

/// The node's answer to one command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Acknowledgement {
    pub command: Command,
    pub text: String,
    pub success: bool,
}
