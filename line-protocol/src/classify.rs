use crate::{
    command::{Acknowledgement, Command},
    framer::Line,
    telemetry::Reading,
    wire,
};

const ACK_PREFIX: &str = "ACK:";
const ERR_PREFIX: &str = "ERR:";

/// What a single line from the node turned out to be.
#[derive(Debug, Clone, PartialEq)]
pub enum Classified {
    Telemetry(Reading),
    Ack(AckLine),
    Unrecognized(Unrecognized),
}

/// An `ACK:`/`ERR:` line not yet tied to the command it answers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AckLine {
    text: String,
    success: bool,
}

impl AckLine {
    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn is_success(&self) -> bool {
        self.success
    }

    /// Ties the line to the command that was outstanding when it arrived.
    pub fn resolve(self, command: Command) -> Acknowledgement {
        Acknowledgement {
            command,
            text: self.text,
            success: self.success,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Unrecognized {
    pub raw: String,
    pub reason: UnrecognizedReason,
}

#[derive(Debug, Clone, PartialEq)]
pub enum UnrecognizedReason {
    /// Looked like telemetry but did not decode.
    ParseError(String),
    /// Debug output or anything else without a known prefix.
    Noise,
    /// Cut at the framer's length bound.
    Overlong,
}

/// Classifies one line of text.
///
/// Telemetry must be a JSON object and acknowledgements must start with
/// `ACK:` or `ERR:`; nothing else can ever resolve a pending command.
pub fn classify(line: &str) -> Classified {
    let line = line.trim();

    if line.starts_with('{') {
        return match wire::decode(line) {
            Ok(reading) => Classified::Telemetry(reading),
            Err(e) => Classified::Unrecognized(Unrecognized {
                raw: line.to_string(),
                reason: UnrecognizedReason::ParseError(e.to_string()),
            }),
        };
    }

    if line.starts_with(ACK_PREFIX) || line.starts_with(ERR_PREFIX) {
        return Classified::Ack(AckLine {
            text: line.to_string(),
            success: line.starts_with(ACK_PREFIX),
        });
    }

    Classified::Unrecognized(Unrecognized {
        raw: line.to_string(),
        reason: UnrecognizedReason::Noise,
    })
}

impl Line {
    pub fn classify(&self) -> Classified {
        if self.is_truncated() {
            return Classified::Unrecognized(Unrecognized {
                raw: self.text().to_string(),
                reason: UnrecognizedReason::Overlong,
            });
        }

        classify(self.text())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::Channel;

    #[test]
    fn test_ack_resolves_brightness_command() {
        let command = Command::set_brightness(13, 42).unwrap();

        let Classified::Ack(ack) = classify("ACK: light13=42\r") else {
            panic!("Expected Ack");
        };
        let ack = ack.resolve(command);

        assert!(ack.success);
        assert_eq!(ack.text, "ACK: light13=42");
        assert_eq!(ack.command, command);
    }

    #[test]
    fn test_err_is_failed_ack() {
        match classify("ERR: unknown command") {
            Classified::Ack(ack) => {
                assert!(!ack.is_success());
                assert_eq!(ack.text(), "ERR: unknown command");
            }
            other => panic!("Expected Ack, got {:?}", other),
        }
    }

    #[test]
    fn test_truncated_json_is_parse_error() {
        match classify(r#"{"temp":"#) {
            Classified::Unrecognized(u) => {
                assert!(matches!(u.reason, UnrecognizedReason::ParseError(_)));
            }
            other => panic!("Expected Unrecognized, got {:?}", other),
        }
    }

    #[test]
    fn test_debug_text_is_noise() {
        for line in ["booting...", "ACK without colon", "", "ack: lowercase"] {
            match classify(line) {
                Classified::Unrecognized(u) => assert_eq!(u.reason, UnrecognizedReason::Noise),
                other => panic!("Expected Unrecognized for {:?}, got {:?}", line, other),
            }
        }
    }

    #[test]
    fn test_telemetry_line() {
        match classify(r#"{"type":"soil","soil_id":3,"soil_humidity":41.2,"pump_status":false}"#) {
            Classified::Telemetry(reading) => {
                assert_eq!(reading.channel(), Channel::Soil);
                assert_eq!(reading.source_id(), 3);
            }
            other => panic!("Expected Telemetry, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_truncated_line_is_overlong_even_if_it_looks_like_an_ack() {
        use crate::framer::LineFramer;
        use tokio::io::AsyncWriteExt;

        let (mut node, gateway) = tokio::io::duplex(256);
        let mut framer = LineFramer::new(gateway).with_max_len(16);
        let overlong = format!("ACK: {}\n", "a".repeat(40));
        node.write_all(overlong.as_bytes()).await.unwrap();

        let line = framer.next_line().await.unwrap();
        assert!(line.is_truncated());

        match line.classify() {
            Classified::Unrecognized(u) => assert_eq!(u.reason, UnrecognizedReason::Overlong),
            other => panic!("Expected Unrecognized, got {:?}", other),
        }
    }

    #[test]
    fn test_untruncated_line_classifies_by_content() {
        let line = Line::new("ACK: pump on");
        assert!(matches!(line.classify(), Classified::Ack(_)));
    }

    #[test]
    fn test_json_that_mentions_ack_is_not_an_ack() {
        let classified = classify(r#"{"msg":"ACK: light13=42"}"#);
        assert!(matches!(classified, Classified::Unrecognized(_)));
    }
}
