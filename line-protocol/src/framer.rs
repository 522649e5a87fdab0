use std::{io, mem, time::Duration};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};

/// Longest line kept in memory; anything beyond is dropped up to the next `\n`.
pub const DEFAULT_MAX_LINE_LEN: usize = 256;

/// The link stopped producing bytes. The caller decides whether and when to
/// reconnect.
#[derive(Debug, Error)]
pub enum LinkInterrupted {
    #[error("read failed: {0}")]
    Io(#[from] io::Error),

    #[error("link closed by peer")]
    Closed,

    #[error("no data for {0:?}")]
    Idle(Duration),
}

/// One newline-delimited line, with the terminator (and any `\r`) removed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Line {
    text: String,
    truncated: bool,
}

impl Line {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            truncated: false,
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// Whether the line hit the length bound and lost its tail.
    pub fn is_truncated(&self) -> bool {
        self.truncated
    }
}

/// Cuts a byte stream into [`Line`]s.
///
/// The framer is cheap to rebuild, so after a reconnect the owner simply
/// wraps the new reader in a fresh one.
pub struct LineFramer<R> {
    reader: BufReader<R>,
    partial: Vec<u8>,
    truncated: bool,
    max_len: usize,
    idle_timeout: Option<Duration>,
}

impl<R: AsyncRead + Unpin> LineFramer<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader: BufReader::new(reader),
            partial: Vec::new(),
            truncated: false,
            max_len: DEFAULT_MAX_LINE_LEN,
            idle_timeout: None,
        }
    }

    pub fn with_max_len(mut self, max_len: usize) -> Self {
        self.max_len = max_len.max(1);
        self
    }

    /// Treats silence longer than `timeout` as a dead link.
    pub fn with_idle_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Waits for the next non-empty line.
    ///
    /// Cancel safe: the only await point is `fill_buf`, and bytes are moved
    /// into `partial` only after it returns, so dropping this future inside a
    /// `select!` never loses data.
    pub async fn next_line(&mut self) -> Result<Line, LinkInterrupted> {
        loop {
            let available = match self.idle_timeout {
                Some(idle) => match tokio::time::timeout(idle, self.reader.fill_buf()).await {
                    Ok(read) => read?,
                    Err(_) => return Err(LinkInterrupted::Idle(idle)),
                },
                None => self.reader.fill_buf().await?,
            };

            if available.is_empty() {
                return Err(LinkInterrupted::Closed);
            }

            let newline = available.iter().position(|b| *b == b'\n');
            let (chunk, consumed) = match newline {
                Some(idx) => (&available[..idx], idx + 1),
                None => (available, available.len()),
            };

            let room = self.max_len.saturating_sub(self.partial.len());
            if chunk.len() > room {
                self.partial.extend_from_slice(&chunk[..room]);
                self.truncated = true;
            } else {
                self.partial.extend_from_slice(chunk);
            }
            self.reader.consume(consumed);

            if newline.is_none() {
                continue;
            }

            let bytes = mem::take(&mut self.partial);
            let truncated = mem::replace(&mut self.truncated, false);
            let text = String::from_utf8_lossy(&bytes);
            let text = text.trim_end_matches('\r');

            if text.trim().is_empty() && !truncated {
                continue;
            }

            return Ok(Line {
                text: text.to_string(),
                truncated,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    #[tokio::test]
    async fn test_lines_across_chunks() {
        let (mut node, gateway) = tokio::io::duplex(64);
        let mut framer = LineFramer::new(gateway);

        node.write_all(b"{\"temp\":").await.unwrap();
        node.write_all(b"21.5}\r\nACK: on\n").await.unwrap();

        assert_eq!(framer.next_line().await.unwrap().text(), "{\"temp\":21.5}");
        assert_eq!(framer.next_line().await.unwrap().text(), "ACK: on");
    }

    #[tokio::test]
    async fn test_empty_lines_are_skipped() {
        let (mut node, gateway) = tokio::io::duplex(64);
        let mut framer = LineFramer::new(gateway);

        node.write_all(b"\n\r\n  \nERR: bad\n").await.unwrap();

        assert_eq!(framer.next_line().await.unwrap().text(), "ERR: bad");
    }

    #[tokio::test]
    async fn test_overlong_line_is_truncated_and_resyncs() {
        let (mut node, gateway) = tokio::io::duplex(1024);
        let mut framer = LineFramer::new(gateway).with_max_len(16);

        let mut garbage = vec![b'x'; 100];
        garbage.push(b'\n');
        node.write_all(&garbage).await.unwrap();
        node.write_all(b"ACK: off\n").await.unwrap();

        let first = framer.next_line().await.unwrap();
        assert!(first.is_truncated());
        assert_eq!(first.text().len(), 16);

        let second = framer.next_line().await.unwrap();
        assert!(!second.is_truncated());
        assert_eq!(second.text(), "ACK: off");
    }

    #[tokio::test]
    async fn test_closed_link_is_reported() {
        let (node, gateway) = tokio::io::duplex(64);
        let mut framer = LineFramer::new(gateway);
        drop(node);

        assert!(matches!(
            framer.next_line().await,
            Err(LinkInterrupted::Closed)
        ));
    }

    #[tokio::test]
    async fn test_idle_timeout_is_reported() {
        let (_node, gateway) = tokio::io::duplex(64);
        let mut framer =
            LineFramer::new(gateway).with_idle_timeout(Some(Duration::from_millis(20)));

        assert!(matches!(
            framer.next_line().await,
            Err(LinkInterrupted::Idle(_))
        ));
    }
}
