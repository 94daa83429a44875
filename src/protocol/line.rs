use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::channel::{deadline_token, ReliableChannel};
use crate::serial::Result;
use super::{DEFAULT_RESPONSE_TIMEOUT_MS, LINE_FEED};

/// Line-oriented exchange: send text terminated by `\n`, read back one line.
#[derive(Clone)]
pub struct LineProtocol {
    channel: Arc<ReliableChannel>,
    timeout: Duration,
}

impl LineProtocol {
    pub fn new(channel: Arc<ReliableChannel>) -> Self {
        Self { channel, timeout: Duration::from_millis(DEFAULT_RESPONSE_TIMEOUT_MS) }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn channel(&self) -> &Arc<ReliableChannel> {
        &self.channel
    }

    pub async fn send_line(&self, text: &str) -> Result<()> {
        let mut frame = Vec::with_capacity(text.len() + 1);
        frame.extend_from_slice(text.as_bytes());
        frame.push(LINE_FEED);
        self.channel.transmit(&frame).await?;
        log::debug!("-> {}", text);
        Ok(())
    }

    /// Next line with the terminator stripped, within the protocol timeout.
    pub async fn read_line(&self) -> Result<String> {
        let token = deadline_token(self.timeout);
        let line = self.read_line_with(&token).await;
        token.cancel();
        line
    }

    pub async fn read_line_with(&self, token: &CancellationToken) -> Result<String> {
        let raw = self.channel.read_until(LINE_FEED, token).await?;
        let line = decode_line(&raw);
        log::debug!("<- {}", line);
        Ok(line)
    }

    /// Send `text` and return the first non-empty line that comes back.
    pub async fn query(&self, text: &str) -> Result<String> {
        self.send_line(text).await?;
        let token = deadline_token(self.timeout);
        let result = async {
            loop {
                let line = self.read_line_with(&token).await?;
                if !line.is_empty() {
                    return Ok(line);
                }
            }
        }
        .await;
        token.cancel();
        result
    }
}

pub(crate) fn decode_line(raw: &[u8]) -> String {
    String::from_utf8_lossy(raw).trim_end_matches(['\r', '\n']).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_crlf() {
        assert_eq!(decode_line(b"VERSION:1.2\r\n"), "VERSION:1.2");
        assert_eq!(decode_line(b"\n"), "");
    }

    #[test]
    fn invalid_utf8_is_replaced() {
        assert_eq!(decode_line(b"A\xffB\n"), "A\u{FFFD}B");
    }
}
