#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use joycore_link::serial::MockTransport;
use joycore_link::{CancellationToken, ChannelOptions, ReliableChannel};

pub const WAIT: Duration = Duration::from_secs(2);

pub fn mock_channel(address: &str) -> (Arc<MockTransport>, ReliableChannel) {
    let mock = Arc::new(MockTransport::new(address));
    let channel = ReliableChannel::new(mock.clone(), ChannelOptions::default());
    (mock, channel)
}

pub async fn connected(address: &str) -> (Arc<MockTransport>, ReliableChannel) {
    let (mock, channel) = mock_channel(address);
    channel.connect(&CancellationToken::new()).await.expect("mock connect");
    (mock, channel)
}

/// Poll until the channel has buffered at least `n` bytes.
pub async fn wait_buffered(channel: &ReliableChannel, n: usize) {
    tokio::time::timeout(WAIT, async {
        while channel.buffered_len().await < n {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await
    .expect("bytes were never ingested");
}
