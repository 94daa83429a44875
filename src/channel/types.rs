//! Channel state, lifecycle events, outcomes and metrics
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const DEFAULT_CHUNK_SIZE: usize = 1024;
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 2;
pub const DEFAULT_READ_ERROR_BACKOFF_MS: u64 = 10;
pub const DEFAULT_EVENT_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChannelState {
    Closed,
    Open,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChannelEventKind {
    Connected,
    Disconnected,
    ConnectionLost,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelEvent {
    pub kind: ChannelEventKind,
    pub address: String,
    pub at: DateTime<Utc>,
}

impl ChannelEvent {
    pub fn new(kind: ChannelEventKind, address: &str) -> Self {
        Self { kind, address: address.to_string(), at: Utc::now() }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectOutcome {
    Connected,
    AlreadyConnected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectOutcome {
    Disconnected,
    AlreadyDisconnected,
}

/// Tuning knobs for the ingestion loop and the wait primitives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelOptions {
    pub chunk_size: usize,
    pub poll_interval_ms: u64,
    pub read_error_backoff_ms: u64,
    pub event_capacity: usize,
}

impl Default for ChannelOptions {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            read_error_backoff_ms: DEFAULT_READ_ERROR_BACKOFF_MS,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

impl ChannelOptions {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn read_error_backoff(&self) -> Duration {
        Duration::from_millis(self.read_error_backoff_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub bytes_ingested: u64,
    pub chunks_ingested: u64,
    pub bytes_consumed: u64,
    pub bytes_transmitted: u64,
    pub swallowed_read_errors: u64,
    pub read_timeouts: u64,
    pub connection_losses: u64,
}

#[derive(Debug, Default)]
pub(crate) struct ChannelMetrics {
    pub bytes_ingested: AtomicU64,
    pub chunks_ingested: AtomicU64,
    pub bytes_consumed: AtomicU64,
    pub bytes_transmitted: AtomicU64,
    pub swallowed_read_errors: AtomicU64,
    pub read_timeouts: AtomicU64,
    pub connection_losses: AtomicU64,
}

impl ChannelMetrics {
    pub fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            bytes_ingested: self.bytes_ingested.load(Ordering::Relaxed),
            chunks_ingested: self.chunks_ingested.load(Ordering::Relaxed),
            bytes_consumed: self.bytes_consumed.load(Ordering::Relaxed),
            bytes_transmitted: self.bytes_transmitted.load(Ordering::Relaxed),
            swallowed_read_errors: self.swallowed_read_errors.load(Ordering::Relaxed),
            read_timeouts: self.read_timeouts.load(Ordering::Relaxed),
            connection_losses: self.connection_losses.load(Ordering::Relaxed),
        }
    }
}
