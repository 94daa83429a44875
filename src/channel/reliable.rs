//! Reliable buffered channel over a lossy serial transport.
use std::sync::Arc;
use std::time::Duration;
use bytes::Bytes;
use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::serial::{Result, SerialError, SerialSettings, SerialTransport, Transport};
use super::buffer::{SharedBuffer, WaitOutcome};
use super::ingest::ingest_loop;
use super::types::*;

/// State shared between the façade and its ingestion task.
pub(crate) struct ChannelShared {
    pub transport: Arc<dyn Transport>,
    pub buffer: SharedBuffer,
    pub options: ChannelOptions,
    pub metrics: ChannelMetrics,
    state_tx: watch::Sender<ChannelState>,
    // Scope of the current session; cancelled whenever the channel closes.
    scope: Mutex<CancellationToken>,
    events_tx: broadcast::Sender<ChannelEvent>,
}

impl ChannelShared {
    fn emit(&self, kind: ChannelEventKind) {
        let _ = self.events_tx.send(ChannelEvent::new(kind, self.transport.address()));
    }

    fn is_open(&self) -> bool {
        *self.state_tx.borrow() == ChannelState::Open
    }

    /// Flip `Open -> Closed`; true only for the caller that made the transition.
    fn close_state(&self) -> bool {
        self.state_tx.send_if_modified(|state| {
            if *state == ChannelState::Open {
                *state = ChannelState::Closed;
                true
            } else {
                false
            }
        })
    }

    pub(crate) async fn current_scope(&self) -> CancellationToken {
        self.scope.lock().await.clone()
    }

    /// Close the session after the transport failed underneath it.
    pub(crate) async fn connection_lost(&self, scope: &CancellationToken, reason: &str) {
        if !self.close_state() {
            return;
        }
        scope.cancel();
        if let Err(e) = self.transport.close().await {
            log::debug!("Close after connection loss on {} failed: {}", self.transport.address(), e);
        }
        ChannelMetrics::add(&self.metrics.connection_losses, 1);
        log::warn!("Connection lost on {}: {}", self.transport.address(), reason);
        self.emit(ChannelEventKind::ConnectionLost);
    }
}

/// Blocking-style byte channel: a background task keeps draining the
/// transport while callers read exact lengths or delimited frames from the
/// buffered bytes.
///
/// Reads assume a single logical consumer. Concurrent readers never corrupt
/// the buffer, but which caller gets which bytes is unspecified.
pub struct ReliableChannel {
    shared: Arc<ChannelShared>,
    // Also serializes connect/disconnect.
    ingest: Mutex<Option<JoinHandle<()>>>,
}

impl ReliableChannel {
    pub fn new(transport: Arc<dyn Transport>, options: ChannelOptions) -> Self {
        let (state_tx, _) = watch::channel(ChannelState::Closed);
        let (events_tx, _) = broadcast::channel(options.event_capacity.max(1));
        let scope = CancellationToken::new();
        scope.cancel();

        Self {
            shared: Arc::new(ChannelShared {
                transport,
                buffer: SharedBuffer::new(),
                options,
                metrics: ChannelMetrics::default(),
                state_tx,
                scope: Mutex::new(scope),
                events_tx,
            }),
            ingest: Mutex::new(None),
        }
    }

    /// Channel over a tokio-serial port at `address`.
    pub fn serial(address: impl Into<String>, settings: SerialSettings, options: ChannelOptions) -> Self {
        Self::new(Arc::new(SerialTransport::new(address, settings)), options)
    }

    pub fn address(&self) -> &str {
        self.shared.transport.address()
    }

    pub fn state(&self) -> ChannelState {
        *self.shared.state_tx.borrow()
    }

    pub fn is_open(&self) -> bool {
        self.shared.is_open()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChannelEvent> {
        self.shared.events_tx.subscribe()
    }

    pub fn state_receiver(&self) -> watch::Receiver<ChannelState> {
        self.shared.state_tx.subscribe()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.shared.metrics.snapshot()
    }

    pub async fn buffered_len(&self) -> usize {
        self.shared.buffer.len().await
    }

    /// Drain everything ingested so far. Works in any state, so bytes that
    /// arrived before a disconnect can still be collected.
    pub async fn take_buffered(&self) -> Bytes {
        let bytes = self.shared.buffer.take_all().await;
        ChannelMetrics::add(&self.shared.metrics.bytes_consumed, bytes.len() as u64);
        bytes
    }

    pub async fn connect(&self, token: &CancellationToken) -> Result<ConnectOutcome> {
        let mut ingest = self.ingest.lock().await;
        if self.is_open() {
            return Ok(ConnectOutcome::AlreadyConnected);
        }
        // A session that died from connection loss leaves a finished task behind.
        if let Some(stale) = ingest.take() {
            let _ = stale.await;
        }

        let transport = &self.shared.transport;
        let opened = tokio::select! {
            biased;
            _ = token.cancelled() => Err(SerialError::ConnectionFailed("Connect cancelled".to_string())),
            res = transport.open() => res,
        };
        if let Err(e) = opened {
            let _ = transport.close().await;
            log::warn!("Failed to connect to {}: {}", self.address(), e);
            return Err(match e {
                SerialError::ConnectionFailed(msg) => SerialError::ConnectionFailed(msg),
                other => SerialError::ConnectionFailed(other.to_string()),
            });
        }

        // Bytes left over from a previous session belong to a different exchange.
        self.shared.buffer.clear().await;

        let scope = CancellationToken::new();
        *self.shared.scope.lock().await = scope.clone();
        self.shared.state_tx.send_replace(ChannelState::Open);
        *ingest = Some(tokio::spawn(ingest_loop(self.shared.clone(), scope)));

        log::info!("Connected to {}", self.address());
        self.shared.emit(ChannelEventKind::Connected);
        Ok(ConnectOutcome::Connected)
    }

    pub async fn disconnect(&self) -> Result<DisconnectOutcome> {
        let mut ingest = self.ingest.lock().await;
        self.shared.current_scope().await.cancel();
        if let Some(handle) = ingest.take() {
            let _ = handle.await;
        }

        if !self.shared.close_state() {
            return Ok(DisconnectOutcome::AlreadyDisconnected);
        }
        if let Err(e) = self.shared.transport.close().await {
            log::warn!("Error closing {}: {}", self.address(), e);
        }

        log::info!("Disconnected from {}", self.address());
        self.shared.emit(ChannelEventKind::Disconnected);
        Ok(DisconnectOutcome::Disconnected)
    }

    /// Write straight to the transport. No retry.
    ///
    /// Failing for lack of a connection always raises `ConnectionLost`, even
    /// when the channel was already closed.
    pub async fn transmit(&self, data: &[u8]) -> Result<usize> {
        if !self.is_open() {
            log::debug!("transmit on closed channel {}", self.address());
            self.shared.emit(ChannelEventKind::ConnectionLost);
            return Err(SerialError::NotConnected);
        }
        let transport = &self.shared.transport;
        if !transport.is_open() {
            self.lose_connection("transport closed before write").await;
            return Err(SerialError::NotConnected);
        }

        match transport.write(data).await {
            Ok(n) => {
                ChannelMetrics::add(&self.shared.metrics.bytes_transmitted, n as u64);
                Ok(n)
            }
            Err(e) if !transport.is_open() => {
                self.lose_connection(&e.to_string()).await;
                Err(SerialError::NotConnected)
            }
            Err(e) => Err(e),
        }
    }

    /// Wait for at least `n` buffered bytes and remove exactly the first `n`.
    pub async fn read_exact(&self, n: usize, token: &CancellationToken) -> Result<Bytes> {
        if !self.is_open() {
            return Err(SerialError::NotConnected);
        }
        let scope = self.shared.current_scope().await;
        let outcome = self
            .shared
            .buffer
            .wait_until_length_at_least(n, token, &scope, self.shared.options.poll_interval())
            .await;

        match outcome {
            WaitOutcome::Ready(_) => self.take_exact_after_wake(n).await,
            WaitOutcome::Cancelled => Err(self.read_timed_out("read_exact")),
            WaitOutcome::Closed => Err(SerialError::NotConnected),
        }
    }

    /// Wait for `delimiter` and remove everything up to and including it.
    pub async fn read_until(&self, delimiter: u8, token: &CancellationToken) -> Result<Bytes> {
        if !self.is_open() {
            return Err(SerialError::NotConnected);
        }
        let scope = self.shared.current_scope().await;
        loop {
            let outcome = self
                .shared
                .buffer
                .wait_until_contains(delimiter, token, &scope, self.shared.options.poll_interval())
                .await;

            match outcome {
                WaitOutcome::Ready(_) => {
                    // Another reader may have taken the delimiter in between; wait again.
                    if let Some(bytes) = self.shared.buffer.take_until(delimiter).await {
                        ChannelMetrics::add(&self.shared.metrics.bytes_consumed, bytes.len() as u64);
                        return Ok(bytes);
                    }
                }
                WaitOutcome::Cancelled => return Err(self.read_timed_out("read_until")),
                WaitOutcome::Closed => return Err(SerialError::NotConnected),
            }
        }
    }

    pub async fn read_exact_timeout(&self, n: usize, timeout: Duration) -> Result<Bytes> {
        let token = deadline_token(timeout);
        let result = self.read_exact(n, &token).await;
        token.cancel();
        result
    }

    pub async fn read_until_timeout(&self, delimiter: u8, timeout: Duration) -> Result<Bytes> {
        let token = deadline_token(timeout);
        let result = self.read_until(delimiter, &token).await;
        token.cancel();
        result
    }

    /// Second half of `read_exact`: the wait saw `n` bytes, but another
    /// reader may have drained some since. Nothing is removed on a shortfall.
    async fn take_exact_after_wake(&self, n: usize) -> Result<Bytes> {
        match self.shared.buffer.take_exact(n).await {
            Ok(bytes) => {
                ChannelMetrics::add(&self.shared.metrics.bytes_consumed, n as u64);
                Ok(bytes)
            }
            Err(available) => {
                log::debug!("read_exact on {} woke with {} of {} bytes", self.address(), available, n);
                Err(SerialError::ReadFailed { expected: n, available })
            }
        }
    }

    async fn lose_connection(&self, reason: &str) {
        let scope = self.shared.current_scope().await;
        self.shared.connection_lost(&scope, reason).await;
    }

    fn read_timed_out(&self, op: &str) -> SerialError {
        ChannelMetrics::add(&self.shared.metrics.read_timeouts, 1);
        log::debug!("{} on {} timed out", op, self.address());
        SerialError::Timeout
    }
}

impl Drop for ReliableChannel {
    fn drop(&mut self) {
        // Stop the ingestion task; the transport closes when its last Arc goes.
        if let Ok(scope) = self.shared.scope.try_lock() {
            scope.cancel();
        }
    }
}

/// Token that cancels itself after `timeout`. Cancel it early to release the timer task.
pub fn deadline_token(timeout: Duration) -> CancellationToken {
    let token = CancellationToken::new();
    let timer = token.clone();
    tokio::spawn(async move {
        tokio::select! {
            _ = timer.cancelled() => {}
            _ = tokio::time::sleep(timeout) => timer.cancel(),
        }
    });
    token
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serial::MockTransport;

    async fn connected() -> (Arc<MockTransport>, ReliableChannel) {
        let mock = Arc::new(MockTransport::new("/dev/ttyMOCK"));
        let channel = ReliableChannel::new(mock.clone(), ChannelOptions::default());
        channel.connect(&CancellationToken::new()).await.unwrap();
        (mock, channel)
    }

    async fn wait_buffered(channel: &ReliableChannel, n: usize) {
        let token = deadline_token(Duration::from_secs(2));
        let scope = channel.shared.current_scope().await;
        let outcome = channel
            .shared
            .buffer
            .wait_until_length_at_least(n, &token, &scope, channel.shared.options.poll_interval())
            .await;
        assert!(matches!(outcome, WaitOutcome::Ready(len) if len >= n));
    }

    #[tokio::test]
    async fn shortfall_after_wake_is_read_failed() {
        let (mock, channel) = connected().await;
        mock.push(vec![1, 2, 3, 4]);
        // The wait for 4 bytes succeeds...
        wait_buffered(&channel, 4).await;

        // ...then another reader drains 3 of them before this one takes.
        let other = channel.read_exact(3, &CancellationToken::new()).await.unwrap();
        assert_eq!(&other[..], &[1, 2, 3]);

        match channel.take_exact_after_wake(4).await {
            Err(SerialError::ReadFailed { expected, available }) => {
                assert_eq!(expected, 4);
                assert_eq!(available, 1);
            }
            other => panic!("expected ReadFailed, got {:?}", other),
        }
        assert_eq!(channel.buffered_len().await, 1);
        assert_eq!(channel.metrics().bytes_consumed, 3);
        assert_eq!(&channel.take_buffered().await[..], &[4]);
    }
}
