//! Shared receive buffer and the cancellable wait primitives over it.
//!
//! Bytes enter only through [`SharedBuffer::append`] (the ingestion loop) and
//! leave only from the front through the `take_*` methods. Every mutation and
//! every predicate check happens under the same mutex.
use std::time::Duration;
use bytes::{Bytes, BytesMut};
use tokio::sync::{watch, Mutex};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// Condition held; carries the buffer length observed at wake time.
    Ready(usize),
    /// The caller's token fired first.
    Cancelled,
    /// The session scope fired first: the channel closed underneath the wait.
    Closed,
}

pub struct SharedBuffer {
    data: Mutex<BytesMut>,
    // Bumped after every append so waiters re-check without busy polling.
    appended_tx: watch::Sender<u64>,
}

impl SharedBuffer {
    pub fn new() -> Self {
        let (appended_tx, _) = watch::channel(0);
        Self { data: Mutex::new(BytesMut::new()), appended_tx }
    }

    pub async fn append(&self, bytes: &[u8]) {
        if bytes.is_empty() {
            return;
        }
        self.data.lock().await.extend_from_slice(bytes);
        self.appended_tx.send_modify(|generation| *generation = generation.wrapping_add(1));
    }

    pub async fn len(&self) -> usize {
        self.data.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.data.lock().await.is_empty()
    }

    pub async fn clear(&self) {
        self.data.lock().await.clear();
    }

    pub async fn take_all(&self) -> Bytes {
        self.data.lock().await.split().freeze()
    }

    /// Remove exactly the first `n` bytes, or nothing at all.
    ///
    /// On shortfall the buffer is untouched and the available length is returned.
    pub async fn take_exact(&self, n: usize) -> Result<Bytes, usize> {
        let mut data = self.data.lock().await;
        if data.len() < n {
            return Err(data.len());
        }
        Ok(data.split_to(n).freeze())
    }

    /// Remove everything up to and including the first `delimiter`.
    pub async fn take_until(&self, delimiter: u8) -> Option<Bytes> {
        let mut data = self.data.lock().await;
        let pos = data.iter().position(|b| *b == delimiter)?;
        Some(data.split_to(pos + 1).freeze())
    }

    pub async fn wait_until_length_at_least(
        &self,
        n: usize,
        token: &CancellationToken,
        scope: &CancellationToken,
        poll: Duration,
    ) -> WaitOutcome {
        self.wait_for(token, scope, poll, |data| data.len() >= n).await
    }

    pub async fn wait_until_contains(
        &self,
        byte: u8,
        token: &CancellationToken,
        scope: &CancellationToken,
        poll: Duration,
    ) -> WaitOutcome {
        self.wait_for(token, scope, poll, |data| data.contains(&byte)).await
    }

    async fn wait_for<F>(
        &self,
        token: &CancellationToken,
        scope: &CancellationToken,
        poll: Duration,
        ready: F,
    ) -> WaitOutcome
    where
        F: Fn(&[u8]) -> bool,
    {
        let mut appended_rx = self.appended_tx.subscribe();
        loop {
            // Mark seen before checking so an append racing the check still wakes us.
            appended_rx.borrow_and_update();
            {
                let data = self.data.lock().await;
                if ready(&data) {
                    return WaitOutcome::Ready(data.len());
                }
            }

            tokio::select! {
                biased;
                _ = token.cancelled() => return WaitOutcome::Cancelled,
                _ = scope.cancelled() => return WaitOutcome::Closed,
                _ = appended_rx.changed() => {},
                _ = tokio::time::sleep(poll) => {},
            }
        }
    }
}

impl Default for SharedBuffer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    const POLL: Duration = Duration::from_millis(1);

    #[tokio::test]
    async fn take_exact_is_all_or_nothing() {
        let buf = SharedBuffer::new();
        buf.append(b"abc").await;
        assert_eq!(buf.take_exact(4).await, Err(3));
        assert_eq!(buf.len().await, 3);
        assert_eq!(&buf.take_exact(2).await.unwrap()[..], b"ab");
        assert_eq!(&buf.take_all().await[..], b"c");
        assert!(buf.is_empty().await);
    }

    #[tokio::test]
    async fn take_until_includes_delimiter() {
        let buf = SharedBuffer::new();
        buf.append(b"abc\ndef\n").await;
        assert_eq!(&buf.take_until(b'\n').await.unwrap()[..], b"abc\n");
        assert_eq!(&buf.take_until(b'\n').await.unwrap()[..], b"def\n");
        assert!(buf.take_until(b'\n').await.is_none());
    }

    #[tokio::test]
    async fn cancelled_wait_leaves_buffer_alone() {
        let buf = SharedBuffer::new();
        buf.append(b"xy").await;
        let token = CancellationToken::new();
        token.cancel();
        let scope = CancellationToken::new();
        assert_eq!(buf.wait_until_length_at_least(10, &token, &scope, POLL).await, WaitOutcome::Cancelled);
        assert_eq!(buf.len().await, 2);
    }

    #[tokio::test]
    async fn closed_scope_ends_wait() {
        let buf = SharedBuffer::new();
        let token = CancellationToken::new();
        let scope = CancellationToken::new();
        scope.cancel();
        assert_eq!(buf.wait_until_contains(b'\n', &token, &scope, POLL).await, WaitOutcome::Closed);
    }

    #[tokio::test]
    async fn wait_wakes_on_append() {
        let buf = Arc::new(SharedBuffer::new());
        let token = CancellationToken::new();
        let scope = CancellationToken::new();
        let waiter = {
            let buf = buf.clone();
            let (token, scope) = (token.clone(), scope.clone());
            tokio::spawn(async move { buf.wait_until_contains(b';', &token, &scope, Duration::from_secs(5)).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        buf.append(b"ok;").await;
        let outcome = tokio::time::timeout(Duration::from_secs(1), waiter).await.unwrap().unwrap();
        assert_eq!(outcome, WaitOutcome::Ready(3));
    }
}
