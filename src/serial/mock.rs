//! In-memory transport for tests and demos.
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};

use super::{Result, SerialError, Transport};

enum MockInput {
    Data(Vec<u8>),
    Unplug,
}

struct MockReader {
    rx: mpsc::UnboundedReceiver<MockInput>,
    leftover: Vec<u8>,
}

/// Scripted transport: bytes pushed with [`MockTransport::push`] come out of
/// `read_some` in order, writes are captured for inspection.
pub struct MockTransport {
    address: String,
    open: AtomicBool,
    fail_open: AtomicBool,
    pending_read_errors: AtomicUsize,
    open_calls: AtomicUsize,
    write_calls: AtomicUsize,
    input_tx: mpsc::UnboundedSender<MockInput>,
    reader: Mutex<MockReader>,
    written: Mutex<Vec<u8>>,
}

impl MockTransport {
    pub fn new(address: impl Into<String>) -> Self {
        let (input_tx, rx) = mpsc::unbounded_channel();
        Self {
            address: address.into(),
            open: AtomicBool::new(false),
            fail_open: AtomicBool::new(false),
            pending_read_errors: AtomicUsize::new(0),
            open_calls: AtomicUsize::new(0),
            write_calls: AtomicUsize::new(0),
            input_tx,
            reader: Mutex::new(MockReader { rx, leftover: Vec::new() }),
            written: Mutex::new(Vec::new()),
        }
    }

    /// Queue a chunk the device "sends"; delivered by the next `read_some` calls.
    pub fn push(&self, chunk: impl Into<Vec<u8>>) {
        let _ = self.input_tx.send(MockInput::Data(chunk.into()));
    }

    /// Simulate the cable being pulled: the pending read fails and the transport reports closed.
    pub fn unplug(&self) {
        self.open.store(false, Ordering::Release);
        let _ = self.input_tx.send(MockInput::Unplug);
    }

    /// Report closed without waking a pending read, like a port whose driver
    /// went away while nothing was being received.
    pub fn close_without_notice(&self) {
        self.open.store(false, Ordering::Release);
    }

    pub fn set_fail_open(&self, fail: bool) {
        self.fail_open.store(fail, Ordering::Release);
    }

    /// Make the next `count` reads fail with a transient I/O error.
    pub fn inject_read_errors(&self, count: usize) {
        self.pending_read_errors.store(count, Ordering::Release);
    }

    pub fn open_calls(&self) -> usize {
        self.open_calls.load(Ordering::Acquire)
    }

    pub fn write_calls(&self) -> usize {
        self.write_calls.load(Ordering::Acquire)
    }

    pub async fn written(&self) -> Vec<u8> {
        self.written.lock().await.clone()
    }

    pub async fn take_written(&self) -> Vec<u8> {
        std::mem::take(&mut *self.written.lock().await)
    }
}

#[async_trait]
impl Transport for MockTransport {
    fn address(&self) -> &str {
        &self.address
    }

    async fn open(&self) -> Result<()> {
        self.open_calls.fetch_add(1, Ordering::AcqRel);
        if self.fail_open.load(Ordering::Acquire) {
            return Err(SerialError::ConnectionFailed(format!("{}: device refused to open", self.address)));
        }
        self.open.store(true, Ordering::Release);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.open.store(false, Ordering::Release);
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    async fn write(&self, data: &[u8]) -> Result<usize> {
        if !self.is_open() {
            return Err(SerialError::NotConnected);
        }
        self.write_calls.fetch_add(1, Ordering::AcqRel);
        self.written.lock().await.extend_from_slice(data);
        Ok(data.len())
    }

    async fn read_some(&self, buf: &mut [u8]) -> Result<usize> {
        if !self.is_open() {
            return Err(SerialError::NotConnected);
        }
        let injected = self
            .pending_read_errors
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(SerialError::IoError(std::io::Error::new(std::io::ErrorKind::Other, "injected read error")));
        }

        let mut reader = self.reader.lock().await;
        if reader.leftover.is_empty() {
            match reader.rx.recv().await {
                Some(MockInput::Data(chunk)) => reader.leftover = chunk,
                Some(MockInput::Unplug) | None => {
                    self.open.store(false, Ordering::Release);
                    return Err(SerialError::IoError(std::io::ErrorKind::BrokenPipe.into()));
                }
            }
        }

        let n = reader.leftover.len().min(buf.len());
        buf[..n].copy_from_slice(&reader.leftover[..n]);
        reader.leftover.drain(..n);
        Ok(n)
    }
}
