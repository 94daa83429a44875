use std::io::ErrorKind;
use std::sync::atomic::{AtomicBool, Ordering};
use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::Mutex;
use tokio_serial::{SerialPort, SerialPortBuilderExt, SerialStream};

use super::{Result, SerialError, SerialSettings};

/// Duplex byte connection owned by the OS.
///
/// Methods take `&self` so the ingestion loop can sit in `read_some` while
/// callers write; implementations keep the two directions independently locked.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Platform-normalized address this transport was created for.
    fn address(&self) -> &str;

    async fn open(&self) -> Result<()>;

    async fn close(&self) -> Result<()>;

    /// False once the transport is closed or has detected that the device went away.
    fn is_open(&self) -> bool;

    async fn write(&self, data: &[u8]) -> Result<usize>;

    /// Best-effort read of up to `buf.len()` bytes; returns as soon as any data is available.
    async fn read_some(&self, buf: &mut [u8]) -> Result<usize>;
}

/// Serial port transport backed by tokio-serial.
pub struct SerialTransport {
    address: String,
    settings: SerialSettings,
    reader: Mutex<Option<ReadHalf<SerialStream>>>,
    writer: Mutex<Option<WriteHalf<SerialStream>>>,
    open: AtomicBool,
}

impl SerialTransport {
    pub fn new(address: impl Into<String>, settings: SerialSettings) -> Self {
        Self {
            address: address.into(),
            settings,
            reader: Mutex::new(None),
            writer: Mutex::new(None),
            open: AtomicBool::new(false),
        }
    }

    fn mark_lost(&self, reason: &str) {
        if self.open.swap(false, Ordering::AcqRel) {
            log::warn!("Serial transport {} lost: {}", self.address, reason);
        }
    }
}

/// Error kinds after which the port will never produce data again.
fn is_fatal(err: &std::io::Error) -> bool {
    if matches!(
        err.kind(),
        ErrorKind::BrokenPipe
            | ErrorKind::NotConnected
            | ErrorKind::UnexpectedEof
            | ErrorKind::ConnectionAborted
            | ErrorKind::ConnectionReset
            | ErrorKind::PermissionDenied
    ) {
        return true;
    }
    match err.raw_os_error() {
        // EIO, ENXIO, ENODEV: the USB CDC device was unplugged
        #[cfg(unix)]
        Some(5) | Some(6) | Some(19) => true,
        // ERROR_GEN_FAILURE, ERROR_BAD_COMMAND, ERROR_DEVICE_NOT_CONNECTED
        #[cfg(windows)]
        Some(31) | Some(22) | Some(1167) => true,
        _ => false,
    }
}

#[async_trait]
impl Transport for SerialTransport {
    fn address(&self) -> &str {
        &self.address
    }

    async fn open(&self) -> Result<()> {
        if self.is_open() {
            return Ok(());
        }

        let mut stream = self
            .settings
            .builder(&self.address)?
            .open_native_async()
            .map_err(|e| SerialError::ConnectionFailed(format!("{}: {}", self.address, e)))?;

        stream
            .write_data_terminal_ready(self.settings.dtr)
            .map_err(|e| SerialError::ConnectionFailed(format!("Failed to set DTR: {}", e)))?;
        stream
            .write_request_to_send(self.settings.rts)
            .map_err(|e| SerialError::ConnectionFailed(format!("Failed to set RTS: {}", e)))?;

        let (read_half, write_half) = tokio::io::split(stream);
        *self.reader.lock().await = Some(read_half);
        *self.writer.lock().await = Some(write_half);
        self.open.store(true, Ordering::Release);

        log::info!("Opened serial port {} at {} baud", self.address, self.settings.baud_rate);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.open.store(false, Ordering::Release);
        let reader = self.reader.lock().await.take();
        let writer = self.writer.lock().await.take();
        if reader.is_some() || writer.is_some() {
            log::info!("Closed serial port {}", self.address);
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    async fn write(&self, data: &[u8]) -> Result<usize> {
        let mut guard = self.writer.lock().await;
        let writer = guard.as_mut().ok_or(SerialError::NotConnected)?;

        let result = async {
            writer.write_all(data).await?;
            writer.flush().await
        }
        .await;

        match result {
            Ok(()) => Ok(data.len()),
            Err(e) => {
                if is_fatal(&e) {
                    self.mark_lost(&e.to_string());
                }
                Err(SerialError::IoError(e))
            }
        }
    }

    async fn read_some(&self, buf: &mut [u8]) -> Result<usize> {
        let mut guard = self.reader.lock().await;
        let reader = guard.as_mut().ok_or(SerialError::NotConnected)?;

        match reader.read(buf).await {
            Ok(0) if !buf.is_empty() => {
                self.mark_lost("end of stream");
                Err(SerialError::IoError(ErrorKind::UnexpectedEof.into()))
            }
            Ok(n) => Ok(n),
            Err(e) if e.kind() == ErrorKind::TimedOut || e.kind() == ErrorKind::Interrupted => Ok(0),
            Err(e) => {
                if is_fatal(&e) {
                    self.mark_lost(&e.to_string());
                }
                Err(SerialError::IoError(e))
            }
        }
    }
}
