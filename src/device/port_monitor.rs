use std::collections::BTreeMap;
use std::time::Duration;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::serial::{Result, SerialDeviceInfo};
use super::DeviceAddress;

/// Events emitted by the port scanner
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PortEvent {
    /// A serial port was added
    PortAdded(SerialDeviceInfo),
    /// A serial port was removed
    PortRemoved(String),
}

/// Source of the currently attached serial ports.
pub trait PortEnumerator: Send + Sync + 'static {
    fn scan(&self) -> Result<Vec<SerialDeviceInfo>>;
}

/// Enumerates ports through the OS via `serialport`, optionally filtered by USB VID/PID.
#[derive(Debug, Clone, Default)]
pub struct SystemPorts {
    pub vid: Option<u16>,
    pub pid: Option<u16>,
}

impl SystemPorts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn usb(vid: u16, pid: u16) -> Self {
        Self { vid: Some(vid), pid: Some(pid) }
    }

    fn accepts(&self, info: &SerialDeviceInfo) -> bool {
        let vid_ok = self.vid.map_or(true, |v| info.vid == Some(v));
        let pid_ok = self.pid.map_or(true, |p| info.pid == Some(p));
        vid_ok && pid_ok
    }
}

impl PortEnumerator for SystemPorts {
    fn scan(&self) -> Result<Vec<SerialDeviceInfo>> {
        let ports = serialport::available_ports()?;
        let devices = ports
            .into_iter()
            .map(|port| {
                let mut info = SerialDeviceInfo::new(DeviceAddress::normalize(&port.port_name));
                if let serialport::SerialPortType::UsbPort(usb) = port.port_type {
                    info.vid = Some(usb.vid);
                    info.pid = Some(usb.pid);
                    info.serial_number = usb.serial_number;
                    info.manufacturer = usb.manufacturer;
                    info.product = usb.product;
                }
                info
            })
            .filter(|info| self.accepts(info))
            .collect();
        Ok(devices)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScannerOptions {
    pub interval_ms: u64,
    pub vid: Option<u16>,
    pub pid: Option<u16>,
}

impl Default for ScannerOptions {
    fn default() -> Self {
        Self { interval_ms: 1000, vid: None, pid: None }
    }
}

impl ScannerOptions {
    pub fn enumerator(&self) -> SystemPorts {
        SystemPorts { vid: self.vid, pid: self.pid }
    }
}

/// Compare two scans by port name. Removals come first, each group sorted by name.
pub fn diff_ports(previous: &[SerialDeviceInfo], current: &[SerialDeviceInfo]) -> Vec<PortEvent> {
    let prev: BTreeMap<&str, &SerialDeviceInfo> = previous.iter().map(|d| (d.port_name.as_str(), d)).collect();
    let curr: BTreeMap<&str, &SerialDeviceInfo> = current.iter().map(|d| (d.port_name.as_str(), d)).collect();

    let removed = prev
        .keys()
        .filter(|name| !curr.contains_key(*name))
        .map(|name| PortEvent::PortRemoved(name.to_string()));
    let added = curr
        .iter()
        .filter(|(name, _)| !prev.contains_key(*name))
        .map(|(_, info)| PortEvent::PortAdded((*info).clone()));

    removed.chain(added).collect()
}

/// Periodic scan that raises attach/detach events.
pub struct PortScanner {
    stop: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl PortScanner {
    /// Start scanning. The first scan reports every present port as added.
    pub fn start<E: PortEnumerator>(enumerator: E, interval: Duration) -> (Self, mpsc::Receiver<PortEvent>) {
        let (tx, rx) = mpsc::channel(100);
        let stop = CancellationToken::new();
        let handle = tokio::spawn(scan_loop(enumerator, interval, tx, stop.clone()));
        (Self { stop, handle: Some(handle) }, rx)
    }

    pub async fn stop(&mut self) {
        self.stop.cancel();
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

impl Drop for PortScanner {
    fn drop(&mut self) {
        self.stop.cancel();
    }
}

async fn scan_loop<E: PortEnumerator>(
    enumerator: E,
    interval: Duration,
    tx: mpsc::Sender<PortEvent>,
    stop: CancellationToken,
) {
    let mut known: Vec<SerialDeviceInfo> = Vec::new();
    let mut ticker = tokio::time::interval(interval.max(Duration::from_millis(1)));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = stop.cancelled() => {
                log::info!("Port scanner stopping");
                break;
            }
            _ = ticker.tick() => {
                let current = match enumerator.scan() {
                    Ok(ports) => ports,
                    Err(e) => {
                        log::warn!("Port scan failed, keeping previous set: {}", e);
                        continue;
                    }
                };
                for event in diff_ports(&known, &current) {
                    match &event {
                        PortEvent::PortAdded(info) => log::info!("Port attached: {}", info.port_name),
                        PortEvent::PortRemoved(name) => log::info!("Port detached: {}", name),
                    }
                    if tx.send(event).await.is_err() {
                        return;
                    }
                }
                known = current;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_by_vid_pid() {
        let filter = SystemPorts::usb(0x2E8A, 0xA02F);
        let mut joycore = SerialDeviceInfo::new("/dev/ttyACM0");
        joycore.vid = Some(0x2E8A);
        joycore.pid = Some(0xA02F);
        assert!(filter.accepts(&joycore));
        assert!(!filter.accepts(&SerialDeviceInfo::new("/dev/ttyS0")));
        assert!(SystemPorts::new().accepts(&SerialDeviceInfo::new("/dev/ttyS0")));
    }
}
