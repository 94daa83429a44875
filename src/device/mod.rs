pub mod address;
pub mod port_monitor;

pub use address::DeviceAddress;
pub use port_monitor::{diff_ports, PortEnumerator, PortEvent, PortScanner, ScannerOptions, SystemPorts};

// JoyCore device identifiers (RP2040-based)
pub const JOYCORE_VID: u16 = 0x2E8A; // Raspberry Pi Foundation
pub const JOYCORE_PID: u16 = 0xA02F; // RP2040 CDC
