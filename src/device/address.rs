use std::fmt;
use serde::{Deserialize, Serialize};

/// Platform-normalized serial device address (`/dev/ttyACM0`, `\\.\COM12`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceAddress(String);

impl DeviceAddress {
    /// Normalize for the current platform.
    pub fn normalize(raw: &str) -> Self {
        if cfg!(windows) {
            Self::normalize_windows(raw)
        } else {
            Self::normalize_unix(raw)
        }
    }

    /// Bare device names (`ttyUSB0`, `cu.usbmodem1101`) live under `/dev`.
    pub fn normalize_unix(raw: &str) -> Self {
        let raw = raw.trim();
        if raw.starts_with('/') {
            Self(raw.to_string())
        } else {
            Self(format!("/dev/{}", raw))
        }
    }

    /// `COMn` names get the `\\.\` device namespace prefix, which ports above COM9 require.
    pub fn normalize_windows(raw: &str) -> Self {
        let raw = raw.trim();
        if raw.starts_with(r"\\.\") {
            return Self(raw.to_string());
        }
        let upper = raw.to_ascii_uppercase();
        match upper.strip_prefix("COM") {
            Some(num) if !num.is_empty() && num.chars().all(|c| c.is_ascii_digit()) => {
                Self(format!(r"\\.\COM{}", num))
            }
            _ => Self(raw.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short display name: `ttyACM0`, `COM12`.
    pub fn short_name(&self) -> &str {
        let s = self.0.strip_prefix(r"\\.\").unwrap_or(&self.0);
        s.rsplit('/').next().unwrap_or(s)
    }
}

impl fmt::Display for DeviceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for DeviceAddress {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<DeviceAddress> for String {
    fn from(addr: DeviceAddress) -> Self {
        addr.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unix_names() {
        assert_eq!(DeviceAddress::normalize_unix("ttyACM0").as_str(), "/dev/ttyACM0");
        assert_eq!(DeviceAddress::normalize_unix("/dev/ttyUSB1").as_str(), "/dev/ttyUSB1");
        assert_eq!(DeviceAddress::normalize_unix("/dev/ttyUSB1").short_name(), "ttyUSB1");
    }

    #[test]
    fn windows_names() {
        assert_eq!(DeviceAddress::normalize_windows("COM3").as_str(), r"\\.\COM3");
        assert_eq!(DeviceAddress::normalize_windows("com12").as_str(), r"\\.\COM12");
        assert_eq!(DeviceAddress::normalize_windows(r"\\.\COM4").as_str(), r"\\.\COM4");
        assert_eq!(DeviceAddress::normalize_windows("COMX").as_str(), "COMX");
        assert_eq!(DeviceAddress::normalize_windows("COM12").short_name(), "COM12");
    }
}
