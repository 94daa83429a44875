//! Text command/response protocols layered on the reliable channel.
//!
//! All three speak newline-terminated ASCII frames, the same framing the
//! JoyCore firmware uses for its configuration commands.
pub mod line;
pub mod property;
pub mod register;

pub use line::LineProtocol;
pub use property::PropertyProtocol;
pub use register::RegisterProtocol;

use crate::serial::{Result, SerialError};

pub const LINE_FEED: u8 = b'\n';
pub const DEFAULT_RESPONSE_TIMEOUT_MS: u64 = 2000;

/// Map an `OK` / `ERR:<reason>` acknowledgement onto a result.
pub(crate) fn expect_ok(response: &str, operation: &str) -> Result<()> {
    if response == "OK" || response.starts_with("OK:") {
        return Ok(());
    }
    if let Some(reason) = response.strip_prefix("ERR:") {
        return Err(SerialError::ProtocolError(format!("{} failed: {}", operation, reason.trim())));
    }
    Err(SerialError::ProtocolError(format!("{}: unexpected response '{}'", operation, response)))
}

/// Turn a device-reported `ERR:<reason>` into an error before parsing a payload.
pub(crate) fn reject_error(response: &str, operation: &str) -> Result<()> {
    match response.strip_prefix("ERR:") {
        Some(reason) => Err(SerialError::ProtocolError(format!("{} failed: {}", operation, reason.trim()))),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ok_acknowledgements() {
        assert!(expect_ok("OK", "SAVE").is_ok());
        assert!(expect_ok("OK:SAVED", "SAVE").is_ok());
        assert!(expect_ok("OKAY", "SAVE").is_err());
    }

    #[test]
    fn err_acknowledgement_carries_reason() {
        match expect_ok("ERR: flash busy", "SAVE") {
            Err(SerialError::ProtocolError(msg)) => assert_eq!(msg, "SAVE failed: flash busy"),
            other => panic!("unexpected: {:?}", other),
        }
    }
}
