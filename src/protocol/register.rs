use crate::serial::{Result, SerialError};
use super::{expect_ok, reject_error, LineProtocol};

/// Numbered register access.
///
/// Request `REG_GET:<n>` answers `REG:<n>:<value>`; `REG_SET:<n>:<value>`
/// answers `OK`. Values may be decimal or `0x` hex.
pub struct RegisterProtocol {
    line: LineProtocol,
}

impl RegisterProtocol {
    pub fn new(line: LineProtocol) -> Self {
        Self { line }
    }

    pub async fn get(&self, register: u16) -> Result<u32> {
        let response = self.line.query(&format!("REG_GET:{}", register)).await?;
        parse_register_response(&response, register)
    }

    pub async fn set(&self, register: u16, value: u32) -> Result<()> {
        let response = self.line.query(&format!("REG_SET:{}:{}", register, value)).await?;
        expect_ok(&response, &format!("REG_SET {}", register))
    }

    pub fn line(&self) -> &LineProtocol {
        &self.line
    }
}

pub fn parse_register_response(response: &str, register: u16) -> Result<u32> {
    reject_error(response, &format!("REG_GET {}", register))?;

    let body = response
        .strip_prefix("REG:")
        .ok_or_else(|| SerialError::ProtocolError(format!("Invalid register response: {}", response)))?;
    let (id, value) = body
        .split_once(':')
        .ok_or_else(|| SerialError::ProtocolError(format!("Incomplete register response: {}", response)))?;

    let id: u16 = id
        .trim()
        .parse()
        .map_err(|_| SerialError::ProtocolError(format!("Invalid register number: {}", id)))?;
    if id != register {
        return Err(SerialError::ProtocolError(format!("Asked for register {}, device answered {}", register, id)));
    }

    parse_value(value.trim())
        .ok_or_else(|| SerialError::ProtocolError(format!("Invalid register value: {}", value)))
}

fn parse_value(text: &str) -> Option<u32> {
    match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16).ok(),
        None => text.parse().ok(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_decimal_and_hex() {
        assert_eq!(parse_register_response("REG:3:42", 3).unwrap(), 42);
        assert_eq!(parse_register_response("REG:7:0xFF", 7).unwrap(), 255);
    }

    #[test]
    fn rejects_other_register() {
        assert!(parse_register_response("REG:4:1", 3).is_err());
    }

    #[test]
    fn device_error_is_protocol_error() {
        match parse_register_response("ERR:NO_SUCH_REGISTER", 99) {
            Err(SerialError::ProtocolError(msg)) => assert!(msg.contains("NO_SUCH_REGISTER")),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_register_response("HELLO", 1).is_err());
        assert!(parse_register_response("REG:1", 1).is_err());
        assert!(parse_register_response("REG:1:zz", 1).is_err());
    }
}
