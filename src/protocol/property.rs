use crate::serial::{Result, SerialError};
use super::{expect_ok, reject_error, LineProtocol};

/// Named-property access: `PROP_GET:<name>` answers `PROP:<name>=<value>`,
/// `PROP_SET:<name>=<value>` answers `OK`.
pub struct PropertyProtocol {
    line: LineProtocol,
}

impl PropertyProtocol {
    pub fn new(line: LineProtocol) -> Self {
        Self { line }
    }

    pub async fn get(&self, name: &str) -> Result<String> {
        validate_name(name)?;
        let response = self.line.query(&format!("PROP_GET:{}", name)).await?;
        parse_property_response(&response, name)
    }

    pub async fn set(&self, name: &str, value: &str) -> Result<()> {
        validate_name(name)?;
        if value.contains(['\n', '\r']) {
            return Err(SerialError::ProtocolError("Property value must be a single line".to_string()));
        }
        let response = self.line.query(&format!("PROP_SET:{}={}", name, value)).await?;
        expect_ok(&response, &format!("PROP_SET {}", name))
    }

    pub fn line(&self) -> &LineProtocol {
        &self.line
    }
}

fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() || name.contains(['=', ':', '\n', '\r']) {
        return Err(SerialError::ProtocolError(format!("Invalid property name: {:?}", name)));
    }
    Ok(())
}

pub fn parse_property_response(response: &str, name: &str) -> Result<String> {
    reject_error(response, &format!("PROP_GET {}", name))?;

    let body = response
        .strip_prefix("PROP:")
        .ok_or_else(|| SerialError::ProtocolError(format!("Invalid property response: {}", response)))?;
    let (key, value) = body
        .split_once('=')
        .ok_or_else(|| SerialError::ProtocolError(format!("Incomplete property response: {}", response)))?;
    if key != name {
        return Err(SerialError::ProtocolError(format!("Asked for property {}, device answered {}", name, key)));
    }
    Ok(value.to_string())
}
