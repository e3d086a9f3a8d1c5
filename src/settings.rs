//! Connection settings and the editable settings draft.
//!
//! The draft mirrors what the user can type: the port stays raw text until
//! [`SettingsDraft::to_settings`] turns the draft into a typed
//! [`ConnectionSettings`] or reports which field is invalid.

use serde_json::Value;
use tracing::warn;

use crate::error::ValidationError;
use crate::protocol::{SecurityType, SessionConfigDocument};

pub const DEFAULT_HOST: &str = "localhost";
pub const DEFAULT_PORT: u16 = 23;

/// Validated settings, ready for a connect attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionSettings {
    pub host: String,
    pub port: u16,
    pub security: SecurityType,
}

impl ConnectionSettings {
    /// `"<host>:<port>"`, as shown in the window title.
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettingsDraft {
    pub host: String,
    pub port: String,
    pub security: SecurityType,
}

impl Default for SettingsDraft {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_owned(),
            port: DEFAULT_PORT.to_string(),
            security: SecurityType::Telnet,
        }
    }
}

impl SettingsDraft {
    pub fn new(host: impl Into<String>, port: impl Into<String>, security: SecurityType) -> Self {
        Self {
            host: host.into(),
            port: port.into(),
            security,
        }
    }

    /// Host first, then port.
    pub fn to_settings(&self) -> Result<ConnectionSettings, ValidationError> {
        check_host(&self.host)?;
        let port = parse_port(&self.port).ok_or(ValidationError::Port)?;
        Ok(ConnectionSettings {
            host: self.host.clone(),
            port,
            security: self.security,
        })
    }

    /// Overwrite fields from a stored document. Security is only replaced
    /// when the document names a known type.
    pub fn apply_document(&mut self, doc: &SessionConfigDocument) {
        match doc.security_type() {
            Some(security) => self.security = security,
            None if doc.security.is_some() => {
                warn!(target: "settings", security = ?doc.security, "Unknown stored security type, keeping current");
            }
            None => {}
        }
        self.host = doc.host.clone();
        self.port = port_text(&doc.port);
    }

    pub fn to_document(&self) -> SessionConfigDocument {
        let port = match parse_port(&self.port) {
            Some(port) => Value::from(port),
            None => Value::String(self.port.clone()),
        };
        SessionConfigDocument::new(self.host.clone(), port, self.security)
    }
}

pub fn check_host(host: &str) -> Result<(), ValidationError> {
    if host.is_empty() {
        Err(ValidationError::Host)
    } else {
        Ok(())
    }
}

/// Parse a port field. Accepts integral values in `0..=65535`, including
/// integral floats such as `"23.0"`.
pub fn parse_port(text: &str) -> Option<u16> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    if let Ok(n) = text.parse::<i64>() {
        return u16::try_from(n).ok();
    }
    let f = text.parse::<f64>().ok()?;
    if !f.is_finite() || f.fract() != 0.0 || !(0.0..=65535.0).contains(&f) {
        return None;
    }
    Some(f as u16)
}

/// Render a loosely typed JSON port as the text the draft stores.
pub fn port_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
