//! Wire types for the config service, the terminal stream and the host
//! dispatcher.
//!
//! Config documents carry the security type as `"ssh"`/`"telnet"`; the
//! connect request sent down the terminal stream carries it as an integer
//! (`0` telnet, `1` ssh).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

// ---------------------------------------------------------------------------
// Security type
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SecurityType {
    #[default]
    Telnet,
    Ssh,
}

impl SecurityType {
    /// Integer code used by the terminal stream.
    pub fn wire_code(self) -> u8 {
        match self {
            SecurityType::Telnet => 0,
            SecurityType::Ssh => 1,
        }
    }

    /// Interpret a loosely typed security value: `"ssh"`, `"telnet"`, `0`, `1`
    /// or `"0"`/`"1"`. Anything else is `None`.
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::String(s) => s.parse().ok(),
            Value::Number(n) => match n.as_u64()? {
                0 => Some(SecurityType::Telnet),
                1 => Some(SecurityType::Ssh),
                _ => None,
            },
            _ => None,
        }
    }

    /// Interpret a `security` setting, either `{"type": <value>}` or a bare
    /// value.
    pub fn from_setting(security: &Value) -> Option<Self> {
        match security.get("type") {
            Some(kind) => Self::from_value(kind),
            None => Self::from_value(security),
        }
    }
}

impl std::str::FromStr for SecurityType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "telnet" | "0" => Ok(SecurityType::Telnet),
            "ssh" | "1" => Ok(SecurityType::Ssh),
            other => Err(format!("unknown security type: {other}")),
        }
    }
}

impl std::fmt::Display for SecurityType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SecurityType::Telnet => f.write_str("telnet"),
            SecurityType::Ssh => f.write_str("ssh"),
        }
    }
}

// ---------------------------------------------------------------------------
// Config service documents
// ---------------------------------------------------------------------------

/// The per-user session document (`_defaultVT.json`).
///
/// `port` and `security` stay untyped JSON values: a stored document may
/// hold anything, and an odd field must not cost the rest of the document.
/// Validation decides what is acceptable.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionConfigDocument {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub security: Option<Value>,
    #[serde(default)]
    pub port: Value,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub host: String,
}

impl SessionConfigDocument {
    pub fn new(host: impl Into<String>, port: Value, security: SecurityType) -> Self {
        Self {
            security: Some(serde_json::json!({"type": security.to_string()})),
            port,
            host: host.into(),
        }
    }

    /// The stored security type, if it names one this client knows.
    pub fn security_type(&self) -> Option<SecurityType> {
        SecurityType::from_setting(self.security.as_ref()?)
    }
}

fn null_as_empty<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

/// GET responses from the config service wrap the document.
#[derive(Debug, Clone, Deserialize)]
pub struct ConfigEnvelope {
    pub contents: SessionConfigDocument,
}

/// Response of the proxy-settings endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct ProxySettings {
    #[serde(rename = "zssServerHostName")]
    pub zss_server_host_name: String,
}

// ---------------------------------------------------------------------------
// Terminal stream
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectSecurity {
    #[serde(rename = "type")]
    pub kind: u8,
}

/// Connection settings handed to the terminal session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectRequest {
    pub host: String,
    pub port: u16,
    pub security: ConnectSecurity,
    pub url: String,
    pub connect: bool,
    pub screen_width: String,
    pub screen_height: String,
}

impl ConnectRequest {
    pub fn new(host: String, port: u16, security: SecurityType, url: String) -> Self {
        Self {
            host,
            port,
            security: ConnectSecurity {
                kind: security.wire_code(),
            },
            url,
            connect: true,
            screen_width: "MAX".to_owned(),
            screen_height: "MAX".to_owned(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FontProperties {
    pub size: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RendererSettings {
    pub font_properties: FontProperties,
}

impl RendererSettings {
    pub fn with_font_size(size: u32) -> Self {
        Self {
            font_properties: FontProperties { size },
        }
    }
}

impl Default for RendererSettings {
    fn default() -> Self {
        Self::with_font_size(14)
    }
}

/// Frames sent from the client to the terminal stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ClientFrame {
    #[serde(rename_all = "camelCase")]
    Connect {
        connection_settings: ConnectRequest,
        renderer_settings: RendererSettings,
    },
    Resize {
        width: u32,
        height: u32,
    },
    Input {
        data: String,
    },
}

impl ClientFrame {
    /// Serialize with a send timestamp.
    pub fn to_json(&self) -> String {
        let stamped = StampedFrame {
            frame: self,
            timestamp: Utc::now(),
        };
        serde_json::to_string(&stamped).unwrap_or_default()
    }
}

#[derive(Serialize)]
struct StampedFrame<'a> {
    #[serde(flatten)]
    frame: &'a ClientFrame,
    timestamp: DateTime<Utc>,
}

/// Text frames received from the terminal stream.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerFrame {
    #[serde(rename = "type")]
    pub msg_type: String,
    #[serde(default)]
    pub data: Option<Value>,
}

// ---------------------------------------------------------------------------
// Launch metadata and dispatcher messages
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LaunchMetadata {
    #[serde(default)]
    pub data: Option<LaunchData>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LaunchData {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub connection_settings: Option<LaunchConnectionSettings>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LaunchConnectionSettings {
    #[serde(default, deserialize_with = "null_as_empty")]
    pub host: String,
    #[serde(default)]
    pub port: Value,
    #[serde(default)]
    pub security: Option<Value>,
}

impl LaunchConnectionSettings {
    /// `security` may be `{"type": 1}`, `{"type": "ssh"}` or a bare value.
    pub fn security_type(&self) -> Option<SecurityType> {
        SecurityType::from_setting(self.security.as_ref()?)
    }
}

/// Message delivered by the host dispatcher.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DispatcherMessage {
    #[serde(default)]
    pub data: Option<MessageData>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MessageData {
    #[serde(rename = "type")]
    pub kind: String,
}
