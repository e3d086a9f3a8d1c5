//! Application configuration (`~/.config/vt-client/config.toml`).
//!
//! Every section has defaults, so a partial file (or none at all) works.

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::dispatcher::RecognizerTable;
use crate::layout::Viewport;
use crate::protocol::RendererSettings;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub service: ServiceConfig,
    pub terminal: TerminalConfig,
    pub dispatcher: RecognizerTable,
}

/// Where session settings are persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    #[default]
    Http,
    File,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Root of the config service.
    pub base_url: String,
    /// Terminal stream endpoint.
    pub stream_url: String,
    pub plugin_id: String,
    pub scope: String,
    pub store: StoreKind,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8543".to_owned(),
            stream_url: "ws://localhost:8543/plugins/org.zowe.terminal.vt/services/terminalstream/_current/"
                .to_owned(),
            plugin_id: "org.zowe.terminal.vt".to_owned(),
            scope: "user".to_owned(),
            store: StoreKind::Http,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TerminalConfig {
    pub font_size: u32,
    /// Pixel size of the area the shell gives the component.
    pub width: u32,
    pub height: u32,
}

impl Default for TerminalConfig {
    fn default() -> Self {
        Self {
            font_size: 14,
            width: 1024,
            height: 768,
        }
    }
}

impl TerminalConfig {
    pub fn renderer(&self) -> RendererSettings {
        RendererSettings::with_font_size(self.font_size)
    }

    pub fn viewport(&self) -> Viewport {
        Viewport {
            width: self.width,
            height: self.height,
        }
    }
}

impl AppConfig {
    pub fn from_toml(s: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(s)
    }

    /// Read `path`; a missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("read {}", path.display()))?;
        Self::from_toml(&text).with_context(|| format!("parse {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let c = AppConfig::default();
        assert_eq!(c.service.store, StoreKind::Http);
        assert_eq!(c.service.scope, "user");
        assert_eq!(c.terminal.renderer(), RendererSettings::default());
        assert!(c.dispatcher.recognizers.is_empty());
    }

    #[test]
    fn partial_toml() {
        let c = AppConfig::from_toml(
            r#"
[service]
store = "file"

[terminal]
font_size = 18
"#,
        )
        .expect("partial parse failed");
        assert_eq!(c.service.store, StoreKind::File);
        assert_eq!(c.service.plugin_id, "org.zowe.terminal.vt");
        assert_eq!(c.terminal.font_size, 18);
        assert_eq!(c.terminal.width, 1024);
    }

    #[test]
    fn invalid_toml() {
        assert!(AppConfig::from_toml("this is not [[ valid toml").is_err());
    }

    #[test]
    fn missing_file_is_default() {
        let dir = tempfile::tempdir().unwrap();
        let c = AppConfig::load(&dir.path().join("config.toml")).unwrap();
        assert_eq!(c.terminal.height, 768);
    }
}
