//! Persistence of the per-user session document.
//!
//! Two stores:
//! - [`HttpConfigStore`]: the config service, `GET`/`PUT` of
//!   `<base>/plugins/org.zowe.configjs/services/data/_current/<plugin>/<scope>/sessions/_defaultVT.json`
//!   plus the proxy-settings lookup at `<base>/server/proxies`.
//! - [`FileConfigStore`]: the same document as a JSON file on disk.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use tracing::{debug, info};

use crate::error::ConfigLoadError;
use crate::protocol::{ConfigEnvelope, ProxySettings, SessionConfigDocument};

pub const SESSION_FILE: &str = "_defaultVT.json";
const CONFIG_SERVICE_PLUGIN: &str = "org.zowe.configjs";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

pub trait SessionConfigStore {
    fn load(&self) -> impl Future<Output = Result<SessionConfigDocument, ConfigLoadError>> + Send;

    fn save(&self, doc: &SessionConfigDocument) -> impl Future<Output = Result<()>> + Send;

    /// Host name of the server proxy, used when the stored host is empty.
    fn proxy_host(&self) -> impl Future<Output = Result<String>> + Send;
}

// ---------------------------------------------------------------------------
// HTTP store
// ---------------------------------------------------------------------------

pub struct HttpConfigStore {
    client: reqwest::Client,
    base_url: String,
    plugin_id: String,
    scope: String,
}

impl HttpConfigStore {
    pub fn new(base_url: &str, plugin_id: &str, scope: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_owned(),
            plugin_id: plugin_id.to_owned(),
            scope: scope.to_owned(),
        }
    }

    pub fn session_uri(&self) -> String {
        format!(
            "{}/plugins/{}/services/data/_current/{}/{}/sessions/{}",
            self.base_url, CONFIG_SERVICE_PLUGIN, self.plugin_id, self.scope, SESSION_FILE
        )
    }

    pub fn proxies_uri(&self) -> String {
        format!("{}/server/proxies", self.base_url)
    }
}

impl SessionConfigStore for HttpConfigStore {
    async fn load(&self) -> Result<SessionConfigDocument, ConfigLoadError> {
        let uri = self.session_uri();
        debug!(target: "config_store", uri = %uri, "Loading session config");

        let resp = self
            .client
            .get(&uri)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await
            .map_err(|e| ConfigLoadError::Unknown {
                detail: format!("GET {uri}: {e}"),
            })?;

        let status = resp.status();
        if !status.is_success() {
            return Err(ConfigLoadError::Status {
                status: status.as_u16(),
                text: status.canonical_reason().unwrap_or_default().to_owned(),
            });
        }

        let envelope: ConfigEnvelope = resp.json().await.map_err(|e| ConfigLoadError::Unknown {
            detail: format!("decode {uri}: {e}"),
        })?;
        Ok(envelope.contents)
    }

    async fn save(&self, doc: &SessionConfigDocument) -> Result<()> {
        let uri = self.session_uri();
        self.client
            .put(&uri)
            .json(doc)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await
            .with_context(|| format!("PUT {uri}"))?
            .error_for_status()
            .with_context(|| format!("PUT {uri} rejected"))?;
        info!(target: "config_store", uri = %uri, "Session config saved");
        Ok(())
    }

    async fn proxy_host(&self) -> Result<String> {
        let uri = self.proxies_uri();
        let proxies: ProxySettings = self
            .client
            .get(&uri)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await
            .with_context(|| format!("GET {uri}"))?
            .error_for_status()
            .with_context(|| format!("GET {uri} rejected"))?
            .json()
            .await
            .with_context(|| format!("decode {uri}"))?;
        Ok(proxies.zss_server_host_name)
    }
}

// ---------------------------------------------------------------------------
// File store
// ---------------------------------------------------------------------------

pub struct FileConfigStore {
    path: PathBuf,
}

impl FileConfigStore {
    /// Store the document under `<config_dir>/sessions/`.
    pub fn new(config_dir: &Path) -> Self {
        Self {
            path: config_dir.join("sessions").join(SESSION_FILE),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SessionConfigStore for FileConfigStore {
    async fn load(&self) -> Result<SessionConfigDocument, ConfigLoadError> {
        let text = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| ConfigLoadError::Unknown {
                detail: format!("read {}: {e}", self.path.display()),
            })?;
        serde_json::from_str(&text).map_err(|e| ConfigLoadError::Unknown {
            detail: format!("parse {}: {e}", self.path.display()),
        })
    }

    async fn save(&self, doc: &SessionConfigDocument) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("create {}", parent.display()))?;
        }
        let json = serde_json::to_string_pretty(doc).context("serialise session config")?;
        tokio::fs::write(&self.path, json)
            .await
            .with_context(|| format!("write {}", self.path.display()))?;
        info!(target: "config_store", path = %self.path.display(), "Session config saved");
        Ok(())
    }

    async fn proxy_host(&self) -> Result<String> {
        bail!("no proxy settings available for file-backed sessions")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::SecurityType;
    use serde_json::json;

    #[test]
    fn session_uri_layout() {
        let store = HttpConfigStore::new("http://localhost:8543/", "org.zowe.terminal.vt", "user");
        assert_eq!(
            store.session_uri(),
            "http://localhost:8543/plugins/org.zowe.configjs/services/data/_current/org.zowe.terminal.vt/user/sessions/_defaultVT.json"
        );
        assert_eq!(store.proxies_uri(), "http://localhost:8543/server/proxies");
    }

    #[tokio::test]
    async fn file_store_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileConfigStore::new(dir.path());
        let doc = SessionConfigDocument::new("build01", json!(22), SecurityType::Ssh);
        store.save(&doc).await.unwrap();
        assert!(store.path().ends_with("sessions/_defaultVT.json"));
        assert_eq!(store.load().await.unwrap(), doc);
    }

    #[tokio::test]
    async fn file_store_missing_file_is_unknown_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileConfigStore::new(dir.path());
        let err = store.load().await.unwrap_err();
        assert!(matches!(err, ConfigLoadError::Unknown { .. }));
        assert_eq!(err.to_string(), "Unknown config load error. Check log");
    }

    #[tokio::test]
    async fn file_store_has_no_proxy() {
        let dir = tempfile::tempdir().unwrap();
        assert!(FileConfigStore::new(dir.path()).proxy_host().await.is_err());
    }
}
