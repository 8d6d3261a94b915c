use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use log::warn;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::sync::{watch, RwLock};
use tokio::time::timeout;

pub const DEFAULT_API_PORT: u16 = 9090;
pub const DEFAULT_PROXY_PORT: u16 = 7890;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProxyMode {
    #[default]
    Rule,
    Global,
    Direct,
}

impl ProxyMode {
    pub fn as_str(self) -> &'static str {
        match self {
            ProxyMode::Rule => "rule",
            ProxyMode::Global => "global",
            ProxyMode::Direct => "direct",
        }
    }
}

/// Persisted bridge configuration. The backend provides sane fallbacks, so a
/// missing file simply yields the defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BridgeSettings {
    pub api_port: u16,
    pub proxy_port: u16,
    pub proxy_mode: ProxyMode,
    pub updated_at: Option<i64>,
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self {
            api_port: DEFAULT_API_PORT,
            proxy_port: DEFAULT_PROXY_PORT,
            proxy_mode: ProxyMode::default(),
            updated_at: None,
        }
    }
}

/// On-disk settings with an in-memory snapshot and a one-shot restore signal.
/// Single writer (the owning store), any number of readers.
pub struct SettingsStore {
    path: PathBuf,
    state: RwLock<BridgeSettings>,
    restored_tx: watch::Sender<bool>,
}

impl SettingsStore {
    pub fn new() -> Result<Self> {
        // ~/.config/nimbus for consistency with the web build
        let home = dirs::home_dir().ok_or_else(|| anyhow!("No home directory"))?;
        let mut path = home;
        path.push(".config");
        path.push("nimbus");
        path.push("settings.json");
        Ok(Self::with_path(path))
    }

    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        let (restored_tx, _) = watch::channel(false);
        Self {
            path: path.into(),
            state: RwLock::new(BridgeSettings::default()),
            restored_tx,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_restored(&self) -> bool {
        *self.restored_tx.borrow()
    }

    /// Load persisted settings from disk and complete the restore signal.
    /// An unreadable or malformed file is logged and leaves the defaults in
    /// place; the signal completes either way so dependents never hang on a
    /// broken file.
    pub async fn restore(&self) -> BridgeSettings {
        let loaded = match fs::read(&self.path).await {
            Ok(bytes) => match serde_json::from_slice::<BridgeSettings>(&bytes) {
                Ok(settings) => Some(settings),
                Err(err) => {
                    warn!(
                        "[bridge:settings] Malformed settings file {:?}: {}",
                        self.path, err
                    );
                    None
                }
            },
            Err(err) if err.kind() == ErrorKind::NotFound => None,
            Err(err) => {
                warn!(
                    "[bridge:settings] Failed to read settings file {:?}: {}",
                    self.path, err
                );
                None
            }
        };

        let snapshot = {
            let mut state = self.state.write().await;
            if let Some(loaded) = loaded {
                *state = loaded;
            }
            state.clone()
        };
        self.restored_tx.send_replace(true);
        snapshot
    }

    /// Wait until the restore signal completes, up to `limit`. Returns false
    /// on timeout; the caller decides whether to proceed with current values.
    pub async fn wait_until_restored(&self, limit: Duration) -> bool {
        if self.is_restored() {
            return true;
        }
        let mut rx = self.restored_tx.subscribe();
        let result = matches!(
            timeout(limit, rx.wait_for(|restored| *restored)).await,
            Ok(Ok(_))
        );
        result
    }

    pub async fn snapshot(&self) -> BridgeSettings {
        self.state.read().await.clone()
    }

    /// Mutate the in-memory settings and persist the result. A no-op change
    /// skips the disk write.
    pub async fn update_with<F>(&self, apply: F) -> Result<BridgeSettings>
    where
        F: FnOnce(&mut BridgeSettings),
    {
        let next = {
            let mut state = self.state.write().await;
            let previous = state.clone();
            apply(&mut state);
            if *state == previous {
                return Ok(previous);
            }
            state.updated_at = Some(chrono::Utc::now().timestamp_millis());
            state.clone()
        };
        self.persist(&next).await?;
        Ok(next)
    }

    async fn persist(&self, settings: &BridgeSettings) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await.ok();
        }
        let bytes = serde_json::to_vec_pretty(settings)?;
        fs::write(&self.path, bytes)
            .await
            .with_context(|| format!("Failed to write settings to {:?}", self.path))?;
        Ok(())
    }
}
