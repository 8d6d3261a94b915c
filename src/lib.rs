//! Client-side bridge between the Nimbus UI stores and the backend process
//! that owns the proxy kernel. Outbound commands pass through a
//! context-enriching invoker, kernel start/stop is single-flighted, and
//! status reads are memoized for a short window.

mod executor;
mod invoker;
mod kernel_manager;
mod lifecycle;
mod settings;
mod status_cache;

pub use executor::{CommandExecutor, ExecuteError, ExecuteResult, HttpCommandExecutor};
pub use invoker::{
    ContextInvoker, InvokeOptions, PortInjection, DEFAULT_API_PORT_KEY, DEFAULT_PROXY_PORT_KEY,
    DEFAULT_RESTORE_WAIT,
};
pub use kernel_manager::{KernelManager, KernelStatus, LifecycleOutcome};
pub use lifecycle::{KernelOperation, LifecycleGuard};
pub use settings::{
    BridgeSettings, ProxyMode, SettingsStore, DEFAULT_API_PORT, DEFAULT_PROXY_PORT,
};
pub use status_cache::StatusCache;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use log::{info, warn};

/// Everything the application constructs once at startup and hands to the UI
/// stores by reference. No hidden globals; single instance per app by
/// construction.
#[derive(Clone)]
pub struct BridgeRuntime {
    settings: Arc<SettingsStore>,
    invoker: Arc<ContextInvoker>,
    kernel: Arc<KernelManager>,
}

impl BridgeRuntime {
    pub fn new(executor: Arc<dyn CommandExecutor>) -> Result<Self> {
        Ok(Self::assemble(executor, Arc::new(SettingsStore::new()?)))
    }

    pub fn with_settings_path(
        executor: Arc<dyn CommandExecutor>,
        path: impl Into<PathBuf>,
    ) -> Self {
        Self::assemble(executor, Arc::new(SettingsStore::with_path(path)))
    }

    fn assemble(executor: Arc<dyn CommandExecutor>, settings: Arc<SettingsStore>) -> Self {
        let invoker = Arc::new(ContextInvoker::new(executor, settings.clone()));
        let kernel = Arc::new(KernelManager::new(invoker.clone(), settings.clone()));
        Self {
            settings,
            invoker,
            kernel,
        }
    }

    /// Restore persisted settings. Safe to run from a background task while
    /// the first commands are already being issued; they block on the restore
    /// signal this completes.
    pub async fn restore_settings(&self) -> BridgeSettings {
        let settings = self.settings.restore().await;
        info!(
            "[bridge] Settings restored (api {}, proxy {}, mode {})",
            settings.api_port,
            settings.proxy_port,
            settings.proxy_mode.as_str()
        );
        settings
    }

    /// Bring the kernel up, logging instead of failing when the backend is
    /// not ready yet. Retry policy belongs to the caller's watchdog.
    pub async fn start_kernel(&self) {
        match self.kernel.ensure_running().await {
            Ok(LifecycleOutcome::Busy(active)) => {
                info!("[bridge] Kernel {} already in flight", active.as_str());
            }
            Ok(_) => {}
            Err(err) => warn!("[bridge] Failed to start kernel: {}", err),
        }
    }

    pub fn settings(&self) -> &SettingsStore {
        self.settings.as_ref()
    }

    pub fn invoker(&self) -> Arc<ContextInvoker> {
        self.invoker.clone()
    }

    pub fn kernel(&self) -> Arc<KernelManager> {
        self.kernel.clone()
    }
}
