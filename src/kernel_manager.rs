use std::sync::Arc;
use std::time::Duration;

use log::{info, warn};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map};
use uuid::Uuid;

use crate::executor::{ExecuteError, ExecuteResult};
use crate::invoker::{ContextInvoker, InvokeOptions, PortInjection};
use crate::lifecycle::{KernelOperation, LifecycleGuard};
use crate::settings::{ProxyMode, SettingsStore};
use crate::status_cache::StatusCache;

const STATUS_CACHE_KEY: &str = "kernel-status";
const STATUS_CACHE_TTL: Duration = Duration::from_millis(2000);

const CMD_START_KERNEL: &str = "start_kernel";
const CMD_STOP_KERNEL: &str = "stop_kernel";
const CMD_GET_KERNEL_STATUS: &str = "get_kernel_status";
const CMD_SET_PROXY_MODE: &str = "set_proxy_mode";

/// Result of a gated lifecycle request. `Busy` is a normal value, not an
/// error; the caller owns the user-facing message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleOutcome {
    Completed,
    AlreadyRunning,
    Busy(KernelOperation),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct KernelStatus {
    pub running: bool,
    pub ready: bool,
    pub version: Option<String>,
}

/// Drives the proxy kernel through the backend executor: start/stop are
/// single-flighted, status reads are memoized for a short window, and any
/// mutating call drops the memoized status.
pub struct KernelManager {
    invoker: Arc<ContextInvoker>,
    settings: Arc<SettingsStore>,
    guard: LifecycleGuard,
    status_cache: StatusCache<KernelStatus>,
    launch_id: parking_lot::Mutex<Option<Uuid>>,
}

impl KernelManager {
    pub fn new(invoker: Arc<ContextInvoker>, settings: Arc<SettingsStore>) -> Self {
        Self {
            invoker,
            settings,
            guard: LifecycleGuard::new(),
            status_cache: StatusCache::new(STATUS_CACHE_TTL),
            launch_id: parking_lot::Mutex::new(None),
        }
    }

    pub fn is_starting(&self) -> bool {
        self.guard.is_active(KernelOperation::Start)
    }

    pub fn is_stopping(&self) -> bool {
        self.guard.is_active(KernelOperation::Stop)
    }

    /// Local identifier of the most recent successful start, for correlating
    /// log lines across the stores that share this manager.
    pub fn current_launch(&self) -> Option<Uuid> {
        *self.launch_id.lock()
    }

    pub async fn start(&self) -> ExecuteResult<LifecycleOutcome> {
        self.guard
            .run(
                KernelOperation::Start,
                |active| Ok(LifecycleOutcome::Busy(active)),
                || self.start_inner(),
            )
            .await
    }

    async fn start_inner(&self) -> ExecuteResult<LifecycleOutcome> {
        self.status_cache.clear();
        let options = InvokeOptions {
            inject_api_port: PortInjection::DefaultKey,
            inject_proxy_port: PortInjection::DefaultKey,
            ..InvokeOptions::default()
        };
        self.invoker.invoke(CMD_START_KERNEL, None, options).await?;

        let launch = Uuid::new_v4();
        *self.launch_id.lock() = Some(launch);
        self.status_cache.clear();
        info!("[bridge:kernel] Kernel started (launch {})", launch);
        Ok(LifecycleOutcome::Completed)
    }

    pub async fn stop(&self) -> ExecuteResult<LifecycleOutcome> {
        self.guard
            .run(
                KernelOperation::Stop,
                |active| Ok(LifecycleOutcome::Busy(active)),
                || self.stop_inner(),
            )
            .await
    }

    async fn stop_inner(&self) -> ExecuteResult<LifecycleOutcome> {
        self.status_cache.clear();
        self.invoker
            .invoke(CMD_STOP_KERNEL, None, InvokeOptions::default())
            .await?;

        *self.launch_id.lock() = None;
        self.status_cache.clear();
        info!("[bridge:kernel] Kernel stopped");
        Ok(LifecycleOutcome::Completed)
    }

    /// Sequential stop-then-start; a busy result from either phase wins and
    /// short-circuits the rest.
    pub async fn restart(&self) -> ExecuteResult<LifecycleOutcome> {
        if let LifecycleOutcome::Busy(active) = self.stop().await? {
            return Ok(LifecycleOutcome::Busy(active));
        }
        self.start().await
    }

    /// Current kernel status, served from the cache within its TTL.
    pub async fn status(&self) -> ExecuteResult<KernelStatus> {
        if let Some(cached) = self.status_cache.get(STATUS_CACHE_KEY) {
            return Ok(cached);
        }

        let options = InvokeOptions {
            inject_api_port: PortInjection::DefaultKey,
            ..InvokeOptions::default()
        };
        let raw = self
            .invoker
            .invoke(CMD_GET_KERNEL_STATUS, None, options)
            .await?;
        let status: KernelStatus =
            serde_json::from_value(raw).map_err(|err| ExecuteError::MalformedResponse {
                command: CMD_GET_KERNEL_STATUS.to_string(),
                message: err.to_string(),
            })?;

        self.status_cache.set(STATUS_CACHE_KEY, status.clone());
        Ok(status)
    }

    /// Start the kernel unless a fresh status probe says it is already up. A
    /// failed probe is logged and treated as "not running".
    pub async fn ensure_running(&self) -> ExecuteResult<LifecycleOutcome> {
        match self.status().await {
            Ok(status) if status.running => return Ok(LifecycleOutcome::AlreadyRunning),
            Ok(_) => {}
            Err(err) => {
                warn!("[bridge:kernel] Status probe failed before start: {}", err);
            }
        }
        self.start().await
    }

    /// Switch the proxy mode on the kernel, persist it, and drop the memoized
    /// status.
    pub async fn switch_mode(&self, mode: ProxyMode) -> ExecuteResult<()> {
        self.status_cache.clear();
        let mut args = Map::new();
        args.insert("mode".to_string(), json!(mode.as_str()));
        let options = InvokeOptions {
            inject_proxy_port: PortInjection::DefaultKey,
            ..InvokeOptions::default()
        };
        self.invoker
            .invoke(CMD_SET_PROXY_MODE, Some(args), options)
            .await?;

        if let Err(err) = self
            .settings
            .update_with(|settings| settings.proxy_mode = mode)
            .await
        {
            warn!("[bridge:kernel] Failed to persist proxy mode: {}", err);
        }
        info!("[bridge:kernel] Proxy mode set to {}", mode.as_str());
        Ok(())
    }

    /// Invalidation hook for backend status-change notifications delivered by
    /// the event subscription outside this crate.
    pub fn invalidate_status(&self) {
        self.status_cache.clear();
    }
}
