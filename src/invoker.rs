use std::sync::Arc;
use std::time::Duration;

use log::{debug, warn};
use serde_json::{Map, Value};

use crate::executor::{CommandExecutor, ExecuteResult};
use crate::settings::SettingsStore;

pub const DEFAULT_API_PORT_KEY: &str = "apiPort";
pub const DEFAULT_PROXY_PORT_KEY: &str = "proxyPort";
pub const DEFAULT_RESTORE_WAIT: Duration = Duration::from_millis(5000);

/// How a port from the settings snapshot is merged into outbound arguments.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum PortInjection {
    /// Leave the argument map untouched.
    #[default]
    Skip,
    /// Merge under the conventional key.
    DefaultKey,
    /// Merge under a command-specific key.
    Key(String),
}

impl PortInjection {
    fn resolve<'a>(&'a self, default_key: &'a str) -> Option<&'a str> {
        match self {
            PortInjection::Skip => None,
            PortInjection::DefaultKey => Some(default_key),
            PortInjection::Key(key) => Some(key.as_str()),
        }
    }
}

/// Per-call invocation context. Constructed fresh for every call, never
/// persisted.
#[derive(Debug, Clone, Default)]
pub struct InvokeOptions {
    pub inject_api_port: PortInjection,
    pub inject_proxy_port: PortInjection,
    /// Do not block on settings restoration for this call.
    pub skip_restore_wait: bool,
    /// Overrides the invoker-wide restore wait for this call.
    pub restore_wait: Option<Duration>,
}

/// Single entry point for issuing named backend commands. Injected ports come
/// from the shared settings store, read only after its restore signal has
/// completed (or the bounded wait has elapsed).
pub struct ContextInvoker {
    executor: Arc<dyn CommandExecutor>,
    settings: Arc<SettingsStore>,
    restore_wait: Duration,
}

impl ContextInvoker {
    pub fn new(executor: Arc<dyn CommandExecutor>, settings: Arc<SettingsStore>) -> Self {
        Self {
            executor,
            settings,
            restore_wait: DEFAULT_RESTORE_WAIT,
        }
    }

    pub fn with_restore_wait(mut self, restore_wait: Duration) -> Self {
        self.restore_wait = restore_wait;
        self
    }

    pub async fn invoke(
        &self,
        command: &str,
        args: Option<Map<String, Value>>,
        options: InvokeOptions,
    ) -> ExecuteResult<Value> {
        if !options.skip_restore_wait {
            let limit = options.restore_wait.unwrap_or(self.restore_wait);
            if !self.settings.wait_until_restored(limit).await {
                // Proceed with whatever is currently held; the backend falls
                // back to sane defaults for unset ports.
                warn!(
                    "[bridge:invoke] Settings restore not finished after {}ms; issuing {} with current values",
                    limit.as_millis(),
                    command
                );
            }
        }

        let snapshot = self.settings.snapshot().await;
        let mut args = args.unwrap_or_default();

        if let Some(key) = options.inject_api_port.resolve(DEFAULT_API_PORT_KEY) {
            if !args.contains_key(key) {
                args.insert(key.to_string(), Value::from(snapshot.api_port));
            }
        }
        if let Some(key) = options.inject_proxy_port.resolve(DEFAULT_PROXY_PORT_KEY) {
            if !args.contains_key(key) {
                args.insert(key.to_string(), Value::from(snapshot.proxy_port));
            }
        }

        debug!("[bridge:invoke] {} ({} args)", command, args.len());
        self.executor.execute(command, args).await
    }
}
