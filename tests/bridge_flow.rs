use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Map, Value};
use tokio::sync::Notify;
use tokio::time::{sleep, timeout};

use nimbus_bridge::{
    BridgeRuntime, CommandExecutor, ExecuteError, ExecuteResult, KernelOperation,
    LifecycleOutcome, ProxyMode,
};

const TEST_TIMEOUT: Duration = Duration::from_secs(2);

/// Backend stand-in. When a gate is present, `start_kernel` blocks until the
/// test releases it, keeping the lifecycle guard observably busy.
struct FakeBackend {
    calls: Mutex<Vec<(String, Map<String, Value>)>>,
    start_gate: Option<Arc<Notify>>,
    running: Mutex<bool>,
}

impl FakeBackend {
    fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            start_gate: None,
            running: Mutex::new(false),
        }
    }

    fn gated(gate: Arc<Notify>) -> Self {
        Self {
            start_gate: Some(gate),
            ..Self::new()
        }
    }

    fn calls_for(&self, command: &str) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|(name, _)| name == command)
            .count()
    }
}

#[async_trait]
impl CommandExecutor for FakeBackend {
    async fn execute(&self, command: &str, args: Map<String, Value>) -> ExecuteResult<Value> {
        self.calls.lock().push((command.to_string(), args));
        match command {
            "start_kernel" => {
                if let Some(gate) = &self.start_gate {
                    gate.notified().await;
                }
                *self.running.lock() = true;
                Ok(Value::Null)
            }
            "stop_kernel" => {
                *self.running.lock() = false;
                Ok(Value::Null)
            }
            "get_kernel_status" => {
                let running = *self.running.lock();
                Ok(json!({ "running": running, "ready": running }))
            }
            "set_proxy_mode" => Ok(Value::Null),
            other => Err(ExecuteError::UnknownCommand(other.to_string())),
        }
    }
}

async fn runtime_with(backend: Arc<FakeBackend>) -> (BridgeRuntime, tempfile::TempDir) {
    let dir = tempfile::tempdir().expect("tempdir");
    let runtime = BridgeRuntime::with_settings_path(backend, dir.path().join("settings.json"));
    runtime.restore_settings().await;
    (runtime, dir)
}

#[tokio::test]
async fn concurrent_lifecycle_requests_are_single_flighted() {
    let gate = Arc::new(Notify::new());
    let backend = Arc::new(FakeBackend::gated(gate.clone()));
    let (runtime, _dir) = runtime_with(backend.clone()).await;
    let kernel = runtime.kernel();

    let first_kernel = kernel.clone();
    let first = tokio::spawn(async move { first_kernel.start().await });

    let deadline = tokio::time::Instant::now() + TEST_TIMEOUT;
    while !kernel.is_starting() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for start to become active"
        );
        sleep(Duration::from_millis(1)).await;
    }

    // Both a second start and a stop must be turned away, naming the
    // operation that holds the guard.
    let second_start = kernel.start().await.expect("busy start result");
    assert_eq!(
        second_start,
        LifecycleOutcome::Busy(KernelOperation::Start)
    );
    let stop = kernel.stop().await.expect("busy stop result");
    assert_eq!(stop, LifecycleOutcome::Busy(KernelOperation::Start));

    gate.notify_one();
    let first = timeout(TEST_TIMEOUT, first)
        .await
        .expect("first start timeout")
        .expect("join first start")
        .expect("first start result");
    assert_eq!(first, LifecycleOutcome::Completed);

    assert_eq!(backend.calls_for("start_kernel"), 1);
    assert!(!kernel.is_starting());
}

#[tokio::test]
async fn full_lifecycle_flow_against_a_fake_backend() {
    let backend = Arc::new(FakeBackend::new());
    let (runtime, _dir) = runtime_with(backend.clone()).await;
    let kernel = runtime.kernel();

    let started = kernel.ensure_running().await.expect("ensure running");
    assert_eq!(started, LifecycleOutcome::Completed);

    // Served from cache: the probe before start plus one refresh afterwards.
    let status = kernel.status().await.expect("status");
    assert!(status.running);
    kernel.status().await.expect("cached status");
    assert_eq!(backend.calls_for("get_kernel_status"), 2);

    kernel
        .switch_mode(ProxyMode::Global)
        .await
        .expect("switch mode");
    assert_eq!(
        runtime.settings().snapshot().await.proxy_mode,
        ProxyMode::Global
    );

    let stopped = kernel.stop().await.expect("stop");
    assert_eq!(stopped, LifecycleOutcome::Completed);
    let status = kernel.status().await.expect("status after stop");
    assert!(!status.running);
}

#[tokio::test]
async fn ensure_running_is_idempotent_once_the_kernel_is_up() {
    let backend = Arc::new(FakeBackend::new());
    let (runtime, _dir) = runtime_with(backend.clone()).await;
    let kernel = runtime.kernel();

    kernel.ensure_running().await.expect("first ensure");
    kernel.invalidate_status();
    let second = kernel.ensure_running().await.expect("second ensure");

    assert_eq!(second, LifecycleOutcome::AlreadyRunning);
    assert_eq!(backend.calls_for("start_kernel"), 1);
}
