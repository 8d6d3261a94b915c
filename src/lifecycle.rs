use std::future::Future;

use parking_lot::Mutex;

/// Kernel operations that must never overlap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelOperation {
    Start,
    Stop,
}

impl KernelOperation {
    pub fn as_str(self) -> &'static str {
        match self {
            KernelOperation::Start => "start",
            KernelOperation::Stop => "stop",
        }
    }
}

/// Single-flight guard over kernel start/stop. An overlapping request is
/// handed a caller-built busy value immediately; nothing is queued and the
/// rejected handler is never invoked.
#[derive(Default)]
pub struct LifecycleGuard {
    active: Mutex<Option<KernelOperation>>,
}

impl LifecycleGuard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn active_operation(&self) -> Option<KernelOperation> {
        *self.active.lock()
    }

    pub fn is_active(&self, operation: KernelOperation) -> bool {
        self.active_operation() == Some(operation)
    }

    /// Run `handler` unless an operation is already in flight, in which case
    /// `on_busy` supplies the return value. The guard is released when the
    /// handler settles, whatever the outcome.
    pub async fn run<T, B, F, Fut>(&self, operation: KernelOperation, on_busy: B, handler: F) -> T
    where
        B: FnOnce(KernelOperation) -> T,
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        {
            // No suspension between the check and the write: two same-instant
            // requests cannot both observe an idle guard.
            let mut active = self.active.lock();
            if let Some(current) = *active {
                return on_busy(current);
            }
            *active = Some(operation);
        }

        // Released on drop, covering failure and callers that drop the
        // future mid-flight.
        let _release = Release {
            active: &self.active,
        };
        handler().await
    }
}

struct Release<'a> {
    active: &'a Mutex<Option<KernelOperation>>,
}

impl Drop for Release<'_> {
    fn drop(&mut self) {
        *self.active.lock() = None;
    }
}
