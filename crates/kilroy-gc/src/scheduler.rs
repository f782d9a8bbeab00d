//! Debounced, self-rescheduling collection trigger.

use crate::collector::Collector;
use crate::error::Result;
use crate::stats::GcStats;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum Phase {
    #[default]
    Idle,
    /// Debounce timer armed
    Pending,
    Running,
}

#[derive(Debug, Default)]
struct State {
    phase: Phase,
    /// A request arrived while a pass was running
    rerun: bool,
}

struct Inner {
    collector: Arc<Collector>,
    state: Mutex<State>,
    passes: AtomicU64,
    failures: AtomicU64,
    last_stats: Mutex<Option<GcStats>>,
    idle: Notify,
}

/// Collection scheduler
///
/// Storage activity calls [`GcScheduler::request_gc`]. The first request arms
/// a short debounce timer and further requests while it is armed are folded
/// into it. A request that arrives while a pass is running makes the
/// scheduler run again as soon as that pass succeeds. A failed pass is
/// logged and not retried; the next request starts over.
///
/// Cloning is cheap; clones drive the same scheduler.
#[derive(Clone)]
pub struct GcScheduler {
    inner: Arc<Inner>,
}

impl GcScheduler {
    pub fn new(collector: Arc<Collector>) -> Self {
        Self {
            inner: Arc::new(Inner {
                collector,
                state: Mutex::new(State::default()),
                passes: AtomicU64::new(0),
                failures: AtomicU64::new(0),
                last_stats: Mutex::new(None),
                idle: Notify::new(),
            }),
        }
    }

    pub fn collector(&self) -> &Arc<Collector> {
        &self.inner.collector
    }

    /// Clear the generation space left by an earlier, interrupted run.
    ///
    /// Call once at startup, before the first request.
    pub async fn initialize(&self) -> kilroy_core::Result<()> {
        self.inner.collector.store().initialize_generations().await?;
        info!(
            "Collector initialized at {}",
            self.inner.collector.store().root().display()
        );
        Ok(())
    }

    /// Ask for a collection pass soon
    ///
    /// Must be called from within a Tokio runtime; elsewhere the request is
    /// dropped with a warning.
    pub fn request_gc(&self) {
        {
            let mut state = self.inner.state.lock();
            match state.phase {
                Phase::Pending => return,
                Phase::Running => {
                    state.rerun = true;
                    return;
                }
                Phase::Idle => state.phase = Phase::Pending,
            }
        }

        let handle = match Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => {
                warn!("Collection requested outside a runtime, ignoring");
                self.inner.state.lock().phase = Phase::Idle;
                self.inner.idle.notify_waiters();
                return;
            }
        };
        debug!("Collection pass scheduled");
        let inner = self.inner.clone();
        handle.spawn(async move { inner.run().await });
    }

    /// Run one pass now, outside the debounce cycle.
    pub async fn run_now(&self) -> Result<GcStats> {
        let result = self.inner.collector.run_pass().await;
        self.inner.record(&result);
        result
    }

    /// Passes that completed successfully
    pub fn passes_completed(&self) -> u64 {
        self.inner.passes.load(Ordering::SeqCst)
    }

    /// Passes that were aborted
    pub fn passes_failed(&self) -> u64 {
        self.inner.failures.load(Ordering::SeqCst)
    }

    /// Statistics of the most recent successful pass
    pub fn last_stats(&self) -> Option<GcStats> {
        self.inner.last_stats.lock().clone()
    }

    pub fn is_idle(&self) -> bool {
        self.inner.state.lock().phase == Phase::Idle
    }

    /// Wait until no pass is pending or running
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.inner.idle.notified();
            if self.is_idle() {
                return;
            }
            notified.await;
        }
    }
}

impl Inner {
    async fn run(self: Arc<Self>) {
        let mut debounce = true;
        loop {
            if debounce {
                tokio::time::sleep(self.collector.config().debounce()).await;
            }
            {
                let mut state = self.state.lock();
                state.phase = Phase::Running;
                state.rerun = false;
            }

            let result = self.collector.run_pass().await;
            self.record(&result);

            let again = {
                let mut state = self.state.lock();
                let again = result.is_ok() && state.rerun;
                state.rerun = false;
                state.phase = if again { Phase::Running } else { Phase::Idle };
                again
            };
            if !again {
                break;
            }
            debug!("Storage changed during the pass, collecting again");
            debounce = false;
        }
        self.idle.notify_waiters();
    }

    fn record(&self, result: &Result<GcStats>) {
        match result {
            Ok(stats) => {
                self.passes.fetch_add(1, Ordering::SeqCst);
                *self.last_stats.lock() = Some(stats.clone());
            }
            Err(e) => {
                self.failures.fetch_add(1, Ordering::SeqCst);
                error!("Collection pass failed: {}", e);
            }
        }
    }
}
